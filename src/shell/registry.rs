//! Command registry
//!
//! Maps a command name to its [`CommandSpec`]: help text, flag definitions,
//! argument and path validators, completion kind and handler. Groups of
//! commands may be registered lazily; their loader runs the first time any
//! of their names is looked up.

use super::context::{CommandContext, CommandResult};
use super::flags::FlagDef;
use crate::vfs::{NodeKind, Permission, ResolveOptions};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type SyncHandler = fn(&mut CommandContext) -> CommandResult;
pub type AsyncHandler = for<'a> fn(&'a mut CommandContext) -> LocalBoxFuture<'a, CommandResult>;

#[derive(Clone, Copy)]
pub enum Handler {
    Sync(SyncHandler),
    /// Commands that suspend (modal prompts, timers, mailboxes, saves)
    Async(AsyncHandler),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Sync(_) => write!(f, "Handler::Sync"),
            Handler::Async(_) => write!(f, "Handler::Async"),
        }
    }
}

/// What Tab completes in argument position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Commands,
    Users,
    Paths,
    Aliases,
    None,
}

/// Which positional arguments a path rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRange {
    All,
    Index(usize),
    From(usize),
    /// Every argument except the last (sources of `cp`/`mv`)
    AllButLast,
}

impl ArgRange {
    pub fn contains(&self, index: usize, count: usize) -> bool {
        match *self {
            ArgRange::All => true,
            ArgRange::Index(i) => index == i,
            ArgRange::From(i) => index >= i,
            ArgRange::AllButLast => index + 1 < count,
        }
    }
}

/// Path validation applied before the handler runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub args: ArgRange,
    pub options: ResolveOptions,
}

impl PathRule {
    pub fn new(args: ArgRange) -> Self {
        Self {
            args,
            options: ResolveOptions::new(),
        }
    }

    pub fn allow_missing(mut self) -> Self {
        self.options = self.options.allow_missing();
        self
    }

    pub fn file(mut self) -> Self {
        self.options = self.options.expect(NodeKind::File);
        self
    }

    pub fn dir(mut self) -> Self {
        self.options = self.options.expect(NodeKind::Directory);
        self
    }

    pub fn require(mut self, perm: Permission) -> Self {
        self.options = self.options.require(perm);
        self
    }

    pub fn follow(mut self) -> Self {
        self.options = self.options.follow();
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub usage: &'static str,
    pub flags: Vec<FlagDef>,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub paths: Vec<PathRule>,
    pub completion: CompletionKind,
    /// Arguments reach the handler untouched (no flag extraction)
    pub raw_args: bool,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn new(name: &'static str, summary: &'static str, handler: Handler) -> Self {
        Self {
            name,
            summary,
            usage: "",
            flags: Vec::new(),
            min_args: 0,
            max_args: None,
            paths: Vec::new(),
            completion: CompletionKind::None,
            raw_args: false,
            handler,
        }
    }

    pub fn usage(mut self, usage: &'static str) -> Self {
        self.usage = usage;
        self
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = FlagDef>) -> Self {
        self.flags = flags.into_iter().collect();
        self
    }

    pub fn args(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn path(mut self, rule: PathRule) -> Self {
        self.paths.push(rule);
        self
    }

    pub fn complete(mut self, kind: CompletionKind) -> Self {
        self.completion = kind;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw_args = true;
        self
    }

    /// Usage block printed by `--help` and `help <cmd>`
    pub fn help_text(&self) -> String {
        let mut out = format!("{} - {}", self.name, self.summary);
        if !self.usage.is_empty() {
            out.push_str(&format!("\nUsage: {}", self.usage));
        }
        for flag in &self.flags {
            let short = flag.short.map(|c| format!("-{}, ", c)).unwrap_or_default();
            let value = if flag.takes_value { " VALUE" } else { "" };
            out.push_str(&format!("\n  {}--{}{}", short, flag.name, value));
        }
        out
    }
}

/// Produces a group of specs on first use
pub type Loader = fn() -> Vec<CommandSpec>;

#[derive(Default)]
pub struct CommandRegistry {
    commands: RefCell<BTreeMap<String, Rc<CommandSpec>>>,
    lazy: RefCell<BTreeMap<String, Loader>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: CommandSpec) {
        self.lazy.borrow_mut().remove(spec.name);
        self.commands
            .borrow_mut()
            .insert(spec.name.to_string(), Rc::new(spec));
    }

    /// Defer a group until one of `names` is looked up
    pub fn register_lazy(&self, names: &[&str], loader: Loader) {
        let mut lazy = self.lazy.borrow_mut();
        for name in names {
            lazy.insert(name.to_string(), loader);
        }
    }

    pub fn get(&self, name: &str) -> Option<Rc<CommandSpec>> {
        if let Some(spec) = self.commands.borrow().get(name) {
            return Some(spec.clone());
        }
        let loader = self.lazy.borrow().get(name).copied()?;
        let specs = loader();
        log::debug!("loaded {} lazy commands for '{}'", specs.len(), name);
        for spec in specs {
            self.register(spec);
        }
        self.commands.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.borrow().contains_key(name) || self.lazy.borrow().contains_key(name)
    }

    /// Every known name, loaded or not, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.borrow().keys().cloned().collect();
        names.extend(self.lazy.borrow().keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.commands.borrow().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::context::CommandOutput;

    fn noop(_ctx: &mut CommandContext) -> CommandResult {
        Ok(CommandOutput::default())
    }

    fn group() -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("wc", "count", Handler::Sync(noop)),
            CommandSpec::new("sort", "sort lines", Handler::Sync(noop)),
        ]
    }

    #[test]
    fn test_register_and_get() {
        let reg = CommandRegistry::new();
        reg.register(CommandSpec::new("echo", "print", Handler::Sync(noop)).usage("echo [ARG]..."));
        assert!(reg.contains("echo"));
        assert_eq!(reg.get("echo").map(|s| s.usage), Some("echo [ARG]..."));
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn test_lazy_loading() {
        let reg = CommandRegistry::new();
        reg.register_lazy(&["wc", "sort"], group);
        assert!(reg.contains("sort"));
        assert!(!reg.is_loaded("sort"));
        assert_eq!(reg.list(), vec!["sort", "wc"]);

        assert_eq!(reg.get("wc").map(|s| s.name), Some("wc"));
        assert!(reg.is_loaded("sort"));
        assert_eq!(reg.list(), vec!["sort", "wc"]);
    }

    #[test]
    fn test_arg_range() {
        assert!(ArgRange::All.contains(3, 4));
        assert!(ArgRange::Index(1).contains(1, 2));
        assert!(!ArgRange::Index(1).contains(0, 2));
        assert!(ArgRange::From(1).contains(2, 3));
        assert!(ArgRange::AllButLast.contains(0, 2));
        assert!(!ArgRange::AllButLast.contains(1, 2));
    }

    #[test]
    fn test_help_text() {
        let spec = CommandSpec::new("head", "first lines", Handler::Sync(noop))
            .usage("head [-n N] [FILE]...")
            .flags([FlagDef::value("lines", Some('n'))]);
        let help = spec.help_text();
        assert!(help.starts_with("head - first lines"));
        assert!(help.contains("Usage: head [-n N] [FILE]..."));
        assert!(help.contains("-n, --lines VALUE"));
    }
}
