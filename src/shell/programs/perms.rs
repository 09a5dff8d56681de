//! Permission commands: chmod, chown, chgrp

use crate::shell::context::{CommandContext, CommandOutput, CommandResult};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::registry::{ArgRange, CommandSpec, CompletionKind, Handler, PathRule};
use crate::vfs::{Access, FileMode, FsResult, Vfs};

pub fn commands() -> Vec<CommandSpec> {
    let recursive = FlagDef::switch("recursive", Some('R'));
    vec![
        CommandSpec::new("chmod", "change file mode bits", Handler::Sync(chmod))
            .usage("chmod [-R] MODE FILE...")
            .flags([recursive.clone()])
            .args(2, None)
            .path(PathRule::new(ArgRange::From(1)))
            .complete(CompletionKind::Paths),
        CommandSpec::new("chown", "change file owner and group", Handler::Sync(chown))
            .usage("chown [-R] OWNER[:GROUP] FILE...")
            .flags([recursive.clone()])
            .args(2, None)
            .path(PathRule::new(ArgRange::From(1)))
            .complete(CompletionKind::Users),
        CommandSpec::new("chgrp", "change group ownership", Handler::Sync(chgrp))
            .usage("chgrp [-R] GROUP FILE...")
            .flags([recursive])
            .args(2, None)
            .path(PathRule::new(ArgRange::From(1)))
            .complete(CompletionKind::Paths),
    ]
}

/// Canonical paths an operation applies to: the argument, plus its subtree with -R
fn targets(ctx: &CommandContext, fs: &Vfs) -> Vec<String> {
    let recursive = ctx.flag("recursive");
    let mut out = Vec::new();
    for (_, resolved) in ctx.paths.range(1..) {
        match fs.get_node(&resolved.path) {
            Some(node) if recursive => node.walk(&resolved.path, &mut |path, _| out.push(path.to_string())),
            _ => out.push(resolved.path.clone()),
        }
    }
    out
}

/// Apply `op` to every target, stopping at the first failure
fn apply_all(
    ctx: &CommandContext,
    op: impl Fn(&mut Vfs, &str, &Access) -> FsResult<()>,
) -> CommandResult {
    let access = ctx.access()?;
    let mut fs = ctx.deps.fs.borrow_mut();
    for path in targets(ctx, &fs) {
        op(&mut *fs, &path, &access)?;
    }
    Ok(CommandOutput::empty().modified())
}

fn invalid_mode(mode: &str) -> ExecError {
    ExecError::bad_args(format!("invalid mode: '{}'", mode))
        .with_suggestion("Use octal (755) or symbolic (u+x, go-w, a=r) modes")
}

fn chmod(ctx: &mut CommandContext) -> CommandResult {
    let spec = ctx.args[0].clone();
    let octal = FileMode::from_octal_str(&spec);
    if octal.is_none() && FileMode::new(0).apply(&spec).is_none() {
        return Err(invalid_mode(&spec));
    }
    apply_all(ctx, |fs, path, access| {
        let mode = match octal {
            Some(mode) => mode,
            None => {
                let current = fs
                    .get_node(path)
                    .map(|n| n.meta().mode)
                    .unwrap_or_default();
                current.apply(&spec).unwrap_or(current)
            }
        };
        fs.chmod(path, mode, access)
    })
}

fn chown(ctx: &mut CommandContext) -> CommandResult {
    let spec = ctx.args[0].clone();
    let (owner, group) = match spec.split_once(':') {
        Some((o, g)) => (o.to_string(), Some(g.to_string()).filter(|g| !g.is_empty())),
        None => (spec.clone(), None),
    };
    {
        let users = ctx.deps.users.borrow();
        if !owner.is_empty() && !users.user_exists(&owner) {
            return Err(ExecError::bad_args(format!("invalid user: '{}'", owner)));
        }
        if let Some(g) = &group
            && !users.group_exists(g)
        {
            return Err(ExecError::bad_args(format!("invalid group: '{}'", g)));
        }
    }
    apply_all(ctx, |fs, path, access| {
        if !owner.is_empty() {
            fs.chown(path, &owner, access)?;
        }
        match &group {
            Some(g) => fs.chgrp(path, g, access),
            None => Ok(()),
        }
    })
}

fn chgrp(ctx: &mut CommandContext) -> CommandResult {
    let group = ctx.args[0].clone();
    if !ctx.deps.users.borrow().group_exists(&group) {
        return Err(ExecError::bad_args(format!("invalid group: '{}'", group)));
    }
    apply_all(ctx, |fs, path, access| fs.chgrp(path, &group, access))
}

#[cfg(test)]
mod tests {
    use crate::shell::programs::testing::harness;

    #[test]
    fn test_chmod_octal_and_symbolic() {
        let mut h = harness();
        h.code("touch f");
        assert_eq!(h.code("chmod 600 f"), 0);
        assert!(h.out("ls -l f").starts_with("-rw-------"));
        assert_eq!(h.code("chmod g+r,o+r f"), 0);
        assert!(h.out("ls -l f").starts_with("-rw-r--r--"));
        let (code, err) = h.err("chmod bogus f");
        assert_eq!(code, 1);
        assert!(err.contains("invalid mode"));
    }

    #[test]
    fn test_chmod_recursive() {
        let mut h = harness();
        h.code("mkdir -p d/e; touch d/e/f");
        assert_eq!(h.code("chmod -R 700 d"), 0);
        assert!(h.out("ls -l d/e").starts_with("-rwx------"));
    }

    #[test]
    fn test_chmod_symlink_changes_link_only() {
        let mut h = harness();
        h.code("touch target; ln -s target link");
        h.code("chmod 600 link");
        assert!(h.out("ls -l target").starts_with("-rw-r--r--"));
        assert!(h.out("ls -l link").starts_with("lrw-------"));
    }

    #[test]
    fn test_chown_requires_root() {
        let mut h = harness();
        h.code("touch f");
        let (code, err) = h.err("chown root f");
        assert_eq!(code, 1);
        assert!(err.contains("Permission denied"), "{}", err);
        assert_eq!(h.err("chown nobody f").0, 1);
    }

    #[test]
    fn test_chgrp_own_group() {
        let mut h = harness();
        h.code("touch f");
        assert_eq!(h.code("chgrp Guest f"), 0);
        assert_eq!(h.err("chgrp root f").0, 1);
        assert_eq!(h.err("chgrp nogroup f").0, 1);
    }
}
