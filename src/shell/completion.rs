//! Tab completion
//!
//! The word under the cursor is completed over command names in command
//! position, otherwise over whatever the leading command declares (paths,
//! users, aliases). One candidate is inserted, several are reduced to their
//! common prefix or listed on the suggestions channel. Pressing Tab again on
//! the unchanged line cycles through the listed candidates.

use super::registry::CompletionKind;
use crate::kernel::Deps;
use crate::vfs::{NodeKind, ResolveOptions};

/// The line after completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub line: String,
    pub cursor: usize,
}

#[derive(Debug, Clone)]
struct Cycle {
    line: String,
    cursor: usize,
    word_start: usize,
    candidates: Vec<String>,
    next: usize,
}

#[derive(Debug, Default)]
pub struct Completer {
    cycle: Option<Cycle>,
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '|' | ';' | '&' | '<' | '>')
}

/// Byte offset where the word ending at `before.len()` starts.
/// Separators inside quotes or after a backslash belong to the word.
pub fn word_start(before: &str) -> usize {
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in before.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\\' => escaped = true,
            None if c == '"' || c == '\'' => quote = Some(c),
            None if is_separator(c) => start = i + c.len_utf8(),
            None => {}
        }
    }
    start
}

pub fn common_prefix(candidates: &[String]) -> String {
    let Some(first) = candidates.first() else {
        return String::new();
    };
    let mut len = first.len();
    for other in &candidates[1..] {
        len = first
            .char_indices()
            .zip(other.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(len);
    }
    first[..len].to_string()
}

/// Wrap in double quotes when the value contains whitespace
pub fn quote_if_needed(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

fn splice(input: &str, start: usize, end: usize, insert: &str) -> Completion {
    Completion {
        line: format!("{}{}{}", &input[..start], insert, &input[end..]),
        cursor: start + insert.len(),
    }
}

/// What the word at `word_start` completes over
fn classify(deps: &Deps, before: &str, word_start: usize) -> CompletionKind {
    let preceding = before[..word_start].trim_end();
    if preceding.is_empty() || preceding.ends_with(['|', ';', '&']) {
        return CompletionKind::Commands;
    }
    if preceding.ends_with(['<', '>']) {
        return CompletionKind::Paths;
    }
    let segment_start = preceding
        .rfind(['|', ';', '&'])
        .map_or(0, |i| i + 1);
    let command = preceding[segment_start..]
        .split_whitespace()
        .next()
        .unwrap_or_default();
    if command.contains('/') {
        return CompletionKind::Paths;
    }
    deps.registry
        .get(command)
        .map_or(CompletionKind::Paths, |spec| spec.completion)
}

fn names_with_prefix<'a>(names: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut out: Vec<String> = names
        .filter(|n| n.starts_with(prefix))
        .map(|n| format!("{} ", n))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn path_candidates(deps: &Deps, word: &str) -> Vec<String> {
    let word = word.replace(['"', '\''], "");
    let word = word.as_str();
    let (dir_part, prefix) = match word.rfind('/') {
        Some(i) => (&word[..=i], &word[i + 1..]),
        None => ("", word),
    };
    let Ok(access) = deps.access() else {
        return Vec::new();
    };
    let lookup = match dir_part {
        "" => ".".to_string(),
        d if d == "~/" || d.starts_with("~/") => {
            let home = deps.sessions.borrow().current().home().to_string();
            format!("{}/{}", home, &d[2..])
        }
        d => d.to_string(),
    };

    let fs = deps.fs.borrow();
    let opts = ResolveOptions::new().follow().expect(NodeKind::Directory);
    let Ok(dir) = fs.resolve(&lookup, &access, &opts) else {
        return Vec::new();
    };
    let lower = prefix.to_lowercase();
    let mut out: Vec<String> = fs
        .child_names(&dir.path, &access.cred)
        .into_iter()
        .filter(|(name, _)| !name.starts_with('.') || prefix.starts_with('.'))
        .filter(|(name, _)| name.to_lowercase().starts_with(&lower))
        .map(|(name, kind)| {
            let full = format!("{}{}", dir_part, name);
            let is_dir = kind == NodeKind::Directory
                || (kind == NodeKind::Symlink
                    && fs
                        .resolve(&full, &access, &ResolveOptions::new().follow())
                        .is_ok_and(|r| r.kind == Some(NodeKind::Directory)));
            if is_dir {
                quote_if_needed(&format!("{}/", full))
            } else {
                format!("{} ", quote_if_needed(&full))
            }
        })
        .collect();
    out.sort();
    out
}

fn candidates(deps: &Deps, kind: CompletionKind, word: &str) -> Vec<String> {
    match kind {
        CompletionKind::Commands => {
            let mut names = deps.registry.list();
            let sessions = deps.sessions.borrow();
            names.extend(sessions.current().aliases().keys().cloned());
            names_with_prefix(names.iter().map(String::as_str), word)
        }
        CompletionKind::Users => {
            let users = deps.users.borrow();
            names_with_prefix(users.list_users().into_iter(), word)
        }
        CompletionKind::Aliases => {
            let sessions = deps.sessions.borrow();
            names_with_prefix(sessions.current().aliases().keys().map(String::as_str), word)
        }
        CompletionKind::Paths => path_candidates(deps, word),
        CompletionKind::None => Vec::new(),
    }
}

/// The part of a candidate shown in the suggestion list
fn display_name(candidate: &str) -> &str {
    let base = candidate
        .trim_end_matches(' ')
        .trim_matches('"')
        .trim_end_matches('/');
    match base.rfind('/') {
        Some(i) => &base[i + 1..],
        None => base,
    }
}

impl Completer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cycling state (the line was edited or submitted)
    pub fn reset(&mut self) {
        self.cycle = None;
    }

    pub fn complete(&mut self, deps: &Deps, input: &str, cursor: usize) -> Completion {
        let mut cursor = cursor.min(input.len());
        while !input.is_char_boundary(cursor) {
            cursor -= 1;
        }

        if let Some(cycle) = self.cycle.as_mut()
            && cycle.line == input
            && cycle.cursor == cursor
            && !cycle.candidates.is_empty()
        {
            let pick = cycle.candidates[cycle.next % cycle.candidates.len()].clone();
            cycle.next += 1;
            let done = splice(input, cycle.word_start, cursor, &pick);
            cycle.line = done.line.clone();
            cycle.cursor = done.cursor;
            return done;
        }
        self.cycle = None;

        let before = &input[..cursor];
        let start = word_start(before);
        let word = &before[start..];
        let kind = classify(deps, before, start);
        let found = candidates(deps, kind, word);
        log::trace!("completion {:?} for '{}': {} candidates", kind, word, found.len());

        let unchanged = Completion {
            line: input.to_string(),
            cursor,
        };
        match found.len() {
            0 => unchanged,
            1 => splice(input, start, cursor, &found[0]),
            _ => {
                let prefix = common_prefix(&found);
                if prefix.len() > word.len() {
                    return splice(input, start, cursor, &prefix);
                }
                let listing: Vec<&str> = found.iter().map(|c| display_name(c)).collect();
                deps.sink.suggestions(&listing.join("  "));
                self.cycle = Some(Cycle {
                    line: input.to_string(),
                    cursor,
                    word_start: start,
                    candidates: found,
                    next: 0,
                });
                unchanged
            }
        }
    }
}
