//! Line filters: grep, wc, head, tail, sort, uniq
//!
//! All read stdin when given no file arguments, otherwise each file in turn.

use super::{count_flag, finish};
use crate::shell::context::{CommandContext, CommandResult, InputItem};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::registry::{CommandSpec, CompletionKind, Handler};
use std::cmp::Ordering;

pub const NAMES: &[&str] = &["grep", "wc", "head", "tail", "sort", "uniq"];

pub fn commands() -> Vec<CommandSpec> {
    log::debug!("loading text filters");
    vec![
        CommandSpec::new("grep", "print lines containing a pattern", Handler::Sync(grep))
            .usage("grep [-ivnc] PATTERN [FILE]...")
            .flags([
                FlagDef::switch("ignore-case", Some('i')),
                FlagDef::switch("invert-match", Some('v')),
                FlagDef::switch("line-number", Some('n')),
                FlagDef::switch("count", Some('c')),
            ])
            .args(1, None)
            .complete(CompletionKind::Paths),
        CommandSpec::new("wc", "count lines, words and bytes", Handler::Sync(wc))
            .usage("wc [-lwc] [FILE]...")
            .flags([
                FlagDef::switch("lines", Some('l')),
                FlagDef::switch("words", Some('w')),
                FlagDef::switch("bytes", Some('c')),
            ])
            .complete(CompletionKind::Paths),
        CommandSpec::new("head", "print the first lines", Handler::Sync(head))
            .usage("head [-n N] [FILE]...")
            .flags([FlagDef::value("lines", Some('n'))])
            .complete(CompletionKind::Paths),
        CommandSpec::new("tail", "print the last lines", Handler::Sync(tail))
            .usage("tail [-n N] [FILE]...")
            .flags([FlagDef::value("lines", Some('n'))])
            .complete(CompletionKind::Paths),
        CommandSpec::new("sort", "sort lines", Handler::Sync(sort))
            .usage("sort [-rnu] [FILE]...")
            .flags([
                FlagDef::switch("reverse", Some('r')),
                FlagDef::switch("numeric-sort", Some('n')),
                FlagDef::switch("unique", Some('u')),
            ])
            .complete(CompletionKind::Paths),
        CommandSpec::new("uniq", "collapse adjacent repeated lines", Handler::Sync(uniq))
            .usage("uniq [-cd] [FILE]...")
            .flags([FlagDef::switch("count", Some('c')), FlagDef::switch("repeated", Some('d'))])
            .complete(CompletionKind::Paths),
    ]
}

/// Readable inputs; unreadable ones are reported and flagged
fn read_inputs(ctx: &mut CommandContext, skip: usize) -> Result<(Vec<InputItem>, bool), ExecError> {
    let mut items = Vec::new();
    let mut failed = false;
    for item in ctx.input_stream(skip)? {
        if item.success {
            items.push(item);
        } else {
            ctx.warn(&item.content);
            failed = true;
        }
    }
    Ok((items, failed))
}

/// Every input's lines, in order
fn all_lines(items: &[InputItem]) -> Vec<&str> {
    items.iter().flat_map(|item| item.content.lines()).collect()
}

fn grep(ctx: &mut CommandContext) -> CommandResult {
    let ignore_case = ctx.flag("ignore-case");
    let invert = ctx.flag("invert-match");
    let numbered = ctx.flag("line-number");
    let count_only = ctx.flag("count");
    let pattern = if ignore_case {
        ctx.args[0].to_lowercase()
    } else {
        ctx.args[0].clone()
    };
    let prefixed = ctx.args.len() > 2;

    let (items, failed) = read_inputs(ctx, 1)?;
    let mut out = Vec::new();
    let mut total = 0;
    for item in &items {
        let mut count = 0;
        for (i, line) in item.content.lines().enumerate() {
            let hit = if ignore_case {
                line.to_lowercase().contains(&pattern)
            } else {
                line.contains(&pattern)
            };
            if hit == invert {
                continue;
            }
            count += 1;
            if count_only {
                continue;
            }
            let mut shown = String::new();
            if prefixed {
                shown.push_str(&format!("{}:", item.source_name));
            }
            if numbered {
                shown.push_str(&format!("{}:", i + 1));
            }
            shown.push_str(line);
            out.push(shown);
        }
        if count_only {
            out.push(if prefixed {
                format!("{}:{}", item.source_name, count)
            } else {
                count.to_string()
            });
        }
        total += count;
    }
    Ok(finish(out.join("\n"), failed || total == 0))
}

fn count_lines(s: &str) -> usize {
    s.lines().count()
}

fn count_words(s: &str) -> usize {
    s.split_whitespace().count()
}

fn count_bytes(s: &str) -> usize {
    s.len()
}

fn wc(ctx: &mut CommandContext) -> CommandResult {
    let all: [(&str, fn(&str) -> usize); 3] = [("lines", count_lines), ("words", count_words), ("bytes", count_bytes)];
    let mut columns: Vec<fn(&str) -> usize> = all
        .iter()
        .filter(|(flag, _)| ctx.flag(flag))
        .map(|&(_, count)| count)
        .collect();
    if columns.is_empty() {
        columns = all.iter().map(|&(_, count)| count).collect();
    }
    let named = !ctx.args.is_empty();

    let (items, failed) = read_inputs(ctx, 0)?;
    let row = |content: &str, name: Option<&str>| {
        let mut fields: Vec<String> = columns.iter().map(|count| count(content).to_string()).collect();
        fields.extend(name.map(str::to_string));
        fields.join(" ")
    };
    let mut out: Vec<String> = items
        .iter()
        .map(|item| row(&item.content, named.then_some(item.source_name.as_str())))
        .collect();
    if items.len() > 1 {
        let joined: String = items.iter().map(|i| i.content.as_str()).collect();
        out.push(row(&joined, Some("total")));
    }
    Ok(finish(out.join("\n"), failed))
}

fn head(ctx: &mut CommandContext) -> CommandResult {
    let n = count_flag(ctx, "lines", 10)?;
    let (items, failed) = read_inputs(ctx, 0)?;
    let lines = all_lines(&items);
    Ok(finish(lines[..n.min(lines.len())].join("\n"), failed))
}

fn tail(ctx: &mut CommandContext) -> CommandResult {
    let n = count_flag(ctx, "lines", 10)?;
    let (items, failed) = read_inputs(ctx, 0)?;
    let lines = all_lines(&items);
    Ok(finish(lines[lines.len().saturating_sub(n)..].join("\n"), failed))
}

/// Leading number of a line, as `sort -n` compares it
fn numeric_key(line: &str) -> f64 {
    let trimmed = line.trim_start();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().unwrap_or(0.0)
}

fn sort(ctx: &mut CommandContext) -> CommandResult {
    let numeric = ctx.flag("numeric-sort");
    let reverse = ctx.flag("reverse");
    let unique = ctx.flag("unique");
    let (items, failed) = read_inputs(ctx, 0)?;
    let mut lines = all_lines(&items);
    if numeric {
        lines.sort_by(|a, b| {
            numeric_key(a)
                .partial_cmp(&numeric_key(b))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
    } else {
        lines.sort();
    }
    if unique {
        lines.dedup();
    }
    if reverse {
        lines.reverse();
    }
    Ok(finish(lines.join("\n"), failed))
}

fn uniq(ctx: &mut CommandContext) -> CommandResult {
    let counted = ctx.flag("count");
    let repeated_only = ctx.flag("repeated");
    let (items, failed) = read_inputs(ctx, 0)?;

    let mut runs: Vec<(&str, usize)> = Vec::new();
    for line in all_lines(&items) {
        match runs.last_mut() {
            Some((last, n)) if *last == line => *n += 1,
            _ => runs.push((line, 1)),
        }
    }
    let out: Vec<String> = runs
        .into_iter()
        .filter(|&(_, n)| !repeated_only || n > 1)
        .map(|(line, n)| if counted { format!("{:>7} {}", n, line) } else { line.to_string() })
        .collect();
    Ok(finish(out.join("\n"), failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::programs::testing::harness;

    #[test]
    fn test_filters_load_lazily() {
        let mut h = harness();
        let registry = h.kernel.deps().registry.clone();
        assert!(registry.contains("grep"));
        assert!(!registry.is_loaded("grep"));
        h.code("echo hi | grep h");
        assert!(registry.is_loaded("grep"));
        assert!(registry.is_loaded("sort"));
    }

    #[test]
    fn test_grep_flags() {
        let mut h = harness();
        h.code("echo Apple > fruit; echo banana >> fruit; echo apricot >> fruit");
        assert_eq!(h.out("grep ap fruit"), "apricot");
        assert_eq!(h.out("grep -i ap fruit"), "Apple\napricot");
        assert_eq!(h.out("grep -n an fruit"), "2:banana");
        assert_eq!(h.out("grep -vc an fruit"), "2");
        assert_eq!(h.code("grep cherry fruit"), 1);
    }

    #[test]
    fn test_grep_prefixes_multiple_files() {
        let mut h = harness();
        h.code("echo one > a; echo tone > b");
        assert_eq!(h.out("grep one a b"), "a:one\nb:tone");
    }

    #[test]
    fn test_wc_counts() {
        let mut h = harness();
        h.code("echo a b > f; echo c >> f");
        assert_eq!(h.out("cat f | wc -l"), "2");
        assert_eq!(h.out("wc -w < f"), "3");
        assert_eq!(h.out("wc f"), "2 3 6 f");
    }

    #[test]
    fn test_head_and_tail() {
        let mut h = harness();
        h.code("echo 1 > n; echo 2 >> n; echo 3 >> n; echo 4 >> n");
        assert_eq!(h.out("head -n 2 n"), "1\n2");
        assert_eq!(h.out("tail -n 2 n"), "3\n4");
        assert_eq!(h.out("tail -n 9 n"), "1\n2\n3\n4");
        assert_eq!(h.err("head -n x n").0, 1);
    }

    #[test]
    fn test_numeric_key() {
        assert_eq!(numeric_key("10 apples"), 10.0);
        assert_eq!(numeric_key("  -2.5"), -2.5);
        assert_eq!(numeric_key("none"), 0.0);
    }

    #[test]
    fn test_sort_modes() {
        let mut h = harness();
        h.code("echo 10 > n; echo 9 >> n; echo 10 >> n; echo 100 >> n");
        assert_eq!(h.out("sort n"), "10\n10\n100\n9");
        assert_eq!(h.out("sort -n n"), "9\n10\n10\n100");
        assert_eq!(h.out("sort -nru n"), "100\n10\n9");
    }

    #[test]
    fn test_uniq() {
        let mut h = harness();
        h.code("echo a > l; echo a >> l; echo b >> l; echo a >> l");
        assert_eq!(h.out("uniq l"), "a\nb\na");
        assert_eq!(h.out("uniq -d l"), "a");
        assert_eq!(h.out("uniq -c l"), "      2 a\n      1 b\n      1 a");
    }
}
