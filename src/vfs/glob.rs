//! Glob expansion
//!
//! `*` matches any run of characters inside one path segment, `?` exactly one
//! character. A backslash makes the next character literal. Neither wildcard
//! crosses `/`, and a leading `.` must be matched explicitly.

use super::{Access, NodeKind, ResolveOptions, Vfs, path};

/// Whether a pattern contains an unescaped wildcard
pub fn has_wildcards(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}

/// Drop escaping backslashes
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    Lit(char),
    Any,
    One,
}

fn compile(pattern: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '\\' => match chars.next() {
                Some(next) => Tok::Lit(next),
                None => Tok::Lit('\\'),
            },
            '*' => Tok::Any,
            '?' => Tok::One,
            other => Tok::Lit(other),
        });
    }
    toks
}

/// Match a single path segment against a pattern
pub fn matches(pattern: &str, name: &str) -> bool {
    let toks = compile(pattern);
    let text: Vec<char> = name.chars().collect();

    // Iterative matcher with single-star backtracking
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match toks.get(p) {
            Some(Tok::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            Some(Tok::One) => {
                p += 1;
                t += 1;
            }
            Some(Tok::Any) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    toks[p..].iter().all(|t| *t == Tok::Any)
}

fn join_display(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Expand a pattern against the filesystem.
///
/// Returns matches sorted lexicographically, relative when the pattern is
/// relative. An empty result means nothing matched; callers decide whether
/// to keep the pattern literally.
pub fn expand(fs: &Vfs, pattern: &str, access: &Access) -> Vec<String> {
    let absolute = pattern.starts_with('/');
    let comps = path::components(pattern);
    if comps.is_empty() {
        return Vec::new();
    }

    let start = if absolute {
        ("/".to_string(), "/".to_string())
    } else {
        (String::new(), access.cwd.clone())
    };
    let mut candidates = vec![start];

    for (i, comp) in comps.iter().enumerate() {
        let last = i + 1 == comps.len();
        let mut next = Vec::new();

        for (display, canonical) in &candidates {
            if has_wildcards(comp) {
                for (name, _) in fs.child_names(canonical, &access.cred) {
                    if name.starts_with('.') && !comp.starts_with('.') {
                        continue;
                    }
                    if matches(comp, &name) {
                        next.push((join_display(display, &name), path::join(canonical, &name)));
                    }
                }
            } else {
                let literal = unescape(comp);
                next.push((
                    join_display(display, &literal),
                    path::absolute(&literal, canonical),
                ));
            }
        }

        // Keep only entries that exist; intermediate ones must be directories
        candidates = next
            .into_iter()
            .filter_map(|(display, canonical)| {
                let mut opts = ResolveOptions::new().allow_missing();
                if !last {
                    opts = opts.follow();
                }
                let resolved = fs.resolve(&canonical, access, &opts).ok()?;
                match resolved.kind {
                    Some(NodeKind::Directory) if !last => Some((display, resolved.path)),
                    Some(_) if last => Some((display, resolved.path)),
                    _ => None,
                }
            })
            .collect();

        if candidates.is_empty() {
            break;
        }
    }

    let mut out: Vec<String> = candidates.into_iter().map(|(display, _)| display).collect();
    out.sort();
    out.dedup();
    out
}
