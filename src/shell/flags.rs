//! Flag extraction
//!
//! Short (`-l`), combined (`-la`), long (`--all`), value-taking
//! (`-n 5`, `-n5`, `--lines 5`, `--lines=5`) and `--` to end flags.
//! A lone `-` and negative numbers stay positional.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagDef {
    /// Long name, also the key in [`Flags`]
    pub name: &'static str,
    pub short: Option<char>,
    pub takes_value: bool,
}

impl FlagDef {
    pub const fn switch(name: &'static str, short: Option<char>) -> Self {
        Self {
            name,
            short,
            takes_value: false,
        }
    }

    pub const fn value(name: &'static str, short: Option<char>) -> Self {
        Self {
            name,
            short,
            takes_value: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    #[error("invalid option -- '{0}'")]
    Unknown(String),
    #[error("option '{0}' requires an argument")]
    MissingValue(String),
    #[error("option '{0}' doesn't allow an argument")]
    UnexpectedValue(String),
}

/// Flags that were present, by long name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    set: BTreeMap<&'static str, Option<String>>,
}

impl Flags {
    pub fn has(&self, name: &str) -> bool {
        self.set.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.set.get(name).and_then(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn insert(&mut self, def: &FlagDef, value: Option<String>) {
        self.set.insert(def.name, value);
    }
}

fn looks_numeric(arg: &str) -> bool {
    arg.len() > 1 && arg[1..].chars().all(|c| c.is_ascii_digit())
}

/// Split `args` into flags and positional arguments
pub fn parse_flags(args: &[String], defs: &[FlagDef]) -> Result<(Flags, Vec<String>), FlagError> {
    let mut flags = Flags::default();
    let mut positional = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--" {
            positional.extend(iter.by_ref().cloned());
            break;
        }

        if let Some(long) = arg.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (long, None),
            };
            let def = defs
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| FlagError::Unknown(format!("--{}", name)))?;
            let value = match (def.takes_value, inline) {
                (true, Some(v)) => Some(v),
                (true, None) => Some(
                    iter.next()
                        .cloned()
                        .ok_or_else(|| FlagError::MissingValue(format!("--{}", name)))?,
                ),
                (false, Some(_)) => return Err(FlagError::UnexpectedValue(format!("--{}", name))),
                (false, None) => None,
            };
            flags.insert(def, value);
            continue;
        }

        if arg.starts_with('-') && arg != "-" && !looks_numeric(arg) {
            let shorts: Vec<char> = arg[1..].chars().collect();
            for (i, c) in shorts.iter().enumerate() {
                let def = defs
                    .iter()
                    .find(|d| d.short == Some(*c))
                    .ok_or_else(|| FlagError::Unknown(c.to_string()))?;
                if def.takes_value {
                    let rest: String = shorts[i + 1..].iter().collect();
                    let value = if rest.is_empty() {
                        iter.next()
                            .cloned()
                            .ok_or_else(|| FlagError::MissingValue(format!("-{}", c)))?
                    } else {
                        rest
                    };
                    flags.insert(def, Some(value));
                    break;
                }
                flags.insert(def, None);
            }
            continue;
        }

        positional.push(arg.clone());
    }

    Ok((flags, positional))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFS: &[FlagDef] = &[
        FlagDef::switch("all", Some('a')),
        FlagDef::switch("long", Some('l')),
        FlagDef::value("lines", Some('n')),
        FlagDef::switch("recursive", Some('r')),
    ];

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_short_and_combined() {
        let (flags, pos) = parse_flags(&args(&["-la", "dir"]), DEFS).unwrap();
        assert!(flags.has("all"));
        assert!(flags.has("long"));
        assert!(!flags.has("recursive"));
        assert_eq!(pos, vec!["dir"]);
    }

    #[test]
    fn test_values() {
        let (flags, _) = parse_flags(&args(&["-n", "5"]), DEFS).unwrap();
        assert_eq!(flags.value("lines"), Some("5"));
        let (flags, _) = parse_flags(&args(&["-n5"]), DEFS).unwrap();
        assert_eq!(flags.value("lines"), Some("5"));
        let (flags, _) = parse_flags(&args(&["--lines=7"]), DEFS).unwrap();
        assert_eq!(flags.value("lines"), Some("7"));
        let (flags, pos) = parse_flags(&args(&["--lines", "8", "f"]), DEFS).unwrap();
        assert_eq!(flags.value("lines"), Some("8"));
        assert_eq!(pos, vec!["f"]);
    }

    #[test]
    fn test_positional_edge_cases() {
        let (flags, pos) = parse_flags(&args(&["-", "-5", "--", "-a"]), DEFS).unwrap();
        assert!(flags.is_empty());
        assert_eq!(pos, vec!["-", "-5", "-a"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse_flags(&args(&["-z"]), DEFS),
            Err(FlagError::Unknown("z".into()))
        );
        assert_eq!(
            parse_flags(&args(&["--nope"]), DEFS),
            Err(FlagError::Unknown("--nope".into()))
        );
        assert_eq!(
            parse_flags(&args(&["-n"]), DEFS),
            Err(FlagError::MissingValue("-n".into()))
        );
        assert_eq!(
            parse_flags(&args(&["--all=yes"]), DEFS),
            Err(FlagError::UnexpectedValue("--all".into()))
        );
    }
}
