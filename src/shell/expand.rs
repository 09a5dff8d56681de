//! Pre-lex expansion
//!
//! Runs before tokenizing, in this order:
//! 1. command substitution `$(cmd)` / `` `cmd` `` and variables `$NAME`,
//!    `${NAME}`, `$?`, `$#`, `$@`, `$0`..`$9`
//! 2. alias replacement of the first word (non-recursive)
//!
//! [`scan`] splits a line into literal text and expansion sites without
//! evaluating anything; the executor resolves the sites (running
//! substitutions as subshells) and splices the escaped results back with
//! [`escape`]. Nothing inside single quotes is expanded.

use super::lexer::LexError;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    /// `quoted` is true inside double quotes
    Var { name: String, quoted: bool },
    Subst { command: String, quoted: bool },
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Scanner<'a> {
    chars: Vec<(usize, char)>,
    input: &'a str,
    pos: usize,
    pieces: Vec<Piece>,
    text: String,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn byte_offset(&self, idx: usize) -> usize {
        self.chars.get(idx).map_or(self.input.len(), |(b, _)| *b)
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.pieces.push(Piece::Text(std::mem::take(&mut self.text)));
        }
    }

    fn push_piece(&mut self, piece: Piece) {
        self.flush();
        self.pieces.push(piece);
    }

    /// At a `$`. Returns false when it is just a literal dollar.
    fn dollar(&mut self, quoted: bool) -> Result<bool, LexError> {
        let start = self.pos;
        match self.peek_at(1) {
            Some('(') => {
                self.pos += 2;
                let command = self.until_paren(start)?;
                self.push_piece(Piece::Subst { command, quoted });
                Ok(true)
            }
            Some('{') => {
                let mut end = self.pos + 2;
                while self.chars.get(end).is_some_and(|(_, c)| is_name_char(*c)) {
                    end += 1;
                }
                match self.chars.get(end) {
                    Some((_, '}')) if end > self.pos + 2 => {
                        let name: String = self.chars[self.pos + 2..end].iter().map(|(_, c)| c).collect();
                        self.pos = end + 1;
                        self.push_piece(Piece::Var { name, quoted });
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '?' | '#' | '@') => {
                self.pos += 2;
                self.push_piece(Piece::Var {
                    name: c.to_string(),
                    quoted,
                });
                Ok(true)
            }
            Some(c) if is_name_start(c) => {
                let mut end = self.pos + 1;
                while self.chars.get(end).is_some_and(|(_, c)| is_name_char(*c)) {
                    end += 1;
                }
                let name: String = self.chars[self.pos + 1..end].iter().map(|(_, c)| c).collect();
                self.pos = end;
                self.push_piece(Piece::Var { name, quoted });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Body of `$( ... )`, honoring nesting and quotes
    fn until_paren(&mut self, start: usize) -> Result<String, LexError> {
        let body_start = self.pos;
        let mut depth = 1;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            match (quote, c) {
                (_, '\\') => self.pos += 1,
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') => {
                    depth -= 1;
                    if depth == 0 {
                        let body = self.slice(body_start, self.pos);
                        self.pos += 1;
                        return Ok(body);
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(LexError::UnclosedSubstitution {
            pos: self.byte_offset(start),
        })
    }

    /// Body of `` `...` ``
    fn until_backtick(&mut self, start: usize) -> Result<String, LexError> {
        let mut body = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '`' => return Ok(body),
                '\\' if self.peek() == Some('`') => {
                    body.push('`');
                    self.pos += 1;
                }
                c => body.push(c),
            }
        }
        Err(LexError::UnclosedSubstitution {
            pos: self.byte_offset(start),
        })
    }

    fn slice(&self, from: usize, to: usize) -> String {
        self.input[self.byte_offset(from)..self.byte_offset(to)].to_string()
    }

    fn run(mut self) -> Result<Vec<Piece>, LexError> {
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            match (quote, c) {
                // single quotes: copy through, honoring \' and \\
                (Some('\''), '\\') if matches!(self.peek_at(1), Some('\'' | '\\')) => {
                    self.text.push(c);
                    self.text.push(self.peek_at(1).unwrap_or_default());
                    self.pos += 2;
                    continue;
                }
                (Some('\''), '\'') => quote = None,
                (Some('\''), _) => {}
                (Some('"'), '\\') if self.peek_at(1) == Some('$') => {
                    // "\$" means a literal dollar; the lexer would keep the backslash
                    self.text.push('$');
                    self.pos += 2;
                    continue;
                }
                (_, '\\') => {
                    self.text.push(c);
                    if let Some(next) = self.peek_at(1) {
                        self.text.push(next);
                    }
                    self.pos += 2;
                    continue;
                }
                (Some('"'), '"') => quote = None,
                (None, '\'' | '"') => quote = Some(c),
                (q, '$') => {
                    if self.dollar(q.is_some())? {
                        continue;
                    }
                }
                (q, '`') => {
                    let start = self.pos;
                    self.pos += 1;
                    let command = self.until_backtick(start)?;
                    self.push_piece(Piece::Subst {
                        command,
                        quoted: q.is_some(),
                    });
                    continue;
                }
                _ => {}
            }
            self.text.push(c);
            self.pos += 1;
        }
        self.flush();
        Ok(self.pieces)
    }
}

/// Split a line into literal text and expansion sites
pub fn scan(input: &str) -> Result<Vec<Piece>, LexError> {
    Scanner {
        chars: input.char_indices().collect(),
        input,
        pos: 0,
        pieces: Vec::new(),
        text: String::new(),
    }
    .run()
}

/// Whether a line needs the expansion pass at all
pub fn needs_expansion(input: &str) -> bool {
    input.contains('$') || input.contains('`')
}

/// Make an expanded value literal for the lexer.
///
/// Unquoted values keep whitespace (so they split into words) and
/// wildcards (so they glob); operators and quotes are escaped.
pub fn escape(value: &str, quoted: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let special = if quoted {
            matches!(c, '"' | '\\')
        } else {
            matches!(c, '"' | '\'' | '\\' | '|' | '&' | ';' | '<' | '>')
        };
        if special {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Replace the first word with its alias body, repeating for the new first
/// word until a name repeats
pub fn expand_alias(line: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut current = line.to_string();
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        let trimmed = current.trim_start();
        let word_end = trimmed
            .find(|c: char| c.is_whitespace() || matches!(c, '|' | '&' | ';' | '<' | '>'))
            .unwrap_or(trimmed.len());
        let word = &trimmed[..word_end];
        if word.is_empty() || seen.contains(word) {
            return current;
        }
        let Some(body) = lookup(word) else {
            return current;
        };
        seen.insert(word.to_string());
        current = format!("{}{}", body, &trimmed[word_end..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Piece {
        Piece::Text(s.to_string())
    }

    fn var(name: &str, quoted: bool) -> Piece {
        Piece::Var {
            name: name.to_string(),
            quoted,
        }
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(scan("ls -la").unwrap(), vec![text("ls -la")]);
        assert!(scan("").unwrap().is_empty());
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            scan("echo $HOME ${USER}x $?").unwrap(),
            vec![
                text("echo "),
                var("HOME", false),
                text(" "),
                var("USER", false),
                text("x "),
                var("?", false),
            ]
        );
    }

    #[test]
    fn test_positional_and_special() {
        assert_eq!(
            scan("$1$#$@$0").unwrap(),
            vec![var("1", false), var("#", false), var("@", false), var("0", false)]
        );
    }

    #[test]
    fn test_quote_context() {
        assert_eq!(
            scan(r#"echo "$A" '$B'"#).unwrap(),
            vec![text("echo \""), var("A", true), text("\" '$B'")]
        );
    }

    #[test]
    fn test_literal_dollars() {
        assert_eq!(scan("cost $ 5 ${} $-").unwrap(), vec![text("cost $ 5 ${} $-")]);
        assert_eq!(scan(r"\$HOME").unwrap(), vec![text(r"\$HOME")]);
        assert_eq!(scan(r#""\$HOME""#).unwrap(), vec![text("\"$HOME\"")]);
    }

    #[test]
    fn test_single_quote_escape_does_not_end_string() {
        assert_eq!(scan(r"'it\'s $X'").unwrap(), vec![text(r"'it\'s $X'")]);
    }

    #[test]
    fn test_command_substitution() {
        assert_eq!(
            scan("echo $(ls /tmp) `pwd`").unwrap(),
            vec![
                text("echo "),
                Piece::Subst {
                    command: "ls /tmp".into(),
                    quoted: false
                },
                text(" "),
                Piece::Subst {
                    command: "pwd".into(),
                    quoted: false
                },
            ]
        );
    }

    #[test]
    fn test_nested_substitution() {
        assert_eq!(
            scan(r#"echo "$(echo $(echo ')') x)""#).unwrap(),
            vec![
                text("echo \""),
                Piece::Subst {
                    command: "echo $(echo ')') x".into(),
                    quoted: true
                },
                text("\""),
            ]
        );
    }

    #[test]
    fn test_unclosed_substitution() {
        assert_eq!(
            scan("echo $(ls"),
            Err(LexError::UnclosedSubstitution { pos: 5 })
        );
        assert!(scan("echo `ls").is_err());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a b|c", false), r"a b\|c");
        assert_eq!(escape("it's", false), r"it\'s");
        assert_eq!(escape(r#"say "x" \"#, true), r#"say \"x\" \\"#);
        assert_eq!(escape("*.txt", false), "*.txt");
    }

    #[test]
    fn test_alias_expansion() {
        let lookup = |name: &str| match name {
            "ll" => Some("ls -l".to_string()),
            "la" => Some("ll -a".to_string()),
            "ls" => Some("ls --color".to_string()),
            "loop" => Some("loop again".to_string()),
            _ => None,
        };
        assert_eq!(expand_alias("la /tmp", &lookup), "ls --color -l -a /tmp");
        assert_eq!(expand_alias("loop", &lookup), "loop again");
        assert_eq!(expand_alias("echo ll", &lookup), "echo ll");
        assert_eq!(expand_alias("ll|wc", &lookup), "ls --color -l|wc");
    }
}
