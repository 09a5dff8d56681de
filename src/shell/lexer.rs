//! Command-line tokenizer
//!
//! Produces words, quoted strings and operators. Tokens remember whether
//! they touched the previous token (`adjacent`), so the parser can glue
//! `--name="a b"` back into a single argument.

use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Shell operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `>`
    RedirectOut,
    /// `>>`
    RedirectAppend,
    /// `<`
    RedirectIn,
    /// `|`
    Pipe,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `&`
    Background,
    /// `;`
    Semi,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::RedirectOut => ">",
            Op::RedirectAppend => ">>",
            Op::RedirectIn => "<",
            Op::Pipe => "|",
            Op::Or => "||",
            Op::And => "&&",
            Op::Background => "&",
            Op::Semi => ";",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    StringDq,
    StringSq,
    Operator(Op),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Text with quotes removed and escapes applied
    pub value: String,
    /// Text for glob matching: wildcards that came from quotes or escapes
    /// are backslash-escaped
    pub pattern: String,
    /// Byte offsets into the input
    pub start: usize,
    pub end: usize,
    /// No whitespace between this token and the previous one
    pub adjacent: bool,
}

impl Token {
    pub fn is_text(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Word | TokenKind::StringDq | TokenKind::StringSq
        )
    }

    pub fn op(&self) -> Option<Op> {
        match self.kind {
            TokenKind::Operator(op) => Some(op),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unclosed {quote} string starting at column {pos}")]
    UnclosedString { quote: char, pos: usize },
    #[error("unhandled character {ch:?} at column {pos}")]
    UnhandledCharacter { ch: char, pos: usize },
    #[error("unclosed command substitution starting at column {pos}")]
    UnclosedSubstitution { pos: usize },
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '|' | '&' | ';' | '<' | '>')
}

/// Characters a word cannot contain unescaped
fn ends_word(c: char) -> bool {
    c.is_whitespace() || is_operator_char(c) || c == '"' || c == '\''
}

fn push_literal(pattern: &mut String, c: char) {
    if matches!(c, '*' | '?' | '\\') {
        pattern.push('\\');
    }
    pattern.push(c);
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.input.len(), |(i, _)| *i)
    }

    /// Returns true when any whitespace was consumed
    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                skipped = true;
            } else {
                break;
            }
        }
        skipped
    }

    fn next_token(&mut self, first: bool) -> Result<Token, LexError> {
        let adjacent = !self.skip_whitespace() && !first;
        let start = self.offset();

        let Some(&(_, c)) = self.chars.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                value: String::new(),
                pattern: String::new(),
                start,
                end: start,
                adjacent: false,
            });
        };

        let mut token = match c {
            '"' | '\'' => self.read_string(c, start)?,
            c if is_operator_char(c) => self.read_operator(c, start),
            _ => self.read_word(start)?,
        };
        token.adjacent = adjacent;
        Ok(token)
    }

    fn read_operator(&mut self, c: char, start: usize) -> Token {
        self.chars.next();
        let doubled = self.chars.peek().map(|(_, n)| *n) == Some(c);
        let op = match (c, doubled) {
            ('>', true) => Op::RedirectAppend,
            ('|', true) => Op::Or,
            ('&', true) => Op::And,
            ('>', false) => Op::RedirectOut,
            ('|', false) => Op::Pipe,
            ('&', false) => Op::Background,
            ('<', _) => Op::RedirectIn,
            _ => Op::Semi,
        };
        if doubled && matches!(op, Op::RedirectAppend | Op::Or | Op::And) {
            self.chars.next();
        }
        let end = self.offset();
        Token {
            kind: TokenKind::Operator(op),
            value: op.as_str().to_string(),
            pattern: op.as_str().to_string(),
            start,
            end,
            adjacent: false,
        }
    }

    fn read_word(&mut self, start: usize) -> Result<Token, LexError> {
        let mut value = String::new();
        let mut pattern = String::new();

        while let Some(&(pos, c)) = self.chars.peek() {
            if ends_word(c) {
                break;
            }
            if c.is_control() {
                return Err(LexError::UnhandledCharacter { ch: c, pos });
            }
            self.chars.next();
            if c == '\\' {
                match self.chars.next() {
                    Some((_, escaped)) => {
                        value.push(escaped);
                        push_literal(&mut pattern, escaped);
                    }
                    // Trailing backslash stays literal
                    None => {
                        value.push('\\');
                        pattern.push_str("\\\\");
                    }
                }
            } else {
                value.push(c);
                pattern.push(c);
            }
        }

        let end = self.offset();
        Ok(Token {
            kind: TokenKind::Word,
            value,
            pattern,
            start,
            end,
            adjacent: false,
        })
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<Token, LexError> {
        self.chars.next(); // opening quote
        let mut value = String::new();

        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.chars.peek() {
                    Some(&(_, next)) if next == quote || next == '\\' => {
                        value.push(next);
                        self.chars.next();
                    }
                    _ => value.push('\\'),
                },
                Some((_, c)) => value.push(c),
                None => return Err(LexError::UnclosedString { quote, pos: start }),
            }
        }

        let mut pattern = String::with_capacity(value.len());
        for c in value.chars() {
            push_literal(&mut pattern, c);
        }
        let kind = if quote == '"' {
            TokenKind::StringDq
        } else {
            TokenKind::StringSq
        };
        let end = self.offset();
        Ok(Token {
            kind,
            value,
            pattern,
            start,
            end,
            adjacent: false,
        })
    }
}

/// Tokenize a full line. The last token is always `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token(tokens.is_empty())?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
