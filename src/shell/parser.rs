//! Shell command parser
//!
//! Turns the token stream into a [`Sequence`] of pipelines joined by `;`,
//! `&`, `&&` and `||`.
//!
//! ```text
//! sequence  := pipeline ( joiner pipeline )* joiner?
//! pipeline  := [ '<' file ] segment ( '|' segment )* [ ('>' | '>>') file ]
//! ```
//!
//! Adjacent text tokens form one argument. Arguments with unquoted
//! wildcards are expanded through a [`GlobExpander`]; no match keeps the
//! pattern as typed.

use super::lexer::{LexError, Op, Token, TokenKind, tokenize};
use crate::kernel::jobs::JobId;
use crate::vfs::WriteMode;
use crate::vfs::glob;
use thiserror::Error;

/// One command inside a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub args: Vec<String>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Output redirection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub mode: WriteMode,
}

impl Redirect {
    pub fn new(path: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub segments: Vec<Segment>,
    /// `< file`
    pub input: Option<String>,
    /// `> file` or `>> file`
    pub output: Option<Redirect>,
    pub background: bool,
    /// Set once the pipeline is scheduled as a job
    pub job_id: Option<JobId>,
    /// Source text, used for job listings
    pub text: String,
}

impl Pipeline {
    pub fn new(segment: Segment) -> Self {
        Self {
            text: segment_text(&segment),
            segments: vec![segment],
            input: None,
            output: None,
            background: false,
            job_id: None,
        }
    }

    pub fn pipe(mut self, segment: Segment) -> Self {
        self.text = format!("{} | {}", self.text, segment_text(&segment));
        self.segments.push(segment);
        self
    }
}

fn segment_text(segment: &Segment) -> String {
    std::iter::once(segment.name.as_str())
        .chain(segment.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Operator binding a pipeline to the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joiner {
    Semi,
    Background,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceItem {
    pub pipeline: Pipeline,
    pub joiner: Option<Joiner>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    pub items: Vec<SequenceItem>,
}

impl Sequence {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error near unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("syntax error: missing file name after '{0}'")]
    MissingRedirectFilename(String),
    #[error("syntax error: missing command after '|'")]
    MissingPipeRight,
    #[error("syntax error: missing command after '{0}'")]
    MissingJoinerRight(String),
}

/// A lex or parse failure; either one rejects the whole line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Filesystem glob hook used while parsing
pub trait GlobExpander {
    /// Matches for `pattern`, sorted; empty when nothing matched
    fn expand(&self, pattern: &str) -> Vec<String>;
}

/// Leaves every pattern as typed
pub struct NoGlob;

impl GlobExpander for NoGlob {
    fn expand(&self, _pattern: &str) -> Vec<String> {
        Vec::new()
    }
}

/// One argument assembled from adjacent text tokens
struct Word {
    value: String,
    pattern: String,
    glob: bool,
}

struct Parser<'a> {
    tokens: &'a [Token],
    source: &'a str,
    pos: usize,
    globber: &'a dyn GlobExpander,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // tokenize() always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len() - 1);
        self.pos += 1;
        &self.tokens[idx]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Read adjacent text tokens as one word
    fn word(&mut self) -> Option<Word> {
        if !self.peek().is_text() {
            return None;
        }
        let mut word = Word {
            value: String::new(),
            pattern: String::new(),
            glob: false,
        };
        loop {
            let token = self.advance();
            word.value.push_str(&token.value);
            word.pattern.push_str(&token.pattern);
            if token.kind == TokenKind::Word && glob::has_wildcards(&token.pattern) {
                word.glob = true;
            }
            let next = self.peek();
            if !(next.is_text() && next.adjacent) {
                return Some(word);
            }
        }
    }

    fn expand_word(&self, word: Word, out: &mut Vec<String>) {
        if word.glob {
            let matches = self.globber.expand(&word.pattern);
            if !matches.is_empty() {
                out.extend(matches);
                return;
            }
        }
        out.push(word.value);
    }

    fn redirect_target(&mut self, op: Op) -> Result<String, ParseError> {
        match self.word() {
            Some(word) => Ok(word.value),
            None if self.at_eof() => Err(ParseError::MissingRedirectFilename(op.as_str().to_string())),
            None => Err(ParseError::UnexpectedToken(self.peek().value.clone())),
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let start = self.peek().start;
        let mut segments: Vec<Segment> = Vec::new();
        let mut words: Vec<String> = Vec::new();
        let mut input = None;
        let mut output: Option<Redirect> = None;
        let mut end = start;

        loop {
            let kind = self.peek().kind;
            match kind {
                TokenKind::Word | TokenKind::StringDq | TokenKind::StringSq => {
                    if output.is_some() {
                        return Err(ParseError::UnexpectedToken(self.peek().value.clone()));
                    }
                    if let Some(word) = self.word() {
                        self.expand_word(word, &mut words);
                    }
                    end = self.tokens[self.pos - 1].end;
                }
                TokenKind::Operator(op @ Op::RedirectIn) => {
                    if !segments.is_empty() || input.is_some() {
                        return Err(ParseError::UnexpectedToken(op.as_str().to_string()));
                    }
                    self.advance();
                    input = Some(self.redirect_target(op)?);
                    end = self.tokens[self.pos - 1].end;
                }
                TokenKind::Operator(op @ (Op::RedirectOut | Op::RedirectAppend)) => {
                    if words.is_empty() || output.is_some() {
                        return Err(ParseError::UnexpectedToken(op.as_str().to_string()));
                    }
                    self.advance();
                    let path = self.redirect_target(op)?;
                    let mode = if op == Op::RedirectAppend {
                        WriteMode::Append
                    } else {
                        WriteMode::Overwrite
                    };
                    output = Some(Redirect::new(path, mode));
                    end = self.tokens[self.pos - 1].end;
                }
                TokenKind::Operator(Op::Pipe) => {
                    if words.is_empty() || output.is_some() {
                        return Err(ParseError::UnexpectedToken("|".to_string()));
                    }
                    segments.push(build_segment(&mut words));
                    self.advance();
                    if !self.peek().is_text() {
                        return Err(if self.at_eof() {
                            ParseError::MissingPipeRight
                        } else {
                            ParseError::UnexpectedToken(self.peek().value.clone())
                        });
                    }
                }
                TokenKind::Operator(_) | TokenKind::Eof => break,
            }
        }

        if words.is_empty() {
            return Err(ParseError::UnexpectedToken(self.peek().value.clone()));
        }
        segments.push(build_segment(&mut words));

        Ok(Pipeline {
            segments,
            input,
            output,
            background: false,
            job_id: None,
            text: self.source.get(start..end).unwrap_or_default().trim().to_string(),
        })
    }

    fn sequence(&mut self) -> Result<Sequence, ParseError> {
        let mut items = Vec::new();
        while !self.at_eof() {
            let mut pipeline = self.pipeline()?;
            let joiner = match self.peek().op() {
                Some(Op::Semi) => Some(Joiner::Semi),
                Some(Op::Background) => Some(Joiner::Background),
                Some(Op::And) => Some(Joiner::And),
                Some(Op::Or) => Some(Joiner::Or),
                _ => None,
            };
            if let Some(j) = joiner {
                let op = self.advance().value.clone();
                if matches!(j, Joiner::And | Joiner::Or) && self.at_eof() {
                    return Err(ParseError::MissingJoinerRight(op));
                }
            }
            pipeline.background = joiner == Some(Joiner::Background);
            items.push(SequenceItem { pipeline, joiner });
        }
        Ok(Sequence { items })
    }
}

fn build_segment(words: &mut Vec<String>) -> Segment {
    let mut drained = std::mem::take(words).into_iter();
    let name = drained.next().unwrap_or_default();
    Segment {
        name,
        args: drained.collect(),
    }
}

/// Parse an already tokenized line
pub fn parse(tokens: &[Token], source: &str, globber: &dyn GlobExpander) -> Result<Sequence, ParseError> {
    if tokens.is_empty() {
        return Ok(Sequence::default());
    }
    let mut parser = Parser {
        tokens,
        source,
        pos: 0,
        globber,
    };
    parser.sequence()
}

/// Tokenize and parse a line
pub fn parse_line(input: &str, globber: &dyn GlobExpander) -> Result<Sequence, SyntaxError> {
    let tokens = tokenize(input)?;
    Ok(parse(&tokens, input, globber)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(input: &str) -> Result<Sequence, SyntaxError> {
        parse_line(input, &NoGlob)
    }

    fn first(input: &str) -> Pipeline {
        p(input).unwrap().items.remove(0).pipeline
    }

    struct FakeGlob(Vec<&'static str>);

    impl GlobExpander for FakeGlob {
        fn expand(&self, pattern: &str) -> Vec<String> {
            self.0
                .iter()
                .filter(|name| glob::matches(pattern, name))
                .map(|s| s.to_string())
                .collect()
        }
    }

    // ============ Simple Commands ============

    #[test]
    fn test_simple_command() {
        let pipeline = first("ls -la /home");
        assert_eq!(pipeline.segments, vec![Segment::new("ls").arg("-la").arg("/home")]);
        assert!(!pipeline.background);
        assert_eq!(pipeline.text, "ls -la /home");
    }

    #[test]
    fn test_empty_input() {
        assert!(p("").unwrap().is_empty());
        assert!(p("   ").unwrap().is_empty());
    }

    #[test]
    fn test_concatenated_tokens() {
        let pipeline = first(r#"cmd --name="a b" foo'bar'"#);
        assert_eq!(pipeline.segments[0].args, vec!["--name=a b", "foobar"]);
    }

    #[test]
    fn test_quoted_strings() {
        let pipeline = first(r#"echo "a b" 'c  d' unquoted"#);
        assert_eq!(pipeline.segments[0].args, vec!["a b", "c  d", "unquoted"]);
    }

    // ============ Pipes & Redirections ============

    #[test]
    fn test_pipes() {
        let pipeline = first("cat f | grep x | wc -l");
        let names: Vec<&str> = pipeline.segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cat", "grep", "wc"]);
    }

    #[test]
    fn test_redirections() {
        let pipeline = first("< in.txt sort | uniq >> out.txt");
        assert_eq!(pipeline.input.as_deref(), Some("in.txt"));
        assert_eq!(pipeline.output, Some(Redirect::new("out.txt", WriteMode::Append)));

        let pipeline = first("cat < in.txt > \"my file\"");
        assert_eq!(pipeline.input.as_deref(), Some("in.txt"));
        assert_eq!(pipeline.output, Some(Redirect::new("my file", WriteMode::Overwrite)));
        assert_eq!(pipeline.segments[0], Segment::new("cat"));
    }

    #[test]
    fn test_pipe_errors() {
        assert_eq!(p("ls |"), Err(ParseError::MissingPipeRight.into()));
        assert_eq!(p("| ls"), Err(ParseError::UnexpectedToken("|".into()).into()));
        assert_eq!(p("ls | | wc"), Err(ParseError::UnexpectedToken("|".into()).into()));
        assert_eq!(p("ls > f | wc"), Err(ParseError::UnexpectedToken("|".into()).into()));
    }

    #[test]
    fn test_redirect_errors() {
        assert_eq!(
            p("echo hi >"),
            Err(ParseError::MissingRedirectFilename(">".into()).into())
        );
        assert_eq!(
            p("echo hi >> ;"),
            Err(ParseError::UnexpectedToken(";".into()).into())
        );
        assert_eq!(p("a | b < f"), Err(ParseError::UnexpectedToken("<".into()).into()));
    }

    // ============ Sequences ============

    #[test]
    fn test_joiners() {
        let seq = p("false && echo X; echo Y || echo Z").unwrap();
        let joiners: Vec<Option<Joiner>> = seq.items.iter().map(|i| i.joiner).collect();
        assert_eq!(
            joiners,
            vec![Some(Joiner::And), Some(Joiner::Semi), Some(Joiner::Or), None]
        );
    }

    #[test]
    fn test_background() {
        let seq = p("sleep 10 & echo hi").unwrap();
        assert!(seq.items[0].pipeline.background);
        assert_eq!(seq.items[0].pipeline.text, "sleep 10");
        assert!(!seq.items[1].pipeline.background);

        let seq = p("sleep 10&").unwrap();
        assert_eq!(seq.items.len(), 1);
        assert!(seq.items[0].pipeline.background);
    }

    #[test]
    fn test_trailing_semicolon_ok() {
        assert_eq!(p("ls;").unwrap().items.len(), 1);
    }

    #[test]
    fn test_joiner_errors() {
        assert_eq!(p("ls &&"), Err(ParseError::MissingJoinerRight("&&".into()).into()));
        assert_eq!(p("ls ||"), Err(ParseError::MissingJoinerRight("||".into()).into()));
        assert_eq!(p("; ls"), Err(ParseError::UnexpectedToken(";".into()).into()));
        assert_eq!(p("ls ;; ls"), Err(ParseError::UnexpectedToken(";".into()).into()));
    }

    #[test]
    fn test_lex_error_surfaces() {
        assert!(matches!(p("echo 'abc"), Err(SyntaxError::Lex(_))));
    }

    // ============ Globbing ============

    #[test]
    fn test_glob_expands_unquoted_words() {
        let globber = FakeGlob(vec!["a.txt", "b.txt", "c.md"]);
        let seq = parse_line("ls *.txt '*.txt' \\*.txt", &globber).unwrap();
        assert_eq!(
            seq.items[0].pipeline.segments[0].args,
            vec!["a.txt", "b.txt", "*.txt", "*.txt"]
        );
    }

    #[test]
    fn test_unmatched_glob_is_literal() {
        let globber = FakeGlob(vec!["a.txt"]);
        let seq = parse_line("ls *.nomatch", &globber).unwrap();
        assert_eq!(seq.items[0].pipeline.segments[0].args, vec!["*.nomatch"]);
    }
}
