//! Tokenizer: converts a raw input line into an ordered token sequence
//! under POSIX-style quoting/escaping rules.
//!
//! Single-pass, left to right, over `char`s (not raw bytes, unlike the
//! byte-oriented scanner this module descends from — operating on
//! `char` keeps multi-byte UTF-8 text in quoted/unquoted words intact).
//! The scanner carries exactly the transient state the spec calls for:
//! `in_single_quote`, `in_double_quote`, and a growing word buffer.

use std::borrow::Cow;
use std::fmt;

use crate::ast::{Mode, Stream, Token};

/// Upper bound on tokens per line. Generalizes the reference's 512-byte
/// line cap (this crate's line reader is otherwise unbounded) into a
/// token-count cap so a pathological line still fails predictably
/// instead of growing `Vec<Token>` without limit.
pub const MAX_TOKENS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    UnterminatedSingleQuote,
    UnterminatedDoubleQuote,
    TokenLimitExceeded,
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedSingleQuote => {
                write!(f, "unexpected EOF while looking for matching `'`")
            }
            Self::UnterminatedDoubleQuote => {
                write!(f, "unexpected EOF while looking for matching `\"`")
            }
            Self::TokenLimitExceeded => write!(f, "too many tokens on one line"),
        }
    }
}

/// Tracks whether the word currently being built can still be emitted
/// as a zero-copy `Cow::Borrowed` slice of the input line: true only
/// while the word has consisted entirely of plain unquoted characters
/// starting at `start`. Any quote or escape flips it to owned.
struct WordBuilder {
    buf: String,
    start: Option<usize>,
    clean: bool,
}

impl WordBuilder {
    fn new() -> Self {
        Self {
            buf: String::new(),
            start: None,
            clean: true,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.start.is_none()
    }

    /// Append a character produced by plain unquoted scanning (eligible
    /// for the borrowed fast path).
    fn push_plain(&mut self, byte_pos: usize, c: char) {
        if self.start.is_none() && self.clean {
            self.start = Some(byte_pos);
        }
        self.buf.push(c);
    }

    /// Append a character that only exists because of quote removal or
    /// escape processing — never eligible for the borrowed fast path.
    fn push_owned(&mut self, c: char) {
        self.clean = false;
        self.buf.push(c);
    }

    /// Emit the current word (if any) as a token and reset, using
    /// `end_byte` as the borrowed slice's upper bound.
    fn flush<'a>(&mut self, line: &'a str, end_byte: usize, out: &mut Vec<Token<'a>>) {
        if self.is_empty() {
            return;
        }
        if self.clean {
            let start = self.start.expect("clean word always has a start");
            out.push(Token::Word(Cow::Borrowed(&line[start..end_byte])));
        } else {
            out.push(Token::Word(Cow::Owned(std::mem::take(&mut self.buf))));
        }
        self.buf.clear();
        self.start = None;
        self.clean = true;
    }
}

/// Matches a compound redirection operator (`1>`, `1>>`, `2>`, `2>>`)
/// starting at `chars[i]`. Only attempted at a fresh token boundary —
/// mid-word digits (`file1>out`) are plain word characters, matching
/// how a lone digit immediately preceding a redirect is conventionally
/// read as a file-descriptor number rather than splitting an existing
/// word.
fn match_fd_prefixed(chars: &[(usize, char)], i: usize) -> Option<(Token<'static>, usize)> {
    let c0 = chars.get(i).map(|&(_, c)| c);
    let c1 = chars.get(i + 1).map(|&(_, c)| c);
    let c2 = chars.get(i + 2).map(|&(_, c)| c);
    match (c0, c1, c2) {
        (Some('1'), Some('>'), Some('>')) => {
            Some((Token::RedirOut(Stream::Stdout, Mode::Append), 3))
        }
        (Some('2'), Some('>'), Some('>')) => {
            Some((Token::RedirOut(Stream::Stderr, Mode::Append), 3))
        }
        (Some('1'), Some('>'), _) => Some((Token::RedirOut(Stream::Stdout, Mode::Truncate), 2)),
        (Some('2'), Some('>'), _) => Some((Token::RedirOut(Stream::Stderr, Mode::Truncate), 2)),
        _ => None,
    }
}

/// Tokenizes one input line. Returns the finite token sequence on
/// success, or a structured error on an unterminated quote or a
/// token-count overflow. Never partially commits: on error, the caller
/// discards the whole line.
pub fn tokenize(line: &str) -> Result<Vec<Token<'_>>, TokenizeError> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut tokens = Vec::new();
    let mut word = WordBuilder::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0usize;

    macro_rules! push {
        ($tok:expr) => {{
            tokens.push($tok);
            if tokens.len() > MAX_TOKENS {
                return Err(TokenizeError::TokenLimitExceeded);
            }
        }};
    }

    while i < chars.len() {
        let (byte_pos, c) = chars[i];

        if in_single {
            if c == '\'' {
                in_single = false;
                i += 1;
            } else {
                word.push_owned(c);
                i += 1;
            }
            continue;
        }

        if in_double {
            if c == '"' {
                in_double = false;
                i += 1;
                continue;
            }
            if c == '\\' {
                match chars.get(i + 1).map(|&(_, n)| n) {
                    Some(n) if matches!(n, '"' | '\\' | '$' | '`') => {
                        word.push_owned(n);
                        i += 2;
                    }
                    Some(n) => {
                        word.push_owned('\\');
                        word.push_owned(n);
                        i += 2;
                    }
                    None => {
                        word.push_owned('\\');
                        i += 1;
                    }
                }
                continue;
            }
            word.push_owned(c);
            i += 1;
            continue;
        }

        // Unquoted.
        if c == '\\' {
            match chars.get(i + 1).map(|&(_, n)| n) {
                Some(n) => {
                    word.push_owned(n);
                    i += 2;
                }
                None => {
                    word.push_owned('\\');
                    i += 1;
                }
            }
            continue;
        }
        if c == '\'' {
            in_single = true;
            word.clean = false; // force owned: a quote touched this word
            i += 1;
            continue;
        }
        if c == '"' {
            in_double = true;
            word.clean = false;
            i += 1;
            continue;
        }

        if word.is_empty() {
            if let Some((tok, consumed)) = match_fd_prefixed(&chars, i) {
                push!(tok);
                i += consumed;
                continue;
            }
        }

        match c {
            '|' => {
                word.flush(line, byte_pos, &mut tokens);
                push!(Token::Pipe);
                i += 1;
            }
            '<' => {
                word.flush(line, byte_pos, &mut tokens);
                push!(Token::RedirIn);
                i += 1;
            }
            '>' => {
                word.flush(line, byte_pos, &mut tokens);
                if chars.get(i + 1).map(|&(_, n)| n) == Some('>') {
                    push!(Token::RedirOut(Stream::Stdout, Mode::Append));
                    i += 2;
                } else {
                    push!(Token::RedirOut(Stream::Stdout, Mode::Truncate));
                    i += 1;
                }
            }
            c if c.is_whitespace() => {
                word.flush(line, byte_pos, &mut tokens);
                while i < chars.len() && chars[i].1.is_whitespace() {
                    i += 1;
                }
            }
            c => {
                word.push_plain(byte_pos, c);
                i += 1;
            }
        }
    }

    if in_single {
        return Err(TokenizeError::UnterminatedSingleQuote);
    }
    if in_double {
        return Err(TokenizeError::UnterminatedDoubleQuote);
    }

    word.flush(line, line.len(), &mut tokens);
    if tokens.len() > MAX_TOKENS {
        return Err(TokenizeError::TokenLimitExceeded);
    }

    Ok(tokens)
}
