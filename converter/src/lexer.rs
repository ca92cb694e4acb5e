// Lexer for single TRANSPORT lines.
//
// TRANSPORT decks are free-format: numbers, quoted or slash-delimited labels
// and a handful of bare words, separated by blanks or commas. Uses the `logos`
// crate for DFA-based lexing.
//
// Preconditions: input is one physical (or re-joined) line, valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in line text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// TRANSPORT token types.
///
/// Blanks and commas are separators. A parenthesised run inside a line is an
/// inline comment and is skipped.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f,]+|\([^)\n]*\)")]
pub enum Token {
    /// Numeric field (`12.`, `-3`, `.5`, `1.5E-3`).
    #[regex(r"[+-]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// Element label, delimiters stripped.
    #[regex(r#""[^"\n]*""#, strip_delimiters)]
    #[regex(r"'[^'\n]*'", strip_delimiters)]
    #[regex(r"/[^/\n]*/", strip_delimiters)]
    Label(String),

    /// Bare word (`SENTINEL`, `OUTPUT`, `FIT`, unit names).
    #[regex(r"[A-Za-z_][A-Za-z0-9_.*+-]*", |lex| lex.slice().to_owned())]
    Word(String),

    /// End of the record; everything after it is commentary.
    #[token(";")]
    Semicolon,
}

impl Token {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Token::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// True for a bare word equal to `word`, ignoring ASCII case.
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(v) => write!(f, "{v}"),
            Token::Label(s) => write!(f, "\"{s}\""),
            Token::Word(w) => write!(f, "{w}"),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn strip_delimiters(lex: &mut logos::Lexer<'_, Token>) -> String {
    let slice = lex.slice();
    slice[1..slice.len() - 1].trim().to_owned()
}

// ── Public API ──

/// Lex one TRANSPORT line into tokens.
///
/// A character no token matches becomes a `LexError` and the line keeps
/// lexing after it.
pub fn lex(line: &str) -> LexResult {
    let lexer = Token::lexer(line);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &line[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}
