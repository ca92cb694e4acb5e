// tokenizer.rs — Line classification for TRANSPORT sources
//
// Splits the source into physical lines, detects the dialect (authoring deck
// or results listing), re-joins wrapped type-12 records of the results
// dialect and classifies every line by its leading type code.
//
// Preconditions: source is valid UTF-8.
// Postconditions: `lines` holds every line up to (excluding) the sentinel, in
//   source order, each tagged with its 1-based line number.
// Failure modes: none; lex errors and malformed lines become diagnostics.
// Side effects: none.

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::lexer::{self, Token};

// ── Dialect ────────────────────────────────────────────────────────────────

/// Which of the two TRANSPORT line formats a source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Input deck written by hand.
    Authoring,
    /// Output listing with fitted values, introduced by an `OUTPUT` header.
    Results,
}

// ── Line classification ────────────────────────────────────────────────────

/// The fields of a record line after the type code.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub type_code: f64,
    /// Labels in line order; the first one names the element.
    pub labels: Vec<String>,
    /// Numbers after the type code, in order.
    pub values: Vec<f64>,
    /// Bare words after the type code.
    pub words: Vec<String>,
    /// Fitted record of the results dialect (`FIT` prefix).
    pub is_fit: bool,
}

impl RawRecord {
    pub fn name(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or("")
    }

    /// Unit label of a unit-change record: the last word or label on the line.
    pub fn unit_label(&self) -> Option<&str> {
        self.words
            .last()
            .or_else(|| self.labels.last())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Blank,
    Comment,
    /// `OUTPUT` header of the results dialect.
    Header,
    /// Disabled record (type code <= 0).
    Ignored { type_code: f64 },
    Malformed { reason: String },
    Record(RawRecord),
}

#[derive(Debug, Clone)]
pub struct SourceLine {
    /// 1-based number of the first physical line.
    pub number: usize,
    /// Verbatim text; wrapped records are joined with a single space.
    pub text: String,
    pub kind: LineKind,
}

/// Result of tokenizing a whole source.
#[derive(Debug)]
pub struct TokenizeResult {
    pub dialect: Dialect,
    pub lines: Vec<SourceLine>,
    /// Line number of the sentinel, when one was reached.
    pub sentinel: Option<usize>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TokenizeResult {
    pub fn records(&self) -> impl Iterator<Item = (&SourceLine, &RawRecord)> {
        self.lines.iter().filter_map(|l| match &l.kind {
            LineKind::Record(r) => Some((l, r)),
            _ => None,
        })
    }
}

// ── Public API ─────────────────────────────────────────────────────────────

/// Dialect of a source: results when the first non-blank, non-comment line
/// starts with the word `OUTPUT`.
pub fn detect_dialect(source: &str) -> Dialect {
    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('(') {
            continue;
        }
        let first = lexer::lex(trimmed).tokens.into_iter().next();
        return match first {
            Some((token, _)) if token.is_word("OUTPUT") => Dialect::Results,
            _ => Dialect::Authoring,
        };
    }
    Dialect::Authoring
}

/// Tokenize and classify every line of `source`.
///
/// Stops at the sentinel line; nothing after it is read.
pub fn tokenize(source: &str) -> TokenizeResult {
    let dialect = detect_dialect(source);
    let physical: Vec<&str> = source.lines().collect();
    let mut lines = Vec::new();
    let mut diagnostics = Vec::new();
    let mut sentinel = None;

    let mut i = 0;
    while i < physical.len() {
        let number = i + 1;
        let mut text = physical[i].to_owned();
        i += 1;

        let mut classified = classify_line(&text, dialect);
        if dialect == Dialect::Results && wraps_to_next_line(&classified.kind) && i < physical.len() {
            text.push(' ');
            text.push_str(physical[i].trim());
            i += 1;
            classified = classify_line(&text, dialect);
        }

        for message in classified.lex_errors {
            diagnostics.push(Diagnostic::warning(codes::W0001, message).at_line(number));
        }
        if classified.sentinel {
            diagnostics.push(
                Diagnostic::info(codes::I0006, "sentinel reached, remaining lines not read")
                    .at_line(number),
            );
            sentinel = Some(number);
            break;
        }
        match &classified.kind {
            LineKind::Ignored { type_code } => diagnostics.push(
                Diagnostic::info(
                    codes::I0003,
                    format!("type code {} disabled, line ignored", type_code),
                )
                .at_line(number),
            ),
            LineKind::Malformed { reason } => diagnostics.push(
                Diagnostic::warning(codes::W0002, format!("{}, line skipped", reason))
                    .at_line(number),
            ),
            _ => {}
        }
        lines.push(SourceLine {
            number,
            text,
            kind: classified.kind,
        });
    }

    TokenizeResult {
        dialect,
        lines,
        sentinel,
        diagnostics,
    }
}

/// Classification of one line before it is placed in the source.
#[derive(Debug)]
pub struct Classified {
    pub kind: LineKind,
    pub sentinel: bool,
    pub lex_errors: Vec<String>,
}

/// Classify a single line in the given dialect.
pub fn classify_line(text: &str, dialect: Dialect) -> Classified {
    let trimmed = text.trim();
    let done = |kind| Classified {
        kind,
        sentinel: false,
        lex_errors: Vec::new(),
    };
    if trimmed.is_empty() {
        return done(LineKind::Blank);
    }
    if trimmed.starts_with('(') {
        return done(LineKind::Comment);
    }

    let lexed = lexer::lex(trimmed);
    let lex_errors = lexed.errors.into_iter().map(|e| e.message).collect();
    let mut tokens = lexed
        .tokens
        .into_iter()
        .map(|(t, _)| t)
        .take_while(|t| *t != Token::Semicolon)
        .peekable();

    let mut sentinel = false;
    let first = tokens.peek().cloned();
    let kind = match first {
        None => LineKind::Blank,
        Some(t) if t.is_word("SENTINEL") => {
            sentinel = true;
            LineKind::Blank
        }
        Some(t) if t.is_word("OUTPUT") && dialect == Dialect::Results => LineKind::Header,
        Some(t) => {
            let is_fit = dialect == Dialect::Results && t.is_word("FIT");
            let mut fields = tokens.skip(usize::from(is_fit));
            match fields.next() {
                Some(Token::Number(code)) if code <= 0.0 => LineKind::Ignored { type_code: code },
                Some(Token::Number(code)) => {
                    let mut record = RawRecord {
                        type_code: code,
                        labels: Vec::new(),
                        values: Vec::new(),
                        words: Vec::new(),
                        is_fit,
                    };
                    for token in fields {
                        match token {
                            Token::Number(v) => record.values.push(v),
                            Token::Label(l) => record.labels.push(l),
                            Token::Word(w) => record.words.push(w),
                            Token::Semicolon => break,
                        }
                    }
                    LineKind::Record(record)
                }
                Some(other) => LineKind::Malformed {
                    reason: format!("expected a numeric type code, found `{}`", other),
                },
                None => LineKind::Malformed {
                    reason: "fitted record without a type code".to_owned(),
                },
            }
        }
    };

    Classified {
        kind,
        sentinel,
        lex_errors,
    }
}

/// Results-dialect type-12 records are printed over two physical lines.
fn wraps_to_next_line(kind: &LineKind) -> bool {
    match kind {
        LineKind::Record(r) => r.type_code.abs() == 12.0,
        LineKind::Ignored { type_code } => type_code.abs() == 12.0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str, dialect: Dialect) -> RawRecord {
        match classify_line(line, dialect).kind {
            LineKind::Record(r) => r,
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn classifies_drift_record() {
        let r = record(r#"3.0 2.5 "D1" ;"#, Dialect::Authoring);
        assert_eq!(r.type_code, 3.0);
        assert_eq!(r.values, vec![2.5]);
        assert_eq!(r.name(), "D1");
        assert!(!r.is_fit);
    }

    #[test]
    fn everything_after_semicolon_is_dropped() {
        let r = record("3. 1.0 ; 99. 4.0", Dialect::Authoring);
        assert_eq!(r.values, vec![1.0]);
    }

    #[test]
    fn comment_and_blank_lines() {
        assert_eq!(
            classify_line("  (a comment 3. 1.0)", Dialect::Authoring).kind,
            LineKind::Comment
        );
        assert_eq!(classify_line("   ", Dialect::Authoring).kind, LineKind::Blank);
    }

    #[test]
    fn non_positive_type_codes_are_ignored() {
        assert_eq!(
            classify_line("-5. 1.0 10. 5.", Dialect::Authoring).kind,
            LineKind::Ignored { type_code: -5.0 }
        );
        assert_eq!(
            classify_line("0. 1.0", Dialect::Authoring).kind,
            LineKind::Ignored { type_code: 0.0 }
        );
    }

    #[test]
    fn title_line_is_malformed() {
        let kind = classify_line("'FODO CELL'", Dialect::Authoring).kind;
        assert!(matches!(kind, LineKind::Malformed { .. }));
    }

    #[test]
    fn unit_label_taken_from_last_word_or_label() {
        let r = record("15. 1. 'MM' ;", Dialect::Authoring);
        assert_eq!(r.unit_label(), Some("MM"));
        let r = record("15. 9. G", Dialect::Authoring);
        assert_eq!(r.unit_label(), Some("G"));
    }

    #[test]
    fn fit_prefix_only_in_results_dialect() {
        let r = record(r#"FIT 5. 1.0 4.2 5.0 "Q1""#, Dialect::Results);
        assert!(r.is_fit);
        assert_eq!(r.type_code, 5.0);
        let kind = classify_line(r#"FIT 5. 1.0 "Q1""#, Dialect::Authoring).kind;
        assert!(matches!(kind, LineKind::Malformed { .. }));
    }

    #[test]
    fn detects_results_dialect_from_first_record() {
        assert_eq!(detect_dialect("(c)\n\nOUTPUT\n3. 1.0"), Dialect::Results);
        assert_eq!(detect_dialect("'TITLE'\n3. 1.0"), Dialect::Authoring);
        assert_eq!(detect_dialect(""), Dialect::Authoring);
    }

    #[test]
    fn sentinel_halts_the_pass() {
        let result = tokenize("3. 1.0 ;\nSENTINEL\n3. 2.0 ;\n");
        assert_eq!(result.sentinel, Some(2));
        assert_eq!(result.records().count(), 1);
    }

    #[test]
    fn wrapped_correlation_records_are_joined_in_results_dialect() {
        let source = "OUTPUT\n12. 0.1 0. 0. 0. 0. 0.2 0. 0.\n0. 0. 0. 0. 0. 0. 0. ;\n3. 1.0 ;\n";
        let result = tokenize(source);
        let records: Vec<_> = result.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0.number, 2);
        assert_eq!(records[0].1.values.len(), 15);
        assert_eq!(records[1].0.number, 4);
    }

    #[test]
    fn correlation_records_are_not_joined_in_authoring_dialect() {
        let source = "12. 0.1 0. 0. ;\n3. 1.0 ;\n";
        let result = tokenize(source);
        assert_eq!(result.records().count(), 2);
    }

    #[test]
    fn disabled_and_malformed_lines_are_reported() {
        let result = tokenize("-3. 1.0 ;\n'TITLE'\n");
        let found: Vec<_> = result.diagnostics.iter().filter_map(|d| d.code).collect();
        assert_eq!(found, vec![codes::I0003, codes::W0002]);
        assert_eq!(result.diagnostics[1].line, Some(2));
    }
}
