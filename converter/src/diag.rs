// diag.rs — Coded conversion findings and their summary counts
//
// Provides the diagnostic types shared by every conversion pass. Anything the
// converter skips, ignores or defaults is reported here; structural failures
// abort through `ConvertError` instead.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0004`, `I0201`).
///
/// Codes are `&'static str` constants defined in the `codes` module. The
/// leading letter mirrors the severity the code is normally raised with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic code registry.
pub mod codes {
    use super::DiagCode;

    // ── Lines (W0001–W0099) ──
    /// Unrecognized character in a line; the rest of the line is kept.
    pub const W0001: DiagCode = DiagCode("W0001");
    /// Line without a numeric type code.
    pub const W0002: DiagCode = DiagCode("W0002");
    /// Disabled record (type code <= 0).
    pub const I0003: DiagCode = DiagCode("I0003");
    /// Positive type code outside the known set.
    pub const W0004: DiagCode = DiagCode("W0004");
    /// Known type code with no conversion.
    pub const W0005: DiagCode = DiagCode("W0005");
    /// Sentinel reached; remaining lines not read.
    pub const I0006: DiagCode = DiagCode("I0006");

    // ── Units (W0100–W0199) ──
    /// Unknown unit-change directive number.
    pub const W0100: DiagCode = DiagCode("W0100");
    /// Unknown unit label for a known directive.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// Unit directive recognised but not converted (bend angles, mass).
    pub const I0102: DiagCode = DiagCode("I0102");

    // ── Fits (W0200–W0299) ──
    /// Fitted record with no matching lattice element.
    pub const W0200: DiagCode = DiagCode("W0200");
    /// Lattice element updated from a fitted record.
    pub const I0201: DiagCode = DiagCode("I0201");
    /// Several elements share a name and type code; fits paired in scan order.
    pub const W0202: DiagCode = DiagCode("W0202");
    /// Fit matched an element kind whose fitted values are not applied.
    pub const I0203: DiagCode = DiagCode("I0203");

    // ── Elements (W0300–W0399) ──
    /// Negative element length; element skipped.
    pub const W0300: DiagCode = DiagCode("W0300");
    /// Collimator without a usable borrowed length; skipped.
    pub const W0301: DiagCode = DiagCode("W0301");
    /// Unknown special-input sub-code.
    pub const W0302: DiagCode = DiagCode("W0302");
    /// r.m.s. beam addition before any beam definition.
    pub const W0303: DiagCode = DiagCode("W0303");
    /// Beam correction not attached to the current beam definition.
    pub const I0304: DiagCode = DiagCode("I0304");
    /// Beam correction with invalid or missing correlations.
    pub const W0305: DiagCode = DiagCode("W0305");
    /// Output machine lacks the primitive for this element.
    pub const W0306: DiagCode = DiagCode("W0306");
    /// Print-control code without effect on the conversion.
    pub const I0307: DiagCode = DiagCode("I0307");
    /// Strength computed without a beam definition; set to zero.
    pub const W0308: DiagCode = DiagCode("W0308");
    /// Non-positive magnet aperture; element skipped.
    pub const W0309: DiagCode = DiagCode("W0309");
    /// Beam definition with non-positive momentum; ignored.
    pub const W0310: DiagCode = DiagCode("W0310");
    /// Type-6 record read as a transform update; ignored.
    pub const I0311: DiagCode = DiagCode("I0311");
    /// Fringe-field integral defaulted to 0.5.
    pub const I0312: DiagCode = DiagCode("I0312");
    /// Lattice split at a beam redefinition.
    pub const I0313: DiagCode = DiagCode("I0313");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
    Info,
}

impl DiagLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
            DiagLevel::Info => "info",
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A conversion diagnostic emitted by any pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// 1-based source line, when the condition belongs to one.
    pub line: Option<usize>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, line, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            line: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    pub fn info(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Info, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the source line the diagnostic refers to.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is(&self, code: DiagCode) -> bool {
        self.code == Some(code)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.level.as_str();
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: ", level, code)?;
        } else {
            write!(f, "{}: ", level)?;
        }
        if let Some(line) = self.line {
            write!(f, "line {}: ", line)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Summary ──────────────────────────────────────────────────────────────

/// Counts of the skipped and ignored conditions of one conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub discarded_type_codes: usize,
    pub malformed_lines: usize,
    pub skipped_negative_lengths: usize,
    pub unmatched_fits: usize,
    pub applied_fits: usize,
    pub capability_drops: usize,
    pub unit_directives_ignored: usize,
    pub warnings: usize,
}

impl Summary {
    pub fn from_diagnostics(diags: &[Diagnostic]) -> Self {
        let mut summary = Summary::default();
        for d in diags {
            if d.level == DiagLevel::Warning {
                summary.warnings += 1;
            }
            let Some(code) = d.code else { continue };
            match code {
                codes::I0003 | codes::W0004 | codes::W0005 => summary.discarded_type_codes += 1,
                codes::W0001 | codes::W0002 => summary.malformed_lines += 1,
                codes::W0300 => summary.skipped_negative_lengths += 1,
                codes::W0200 => summary.unmatched_fits += 1,
                codes::I0201 => summary.applied_fits += 1,
                codes::W0306 => summary.capability_drops += 1,
                codes::W0100 | codes::W0101 | codes::I0102 => summary.unit_directives_ignored += 1,
                _ => {}
            }
        }
        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discarded type codes, {} malformed lines, {} negative lengths skipped, \
             {} fits applied, {} fits unmatched, {} capability drops",
            self.discarded_type_codes,
            self.malformed_lines,
            self.skipped_negative_lengths,
            self.applied_fits,
            self.unmatched_fits,
            self.capability_drops,
        )
    }
}
