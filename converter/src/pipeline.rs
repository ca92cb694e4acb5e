// pipeline.rs — Conversion state and pass orchestration
//
// Holds every pass artifact in one state struct and runs the minimal set of
// passes for a terminal PassId.
//
// Preconditions: the source text is set when the state is created.
// Postconditions: artifacts of every pass in `required_passes(terminal)` are
//   populated, or an error is returned.
// Failure modes: structural records, callback I/O errors, missing artifacts.
// Side effects: logs per-pass timing through `tracing`; hands finished
//   sections to the caller's callback.

use std::time::Instant;

use serde::Serialize;

use crate::builders::BuildEnv;
use crate::combine::combine_drifts;
use crate::diag::{Diagnostic, Summary};
use crate::error::ConvertError;
use crate::machine::MachineBuilder;
use crate::pass::{descriptor, required_passes, PassId};
use crate::populate::populate;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::record::ElementRecord;
use crate::registry::{ElementRegistry, FitRegistry};
use crate::session::{build_sections, BuildReport, SectionSink, Splitter};
use crate::state::{DistributionKind, Particle};
use crate::tokenizer::{tokenize, Dialect, TokenizeResult};

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertOptions {
    pub particle: Particle,
    pub distribution: DistributionKind,
    /// Start a new section at every beam redefinition.
    pub split: bool,
    /// Use source labels as element names.
    pub keep_names: bool,
    pub combine_drifts: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            particle: Particle::Proton,
            distribution: DistributionKind::Gauss,
            split: true,
            keep_names: false,
            combine_drifts: false,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Where a rendered file came from.
///
/// `source_hash`: SHA-256 of the raw input text.
/// `converter_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_name: String,
    pub source_hash: [u8; 32],
    pub converter_version: &'static str,
}

impl Provenance {
    pub fn compute(source: &str, source_name: &str) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let mut source_hash = [0u8; 32];
        source_hash.copy_from_slice(&hasher.finalize());

        Provenance {
            source_name: source_name.to_owned(),
            source_hash,
            converter_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

// ── State ──────────────────────────────────────────────────────────────────

/// Every artifact of one conversion plus the accumulated diagnostics.
pub struct ConversionState {
    pub source: String,
    pub options: ConvertOptions,
    pub provenance: Provenance,
    pub tokens: Option<TokenizeResult>,
    pub registry: Option<ElementRegistry>,
    pub fits: Option<FitRegistry>,
    pub reconcile: Option<ReconcileReport>,
    pub plan: Option<Vec<ElementRecord>>,
    pub build: Option<BuildReport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ConversionState {
    pub fn new(source: impl Into<String>, source_name: &str, options: ConvertOptions) -> Self {
        let source = source.into();
        let provenance = Provenance::compute(&source, source_name);
        Self {
            source,
            options,
            provenance,
            tokens: None,
            registry: None,
            fits: None,
            reconcile: None,
            plan: None,
            build: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.tokens.as_ref().map(|t| t.dialect)
    }

    pub fn summary(&self) -> Summary {
        Summary::from_diagnostics(&self.diagnostics)
    }
}

/// JSON report written by `--report`.
#[derive(Debug, Serialize)]
pub struct ConversionReport<'a> {
    pub source: &'a str,
    pub source_sha256: String,
    pub converter_version: &'static str,
    pub dialect: Option<Dialect>,
    pub options: &'a ConvertOptions,
    pub summary: Summary,
    pub reconcile: Option<&'a ReconcileReport>,
    pub build: Option<&'a BuildReport>,
    pub diagnostics: &'a [Diagnostic],
}

impl<'a> ConversionReport<'a> {
    pub fn new(state: &'a ConversionState) -> Self {
        Self {
            source: &state.provenance.source_name,
            source_sha256: state.provenance.source_hash_hex(),
            converter_version: state.provenance.converter_version,
            dialect: state.dialect(),
            options: &state.options,
            summary: state.summary(),
            reconcile: state.reconcile.as_ref(),
            build: state.build.as_ref(),
            diagnostics: &state.diagnostics,
        }
    }

    pub fn to_json(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

fn artifact<T>(slot: &Option<T>, pass: PassId, needs: PassId) -> Result<&T, ConvertError> {
    slot.as_ref().ok_or_else(|| missing(pass, needs))
}

fn missing(pass: PassId, needs: PassId) -> ConvertError {
    ConvertError::MissingArtifact {
        pass: descriptor(pass).name,
        needs: descriptor(needs).name,
    }
}

fn finish_pass(pass_id: PassId, elapsed: std::time::Duration, new_diagnostics: usize) {
    tracing::info!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        diagnostics = new_diagnostics,
        "pass complete"
    );
}

/// Run the minimal set of passes to produce `terminal`.
///
/// `machines` and `on_section` are only used by the build pass; each flushed
/// section of each machine is handed to `on_section` as soon as it is final.
pub fn run_pipeline(
    state: &mut ConversionState,
    terminal: PassId,
    machines: &mut [&mut dyn MachineBuilder],
    on_section: &mut SectionSink<'_>,
) -> Result<(), ConvertError> {
    for pass_id in required_passes(terminal) {
        let start = Instant::now();
        let before = state.diagnostics.len();

        match pass_id {
            PassId::Tokenize => {
                let mut tokens = tokenize(&state.source);
                state.diagnostics.append(&mut tokens.diagnostics);
                state.tokens = Some(tokens);
            }
            PassId::Populate => {
                let tokens = artifact(&state.tokens, pass_id, PassId::Tokenize)?;
                let mut population = populate(tokens, state.options.split)?;
                state.diagnostics.append(&mut population.diagnostics);
                state.registry = Some(population.registry);
                state.fits = Some(population.fits);
            }
            PassId::Reconcile => {
                let fits = artifact(&state.fits, pass_id, PassId::Populate)?;
                let registry = state
                    .registry
                    .as_mut()
                    .ok_or_else(|| missing(pass_id, PassId::Populate))?;
                let mut outcome = reconcile(registry, fits);
                state.diagnostics.append(&mut outcome.diagnostics);
                state.reconcile = Some(outcome.report);
            }
            PassId::CombineDrifts => {
                let registry = artifact(&state.registry, pass_id, PassId::Reconcile)?;
                let plan = if state.options.combine_drifts {
                    combine_drifts(registry.records())
                } else {
                    registry.records().to_vec()
                };
                state.plan = Some(plan);
            }
            PassId::Build => {
                let plan = artifact(&state.plan, pass_id, PassId::CombineDrifts)?;
                let mut env = BuildEnv::new(&state.options);
                let mut splitter = Splitter::new(state.options.split);
                let outcome = build_sections(plan, &mut env, &mut splitter, machines, on_section);
                state.diagnostics.append(&mut env.diagnostics);
                state.build = Some(outcome?);
            }
        }

        finish_pass(pass_id, start.elapsed(), state.diagnostics.len() - before);
    }
    Ok(())
}

/// Run every pass on `source`.
pub fn convert(
    source: &str,
    source_name: &str,
    options: ConvertOptions,
    machines: &mut [&mut dyn MachineBuilder],
    on_section: &mut SectionSink<'_>,
) -> Result<ConversionState, ConvertError> {
    let mut state = ConversionState::new(source, source_name, options);
    run_pipeline(&mut state, PassId::Build, machines, on_section)?;
    Ok(state)
}
