// pass.rs — Pass descriptors and dependency resolution
//
// Declares the converter's passes and the edges between them. The pipeline
// runner computes the minimal ordered subset needed for an --emit target.

use std::collections::HashSet;

// ── Pass identifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Tokenize,
    Populate,
    Reconcile,
    CombineDrifts,
    Build,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Name used in timing logs and error messages.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Tokenize => PassDescriptor {
            name: "tokenize",
            inputs: &[],
            invariants: "every physical line classified, continuations joined",
        },
        PassId::Populate => PassDescriptor {
            name: "populate",
            inputs: &[PassId::Tokenize],
            invariants: "records typed, polefaces and collimator lenders linked",
        },
        PassId::Reconcile => PassDescriptor {
            name: "reconcile",
            inputs: &[PassId::Populate],
            invariants: "fitted values applied, prefix sums consistent",
        },
        PassId::CombineDrifts => PassDescriptor {
            name: "combine_drifts",
            inputs: &[PassId::Reconcile],
            invariants: "total length preserved, lender drifts untouched",
        },
        PassId::Build => PassDescriptor {
            name: "build",
            inputs: &[PassId::CombineDrifts],
            invariants: "every section flushed to every machine",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 5] = [
    PassId::Tokenize,
    PassId::Populate,
    PassId::Reconcile,
    PassId::CombineDrifts,
    PassId::Build,
];

/// Minimal ordered set of passes needed to produce `terminal`, in execution
/// order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
