// id.rs — Stable identifiers for lattice and fitted records
//
// Allocated in source order while the registries are populated. Ids survive
// retroactive edits and drift merging, so cross-record references (the drift
// lending its length to a collimator) are kept by id rather than by index.

use serde::Serialize;

/// Stable identifier for a lattice record in the element registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u32);

/// Stable identifier for a fitted record in the fit registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FitId(pub u32);

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation (source) order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_record: u32,
    next_fit: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_record(&mut self) -> RecordId {
        let id = RecordId(self.next_record);
        self.next_record += 1;
        id
    }

    pub fn alloc_fit(&mut self) -> FitId {
        let id = FitId(self.next_fit);
        self.next_fit += 1;
        id
    }
}
