// registry.rs — Ordered record tables with a running cumulative length
//
// `ElementRegistry` holds the lattice records in source order; `FitRegistry`
// holds the fitted records of a results listing. Both keep a prefix sum of the
// length contributed by each record, so retroactive edits (fitted lengths)
// shift every later position in one place.
//
// Preconditions: none.
// Postconditions: `cumulative[i] == cumulative[i-1] + contribution(i)` and
//   `total_length == cumulative[last]` (0 when empty) after every mutation.
// Failure modes: out-of-range indices return `None`.
// Side effects: none.

use serde::Serialize;

use crate::record::{ElementRecord, FitRecord, TypeCode};

// ── Entry trait ────────────────────────────────────────────────────────────

/// What the registry needs to know about a record.
pub trait Entry {
    fn name(&self) -> &str;
    fn type_code(&self) -> TypeCode;
    fn length(&self) -> f64;

    /// Length this record adds to the beamline.
    fn contribution(&self) -> f64 {
        if self.type_code().carries_length() {
            self.length()
        } else {
            0.0
        }
    }
}

impl Entry for ElementRecord {
    fn name(&self) -> &str {
        &self.name
    }
    fn type_code(&self) -> TypeCode {
        self.type_code
    }
    fn length(&self) -> f64 {
        self.length
    }
}

impl Entry for FitRecord {
    fn name(&self) -> &str {
        &self.name
    }
    fn type_code(&self) -> TypeCode {
        self.type_code
    }
    fn length(&self) -> f64 {
        self.length
    }
}

// ── Registry ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Registry<R> {
    records: Vec<R>,
    cumulative_length: Vec<f64>,
    total_length: f64,
}

pub type ElementRegistry = Registry<ElementRecord>;
pub type FitRegistry = Registry<FitRecord>;

impl<R> Default for Registry<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            cumulative_length: Vec::new(),
            total_length: 0.0,
        }
    }
}

impl<R: Entry> Registry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and extend the prefix sum. Returns its index.
    pub fn append(&mut self, record: R) -> usize {
        self.total_length += record.contribution();
        self.cumulative_length.push(self.total_length);
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    pub fn cumulative_length(&self) -> &[f64] {
        &self.cumulative_length
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    /// First record with this name and type code, in insertion order.
    pub fn get_by_name_and_type(&self, name: &str, type_code: TypeCode) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.name() == name && r.type_code() == type_code)
    }

    /// Every index carrying `name`, in insertion order.
    pub fn indices_by_name(&self, name: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.name() == name)
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct non-empty names in order of first appearance.
    pub fn unique_names(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .map(|r| r.name())
            .filter(|n| !n.is_empty() && seen.insert(*n))
            .collect()
    }

    /// Edit a record in place, shifting later prefix entries by any change in
    /// its contribution. Returns the length delta, or `None` when out of range.
    pub fn update<F>(&mut self, index: usize, edit: F) -> Option<f64>
    where
        F: FnOnce(&mut R),
    {
        let record = self.records.get_mut(index)?;
        let before = record.contribution();
        edit(&mut *record);
        let delta = record.contribution() - before;
        if delta != 0.0 {
            for c in &mut self.cumulative_length[index..] {
                *c += delta;
            }
            self.total_length += delta;
        }
        Some(delta)
    }

    /// Cumulative length at the end of the record at `index`.
    pub fn position(&self, index: usize) -> Option<f64> {
        self.cumulative_length.get(index).copied()
    }

    /// Prefix-sum invariant within `tolerance`.
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        let mut running = 0.0;
        for (record, &cumulative) in self.records.iter().zip(&self.cumulative_length) {
            running += record.contribution();
            if (running - cumulative).abs() > tolerance {
                return false;
            }
        }
        self.cumulative_length.len() == self.records.len()
            && (running - self.total_length).abs() <= tolerance
    }
}

impl ElementRegistry {
    /// Overwrite a record's length (and raw field 0).
    pub fn set_length(&mut self, index: usize, length: f64) -> Option<f64> {
        self.update(index, |r| r.set_length(length))
    }
}
