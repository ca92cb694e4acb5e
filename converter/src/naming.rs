// naming.rs — Element names for the emitted machine
//
// Every emitted element gets either an automatic name (type prefix plus a
// per-type counter) or, with `keep_names`, its source label made unique
// within the current section by an `_N` suffix.

use std::collections::{HashMap, HashSet};

/// Element families with their own auto-name counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Drift,
    Marker,
    Dipole,
    Quadrupole,
    Sextupole,
    Solenoid,
    Collimator,
    Cavity,
    Transform,
}

#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
    keep_names: bool,
    counters: HashMap<NameKind, u32>,
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new(keep_names: bool) -> Self {
        Self {
            keep_names,
            ..Self::default()
        }
    }

    /// Advance the counter for `kind` and return its new value (1-based).
    pub fn bump(&mut self, kind: NameKind) -> u32 {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Name for an element whose source label is `requested`.
    ///
    /// Uses the label when names are kept and it is non-empty, otherwise
    /// `auto()`. The returned name is recorded as used.
    pub fn assign(&mut self, requested: &str, auto: impl FnOnce() -> String) -> String {
        let requested = requested.trim();
        let name = if self.keep_names && !requested.is_empty() {
            self.disambiguate(requested)
        } else {
            auto()
        };
        self.used.insert(name.clone());
        name
    }

    fn disambiguate(&self, requested: &str) -> String {
        if !self.used.contains(requested) {
            return requested.to_owned();
        }
        (1..)
            .map(|n| format!("{}_{}", requested, n))
            .find(|candidate| !self.used.contains(candidate))
            .unwrap_or_else(|| requested.to_owned())
    }

    /// Forget counters and used names (new output section).
    pub fn reset(&mut self) {
        self.counters.clear();
        self.used.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_kind() {
        let mut names = NameAllocator::new(false);
        assert_eq!(names.bump(NameKind::Drift), 1);
        assert_eq!(names.bump(NameKind::Drift), 2);
        assert_eq!(names.bump(NameKind::Quadrupole), 1);
    }

    #[test]
    fn auto_names_ignore_labels_unless_kept() {
        let mut names = NameAllocator::new(false);
        let n = names.bump(NameKind::Drift);
        assert_eq!(names.assign("D1", || format!("DR{n}")), "DR1");
    }

    #[test]
    fn kept_names_are_disambiguated() {
        let mut names = NameAllocator::new(true);
        assert_eq!(names.assign("Q1", || "QF1".into()), "Q1");
        assert_eq!(names.assign("Q1", || "QF2".into()), "Q1_1");
        assert_eq!(names.assign("Q1", || "QF3".into()), "Q1_2");
        assert_eq!(names.assign("", || "QF4".into()), "QF4");
    }

    #[test]
    fn reset_clears_used_names_and_counters() {
        let mut names = NameAllocator::new(true);
        names.assign("Q1", String::new);
        names.bump(NameKind::Dipole);
        names.reset();
        assert_eq!(names.assign("Q1", String::new), "Q1");
        assert_eq!(names.bump(NameKind::Dipole), 1);
    }
}
