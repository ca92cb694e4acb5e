// reconcile.rs — Write solver-fitted values back into the element registry
//
// For each fitted name, fits pair positionally with the lattice records of the
// same name and type code: the k-th fitted quadrupole `Q1` updates the k-th
// lattice quadrupole `Q1`. Drifts take the fitted length, dipoles and
// quadrupoles the fitted length and raw field 1.
//
// Preconditions: both registries come from the same `populate` call.
// Postconditions: registry prefix sums stay consistent; running twice with
//   the same fits leaves the registry unchanged.
// Failure modes: none; unmatched fits are warnings.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::id::FitId;
use crate::record::{BendDefinition, ElementKind, ElementRecord, FitRecord, TypeCode};
use crate::registry::{ElementRegistry, FitRegistry};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Fits whose values were written into a lattice record.
    pub applied: usize,
    /// Fits paired with a record whose kind takes no fitted values.
    pub matched_only: usize,
    pub unmatched: Vec<FitId>,
    /// `name (type)` pairs carried by more than one lattice record.
    pub ambiguous: Vec<String>,
}

#[derive(Debug)]
pub struct Reconciliation {
    pub report: ReconcileReport,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn reconcile(registry: &mut ElementRegistry, fits: &FitRegistry) -> Reconciliation {
    let mut report = ReconcileReport::default();
    let mut diagnostics = Vec::new();

    for fit in fits.iter().filter(|f| f.name.is_empty()) {
        unmatched(fit, &mut report, &mut diagnostics);
    }

    for name in fits.unique_names() {
        let candidates = registry.indices_by_name(name);

        let mut per_type: HashMap<TypeCode, usize> = HashMap::new();
        for &i in &candidates {
            *per_type.entry(registry.records()[i].type_code).or_insert(0) += 1;
        }
        let mut warned = HashSet::new();

        let mut consumed = HashSet::new();
        for fit in fits.iter().filter(|f| f.name == name) {
            if per_type.get(&fit.type_code).is_some_and(|&n| n > 1) && warned.insert(fit.type_code) {
                let pair = format!("{} ({})", name, fit.type_code.describe());
                diagnostics.push(
                    Diagnostic::warning(
                        codes::W0202,
                        format!("{} occurs more than once in the lattice; fits paired in order", pair),
                    )
                    .at_line(fit.line),
                );
                report.ambiguous.push(pair);
            }

            let slot = candidates
                .iter()
                .copied()
                .find(|i| !consumed.contains(i) && registry.records()[*i].type_code == fit.type_code);
            let Some(index) = slot else {
                unmatched(fit, &mut report, &mut diagnostics);
                continue;
            };
            consumed.insert(index);

            let mut applied = false;
            registry.update(index, |record| applied = apply_fit(record, fit));
            let target_line = registry.records()[index].line;
            if applied {
                report.applied += 1;
                diagnostics.push(
                    Diagnostic::info(
                        codes::I0201,
                        format!(
                            "{} {} updated from fit at line {}",
                            fit.type_code.describe(),
                            name,
                            fit.line
                        ),
                    )
                    .at_line(target_line),
                );
            } else {
                report.matched_only += 1;
                diagnostics.push(
                    Diagnostic::info(
                        codes::I0203,
                        format!("fitted {} {} carries no applied values", fit.type_code.describe(), name),
                    )
                    .at_line(fit.line),
                );
            }
        }
    }

    tracing::debug!(
        applied = report.applied,
        unmatched = report.unmatched.len(),
        "fits reconciled"
    );
    Reconciliation {
        report,
        diagnostics,
    }
}

fn unmatched(fit: &FitRecord, report: &mut ReconcileReport, diagnostics: &mut Vec<Diagnostic>) {
    report.unmatched.push(fit.id);
    let name = if fit.name.is_empty() { "<unnamed>" } else { fit.name.as_str() };
    diagnostics.push(
        Diagnostic::warning(
            codes::W0200,
            format!("fitted {} {} has no lattice counterpart, dropped", fit.type_code.describe(), name),
        )
        .at_line(fit.line),
    );
}

/// Write a fit's values into a lattice record. Returns whether the kind
/// takes fitted values.
///
/// A fitted dipole line carries the field in field 1 and the bend angle in
/// field 3; the dipole's own definition mode picks which one is kept.
fn apply_fit(record: &mut ElementRecord, fit: &FitRecord) -> bool {
    let value = match &mut record.kind {
        ElementKind::Drift => None,
        ElementKind::Dipole(def) => {
            let value = match def.mode {
                BendDefinition::Field => fit.field(1),
                BendDefinition::Angle => fit.field(3),
            };
            if let Some(value) = value {
                def.field_or_angle = value;
            }
            value
        }
        ElementKind::Quadrupole { field: tip, .. } => {
            let value = fit.field(1);
            if let Some(value) = value {
                *tip = value;
            }
            value
        }
        _ => return false,
    };
    if let (Some(value), Some(raw)) = (value, record.raw_fields.get_mut(1)) {
        *raw = value;
    }
    record.set_length(fit.length);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populate::populate;
    use crate::tokenizer::tokenize;

    fn registries(source: &str) -> (ElementRegistry, FitRegistry) {
        let pop = populate(&tokenize(source), true).unwrap();
        (pop.registry, pop.fits)
    }

    const LISTING: &str = "\
OUTPUT
3. 1.0 \"D1\" ;
5. 0.5 4.0 5.0 \"Q1\" ;
4. 2.0 10.0 \"B1\" ;
FIT 3. 1.5 \"D1\" ;
FIT 5. 0.5 4.4 5.0 \"Q1\" ;
FIT 4. 2.0 11.0 \"BEND9\" ;
";

    #[test]
    fn fitted_values_update_lengths_and_fields() {
        let (mut registry, fits) = registries(LISTING);
        let out = reconcile(&mut registry, &fits);
        assert_eq!(out.report.applied, 2);
        let records = registry.records();
        assert_eq!(records[0].length, 1.5);
        assert!(matches!(records[1].kind, ElementKind::Quadrupole { field, .. } if field == 4.4));
        assert_eq!(records[1].raw_fields[1], 4.4);
        assert_eq!(registry.total_length(), 4.0);
        assert!(registry.is_consistent(1e-12));
    }

    #[test]
    fn unmatched_fit_is_dropped_without_changes() {
        let (mut registry, fits) = registries(LISTING);
        let out = reconcile(&mut registry, &fits);
        assert_eq!(out.report.unmatched.len(), 1);
        let warning = out.diagnostics.iter().find(|d| d.is(codes::W0200)).unwrap();
        assert!(warning.message.contains("BEND9"));
        let ElementKind::Dipole(def) = &registry.records()[2].kind else {
            panic!("expected dipole")
        };
        assert_eq!(def.field_or_angle, 10.0);
        assert_eq!(registry.records()[2].length, 2.0);
    }

    fn dipole_value(registry: &ElementRegistry, index: usize) -> f64 {
        match &registry.records()[index].kind {
            ElementKind::Dipole(def) => def.field_or_angle,
            other => panic!("expected dipole, got {other:?}"),
        }
    }

    #[test]
    fn fitted_dipole_follows_its_bend_definition() {
        let source = "\
OUTPUT
4. 2.0 10.0 \"BF\" ;
13. 48. ;
4. 2.0 15.0 \"BA\" ;
FIT 4. 2.0 11.0 0. 12.5 \"BF\" ;
FIT 4. 2.5 9.0 0. 16.0 \"BA\" ;
";
        let (mut registry, fits) = registries(source);
        let out = reconcile(&mut registry, &fits);
        assert_eq!(out.report.applied, 2);
        assert_eq!(dipole_value(&registry, 0), 11.0);
        assert_eq!(dipole_value(&registry, 2), 16.0);
        assert_eq!(registry.records()[2].raw_fields[1], 16.0);
        assert_eq!(registry.records()[2].length, 2.5);
    }

    #[test]
    fn reconciling_twice_is_idempotent() {
        let (mut registry, fits) = registries(LISTING);
        reconcile(&mut registry, &fits);
        let once = registry.records().to_vec();
        let total = registry.total_length();
        reconcile(&mut registry, &fits);
        assert_eq!(registry.records(), once.as_slice());
        assert_eq!(registry.total_length(), total);
    }

    #[test]
    fn duplicate_names_pair_in_order() {
        let source = "\
OUTPUT
5. 1.0 4.0 5.0 \"Q\" ;
3. 1.0 ;
5. 1.0 4.0 5.0 \"Q\" ;
FIT 5. 1.0 3.0 5.0 \"Q\" ;
FIT 5. 1.0 -3.0 5.0 \"Q\" ;
";
        let (mut registry, fits) = registries(source);
        let out = reconcile(&mut registry, &fits);
        let tips: Vec<_> = registry
            .iter()
            .filter_map(|r| match r.kind {
                ElementKind::Quadrupole { field, .. } => Some(field),
                _ => None,
            })
            .collect();
        assert_eq!(tips, vec![3.0, -3.0]);
        assert_eq!(out.report.ambiguous, vec!["Q (quadrupole)".to_owned()]);
        assert_eq!(out.diagnostics.iter().filter(|d| d.is(codes::W0202)).count(), 1);
    }

    #[test]
    fn same_name_different_type_does_not_match() {
        let source = "OUTPUT\n3. 1.0 \"X\" ;\nFIT 5. 1.0 3.0 5.0 \"X\" ;\n";
        let (mut registry, fits) = registries(source);
        let out = reconcile(&mut registry, &fits);
        assert_eq!(out.report.unmatched.len(), 1);
        assert_eq!(registry.records()[0].length, 1.0);
    }

    #[test]
    fn other_kinds_are_matched_but_not_applied() {
        let source = "OUTPUT\n18. 1.0 2.0 3.0 \"S\" ;\nFIT 18. 2.0 2.0 3.0 \"S\" ;\n";
        let (mut registry, fits) = registries(source);
        let out = reconcile(&mut registry, &fits);
        assert_eq!(out.report.matched_only, 1);
        assert_eq!(registry.records()[0].length, 1.0);
        assert!(out.diagnostics[0].is(codes::I0203));
    }
}
