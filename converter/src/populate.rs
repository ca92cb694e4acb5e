// populate.rs — Registry population from classified lines
//
// One forward pass over the record lines: every recognised lattice record
// becomes a typed `ElementRecord` in the element registry, every `FIT` record
// of a results listing becomes a `FitRecord`. Adjacency that the builders
// need later (poleface angles, collimator length lenders, beam corrections)
// is resolved here over the record sequence.
//
// Preconditions: `tokens` comes from `tokenizer::tokenize`.
// Postconditions: registry ids are allocated in source order; every dipole
//   carries the bend-definition mode in force at its line.
// Failure modes: a recognised record with too few numeric fields is a
//   structural `ConvertError`.
// Side effects: none.

use crate::diag::{codes, Diagnostic};
use crate::error::ConvertError;
use crate::id::IdAllocator;
use crate::record::{
    AccelDef, BeamDef, BendDefinition, CollimatorDef, DipoleDef, ElementKind, ElementRecord,
    FitRecord, TypeCode,
};
use crate::registry::{ElementRegistry, FitRegistry};
use crate::tokenizer::{RawRecord, SourceLine, TokenizeResult};

/// Output of the population pass.
#[derive(Debug)]
pub struct Population {
    pub registry: ElementRegistry,
    pub fits: FitRegistry,
    pub diagnostics: Vec<Diagnostic>,
}

/// Populate the element and fit registries.
///
/// `split_on_beam` mirrors the session's splitting policy: when splitting is
/// disallowed, a beam record does not end a collimator's length lookahead;
/// when it is allowed, a beam redefinition puts the bend definition back to
/// field mode for the dipoles that follow.
pub fn populate(tokens: &TokenizeResult, split_on_beam: bool) -> Result<Population, ConvertError> {
    let mut ids = IdAllocator::new();
    let mut diagnostics = Vec::new();
    let mut records = Vec::new();
    let mut fits = FitRegistry::new();
    let mut mode = BendDefinition::Field;
    let mut beam_defined = false;

    for (line, raw) in tokens.records() {
        let Some(type_code) = TypeCode::from_code(raw.type_code) else {
            diagnostics.push(
                Diagnostic::warning(
                    codes::W0004,
                    format!("unrecognised type code {}, line discarded", raw.type_code),
                )
                .at_line(line.number),
            );
            continue;
        };

        if raw.is_fit {
            fits.append(FitRecord {
                id: ids.alloc_fit(),
                type_code,
                name: raw.name().to_owned(),
                length: leading_length(type_code, raw),
                raw_fields: raw.values.clone(),
                line: line.number,
                source: line.text.clone(),
            });
            continue;
        }

        let kind = element_kind(type_code, raw, line.number, mode)?;
        match &kind {
            ElementKind::PrintControl { code } if *code == 47.0 => mode = BendDefinition::Field,
            ElementKind::PrintControl { code } if *code == 48.0 => mode = BendDefinition::Angle,
            ElementKind::Beam(def) if def.defines_beam() => {
                // A redefinition starts a new section with default machine state.
                if beam_defined && split_on_beam {
                    mode = BendDefinition::Field;
                }
                beam_defined = true;
            }
            _ => {}
        }
        records.push(element_record(ids.alloc_record(), type_code, kind, raw, line));
    }

    link_polefaces(&mut records);
    link_collimators(&mut records, split_on_beam);
    mark_beam_corrections(&mut records);

    let mut registry = ElementRegistry::new();
    for record in records {
        registry.append(record);
    }

    Ok(Population {
        registry,
        fits,
        diagnostics,
    })
}

// ── Record construction ────────────────────────────────────────────────────

fn element_record(
    id: crate::id::RecordId,
    type_code: TypeCode,
    kind: ElementKind,
    raw: &RawRecord,
    line: &SourceLine,
) -> ElementRecord {
    ElementRecord {
        id,
        type_code,
        name: match type_code {
            TypeCode::UnitChange => String::new(),
            _ => raw.name().to_owned(),
        },
        length: leading_length(type_code, raw),
        raw_fields: raw.values.clone(),
        kind,
        line: line.number,
        source: line.text.clone(),
    }
}

fn leading_length(type_code: TypeCode, raw: &RawRecord) -> f64 {
    if type_code.carries_length() {
        raw.values.first().copied().unwrap_or(0.0)
    } else {
        0.0
    }
}

fn require(raw: &RawRecord, count: usize, type_code: TypeCode, line: usize) -> Result<(), ConvertError> {
    if raw.values.len() < count {
        return Err(ConvertError::structural(
            line,
            format!(
                "{} record needs {} numeric fields, found {}",
                type_code.describe(),
                count,
                raw.values.len()
            ),
        ));
    }
    Ok(())
}

/// Build the typed payload of a lattice record.
pub fn element_kind(
    type_code: TypeCode,
    raw: &RawRecord,
    line: usize,
    mode: BendDefinition,
) -> Result<ElementKind, ConvertError> {
    let v = &raw.values;
    let needed = match type_code {
        TypeCode::Beam => 7,
        TypeCode::Dipole | TypeCode::Acceleration | TypeCode::Solenoid => 2,
        TypeCode::Quadrupole | TypeCode::Sextupole => 3,
        TypeCode::Poleface
        | TypeCode::Drift
        | TypeCode::PrintControl
        | TypeCode::UnitChange
        | TypeCode::SpecialInput
        | TypeCode::CoordinateRotation => 1,
        _ => 0,
    };
    require(raw, needed, type_code, line)?;

    let kind = match type_code {
        TypeCode::Beam => ElementKind::Beam(BeamDef {
            sigma_x: v[0],
            sigma_xp: v[1],
            sigma_y: v[2],
            sigma_yp: v[3],
            sigma_l: v[4],
            sigma_delta: v[5],
            momentum: v[6],
            is_addition: v.get(7) == Some(&0.0),
        }),
        TypeCode::Poleface => ElementKind::Poleface { angle: v[0] },
        TypeCode::Drift => ElementKind::Drift,
        TypeCode::Dipole => ElementKind::Dipole(DipoleDef {
            field_or_angle: v[1],
            mode,
            e1: 0.0,
            e2: 0.0,
        }),
        TypeCode::Quadrupole => ElementKind::Quadrupole {
            field: v[1],
            aperture: v[2],
        },
        TypeCode::Aperture => ElementKind::Collimator(CollimatorDef {
            apertures: v.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect(),
            length_from: None,
        }),
        TypeCode::Acceleration => {
            let (phase_lag, wavelength) = if v.len() >= 4 {
                (Some(v[2]), Some(v[3]))
            } else {
                (None, None)
            };
            ElementKind::Acceleration(AccelDef {
                voltage: v[1],
                phase_lag,
                wavelength,
            })
        }
        TypeCode::Correlation => ElementKind::Correlation {
            coefficients: v.clone(),
            follows_beam_definition: false,
        },
        TypeCode::PrintControl => ElementKind::PrintControl { code: v[0] },
        TypeCode::UnitChange => {
            let unit = raw
                .unit_label()
                .ok_or_else(|| ConvertError::structural(line, "unit change record needs a unit label"))?;
            ElementKind::UnitChange {
                directive: v[0],
                unit: unit.to_owned(),
            }
        }
        TypeCode::SpecialInput => {
            let value = match v.get(1) {
                Some(value) => *value,
                None if special_input_needs_value(v[0]) => {
                    return Err(ConvertError::structural(
                        line,
                        format!("special input {} record needs a value", v[0]),
                    ));
                }
                None => 0.0,
            };
            ElementKind::SpecialInput { code: v[0], value }
        }
        TypeCode::Sextupole => ElementKind::Sextupole {
            field: v[1],
            aperture: v[2],
        },
        TypeCode::Solenoid => ElementKind::Solenoid { field: v[1] },
        TypeCode::CoordinateRotation => ElementKind::CoordinateRotation { angle: v[0] },
        TypeCode::CentroidShift
        | TypeCode::AlignmentTolerance
        | TypeCode::Repetition
        | TypeCode::FitConstraint
        | TypeCode::ArbitraryMatrix
        | TypeCode::SpaceCharge
        | TypeCode::Buncher => ElementKind::Unsupported,
    };
    Ok(kind)
}

/// Special-input sub-codes that set a machine or beam value.
fn special_input_needs_value(code: f64) -> bool {
    [5.0, 7.0, 8.0, 12.0, 13.0, 16.0, 17.0, 18.0].contains(&code)
}

// ── Adjacency ──────────────────────────────────────────────────────────────

fn poleface_angle(records: &[ElementRecord], index: usize) -> Option<f64> {
    match records.get(index).map(|r| &r.kind) {
        Some(ElementKind::Poleface { angle }) => Some(*angle),
        _ => None,
    }
}

/// A poleface record right before a dipole is its entrance face, one right
/// after is its exit face.
fn link_polefaces(records: &mut [ElementRecord]) {
    for i in 0..records.len() {
        let e1 = i.checked_sub(1).and_then(|j| poleface_angle(records, j));
        let e2 = poleface_angle(records, i + 1);
        if let ElementKind::Dipole(def) = &mut records[i].kind {
            def.e1 = e1.unwrap_or(0.0);
            def.e2 = e2.unwrap_or(0.0);
        }
    }
}

/// First drift after a collimator, skipping directives; any other physical
/// element ends the search.
pub fn find_length_lender(
    following: &[ElementRecord],
    split_on_beam: bool,
) -> Option<crate::id::RecordId> {
    for record in following {
        if record.is_drift() {
            return Some(record.id);
        }
        if record.type_code == TypeCode::Beam && !split_on_beam {
            continue;
        }
        if record.type_code.is_physical() {
            return None;
        }
    }
    None
}

fn link_collimators(records: &mut [ElementRecord], split_on_beam: bool) {
    for i in 0..records.len() {
        if records[i].type_code != TypeCode::Aperture {
            continue;
        }
        let lender = find_length_lender(&records[i + 1..], split_on_beam);
        if let ElementKind::Collimator(def) = &mut records[i].kind {
            def.length_from = lender;
        }
    }
}

fn mark_beam_corrections(records: &mut [ElementRecord]) {
    for i in 1..records.len() {
        let after_definition = matches!(
            &records[i - 1].kind,
            ElementKind::Beam(def) if !def.is_addition
        );
        if let ElementKind::Correlation {
            follows_beam_definition,
            ..
        } = &mut records[i].kind
        {
            *follows_beam_definition = after_definition;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RecordId;
    use crate::tokenizer::tokenize;

    fn populate_src(source: &str) -> Population {
        populate(&tokenize(source), true).unwrap()
    }

    #[test]
    fn drift_record_is_populated() {
        let pop = populate_src("3.0 2.5 ;\n");
        let r = &pop.registry.records()[0];
        assert_eq!(r.type_code, TypeCode::Drift);
        assert_eq!(r.length, 2.5);
        assert_eq!(r.line, 1);
        assert_eq!(pop.registry.total_length(), 2.5);
    }

    #[test]
    fn unrecognised_code_is_discarded_with_warning() {
        let pop = populate_src("17. 1.0 ;\n3. 1.0 ;\n");
        assert_eq!(pop.registry.len(), 1);
        assert!(pop.diagnostics[0].is(codes::W0004));
    }

    #[test]
    fn too_few_fields_is_structural() {
        let err = populate(&tokenize("1. 0.1 0.2 ;\n"), true).unwrap_err();
        match err {
            ConvertError::Structural { line, message } => {
                assert_eq!(line, 1);
                assert!(message.contains("needs 7"));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn polefaces_attach_to_adjacent_dipole() {
        let pop = populate_src("2. 10. ;\n4. 1.0 5.0 ;\n2. -5. ;\n3. 1.0 ;\n");
        let ElementKind::Dipole(def) = &pop.registry.records()[1].kind else {
            panic!("expected dipole")
        };
        assert_eq!(def.e1, 10.0);
        assert_eq!(def.e2, -5.0);
    }

    #[test]
    fn dipoles_remember_bend_definition_mode() {
        let pop = populate_src("4. 1.0 5.0 ;\n13. 48. ;\n4. 1.0 5.0 ;\n13. 47. ;\n4. 1.0 5.0 ;\n");
        let modes: Vec<_> = pop
            .registry
            .iter()
            .filter_map(|r| match &r.kind {
                ElementKind::Dipole(d) => Some(d.mode),
                _ => None,
            })
            .collect();
        assert_eq!(
            modes,
            vec![
                BendDefinition::Field,
                BendDefinition::Angle,
                BendDefinition::Field
            ]
        );
    }

    fn dipole_modes(pop: &Population) -> Vec<BendDefinition> {
        pop.registry
            .iter()
            .filter_map(|r| match &r.kind {
                ElementKind::Dipole(d) => Some(d.mode),
                _ => None,
            })
            .collect()
    }

    const ANGLE_MODE_THEN_BEAM: &str = "\
1. 0.1 1. 0.1 1. 0. 0. 1. ;
13. 48. ;
4. 1.0 10.0 ;
1. 0.1 1. 0.1 1. 0. 0. 2. ;
4. 1.0 10.0 ;
";

    #[test]
    fn beam_redefinition_resets_bend_mode_when_splitting() {
        let pop = populate(&tokenize(ANGLE_MODE_THEN_BEAM), true).unwrap();
        assert_eq!(
            dipole_modes(&pop),
            vec![BendDefinition::Angle, BendDefinition::Field]
        );
    }

    #[test]
    fn beam_redefinition_keeps_bend_mode_without_splitting() {
        let pop = populate(&tokenize(ANGLE_MODE_THEN_BEAM), false).unwrap();
        assert_eq!(
            dipole_modes(&pop),
            vec![BendDefinition::Angle, BendDefinition::Angle]
        );
    }

    #[test]
    fn first_beam_definition_keeps_bend_mode() {
        let pop = populate_src("13. 48. ;\n1. 0.1 1. 0.1 1. 0. 0. 1. ;\n4. 1.0 10.0 ;\n");
        assert_eq!(dipole_modes(&pop), vec![BendDefinition::Angle]);
    }

    #[test]
    fn special_input_without_value_is_structural() {
        let err = populate(&tokenize("16. 5. ;\n"), true).unwrap_err();
        match err {
            ConvertError::Structural { line, message } => {
                assert_eq!(line, 1);
                assert!(message.contains("needs a value"));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn special_input_toggle_needs_no_value() {
        let pop = populate_src("16. 14. ;\n");
        assert!(matches!(
            pop.registry.records()[0].kind,
            ElementKind::SpecialInput { code, value } if code == 14.0 && value == 0.0
        ));
    }

    #[test]
    fn collimator_borrows_length_from_next_drift() {
        let pop = populate_src("6. 1. 2. 3. 1. ;\n13. 48. ;\n3. 0.5 ;\n");
        let ElementKind::Collimator(def) = &pop.registry.records()[0].kind else {
            panic!("expected collimator")
        };
        assert_eq!(def.apertures, vec![(1.0, 2.0), (3.0, 1.0)]);
        assert_eq!(def.length_from, Some(RecordId(2)));
        assert_eq!(pop.registry.records()[0].length, 0.0);
    }

    #[test]
    fn collimator_lookahead_stops_at_physical_element() {
        let pop = populate_src("6. 1. 2. ;\n5. 1.0 1.0 1.0 ;\n3. 0.5 ;\n");
        let ElementKind::Collimator(def) = &pop.registry.records()[0].kind else {
            panic!("expected collimator")
        };
        assert_eq!(def.length_from, None);
    }

    #[test]
    fn beam_ends_lookahead_only_when_splitting() {
        let source = "6. 1. 2. ;\n1. 1. 1. 1. 1. 1. 1. 1. ;\n3. 0.5 ;\n";
        let lender = |split| {
            let pop = populate(&tokenize(source), split).unwrap();
            match &pop.registry.records()[0].kind {
                ElementKind::Collimator(def) => def.length_from,
                _ => None,
            }
        };
        assert_eq!(lender(true), None);
        assert_eq!(lender(false), Some(RecordId(2)));
    }

    #[test]
    fn correction_after_beam_definition_is_marked() {
        let pop = populate_src("1. 1. 1. 1. 1. 1. 1. 1. ;\n12. 0.1 ;\n3. 1. ;\n12. 0.1 ;\n");
        let flags: Vec<_> = pop
            .registry
            .iter()
            .filter_map(|r| match &r.kind {
                ElementKind::Correlation {
                    follows_beam_definition,
                    ..
                } => Some(*follows_beam_definition),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn eighth_beam_value_zero_marks_addition() {
        let pop = populate_src("1. 1. 1. 1. 1. 1. 1. 1. 0. ;\n");
        let ElementKind::Beam(def) = &pop.registry.records()[0].kind else {
            panic!("expected beam")
        };
        assert!(def.is_addition);
    }

    #[test]
    fn fit_records_go_to_the_fit_registry() {
        let source = "OUTPUT\n5. 1.0 4.0 5.0 \"Q1\" ;\nFIT 5. 1.2 4.5 5.0 \"Q1\" ;\n";
        let pop = populate_src(source);
        assert_eq!(pop.registry.len(), 1);
        assert_eq!(pop.fits.len(), 1);
        let fit = &pop.fits.records()[0];
        assert_eq!(fit.name, "Q1");
        assert_eq!(fit.length, 1.2);
        assert_eq!(fit.line, 3);
    }
}
