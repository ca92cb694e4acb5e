// builders.rs — Per-kind translation of lattice records into machine elements
//
// `BuildEnv` owns everything the translation reads or updates while walking
// the lattice in order: the unit system, machine and beam state, the name
// allocator and the diagnostics of the build pass. `build` converts one
// record and returns the element to hand to every output machine, or `None`
// for directives and skipped records.
//
// Preconditions: records come from `populate` (required fields present).
// Postconditions: every skipped, ignored or defaulted condition has a
//   diagnostic; returned elements are in base units with names unique in
//   the current section.
// Failure modes: none; physically invalid records are skipped with a warning.
// Side effects: emits `tracing` debug events per record.

use std::collections::{HashMap, HashSet};

use crate::diag::{codes, DiagCode, Diagnostic};
use crate::id::RecordId;
use crate::machine::{DipoleSpec, Element};
use crate::naming::{NameAllocator, NameKind};
use crate::pipeline::ConvertOptions;
use crate::record::{AccelDef, BeamDef, BendDefinition, CollimatorDef, DipoleDef, ElementKind, ElementRecord};
use crate::state::{ApertureMeaning, BeamState, MachineState, Moments};
use crate::units::{DirectiveOutcome, Quantity, UnitSystem};

/// Collimator material written for every type-6 collimator.
pub const COLLIMATOR_MATERIAL: &str = "copper";

/// Round to four decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

#[derive(Debug)]
pub struct BuildEnv {
    pub units: UnitSystem,
    pub machine: MachineState,
    pub beam: BeamState,
    pub names: NameAllocator,
    pub diagnostics: Vec<Diagnostic>,
    /// Current length of every drift a collimator borrows from.
    lenders: HashMap<RecordId, f64>,
    /// Drifts already emitted as part of a collimator.
    folded: HashSet<RecordId>,
}

impl BuildEnv {
    pub fn new(options: &ConvertOptions) -> Self {
        Self {
            units: UnitSystem::new(),
            machine: MachineState::default(),
            beam: BeamState::new(options.particle, options.distribution),
            names: NameAllocator::new(options.keep_names),
            diagnostics: Vec::new(),
            lenders: HashMap::new(),
            folded: HashSet::new(),
        }
    }

    /// Record the lengths of the drifts collimators borrow from in `plan`.
    pub fn index_lenders(&mut self, plan: &[ElementRecord]) {
        let wanted: HashSet<RecordId> = plan
            .iter()
            .filter_map(|r| match &r.kind {
                ElementKind::Collimator(def) => def.length_from,
                _ => None,
            })
            .collect();
        self.lenders = plan
            .iter()
            .filter(|r| wanted.contains(&r.id))
            .map(|r| (r.id, r.length))
            .collect();
    }

    /// Start a new output section: machine, beam and names start over.
    /// The unit system carries across sections.
    pub fn reset_section(&mut self) {
        self.machine.reset();
        self.beam.reset();
        self.names.reset();
    }

    fn warn(&mut self, code: DiagCode, record: &ElementRecord, message: impl Into<String>) {
        let d = Diagnostic::warning(code, message).at_line(record.line);
        tracing::debug!(line = record.line, code = %code, "{}", d.message);
        self.diagnostics.push(d);
    }

    fn note(&mut self, code: DiagCode, record: &ElementRecord, message: impl Into<String>) {
        let d = Diagnostic::info(code, message).at_line(record.line);
        tracing::debug!(line = record.line, code = %code, "{}", d.message);
        self.diagnostics.push(d);
    }

    /// Convert one record.
    pub fn build(&mut self, record: &ElementRecord) -> Option<Element> {
        tracing::debug!(
            line = record.line,
            type_code = record.type_code.code(),
            name = %record.name,
            source = %record.source.trim(),
            "converting record"
        );
        match &record.kind {
            ElementKind::Beam(def) => {
                self.beam_definition(record, def);
                None
            }
            ElementKind::Poleface { angle } => {
                tracing::debug!(line = record.line, angle, "poleface folded into adjacent dipole");
                None
            }
            ElementKind::Drift => self.drift(record),
            ElementKind::Dipole(def) => self.dipole(record, def),
            ElementKind::Quadrupole { field, aperture } => self.quadrupole(record, *field, *aperture),
            ElementKind::Collimator(def) => self.collimator(record, def),
            ElementKind::Acceleration(def) => self.acceleration(record, def),
            ElementKind::Correlation {
                coefficients,
                follows_beam_definition,
            } => {
                self.beam_correction(record, coefficients, *follows_beam_definition);
                None
            }
            ElementKind::PrintControl { code } => {
                self.print_control(record, *code);
                None
            }
            ElementKind::UnitChange { directive, unit } => {
                self.unit_change(record, *directive, unit);
                None
            }
            ElementKind::SpecialInput { code, value } => {
                self.special_input(record, *code, *value);
                None
            }
            ElementKind::Sextupole { field, aperture } => self.sextupole(record, *field, *aperture),
            ElementKind::Solenoid { field } => self.solenoid(record, *field),
            ElementKind::CoordinateRotation { angle } => self.rotation(record, *angle),
            ElementKind::Unsupported => {
                self.warn(
                    codes::W0005,
                    record,
                    format!("type code {} is not converted, record discarded", record.type_code),
                );
                None
            }
        }
    }

    // ── Shared checks ──────────────────────────────────────────────────────

    /// Element length in metres; `None` (with a warning) when negative.
    fn scaled_length(&mut self, record: &ElementRecord) -> Option<f64> {
        if record.length < 0.0 {
            self.warn(
                codes::W0300,
                record,
                format!(
                    "negative {} length {}, element skipped",
                    record.type_code.describe(),
                    record.length
                ),
            );
            return None;
        }
        Some(record.length * self.units.scale(Quantity::ElementLength))
    }

    /// Beam rigidity in T·m, or `None` (with a warning) before any beam.
    fn rigidity(&mut self, record: &ElementRecord) -> Option<f64> {
        if self.beam.defined && self.beam.brho > 0.0 {
            return Some(self.beam.brho);
        }
        self.warn(
            codes::W0308,
            record,
            format!(
                "{} before any beam definition, strength set to zero",
                record.type_code.describe()
            ),
        );
        None
    }

    /// Magnet aperture in metres; `None` (with a warning) unless positive.
    fn aperture(&mut self, record: &ElementRecord, raw: f64) -> Option<f64> {
        let aperture = raw * self.units.scale(Quantity::VerticalGap);
        if aperture > 0.0 {
            return Some(aperture);
        }
        self.warn(
            codes::W0309,
            record,
            format!("{} aperture {} is not positive, element skipped", record.type_code.describe(), raw),
        );
        None
    }

    // ── Elements ───────────────────────────────────────────────────────────

    fn drift(&mut self, record: &ElementRecord) -> Option<Element> {
        if self.folded.remove(&record.id) {
            tracing::debug!(line = record.line, "drift length used by collimator");
            return None;
        }
        let length = self.scaled_length(record)?;
        if length == 0.0 {
            let n = self.names.bump(NameKind::Marker);
            let name = self.names.assign(&record.name, || format!("MA{n}"));
            return Some(Element::Marker { name });
        }
        let n = self.names.bump(NameKind::Drift);
        let name = self.names.assign(&record.name, || format!("DR{n}"));
        Some(Element::Drift { name, length })
    }

    fn dipole(&mut self, record: &ElementRecord, def: &DipoleDef) -> Option<Element> {
        let length = self.scaled_length(record)?;
        let sign = self.machine.bend_sign;
        let angle = match def.mode {
            BendDefinition::Field => {
                let field = def.field_or_angle * self.units.scale(Quantity::MagneticField);
                if field == 0.0 {
                    0.0
                } else {
                    self.rigidity(record)
                        .map_or(0.0, |brho| length / (brho / field) * sign)
                }
            }
            BendDefinition::Angle => def.field_or_angle.to_radians() * sign,
        };
        let e1 = def.e1.to_radians() * sign;
        let e2 = def.e2.to_radians() * sign;

        let n = self.names.bump(NameKind::Dipole);
        let name = self.names.assign(&record.name, || format!("BM{n}"));
        let m = &self.machine;
        let nonzero = |v: f64| (v != 0.0).then_some(v);
        let spec = DipoleSpec {
            name,
            length,
            angle: round4(angle),
            e1: nonzero(round4(e1)),
            e2: nonzero(round4(e2)),
            fint: (e1 != 0.0).then_some(m.fringe_integral),
            fintx: (e2 != 0.0).then_some(m.fringe_integral),
            fint_k2: (e1 != 0.0).then_some(m.second_fringe_integral),
            fintx_k2: (e2 != 0.0).then_some(m.second_fringe_integral),
            hgap: nonzero(m.vertical_half_aperture * self.units.scale(Quantity::VerticalGap)),
            h1: nonzero(m.entrance_curvature),
            h2: nonzero(m.exit_curvature),
        };
        tracing::debug!(line = record.line, angle = spec.angle, mode = ?def.mode, "dipole");
        Some(Element::Dipole(spec))
    }

    fn quadrupole(&mut self, record: &ElementRecord, field: f64, aperture: f64) -> Option<Element> {
        let length = self.scaled_length(record)?;
        let aperture = self.aperture(record, aperture)?;
        let field = field * self.units.scale(Quantity::MagneticField);
        let k1 = self
            .rigidity(record)
            .map_or(0.0, |brho| round4(field / aperture / brho));
        let n = self.names.bump(NameKind::Quadrupole);
        let name = self.names.assign(&record.name, || {
            let prefix = if k1 > 0.0 {
                "QF"
            } else if k1 < 0.0 {
                "QD"
            } else {
                "NULLQUAD"
            };
            format!("{prefix}{n}")
        });
        Some(Element::Quadrupole { name, length, k1 })
    }

    fn sextupole(&mut self, record: &ElementRecord, field: f64, aperture: f64) -> Option<Element> {
        let length = self.scaled_length(record)?;
        let aperture = self.aperture(record, aperture)?;
        let field = field * self.units.scale(Quantity::MagneticField);
        let k2 = self
            .rigidity(record)
            .map_or(0.0, |brho| round4(2.0 * field / (aperture * aperture) / brho));
        let n = self.names.bump(NameKind::Sextupole);
        let name = self.names.assign(&record.name, || format!("SEXT{n}"));
        Some(Element::Sextupole { name, length, k2 })
    }

    fn solenoid(&mut self, record: &ElementRecord, field: f64) -> Option<Element> {
        let length = self.scaled_length(record)?;
        let ks = round4(field * self.units.scale(Quantity::MagneticField));
        let n = self.names.bump(NameKind::Solenoid);
        let name = self.names.assign(&record.name, || format!("SOLE{n}"));
        Some(Element::Solenoid { name, length, ks })
    }

    fn collimator(&mut self, record: &ElementRecord, def: &CollimatorDef) -> Option<Element> {
        if self.machine.aperture_meaning == ApertureMeaning::TransformUpdate {
            self.note(codes::I0311, record, "type-6 record read as a transform update, ignored");
            return None;
        }
        let borrowed = def
            .length_from
            .and_then(|id| self.lenders.get(&id).map(|&length| (id, length)))
            .filter(|&(_, length)| length > 0.0);
        let Some((lender, length)) = borrowed else {
            self.warn(
                codes::W0301,
                record,
                "collimator has no following drift with positive length, skipped",
            );
            return None;
        };
        self.folded.insert(lender);

        let mut half_x = self.machine.default_half_aperture;
        let mut half_y = self.machine.default_half_aperture;
        for &(plane, half_width) in &def.apertures {
            if plane == 1.0 {
                half_x = half_width;
            } else if plane == 3.0 {
                half_y = half_width;
            }
        }
        let n = self.names.bump(NameKind::Collimator);
        let name = self.names.assign(&record.name, || format!("COL{n}"));
        Some(Element::RCol {
            name,
            length: length * self.units.scale(Quantity::ElementLength),
            xsize: half_x * self.units.scale(Quantity::TransverseX),
            ysize: half_y * self.units.scale(Quantity::TransverseY),
            material: COLLIMATOR_MATERIAL.to_owned(),
        })
    }

    fn acceleration(&mut self, record: &ElementRecord, def: &AccelDef) -> Option<Element> {
        if record.length == 0.0 {
            self.machine.accel.active = true;
            self.machine.accel.total_voltage = def.voltage;
            self.machine.accel.previous_fraction = 0.0;
            tracing::debug!(line = record.line, total = def.voltage, "accelerating sequence started");
            return None;
        }
        let length = self.scaled_length(record)?;

        let mut gain = def.voltage;
        let accel = &mut self.machine.accel;
        if accel.active {
            let fraction = def.voltage;
            gain = (fraction - accel.previous_fraction) * accel.total_voltage;
            accel.previous_fraction = fraction;
            if fraction == 1.0 {
                accel.active = false;
            }
        }
        let gain = gain * self.units.scale(Quantity::MomentumGain);
        let gradient = gain * 1e3 / length;
        if let (Some(phase_lag), Some(wavelength)) = (def.phase_lag, def.wavelength) {
            tracing::debug!(line = record.line, phase_lag, wavelength, "legacy accelerating element");
        }

        if self.beam.defined {
            let kinetic = self.beam.kinetic_energy + gain;
            self.beam.set_kinetic_energy(kinetic);
        }
        let n = self.names.bump(NameKind::Cavity);
        let name = self.names.assign(&record.name, || format!("ACC{n}"));
        Some(Element::RfCavity {
            name,
            length,
            gradient,
        })
    }

    fn rotation(&mut self, record: &ElementRecord, angle: f64) -> Option<Element> {
        let angle = angle % 360.0;
        if angle == 180.0 || angle == -180.0 {
            self.machine.bend_sign = -self.machine.bend_sign;
            tracing::debug!(line = record.line, sign = self.machine.bend_sign, "bend direction flipped");
            return None;
        }
        if angle == 0.0 {
            return None;
        }
        let n = self.names.bump(NameKind::Transform);
        let name = self.names.assign(&record.name, || format!("T{n}"));
        Some(Element::Transform3D {
            name,
            psi: angle.to_radians(),
        })
    }

    // ── Beam ───────────────────────────────────────────────────────────────

    fn beam_definition(&mut self, record: &ElementRecord, def: &BeamDef) {
        let u = &self.units;
        let moments = Moments {
            sigma_x: def.sigma_x * u.scale(Quantity::TransverseX),
            sigma_xp: def.sigma_xp * u.scale(Quantity::AngleX),
            sigma_y: def.sigma_y * u.scale(Quantity::TransverseY),
            sigma_yp: def.sigma_yp * u.scale(Quantity::AngleY),
            bunch_length: def.sigma_l * u.scale(Quantity::BunchLength),
            momentum_spread: def.sigma_delta * u.scale(Quantity::MomentumSpread),
        };
        if def.is_addition {
            if !self.beam.defined {
                self.warn(codes::W0303, record, "r.m.s. beam addition before any beam definition, skipped");
                return;
            }
            self.beam.add_in_quadrature(moments);
            tracing::debug!(line = record.line, "r.m.s. addition to beam");
            return;
        }
        let momentum = def.momentum * u.scale(Quantity::MomentumGain);
        if momentum <= 0.0 {
            self.warn(
                codes::W0310,
                record,
                format!("beam momentum {} is not positive, definition ignored", def.momentum),
            );
            return;
        }
        self.beam.define(moments, momentum);
        tracing::debug!(
            line = record.line,
            momentum,
            energy = self.beam.total_energy,
            brho = self.beam.brho,
            "beam defined"
        );
    }

    fn beam_correction(&mut self, record: &ElementRecord, coefficients: &[f64], follows_definition: bool) {
        if !follows_definition || !self.beam.defined || self.beam.corrected {
            self.note(
                codes::I0304,
                record,
                "correlation matrix does not follow the beam definition, ignored",
            );
            return;
        }
        if coefficients.len() < 15 {
            self.warn(
                codes::W0305,
                record,
                format!("correlation matrix needs 15 values, found {}, skipped", coefficients.len()),
            );
            return;
        }
        let (r21, r43) = (coefficients[0], coefficients[5]);
        if !self.beam.apply_correlations(r21, r43) {
            self.warn(
                codes::W0305,
                record,
                format!("invalid correlations r21={} r43={}, skipped", r21, r43),
            );
            return;
        }
        tracing::debug!(line = record.line, r21, r43, "beam corrected, distribution gausstwiss");
    }

    // ── Directives ─────────────────────────────────────────────────────────

    fn print_control(&mut self, record: &ElementRecord, code: f64) {
        if code == 47.0 || code == 48.0 {
            // Already resolved onto each dipole when the registry was built.
            tracing::debug!(line = record.line, code, "bend definition mode");
        } else if code == 19.0 {
            self.note(codes::I0307, record, "single-line optics print request has no effect");
        } else {
            self.note(codes::I0307, record, format!("print control {} has no effect", code));
        }
    }

    fn unit_change(&mut self, record: &ElementRecord, directive: f64, unit: &str) {
        match self.units.apply_directive(directive, unit) {
            DirectiveOutcome::Applied(quantities) => {
                tracing::debug!(line = record.line, unit, ?quantities, "units changed");
            }
            DirectiveOutcome::NotConverted(what) => self.note(
                codes::I0102,
                record,
                format!("{} unit change to {} is not converted", what, unit),
            ),
            DirectiveOutcome::UnknownDirective => self.warn(
                codes::W0100,
                record,
                format!("unknown unit directive {}, ignored", directive),
            ),
            DirectiveOutcome::UnknownLabel(quantities) => self.warn(
                codes::W0101,
                record,
                format!("unknown {} unit `{}`, ignored", quantities[0], unit),
            ),
        }
    }

    fn special_input(&mut self, record: &ElementRecord, code: f64, value: f64) {
        let sub_code = if code.fract() == 0.0 { code as i64 } else { -1 };
        let m = &mut self.machine;
        match sub_code {
            5 => {
                m.vertical_half_aperture = value;
                if m.fringe_integral == 0.0 {
                    m.fringe_integral = 0.5;
                    self.note(codes::I0312, record, "fringe-field integral defaulted to 0.5");
                }
            }
            7 => m.fringe_integral = value,
            8 => m.second_fringe_integral = value,
            12 => m.entrance_curvature = value,
            13 => m.exit_curvature = value,
            14 => {
                let meaning = m.toggle_aperture_meaning();
                tracing::debug!(line = record.line, ?meaning, "type-6 meaning toggled");
            }
            16 => self.beam.x0 = value * self.units.scale(Quantity::TransverseX),
            17 => self.beam.y0 = value * self.units.scale(Quantity::TransverseY),
            18 => self.beam.z0 = value * self.units.scale(Quantity::BunchLength),
            _ => self.warn(
                codes::W0302,
                record,
                format!("unknown special input code {}, ignored", code),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populate::populate;
    use crate::state::{DistributionKind, Particle};
    use crate::tokenizer::tokenize;

    fn env() -> BuildEnv {
        BuildEnv::new(&ConvertOptions::default())
    }

    /// Build every record of `source` in order, collecting elements.
    fn build_all(env: &mut BuildEnv, source: &str) -> Vec<Element> {
        let pop = populate(&tokenize(source), true).unwrap();
        env.index_lenders(pop.registry.records());
        pop.registry.iter().filter_map(|r| env.build(r)).collect()
    }

    const BEAM_1_GEV: &str = "1. 0.1 1. 0.1 1. 0. 0. 1. ;\n";

    #[test]
    fn round4_rounds_half_away() {
        assert_eq!(round4(1.498_96), 1.499);
        assert_eq!(round4(-0.123_45), -0.1235);
    }

    #[test]
    fn drift_and_marker() {
        let mut e = env();
        let elements = build_all(&mut e, "3.0 2.5 ;\n3. 0. ;\n");
        assert_eq!(
            elements,
            vec![
                Element::Drift {
                    name: "DR1".into(),
                    length: 2.5
                },
                Element::Marker { name: "MA1".into() },
            ]
        );
    }

    #[test]
    fn negative_drift_is_skipped_with_warning() {
        let mut e = env();
        let elements = build_all(&mut e, "3. -1.0 ;\n3. 1.0 ;\n");
        assert_eq!(elements.len(), 1);
        assert!(e.diagnostics[0].is(codes::W0300));
        assert_eq!(e.diagnostics[0].line, Some(1));
    }

    #[test]
    fn quadrupole_strength_from_gauss_and_metres() {
        let mut e = env();
        let source = format!("15. 9. 'G' ;\n15. 1. 'M' ;\n{}5.0 1.0 1000.0 0.02 ;\n", BEAM_1_GEV);
        let elements = build_all(&mut e, &source);
        let Element::Quadrupole { name, length, k1 } = &elements[0] else {
            panic!("expected quadrupole, got {:?}", elements)
        };
        assert_eq!(name, "QF1");
        assert_eq!(*length, 1.0);
        assert!((k1 - 1.499).abs() < 1e-3);
    }

    #[test]
    fn defocusing_and_null_quadrupole_prefixes() {
        let mut e = env();
        let source = format!("{}5. 1. -5. 2. ;\n5. 1. 0. 2. ;\n", BEAM_1_GEV);
        let names: Vec<_> = build_all(&mut e, &source)
            .iter()
            .map(|el| el.name().to_owned())
            .collect();
        assert_eq!(names, vec!["QD1", "NULLQUAD2"]);
    }

    #[test]
    fn quadrupole_before_beam_gets_zero_strength() {
        let mut e = env();
        let elements = build_all(&mut e, "5. 1. 5. 2. ;\n");
        assert!(matches!(&elements[0], Element::Quadrupole { k1, .. } if *k1 == 0.0));
        assert!(e.diagnostics[0].is(codes::W0308));
    }

    #[test]
    fn dipole_angle_mode_with_polefaces_and_fringe() {
        let mut e = env();
        let source = "13. 48. ;\n16. 5. 2. ;\n2. 10. ;\n4. 2. 30. ;\n3. 1. ;\n";
        let elements = build_all(&mut e, source);
        let Element::Dipole(spec) = &elements[0] else {
            panic!("expected dipole")
        };
        assert_eq!(spec.name, "BM1");
        assert_eq!(spec.angle, round4(30f64.to_radians()));
        assert_eq!(spec.e1, Some(round4(10f64.to_radians())));
        assert_eq!(spec.e2, None);
        assert_eq!(spec.fint, Some(0.5));
        assert_eq!(spec.fintx, None);
        assert_eq!(spec.fint_k2, Some(0.0));
        assert_eq!(spec.hgap, Some(0.02));
        assert!(e.diagnostics.iter().any(|d| d.is(codes::I0312)));
    }

    #[test]
    fn dipole_field_mode_uses_rigidity() {
        let mut e = env();
        // 10 kG = 1 T over 1 m at 1 GeV/c: angle = 1 / brho.
        let source = format!("{}4. 1. 10. ;\n", BEAM_1_GEV);
        let elements = build_all(&mut e, &source);
        let Element::Dipole(spec) = &elements[0] else {
            panic!("expected dipole")
        };
        assert_eq!(spec.angle, round4(1.0 / e.beam.brho));
        assert_eq!(spec.e1, None);
        assert_eq!(spec.fint, None);
    }

    #[test]
    fn half_turn_rotation_flips_bend_direction() {
        let mut e = env();
        let source = "13. 48. ;\n20. 180. ;\n4. 1. 10. ;\n20. 540. ;\n4. 1. 10. ;\n";
        let angles: Vec<_> = build_all(&mut e, source)
            .iter()
            .filter_map(|el| match el {
                Element::Dipole(s) => Some(s.angle),
                _ => None,
            })
            .collect();
        assert_eq!(angles, vec![-round4(10f64.to_radians()), round4(10f64.to_radians())]);
    }

    #[test]
    fn other_rotations_emit_transforms() {
        let mut e = env();
        let elements = build_all(&mut e, "20. 90. ;\n20. 0. ;\n");
        assert_eq!(
            elements,
            vec![Element::Transform3D {
                name: "T1".into(),
                psi: 90f64.to_radians()
            }]
        );
    }

    #[test]
    fn collimator_takes_over_following_drift() {
        let mut e = env();
        let elements = build_all(&mut e, "6. 1. 1.5 ;\n3. 0.5 ;\n3. 2.0 ;\n");
        assert_eq!(elements.len(), 2);
        assert_eq!(
            elements[0],
            Element::RCol {
                name: "COL1".into(),
                length: 0.5,
                xsize: 0.015,
                ysize: 0.2,
                material: "copper".into(),
            }
        );
        assert!(matches!(&elements[1], Element::Drift { length, .. } if *length == 2.0));
    }

    #[test]
    fn transform_update_mode_keeps_the_drift() {
        let mut e = env();
        let elements = build_all(&mut e, "16. 14. ;\n6. 1. 1.5 ;\n3. 0.5 ;\n");
        assert_eq!(elements.len(), 1);
        assert!(matches!(&elements[0], Element::Drift { .. }));
        assert!(e.diagnostics.iter().any(|d| d.is(codes::I0311)));
    }

    #[test]
    fn collimator_without_drift_is_skipped() {
        let mut e = env();
        let elements = build_all(&mut e, "6. 1. 1.5 ;\n5. 1. 1. 1. ;\n");
        assert!(elements.iter().all(|el| !matches!(el, Element::RCol { .. })));
        assert!(e.diagnostics.iter().any(|d| d.is(codes::W0301)));
    }

    #[test]
    fn accelerating_sequence_uses_relative_fractions() {
        let mut e = env();
        let source = "11. 0. 0.1 ;\n11. 1. 0.25 ;\n11. 2. 1.0 ;\n11. 1. 0.05 ;\n";
        let gradients: Vec<_> = build_all(&mut e, source)
            .iter()
            .filter_map(|el| match el {
                Element::RfCavity { gradient, .. } => Some(*gradient),
                _ => None,
            })
            .collect();
        assert_eq!(gradients.len(), 3);
        assert!((gradients[0] - 25.0).abs() < 1e-9);
        assert!((gradients[1] - 37.5).abs() < 1e-9);
        assert!((gradients[2] - 50.0).abs() < 1e-9);
        assert!(!e.machine.accel.active);
    }

    #[test]
    fn acceleration_raises_beam_energy() {
        let mut e = env();
        let source = format!("{}11. 1. 0.5 ;\n", BEAM_1_GEV);
        let before = {
            let mut b = BeamState::new(Particle::Proton, DistributionKind::Gauss);
            b.set_momentum(1.0);
            b.kinetic_energy
        };
        build_all(&mut e, &source);
        assert!((e.beam.kinetic_energy - (before + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn correction_directly_after_beam_switches_distribution() {
        let mut e = env();
        let source = format!(
            "{}12. 0.5 0. 0. 0. 0. -0.5 0. 0. 0. 0. 0. 0. 0. 0. 0. ;\n",
            BEAM_1_GEV
        );
        build_all(&mut e, &source);
        assert_eq!(e.beam.distribution, DistributionKind::GaussTwiss);
        assert!(e.beam.corrected);
        assert!(e.beam.twiss.alpha_x < 0.0);
        assert!(e.beam.twiss.alpha_y > 0.0);
    }

    #[test]
    fn short_correction_is_skipped() {
        let mut e = env();
        let source = format!("{}12. 0.5 0. 0. ;\n", BEAM_1_GEV);
        build_all(&mut e, &source);
        assert_eq!(e.beam.distribution, DistributionKind::Gauss);
        assert!(e.diagnostics.iter().any(|d| d.is(codes::W0305)));
    }

    #[test]
    fn detached_correction_is_ignored() {
        let mut e = env();
        let source = format!(
            "{}3. 1. ;\n12. 0.5 0. 0. 0. 0. 0.5 0. 0. 0. 0. 0. 0. 0. 0. 0. ;\n",
            BEAM_1_GEV
        );
        build_all(&mut e, &source);
        assert!(!e.beam.corrected);
        assert!(e.diagnostics.iter().any(|d| d.is(codes::I0304)));
    }

    #[test]
    fn rms_addition_before_beam_is_skipped() {
        let mut e = env();
        build_all(&mut e, "1. 0.1 1. 0.1 1. 0. 0. 1. 0. ;\n");
        assert!(!e.beam.defined);
        assert!(e.diagnostics[0].is(codes::W0303));
    }

    #[test]
    fn beam_moments_are_scaled_to_base_units() {
        let mut e = env();
        build_all(&mut e, "1. 0.1 1. 0.2 2. 0. 0.5 1. ;\n");
        let m = e.beam.moments;
        assert!((m.sigma_x - 0.001).abs() < 1e-15);
        assert!((m.sigma_xp - 0.001).abs() < 1e-15);
        assert!((m.sigma_y - 0.002).abs() < 1e-15);
        assert!((m.momentum_spread - 0.005).abs() < 1e-15);
    }

    #[test]
    fn unknown_special_input_and_unit_directive_are_reported() {
        let mut e = env();
        build_all(&mut e, "16. 99. 1. ;\n15. 42. 'M' ;\n15. 8. 'PARSEC' ;\n15. 10. 'MEV' ;\n");
        let found: Vec<_> = e.diagnostics.iter().filter_map(|d| d.code).collect();
        assert_eq!(found, vec![codes::W0302, codes::W0100, codes::W0101, codes::I0102]);
    }

    #[test]
    fn unsupported_kind_is_discarded() {
        let mut e = env();
        let elements = build_all(&mut e, "7. 1. 2. ;\n");
        assert!(elements.is_empty());
        assert!(e.diagnostics[0].is(codes::W0005));
    }

    #[test]
    fn reset_section_keeps_units() {
        let mut e = env();
        build_all(&mut e, "15. 8. 'MM' ;\n16. 7. 0.7 ;\n");
        e.reset_section();
        assert_eq!(e.machine.fringe_integral, 0.0);
        assert_eq!(e.units.scale(Quantity::ElementLength), 1e-3);
    }
}
