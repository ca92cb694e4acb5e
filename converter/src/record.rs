// record.rs — Typed lattice and fitted records
//
// The closed set of TRANSPORT type codes and the per-kind record payloads the
// element builders consume. A record keeps its raw numeric fields next to the
// typed payload so fitted values can be written back into both.

use std::fmt;

use serde::Serialize;

use crate::id::{FitId, RecordId};

// ── Type codes ─────────────────────────────────────────────────────────────

/// The TRANSPORT type codes this converter recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCode {
    Beam,
    Poleface,
    Drift,
    Dipole,
    Quadrupole,
    /// Collimator or transform update, depending on machine state.
    Aperture,
    CentroidShift,
    AlignmentTolerance,
    Repetition,
    FitConstraint,
    Acceleration,
    Correlation,
    PrintControl,
    ArbitraryMatrix,
    UnitChange,
    SpecialInput,
    Sextupole,
    Solenoid,
    CoordinateRotation,
    SpaceCharge,
    Buncher,
}

impl TypeCode {
    /// Map a positive integral code to its kind; `None` for anything else.
    pub fn from_code(code: f64) -> Option<TypeCode> {
        if code.fract() != 0.0 || code <= 0.0 {
            return None;
        }
        let kind = match code as u32 {
            1 => TypeCode::Beam,
            2 => TypeCode::Poleface,
            3 => TypeCode::Drift,
            4 => TypeCode::Dipole,
            5 => TypeCode::Quadrupole,
            6 => TypeCode::Aperture,
            7 => TypeCode::CentroidShift,
            8 => TypeCode::AlignmentTolerance,
            9 => TypeCode::Repetition,
            10 => TypeCode::FitConstraint,
            11 => TypeCode::Acceleration,
            12 => TypeCode::Correlation,
            13 => TypeCode::PrintControl,
            14 => TypeCode::ArbitraryMatrix,
            15 => TypeCode::UnitChange,
            16 => TypeCode::SpecialInput,
            18 => TypeCode::Sextupole,
            19 => TypeCode::Solenoid,
            20 => TypeCode::CoordinateRotation,
            22 => TypeCode::SpaceCharge,
            23 => TypeCode::Buncher,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> u32 {
        match self {
            TypeCode::Beam => 1,
            TypeCode::Poleface => 2,
            TypeCode::Drift => 3,
            TypeCode::Dipole => 4,
            TypeCode::Quadrupole => 5,
            TypeCode::Aperture => 6,
            TypeCode::CentroidShift => 7,
            TypeCode::AlignmentTolerance => 8,
            TypeCode::Repetition => 9,
            TypeCode::FitConstraint => 10,
            TypeCode::Acceleration => 11,
            TypeCode::Correlation => 12,
            TypeCode::PrintControl => 13,
            TypeCode::ArbitraryMatrix => 14,
            TypeCode::UnitChange => 15,
            TypeCode::SpecialInput => 16,
            TypeCode::Sextupole => 18,
            TypeCode::Solenoid => 19,
            TypeCode::CoordinateRotation => 20,
            TypeCode::SpaceCharge => 22,
            TypeCode::Buncher => 23,
        }
    }

    /// Kinds that occupy beamline length.
    pub fn carries_length(self) -> bool {
        matches!(
            self,
            TypeCode::Drift
                | TypeCode::Dipole
                | TypeCode::Quadrupole
                | TypeCode::Acceleration
                | TypeCode::Sextupole
                | TypeCode::Solenoid
        )
    }

    /// Kinds that end the collimator length lookahead.
    pub fn is_physical(self) -> bool {
        self == TypeCode::Beam || self.carries_length()
    }

    /// Recognised kinds with no conversion.
    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            TypeCode::CentroidShift
                | TypeCode::AlignmentTolerance
                | TypeCode::Repetition
                | TypeCode::FitConstraint
                | TypeCode::ArbitraryMatrix
                | TypeCode::SpaceCharge
                | TypeCode::Buncher
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            TypeCode::Beam => "beam",
            TypeCode::Poleface => "poleface rotation",
            TypeCode::Drift => "drift",
            TypeCode::Dipole => "dipole",
            TypeCode::Quadrupole => "quadrupole",
            TypeCode::Aperture => "aperture",
            TypeCode::CentroidShift => "centroid shift",
            TypeCode::AlignmentTolerance => "alignment tolerance",
            TypeCode::Repetition => "repetition",
            TypeCode::FitConstraint => "fit constraint",
            TypeCode::Acceleration => "accelerating element",
            TypeCode::Correlation => "beam correlation",
            TypeCode::PrintControl => "print control",
            TypeCode::ArbitraryMatrix => "arbitrary matrix",
            TypeCode::UnitChange => "unit change",
            TypeCode::SpecialInput => "special input",
            TypeCode::Sextupole => "sextupole",
            TypeCode::Solenoid => "solenoid",
            TypeCode::CoordinateRotation => "coordinate rotation",
            TypeCode::SpaceCharge => "space charge",
            TypeCode::Buncher => "buncher",
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.describe())
    }
}

// ── Record payloads ────────────────────────────────────────────────────────

/// How a dipole's second field is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BendDefinition {
    /// Pole field, converted to an angle through the beam rigidity.
    Field,
    /// Bend angle in degrees.
    Angle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamDef {
    pub sigma_x: f64,
    pub sigma_xp: f64,
    pub sigma_y: f64,
    pub sigma_yp: f64,
    pub sigma_l: f64,
    pub sigma_delta: f64,
    pub momentum: f64,
    /// r.m.s. addition to the current beam rather than a new definition.
    pub is_addition: bool,
}

impl BeamDef {
    /// A new beam definition that the builder accepts: not an r.m.s.
    /// addition, with a positive momentum.
    pub fn defines_beam(&self) -> bool {
        !self.is_addition && self.momentum > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DipoleDef {
    /// Raw field 1: pole field or angle, per `mode`.
    pub field_or_angle: f64,
    pub mode: BendDefinition,
    /// Entrance poleface angle in degrees (preceding type-2 record).
    pub e1: f64,
    /// Exit poleface angle in degrees (following type-2 record).
    pub e2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollimatorDef {
    /// (plane, half-width) pairs; plane 1 is x, 3 is y.
    pub apertures: Vec<(f64, f64)>,
    /// Drift lending its length, found by lookahead.
    pub length_from: Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccelDef {
    /// Energy gain, or cumulative fraction inside a sequence.
    pub voltage: f64,
    pub phase_lag: Option<f64>,
    pub wavelength: Option<f64>,
}

/// Kind-specific payload of a lattice record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementKind {
    Beam(BeamDef),
    Poleface { angle: f64 },
    Drift,
    Dipole(DipoleDef),
    Quadrupole { field: f64, aperture: f64 },
    Collimator(CollimatorDef),
    Acceleration(AccelDef),
    Correlation {
        coefficients: Vec<f64>,
        /// Previous record is a non-addition beam definition.
        follows_beam_definition: bool,
    },
    PrintControl { code: f64 },
    UnitChange { directive: f64, unit: String },
    SpecialInput { code: f64, value: f64 },
    Sextupole { field: f64, aperture: f64 },
    Solenoid { field: f64 },
    CoordinateRotation { angle: f64 },
    Unsupported,
}

// ── Records ────────────────────────────────────────────────────────────────

/// One lattice record of the element registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementRecord {
    pub id: RecordId,
    pub type_code: TypeCode,
    pub name: String,
    /// Length in the element-length unit; 0 for directives.
    pub length: f64,
    pub raw_fields: Vec<f64>,
    pub kind: ElementKind,
    pub line: usize,
    pub source: String,
}

impl ElementRecord {
    pub fn is_zero_length(&self) -> bool {
        self.length == 0.0
    }

    pub fn is_drift(&self) -> bool {
        self.type_code == TypeCode::Drift
    }

    /// Overwrite the length in both the record and raw field 0.
    pub fn set_length(&mut self, length: f64) {
        self.length = length;
        if let Some(raw) = self.raw_fields.first_mut() {
            *raw = length;
        }
    }
}

/// One fitted record of the fit registry (results dialect).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitRecord {
    pub id: FitId,
    pub type_code: TypeCode,
    pub name: String,
    pub length: f64,
    pub raw_fields: Vec<f64>,
    pub line: usize,
    pub source: String,
}

impl FitRecord {
    pub fn field(&self, index: usize) -> Option<f64> {
        self.raw_fields.get(index).copied()
    }
}
