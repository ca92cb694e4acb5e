// units.rs — TRANSPORT unit system
//
// Maps each physical quantity of the input to its current unit label and the
// factor that converts a raw number into the base unit (metres, radians,
// Tesla, GeV, plain fraction). Type-15 records change the mapping; a change
// applies only to conversions performed after it.
//
// Preconditions: none.
// Postconditions: `scale` always returns a finite positive factor.
// Failure modes: unknown directives and labels are reported through
//   `DirectiveOutcome`; the system is left unchanged.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

// ── Quantities ─────────────────────────────────────────────────────────────

/// A physical quantity whose unit can be changed by a type-15 record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Quantity {
    TransverseX,
    TransverseY,
    AngleX,
    AngleY,
    BunchLength,
    MomentumSpread,
    ElementLength,
    MagneticField,
    MomentumGain,
    VerticalGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Length,
    Angle,
    Field,
    Energy,
    Fraction,
}

impl Quantity {
    pub const ALL: [Quantity; 10] = [
        Quantity::TransverseX,
        Quantity::TransverseY,
        Quantity::AngleX,
        Quantity::AngleY,
        Quantity::BunchLength,
        Quantity::MomentumSpread,
        Quantity::ElementLength,
        Quantity::MagneticField,
        Quantity::MomentumGain,
        Quantity::VerticalGap,
    ];

    fn dimension(self) -> Dimension {
        match self {
            Quantity::TransverseX
            | Quantity::TransverseY
            | Quantity::BunchLength
            | Quantity::ElementLength
            | Quantity::VerticalGap => Dimension::Length,
            Quantity::AngleX | Quantity::AngleY => Dimension::Angle,
            Quantity::MagneticField => Dimension::Field,
            Quantity::MomentumGain => Dimension::Energy,
            Quantity::MomentumSpread => Dimension::Fraction,
        }
    }

    /// TRANSPORT default unit label.
    fn default_label(self) -> &'static str {
        match self {
            Quantity::TransverseX
            | Quantity::TransverseY
            | Quantity::BunchLength
            | Quantity::VerticalGap => "CM",
            Quantity::AngleX | Quantity::AngleY => "MR",
            Quantity::MomentumSpread => "PC",
            Quantity::ElementLength => "M",
            Quantity::MagneticField => "KG",
            Quantity::MomentumGain => "GEV",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::TransverseX => "x",
            Quantity::TransverseY => "y",
            Quantity::AngleX => "x'",
            Quantity::AngleY => "y'",
            Quantity::BunchLength => "bunch length",
            Quantity::MomentumSpread => "momentum spread",
            Quantity::ElementLength => "element length",
            Quantity::MagneticField => "magnetic field",
            Quantity::MomentumGain => "momentum",
            Quantity::VerticalGap => "vertical gap",
        };
        write!(f, "{}", name)
    }
}

/// Factor converting one `label` of the given dimension into the base unit.
fn unit_factor(dimension: Dimension, label: &str) -> Option<f64> {
    let label = label.trim().to_ascii_uppercase();
    let factor = match dimension {
        Dimension::Length => match label.as_str() {
            "M" => 1.0,
            "CM" => 1e-2,
            "MM" => 1e-3,
            "UM" | "MU" => 1e-6,
            "NM" => 1e-9,
            "KM" => 1e3,
            "IN" => 0.0254,
            "FT" => 0.3048,
            _ => return None,
        },
        Dimension::Angle => match label.as_str() {
            "R" | "RAD" => 1.0,
            "MR" | "MRAD" => 1e-3,
            "UR" | "URAD" => 1e-6,
            _ => return None,
        },
        Dimension::Field => match label.as_str() {
            "T" => 1.0,
            "KG" => 0.1,
            "G" => 1e-4,
            _ => return None,
        },
        Dimension::Energy => match label.as_str() {
            "EV" => 1e-9,
            "KEV" => 1e-6,
            "MEV" => 1e-3,
            "GEV" => 1.0,
            "TEV" => 1e3,
            _ => return None,
        },
        Dimension::Fraction => match label.as_str() {
            "PC" => 1e-2,
            "PM" => 1e-3,
            "1" => 1.0,
            _ => return None,
        },
    };
    Some(factor)
}

// ── Unit system ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unit {
    pub label: String,
    pub factor: f64,
}

/// Outcome of a type-15 unit-change directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveOutcome {
    Applied(&'static [Quantity]),
    /// Recognised directive that this converter does not track.
    NotConverted(&'static str),
    UnknownDirective,
    UnknownLabel(&'static [Quantity]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitSystem {
    units: HashMap<Quantity, Unit>,
}

impl Default for UnitSystem {
    fn default() -> Self {
        let units = Quantity::ALL
            .iter()
            .filter_map(|&q| {
                let label = q.default_label();
                unit_factor(q.dimension(), label).map(|factor| {
                    (
                        q,
                        Unit {
                            label: label.to_owned(),
                            factor,
                        },
                    )
                })
            })
            .collect();
        Self { units }
    }
}

impl UnitSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factor converting a raw number of `quantity` into its base unit.
    pub fn scale(&self, quantity: Quantity) -> f64 {
        self.units.get(&quantity).map_or(1.0, |u| u.factor)
    }

    pub fn label(&self, quantity: Quantity) -> &str {
        self.units.get(&quantity).map_or("", |u| u.label.as_str())
    }

    /// Set the unit of one quantity. Returns `false` for a label that does not
    /// belong to the quantity's dimension.
    pub fn set(&mut self, quantity: Quantity, label: &str) -> bool {
        match unit_factor(quantity.dimension(), label) {
            Some(factor) => {
                self.units.insert(
                    quantity,
                    Unit {
                        label: label.trim().to_ascii_uppercase(),
                        factor,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Apply a type-15 directive (`number`, `label`).
    pub fn apply_directive(&mut self, number: f64, label: &str) -> DirectiveOutcome {
        let quantities: &'static [Quantity] = match directive_number(number) {
            Some(1) => &[
                Quantity::TransverseX,
                Quantity::TransverseY,
                Quantity::VerticalGap,
            ],
            Some(2) => &[Quantity::AngleX, Quantity::AngleY],
            Some(3) => &[Quantity::TransverseY, Quantity::VerticalGap],
            Some(4) => &[Quantity::AngleY],
            Some(5) => &[Quantity::BunchLength],
            Some(6) => &[Quantity::MomentumSpread],
            Some(7) => return DirectiveOutcome::NotConverted("bend angle"),
            Some(8) => &[Quantity::ElementLength],
            Some(9) => &[Quantity::MagneticField],
            Some(10) => return DirectiveOutcome::NotConverted("particle mass"),
            Some(11) => &[Quantity::MomentumGain],
            _ => return DirectiveOutcome::UnknownDirective,
        };
        // All quantities of one directive share a dimension.
        if unit_factor(quantities[0].dimension(), label).is_none() {
            return DirectiveOutcome::UnknownLabel(quantities);
        }
        for &q in quantities {
            self.set(q, label);
        }
        DirectiveOutcome::Applied(quantities)
    }
}

fn directive_number(number: f64) -> Option<u32> {
    if number.fract() == 0.0 && (1.0..=11.0).contains(&number) {
        Some(number as u32)
    } else {
        None
    }
}
