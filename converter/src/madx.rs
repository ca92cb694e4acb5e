// madx.rs — MAD-X output machine
//
// MAD-X has no collimator, RF cavity or 3D transform primitive here, and no
// second-order fringe-field integrals; those are refused or dropped.

use std::fmt::Write;

use crate::machine::{header, num, DipoleSpec, Ecosystem, Element, Lattice, MachineBuilder};
use crate::pipeline::Provenance;
use crate::state::BeamState;

#[derive(Debug, Clone, Default)]
pub struct MadxMachine {
    lattice: Lattice,
}

impl MadxMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }
}

impl MachineBuilder for MadxMachine {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Madx
    }

    fn add_marker(&mut self, name: &str) {
        self.lattice.push(Element::Marker { name: name.into() });
    }

    fn add_drift(&mut self, name: &str, length: f64) {
        self.lattice.push(Element::Drift {
            name: name.into(),
            length,
        });
    }

    fn add_dipole(&mut self, spec: DipoleSpec) {
        self.lattice.push(Element::Dipole(DipoleSpec {
            fint_k2: None,
            fintx_k2: None,
            ..spec
        }));
    }

    fn add_quadrupole(&mut self, name: &str, length: f64, k1: f64) {
        self.lattice.push(Element::Quadrupole {
            name: name.into(),
            length,
            k1,
        });
    }

    fn add_sextupole(&mut self, name: &str, length: f64, k2: f64) {
        self.lattice.push(Element::Sextupole {
            name: name.into(),
            length,
            k2,
        });
    }

    fn add_solenoid(&mut self, name: &str, length: f64, ks: f64) {
        self.lattice.push(Element::Solenoid {
            name: name.into(),
            length,
            ks,
        });
    }

    fn add_sampler(&mut self, selector: &str) {
        self.lattice.samplers.push(selector.into());
    }

    fn set_beam(&mut self, beam: &BeamState) {
        self.lattice.beam = Some(beam.clone());
    }

    fn elements(&self) -> &[Element] {
        &self.lattice.elements
    }

    fn render(&self, provenance: &Provenance) -> String {
        let mut out = header(provenance);
        out.push('\n');
        for element in &self.lattice.elements {
            out.push_str(&element_line(element));
            out.push('\n');
        }
        let _ = write!(out, "\nLATTICE: LINE = ({});\n", self.lattice.line());
        if let Some(beam) = &self.lattice.beam {
            out.push('\n');
            out.push_str(&beam_line(beam));
            out.push('\n');
        }
        out.push_str("USE, PERIOD=LATTICE;\n");
        if !self.lattice.samplers.is_empty() {
            out.push_str("SELECT, FLAG=TWISS, CLEAR;\n");
            for selector in &self.lattice.samplers {
                let range = if selector == "all" { "#S/#E" } else { selector.as_str() };
                let _ = writeln!(out, "SELECT, FLAG=TWISS, RANGE={};", range);
            }
        }
        if let Some(beam) = self.lattice.beam.as_ref().filter(|b| b.twiss.beta_x > 0.0 && b.twiss.beta_y > 0.0) {
            let t = &beam.twiss;
            let _ = writeln!(
                out,
                "TWISS, BETX={}, ALFX={}, BETY={}, ALFY={};",
                num(t.beta_x),
                num(t.alpha_x),
                num(t.beta_y),
                num(t.alpha_y)
            );
        }
        out
    }

    fn reset(&mut self) {
        self.lattice.clear();
    }
}

fn element_line(element: &Element) -> String {
    match element {
        Element::Marker { name } => format!("{}: MARKER;", name),
        Element::Drift { name, length } => format!("{}: DRIFT, L={};", name, num(*length)),
        Element::Dipole(spec) => dipole_line(spec),
        Element::Quadrupole { name, length, k1 } => {
            format!("{}: QUADRUPOLE, L={}, K1={};", name, num(*length), num(*k1))
        }
        Element::Sextupole { name, length, k2 } => {
            format!("{}: SEXTUPOLE, L={}, K2={};", name, num(*length), num(*k2))
        }
        Element::Solenoid { name, length, ks } => {
            format!("{}: SOLENOID, L={}, KS={};", name, num(*length), num(*ks))
        }
        // Refused by `add_*`; never stored.
        Element::RCol { name, .. } | Element::RfCavity { name, .. } | Element::Transform3D { name, .. } => {
            format!("{}: MARKER;", name)
        }
    }
}

fn dipole_line(spec: &DipoleSpec) -> String {
    let mut line = format!(
        "{}: SBEND, L={}, ANGLE={}",
        spec.name,
        num(spec.length),
        num(spec.angle)
    );
    let optional = [
        ("E1", spec.e1),
        ("E2", spec.e2),
        ("FINT", spec.fint),
        ("FINTX", spec.fintx),
        ("HGAP", spec.hgap),
        ("H1", spec.h1),
        ("H2", spec.h2),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            let _ = write!(line, ", {}={}", key, num(v));
        }
    }
    line.push(';');
    line
}

fn beam_line(beam: &BeamState) -> String {
    format!(
        "BEAM, PARTICLE={}, ENERGY={}, EX={}, EY={}, SIGT={}, SIGE={};",
        beam.particle.madx_name(),
        num(beam.total_energy),
        num(beam.twiss.emit_x),
        num(beam.twiss.emit_y),
        num(beam.moments.bunch_length),
        num(beam.sigma_e)
    )
}
