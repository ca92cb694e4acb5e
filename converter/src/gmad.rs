// gmad.rs — BDSIM (GMAD) output machine
//
// Supports every element primitive, including collimators, RF cavities and
// 3D transforms, plus free-form `option` lines.

use std::fmt::Write;

use crate::machine::{header, num, DipoleSpec, Ecosystem, Element, Lattice, MachineBuilder, Unsupported};
use crate::pipeline::Provenance;
use crate::state::{BeamState, DistributionKind};

#[derive(Debug, Clone, Default)]
pub struct GmadMachine {
    lattice: Lattice,
    options: Vec<(String, String)>,
}

impl GmadMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Machine that also writes `option, key=value;` for each pair.
    pub fn with_options(options: Vec<(String, String)>) -> Self {
        Self {
            lattice: Lattice::default(),
            options,
        }
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }
}

impl MachineBuilder for GmadMachine {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Bdsim
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
        self.lattice.push(Element::Dipole(spec));
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

    fn add_rcol(
        &mut self,
        name: &str,
        length: f64,
        xsize: f64,
        ysize: f64,
        material: &str,
    ) -> Result<(), Unsupported> {
        self.lattice.push(Element::RCol {
            name: name.into(),
            length,
            xsize,
            ysize,
            material: material.into(),
        });
        Ok(())
    }

    fn add_rf_cavity(&mut self, name: &str, length: f64, gradient: f64) -> Result<(), Unsupported> {
        self.lattice.push(Element::RfCavity {
            name: name.into(),
            length,
            gradient,
        });
        Ok(())
    }

    fn add_transform3d(&mut self, name: &str, psi: f64) -> Result<(), Unsupported> {
        self.lattice.push(Element::Transform3D {
            name: name.into(),
            psi,
        });
        Ok(())
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
        let _ = write!(out, "\nlattice: line = ({});\n", self.lattice.line());
        out.push_str("use, period=lattice;\n");
        for selector in &self.lattice.samplers {
            if selector == "all" {
                out.push_str("sample, all;\n");
            } else {
                let _ = writeln!(out, "sample, range={};", selector);
            }
        }
        if let Some(beam) = &self.lattice.beam {
            out.push('\n');
            out.push_str(&beam_line(beam));
            out.push('\n');
        }
        if !self.options.is_empty() {
            out.push('\n');
            for (key, value) in &self.options {
                let _ = writeln!(out, "option, {}={};", key, value);
            }
        }
        out
    }

    fn reset(&mut self) {
        self.lattice.clear();
    }
}

fn element_line(element: &Element) -> String {
    match element {
        Element::Marker { name } => format!("{}: marker;", name),
        Element::Drift { name, length } => format!("{}: drift, l={}*m;", name, num(*length)),
        Element::Dipole(spec) => dipole_line(spec),
        Element::Quadrupole { name, length, k1 } => {
            format!("{}: quadrupole, l={}*m, k1={};", name, num(*length), num(*k1))
        }
        Element::Sextupole { name, length, k2 } => {
            format!("{}: sextupole, l={}*m, k2={};", name, num(*length), num(*k2))
        }
        Element::Solenoid { name, length, ks } => {
            format!("{}: solenoid, l={}*m, ks={};", name, num(*length), num(*ks))
        }
        Element::RCol {
            name,
            length,
            xsize,
            ysize,
            material,
        } => format!(
            "{}: rcol, l={}*m, xsize={}*m, ysize={}*m, material=\"{}\";",
            name,
            num(*length),
            num(*xsize),
            num(*ysize),
            material
        ),
        Element::RfCavity {
            name,
            length,
            gradient,
        } => format!(
            "{}: rf, l={}*m, gradient={}*MV/m;",
            name,
            num(*length),
            num(*gradient)
        ),
        Element::Transform3D { name, psi } => format!("{}: transform3d, psi={};", name, num(*psi)),
    }
}

fn dipole_line(spec: &DipoleSpec) -> String {
    let mut line = format!(
        "{}: sbend, l={}*m, angle={}",
        spec.name,
        num(spec.length),
        num(spec.angle)
    );
    let optional = [
        ("e1", spec.e1, ""),
        ("e2", spec.e2, ""),
        ("fint", spec.fint, ""),
        ("fintx", spec.fintx, ""),
        ("fintK2", spec.fint_k2, ""),
        ("fintxK2", spec.fintx_k2, ""),
        ("hgap", spec.hgap, "*m"),
        ("h1", spec.h1, ""),
        ("h2", spec.h2, ""),
    ];
    for (key, value, unit) in optional {
        if let Some(v) = value {
            let _ = write!(line, ", {}={}{}", key, num(v), unit);
        }
    }
    line.push(';');
    line
}

fn beam_line(beam: &BeamState) -> String {
    let mut line = format!(
        "beam, particle=\"{}\", energy={}*GeV, distrType=\"{}\"",
        beam.particle.gmad_name(),
        num(beam.total_energy),
        beam.distribution.as_str()
    );
    let m = &beam.moments;
    match beam.distribution {
        DistributionKind::Gauss => {
            let _ = write!(
                line,
                ", sigmaX={}*m, sigmaXp={}, sigmaY={}*m, sigmaYp={}",
                num(m.sigma_x),
                num(m.sigma_xp),
                num(m.sigma_y),
                num(m.sigma_yp)
            );
        }
        DistributionKind::GaussTwiss => {
            let t = &beam.twiss;
            let _ = write!(
                line,
                ", alfx={}, alfy={}, betx={}*m, bety={}*m, emitx={}*m, emity={}*m",
                num(t.alpha_x),
                num(t.alpha_y),
                num(t.beta_x),
                num(t.beta_y),
                num(t.emit_x),
                num(t.emit_y)
            );
        }
    }
    let _ = write!(line, ", sigmaE={}, sigmaT={}", num(beam.sigma_e), num(beam.sigma_t));
    for (key, value) in [("X0", beam.x0), ("Y0", beam.y0), ("Z0", beam.z0)] {
        if value != 0.0 {
            let _ = write!(line, ", {}={}*m", key, num(value));
        }
    }
    line.push(';');
    line
}
