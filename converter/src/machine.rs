// machine.rs — Output machine contract
//
// The element builders talk to output machines only through `MachineBuilder`.
// Each machine accumulates elements, samplers and the beam for one output
// section and renders them as text in its own syntax. Primitives a machine
// cannot express are refused with `Unsupported`; the session reports those
// as capability warnings and drops the element for that machine only.
//
// Preconditions: element names are unique within a section.
// Postconditions: `render` reflects every accepted call since the last reset.
// Failure modes: `Unsupported` for missing primitives.
// Side effects: none (rendering returns a string; files are written elsewhere).

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::Provenance;
use crate::state::BeamState;

// ── Ecosystems ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Bdsim,
    Madx,
}

impl Ecosystem {
    pub fn name(self) -> &'static str {
        match self {
            Ecosystem::Bdsim => "bdsim",
            Ecosystem::Madx => "madx",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Ecosystem::Bdsim => "gmad",
            Ecosystem::Madx => "madx",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A machine has no primitive for the requested element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{ecosystem} machine has no {primitive} element")]
pub struct Unsupported {
    pub ecosystem: Ecosystem,
    pub primitive: &'static str,
}

// ── Elements ───────────────────────────────────────────────────────────────

/// Sector bend with optional poleface, fringe-field and curvature data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DipoleSpec {
    pub name: String,
    /// m.
    pub length: f64,
    /// rad.
    pub angle: f64,
    pub e1: Option<f64>,
    pub e2: Option<f64>,
    pub fint: Option<f64>,
    pub fintx: Option<f64>,
    pub fint_k2: Option<f64>,
    pub fintx_k2: Option<f64>,
    /// m.
    pub hgap: Option<f64>,
    pub h1: Option<f64>,
    pub h2: Option<f64>,
}

/// One element accepted by a machine, in base units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum Element {
    Marker {
        name: String,
    },
    Drift {
        name: String,
        length: f64,
    },
    Dipole(DipoleSpec),
    Quadrupole {
        name: String,
        length: f64,
        k1: f64,
    },
    Sextupole {
        name: String,
        length: f64,
        k2: f64,
    },
    Solenoid {
        name: String,
        length: f64,
        ks: f64,
    },
    RCol {
        name: String,
        length: f64,
        xsize: f64,
        ysize: f64,
        material: String,
    },
    RfCavity {
        name: String,
        length: f64,
        /// MV/m.
        gradient: f64,
    },
    Transform3D {
        name: String,
        psi: f64,
    },
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Marker { name }
            | Element::Drift { name, .. }
            | Element::Quadrupole { name, .. }
            | Element::Sextupole { name, .. }
            | Element::Solenoid { name, .. }
            | Element::RCol { name, .. }
            | Element::RfCavity { name, .. }
            | Element::Transform3D { name, .. } => name,
            Element::Dipole(spec) => &spec.name,
        }
    }

    pub fn length(&self) -> f64 {
        match self {
            Element::Marker { .. } | Element::Transform3D { .. } => 0.0,
            Element::Drift { length, .. }
            | Element::Quadrupole { length, .. }
            | Element::Sextupole { length, .. }
            | Element::Solenoid { length, .. }
            | Element::RCol { length, .. }
            | Element::RfCavity { length, .. } => *length,
            Element::Dipole(spec) => spec.length,
        }
    }
}

// ── Builder contract ───────────────────────────────────────────────────────

pub trait MachineBuilder {
    fn ecosystem(&self) -> Ecosystem;

    fn add_marker(&mut self, name: &str);
    fn add_drift(&mut self, name: &str, length: f64);
    fn add_dipole(&mut self, spec: DipoleSpec);
    fn add_quadrupole(&mut self, name: &str, length: f64, k1: f64);
    fn add_sextupole(&mut self, name: &str, length: f64, k2: f64);
    fn add_solenoid(&mut self, name: &str, length: f64, ks: f64);

    fn add_rcol(
        &mut self,
        _name: &str,
        _length: f64,
        _xsize: f64,
        _ysize: f64,
        _material: &str,
    ) -> Result<(), Unsupported> {
        Err(self.unsupported("rcol"))
    }

    fn add_rf_cavity(&mut self, _name: &str, _length: f64, _gradient: f64) -> Result<(), Unsupported> {
        Err(self.unsupported("rf cavity"))
    }

    fn add_transform3d(&mut self, _name: &str, _psi: f64) -> Result<(), Unsupported> {
        Err(self.unsupported("transform3d"))
    }

    /// Attach an output sampler; `"all"` samples every element.
    fn add_sampler(&mut self, selector: &str);
    fn set_beam(&mut self, beam: &BeamState);

    fn elements(&self) -> &[Element];
    fn render(&self, provenance: &Provenance) -> String;

    /// Forget everything accepted so far (new output section).
    fn reset(&mut self);

    fn unsupported(&self, primitive: &'static str) -> Unsupported {
        Unsupported {
            ecosystem: self.ecosystem(),
            primitive,
        }
    }
}

/// Forward one element to a machine.
pub fn dispatch(machine: &mut dyn MachineBuilder, element: &Element) -> Result<(), Unsupported> {
    match element {
        Element::Marker { name } => machine.add_marker(name),
        Element::Drift { name, length } => machine.add_drift(name, *length),
        Element::Dipole(spec) => machine.add_dipole(spec.clone()),
        Element::Quadrupole { name, length, k1 } => machine.add_quadrupole(name, *length, *k1),
        Element::Sextupole { name, length, k2 } => machine.add_sextupole(name, *length, *k2),
        Element::Solenoid { name, length, ks } => machine.add_solenoid(name, *length, *ks),
        Element::RCol {
            name,
            length,
            xsize,
            ysize,
            material,
        } => return machine.add_rcol(name, *length, *xsize, *ysize, material),
        Element::RfCavity {
            name,
            length,
            gradient,
        } => return machine.add_rf_cavity(name, *length, *gradient),
        Element::Transform3D { name, psi } => return machine.add_transform3d(name, *psi),
    }
    Ok(())
}

// ── Shared storage ─────────────────────────────────────────────────────────

/// Elements, samplers and beam of one output section.
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    pub elements: Vec<Element>,
    pub samplers: Vec<String>,
    pub beam: Option<BeamState>,
}

impl Lattice {
    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    pub fn line(&self) -> String {
        self.elements
            .iter()
            .map(Element::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn total_length(&self) -> f64 {
        self.elements.iter().map(Element::length).sum()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.samplers.clear();
        self.beam = None;
    }
}

// ── Rendering helpers ──────────────────────────────────────────────────────

/// Shortest round-trip decimal form; `-0` prints as `0`.
pub fn num(value: f64) -> String {
    if value == 0.0 {
        "0".to_owned()
    } else {
        format!("{}", value)
    }
}

/// Comment header carrying the provenance of a rendered file.
pub fn header(provenance: &Provenance) -> String {
    format!(
        "! Converted from {} by tconv {}\n! source sha256 {}\n",
        provenance.source_name,
        provenance.converter_version,
        provenance.source_hash_hex(),
    )
}
