// state.rs — Machine and beam state carried through the build pass
//
// `MachineState` holds the physics configuration set by directives (bend
// definition, fringe fields, poleface curvature, type-6 meaning, the
// accelerating-sequence accumulator). `BeamState` holds the reference
// particle and beam moments in base units. Both are reset at every split.

use serde::Serialize;


/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// GeV/c to T·m for a unit charge.
const RIGIDITY_PER_GEV: f64 = 0.299_792_458;

// ── Particles ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Particle {
    Proton,
    Antiproton,
    Electron,
    Positron,
    #[value(name = "muon+")]
    MuonPlus,
    #[value(name = "muon-")]
    MuonMinus,
}

impl Particle {
    /// Rest mass in GeV/c².
    pub fn mass(self) -> f64 {
        match self {
            Particle::Proton | Particle::Antiproton => 0.938_272_088_16,
            Particle::Electron | Particle::Positron => 0.000_510_998_950_00,
            Particle::MuonPlus | Particle::MuonMinus => 0.105_658_375_5,
        }
    }

    /// Charge in units of e.
    pub fn charge(self) -> f64 {
        match self {
            Particle::Proton | Particle::Positron | Particle::MuonPlus => 1.0,
            Particle::Antiproton | Particle::Electron | Particle::MuonMinus => -1.0,
        }
    }

    /// BDSIM particle name.
    pub fn gmad_name(self) -> &'static str {
        match self {
            Particle::Proton => "proton",
            Particle::Antiproton => "antiproton",
            Particle::Electron => "e-",
            Particle::Positron => "e+",
            Particle::MuonPlus => "mu+",
            Particle::MuonMinus => "mu-",
        }
    }

    /// MAD-X particle name.
    pub fn madx_name(self) -> &'static str {
        match self {
            Particle::Proton => "PROTON",
            Particle::Antiproton => "ANTIPROTON",
            Particle::Electron => "ELECTRON",
            Particle::Positron => "POSITRON",
            Particle::MuonPlus => "POSMUON",
            Particle::MuonMinus => "NEGMUON",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Gauss,
    #[value(name = "gausstwiss")]
    GaussTwiss,
}

impl DistributionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionKind::Gauss => "gauss",
            DistributionKind::GaussTwiss => "gausstwiss",
        }
    }
}

// ── Machine state ──────────────────────────────────────────────────────────

/// How a type-6 record is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApertureMeaning {
    Collimator,
    TransformUpdate,
}

/// Accumulator for a zero-length-started accelerating sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccelSequence {
    pub active: bool,
    pub total_voltage: f64,
    pub previous_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineState {
    /// +1 or -1; flipped by a 180 degree coordinate rotation.
    pub bend_sign: f64,
    pub fringe_integral: f64,
    pub second_fringe_integral: f64,
    /// Raw value in the vertical-gap unit.
    pub vertical_half_aperture: f64,
    pub entrance_curvature: f64,
    pub exit_curvature: f64,
    pub accel: AccelSequence,
    pub aperture_meaning: ApertureMeaning,
    /// Collimator half-aperture when a plane is not given, in x/y units.
    pub default_half_aperture: f64,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            bend_sign: 1.0,
            fringe_integral: 0.0,
            second_fringe_integral: 0.0,
            vertical_half_aperture: 0.0,
            entrance_curvature: 0.0,
            exit_curvature: 0.0,
            accel: AccelSequence::default(),
            aperture_meaning: ApertureMeaning::Collimator,
            default_half_aperture: 20.0,
        }
    }
}

impl MachineState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn toggle_aperture_meaning(&mut self) -> ApertureMeaning {
        self.aperture_meaning = match self.aperture_meaning {
            ApertureMeaning::Collimator => ApertureMeaning::TransformUpdate,
            ApertureMeaning::TransformUpdate => ApertureMeaning::Collimator,
        };
        self.aperture_meaning
    }
}

// ── Beam state ─────────────────────────────────────────────────────────────

/// Beam moments in base units (m, rad, fractional momentum spread).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Moments {
    pub sigma_x: f64,
    pub sigma_xp: f64,
    pub sigma_y: f64,
    pub sigma_yp: f64,
    pub bunch_length: f64,
    pub momentum_spread: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Twiss {
    pub alpha_x: f64,
    pub beta_x: f64,
    pub emit_x: f64,
    pub alpha_y: f64,
    pub beta_y: f64,
    pub emit_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamState {
    pub particle: Particle,
    pub distribution: DistributionKind,
    /// Distribution chosen on the command line; restored on reset.
    configured_distribution: DistributionKind,
    pub defined: bool,
    pub corrected: bool,
    /// GeV/c.
    pub momentum: f64,
    /// GeV.
    pub total_energy: f64,
    pub kinetic_energy: f64,
    pub gamma: f64,
    pub beta: f64,
    /// T·m.
    pub brho: f64,
    pub moments: Moments,
    /// Absolute energy spread (relative, times beta squared).
    pub sigma_e: f64,
    /// Bunch length in seconds.
    pub sigma_t: f64,
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    pub twiss: Twiss,
}

impl BeamState {
    pub fn new(particle: Particle, distribution: DistributionKind) -> Self {
        Self {
            particle,
            distribution,
            configured_distribution: distribution,
            defined: false,
            corrected: false,
            momentum: 0.0,
            total_energy: 0.0,
            kinetic_energy: 0.0,
            gamma: 0.0,
            beta: 0.0,
            brho: 0.0,
            moments: Moments::default(),
            sigma_e: 0.0,
            sigma_t: 0.0,
            x0: 0.0,
            y0: 0.0,
            z0: 0.0,
            twiss: Twiss::default(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.particle, self.configured_distribution);
    }

    /// Set the reference momentum (GeV/c) and derive energy and rigidity.
    pub fn set_momentum(&mut self, momentum: f64) {
        let mass = self.particle.mass();
        self.momentum = momentum;
        self.total_energy = (momentum * momentum + mass * mass).sqrt();
        self.kinetic_energy = self.total_energy - mass;
        self.gamma = self.total_energy / mass;
        self.beta = momentum / self.total_energy;
        self.brho = momentum / (RIGIDITY_PER_GEV * self.particle.charge().abs());
    }

    /// Set the kinetic energy (GeV) and derive momentum and rigidity.
    pub fn set_kinetic_energy(&mut self, kinetic_energy: f64) {
        let mass = self.particle.mass();
        let total = kinetic_energy + mass;
        self.set_momentum((total * total - mass * mass).max(0.0).sqrt());
    }

    /// Start a new beam definition.
    ///
    /// A correction applies once per section: after one, `corrected` and the
    /// `gausstwiss` distribution with its alphas survive a redefinition until
    /// `reset`.
    pub fn define(&mut self, moments: Moments, momentum: f64) {
        let (alpha_x, alpha_y) = (self.twiss.alpha_x, self.twiss.alpha_y);
        self.set_momentum(momentum);
        self.moments = moments;
        self.derive_from_moments();
        if self.corrected {
            self.twiss.alpha_x = alpha_x;
            self.twiss.alpha_y = alpha_y;
        }
        self.defined = true;
    }

    /// Add moments in quadrature (r.m.s. addition).
    pub fn add_in_quadrature(&mut self, extra: Moments) {
        let m = &mut self.moments;
        m.sigma_x = m.sigma_x.hypot(extra.sigma_x);
        m.sigma_xp = m.sigma_xp.hypot(extra.sigma_xp);
        m.sigma_y = m.sigma_y.hypot(extra.sigma_y);
        m.sigma_yp = m.sigma_yp.hypot(extra.sigma_yp);
        m.bunch_length = m.bunch_length.hypot(extra.bunch_length);
        m.momentum_spread = m.momentum_spread.hypot(extra.momentum_spread);
        let corrected = self.corrected;
        let twiss = self.twiss;
        self.derive_from_moments();
        if corrected {
            self.twiss = twiss;
        }
    }

    fn derive_from_moments(&mut self) {
        let m = self.moments;
        self.sigma_e = m.momentum_spread * self.beta * self.beta;
        self.sigma_t = if self.beta > 0.0 {
            m.bunch_length / (self.beta * SPEED_OF_LIGHT)
        } else {
            0.0
        };
        self.twiss = Twiss {
            alpha_x: 0.0,
            beta_x: ratio(m.sigma_x, m.sigma_xp),
            emit_x: m.sigma_x * m.sigma_xp,
            alpha_y: 0.0,
            beta_y: ratio(m.sigma_y, m.sigma_yp),
            emit_y: m.sigma_y * m.sigma_yp,
        };
    }

    /// Apply the x-x' and y-y' correlations of a type-12 record.
    ///
    /// Returns `false` without touching the beam when a correlation is not
    /// strictly inside (-1, 1) or an angular spread is zero.
    pub fn apply_correlations(&mut self, r21: f64, r43: f64) -> bool {
        let m = self.moments;
        if r21.abs() >= 1.0 || r43.abs() >= 1.0 || m.sigma_xp == 0.0 || m.sigma_yp == 0.0 {
            return false;
        }
        let (alpha_x, beta_x, emit_x) = correlated_plane(m.sigma_x, m.sigma_xp, r21);
        let (alpha_y, beta_y, emit_y) = correlated_plane(m.sigma_y, m.sigma_yp, r43);
        self.twiss = Twiss {
            alpha_x,
            beta_x,
            emit_x,
            alpha_y,
            beta_y,
            emit_y,
        };
        self.distribution = DistributionKind::GaussTwiss;
        self.corrected = true;
        true
    }
}

fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

/// (alpha, beta, emittance) of one plane with correlation `r`.
fn correlated_plane(sigma: f64, sigma_p: f64, r: f64) -> (f64, f64, f64) {
    let root = (1.0 - r * r).sqrt();
    let beta = sigma / (sigma_p * root);
    let emit = sigma * sigma_p * root;
    let alpha = -r / root;
    (alpha, beta, emit)
}
