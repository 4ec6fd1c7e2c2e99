use super::error::BuildError;
use super::nlist::NeighborList;
use crate::core::models::system::System;
use crate::core::numeric::erfc;
use crate::core::scaling::Scalings;
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

const TWO_DIV_SQRT_PI: f64 = 1.128_379_167_095_512_6;

/// How a pair potential behaves near its cutoff. `Switch3` multiplies the
/// energy by a cubic switching function that reaches zero at the cutoff
/// over the given width, keeping energy and force continuous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Truncation {
    None,
    Switch3 { width: f64 },
}

/// The functional form of a pairwise non-bonded interaction, with its
/// per-atom parameters.
#[derive(Debug, Clone)]
pub enum PairKind {
    /// 12-6 Lennard-Jones with Lorentz-Berthelot mixing.
    LennardJones { sigmas: Vec<f64>, epsilons: Vec<f64> },
    /// MM3-style Buckingham: `eps * (1.84e5 * exp(-12 d/sigma) - 2.25 (sigma/d)^6)`
    /// with additive sigma and geometric epsilon mixing.
    Mm3 { sigmas: Vec<f64>, epsilons: Vec<f64> },
    /// Point-charge electrostatics damped by `erfc(alpha d)`; the real
    /// space half of the Ewald split. `alpha = 0` gives the bare Coulomb
    /// interaction.
    Erfc {
        charges: Vec<f64>,
        alpha: f64,
        dielectric: f64,
    },
}

/// A pairwise potential: functional form, cutoff, and truncation scheme.
#[derive(Debug, Clone)]
pub struct PairPotential {
    kind: PairKind,
    rcut: f64,
    truncation: Truncation,
}

impl PairPotential {
    pub fn new(kind: PairKind, rcut: f64, truncation: Truncation) -> Self {
        Self {
            kind,
            rcut,
            truncation,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            PairKind::LennardJones { .. } => "lj",
            PairKind::Mm3 { .. } => "mm3",
            PairKind::Erfc { .. } => "erfc",
        }
    }

    pub fn rcut(&self) -> f64 {
        self.rcut
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    fn natom_parameters(&self) -> usize {
        match &self.kind {
            PairKind::LennardJones { sigmas, .. } | PairKind::Mm3 { sigmas, .. } => sigmas.len(),
            PairKind::Erfc { charges, .. } => charges.len(),
        }
    }

    fn check_parameters(&self, natom: usize) -> Result<(), BuildError> {
        let lengths: &[(&'static str, usize)] = match &self.kind {
            PairKind::LennardJones { sigmas, epsilons } | PairKind::Mm3 { sigmas, epsilons } => {
                &[("sigmas", sigmas.len()), ("epsilons", epsilons.len())]
            }
            PairKind::Erfc { charges, .. } => &[("charges", charges.len())],
        };
        for &(field, actual) in lengths {
            if actual != natom {
                return Err(BuildError::LengthMismatch {
                    field,
                    expected: natom,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// The untruncated pair energy and its radial derivative for one atom
    /// pair at distance `d`.
    fn raw(&self, i: usize, j: usize, d: f64) -> (f64, f64) {
        match &self.kind {
            PairKind::LennardJones { sigmas, epsilons } => {
                let sigma = 0.5 * (sigmas[i] + sigmas[j]);
                let eps = (epsilons[i] * epsilons[j]).sqrt();
                let x6 = (sigma / d).powi(6);
                let x12 = x6 * x6;
                (
                    4.0 * eps * (x12 - x6),
                    4.0 * eps * (6.0 * x6 - 12.0 * x12) / d,
                )
            }
            PairKind::Mm3 { sigmas, epsilons } => {
                let sigma = sigmas[i] + sigmas[j];
                let eps = (epsilons[i] * epsilons[j]).sqrt();
                let rep = 1.84e5 * (-12.0 * d / sigma).exp();
                let x6 = (sigma / d).powi(6);
                (
                    eps * (rep - 2.25 * x6),
                    eps * (-12.0 / sigma * rep + 13.5 * x6 / d),
                )
            }
            PairKind::Erfc {
                charges,
                alpha,
                dielectric,
            } => {
                let qq = charges[i] * charges[j] / dielectric;
                let x = alpha * d;
                let pot = erfc(x) / d;
                (
                    qq * pot,
                    -qq * (pot + alpha * TWO_DIV_SQRT_PI * (-x * x).exp()) / d,
                )
            }
        }
    }

    /// The truncated pair energy and its radial derivative; zero beyond
    /// the cutoff.
    pub fn energy(&self, i: usize, j: usize, d: f64) -> (f64, f64) {
        if d > self.rcut {
            return (0.0, 0.0);
        }
        let (e, de) = self.raw(i, j, d);
        match self.truncation {
            Truncation::None => (e, de),
            Truncation::Switch3 { width } => {
                if d <= self.rcut - width {
                    (e, de)
                } else {
                    let t = (self.rcut - d) / width;
                    let m = t * t * (3.0 - 2.0 * t);
                    let dm = -6.0 * t * (1.0 - t) / width;
                    (e * m, de * m + e * dm)
                }
            }
        }
    }

    /// The energy and virial integrals beyond the cutoff, summed over all
    /// ordered atom pairs, as consumed by the tail-correction force part.
    /// Only decaying, untruncated potentials qualify.
    pub fn tail_integrals(&self) -> Result<(f64, f64), BuildError> {
        if matches!(self.kind, PairKind::Erfc { .. }) {
            return Err(BuildError::DivergentTailCorrection(self.name()));
        }
        if self.truncation != Truncation::None {
            return Err(BuildError::TruncatedTailCorrection);
        }
        let natom = self.natom_parameters();
        let rc = self.rcut;
        let mut ecorr = 0.0;
        let mut wcorr = 0.0;
        for i in 0..natom {
            for j in 0..natom {
                let e_int = match &self.kind {
                    PairKind::LennardJones { sigmas, epsilons } => {
                        let sigma = 0.5 * (sigmas[i] + sigmas[j]);
                        let eps = (epsilons[i] * epsilons[j]).sqrt();
                        let s6 = sigma.powi(6);
                        4.0 * eps * (s6 * s6 / (9.0 * rc.powi(9)) - s6 / (3.0 * rc.powi(3)))
                    }
                    PairKind::Mm3 { sigmas, epsilons } => {
                        let sigma = sigmas[i] + sigmas[j];
                        let eps = (epsilons[i] * epsilons[j]).sqrt();
                        let b = 12.0 / sigma;
                        let rep = 1.84e5
                            * (-b * rc).exp()
                            * (rc * rc / b + 2.0 * rc / (b * b) + 2.0 / (b * b * b));
                        eps * (rep - 2.25 * sigma.powi(6) / (3.0 * rc.powi(3)))
                    }
                    PairKind::Erfc { .. } => unreachable!(),
                };
                let (e_rc, _) = self.raw(i, j, rc);
                ecorr += e_int;
                wcorr += -e_rc * rc.powi(3) / 3.0 - e_int;
            }
        }
        Ok((ecorr, wcorr))
    }
}

/// A pairwise non-bonded interaction: a potential iterated over the
/// shared neighbor list, damped by the scaling table for covalently close
/// pairs. The scaling applies to the minimum-image pair only; explicit
/// periodic images always interact at full strength.
#[derive(Debug, Clone)]
pub struct PairInteraction {
    potential: PairPotential,
    scalings: Scalings,
}

impl PairInteraction {
    pub fn new(
        system: &System,
        potential: PairPotential,
        scalings: Scalings,
    ) -> Result<Self, BuildError> {
        potential.check_parameters(system.natom())?;
        Ok(Self {
            potential,
            scalings,
        })
    }

    pub fn potential(&self) -> &PairPotential {
        &self.potential
    }

    pub fn scalings(&self) -> &Scalings {
        &self.scalings
    }

    pub fn compute(
        &self,
        nlist: &NeighborList,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> f64 {
        let mut energy = 0.0;
        for entry in nlist.entries() {
            if entry.d > self.potential.rcut() {
                continue;
            }
            let scale = if entry.shift == [0, 0, 0] {
                self.scalings.scale(entry.i, entry.j)
            } else {
                1.0
            };
            if scale == 0.0 {
                continue;
            }
            let (e, de) = self.potential.energy(entry.i, entry.j, entry.d);
            energy += scale * e;
            if gpos.is_some() || vtens.is_some() {
                let radial = scale * de / entry.d;
                let force = entry.delta * radial;
                if let Some(gpos) = gpos.as_deref_mut() {
                    gpos[entry.i] -= force;
                    gpos[entry.j] += force;
                }
                if let Some(vtens) = vtens.as_deref_mut() {
                    *vtens += entry.delta * force.transpose();
                }
            }
        }
        energy
    }
}

/// The mean pressure a tail correction exerts: used together with
/// `PairPotential::tail_integrals` by the tail-correction force part.
pub fn tail_energy_and_virial(ecorr: f64, wcorr: f64, volume: f64) -> (f64, f64) {
    (2.0 * PI * ecorr / volume, 2.0 * PI * wcorr / volume)
}
