use crate::core::models::cell::Cell;
use crate::core::numeric::erf;
use crate::core::scaling::Scalings;
use nalgebra::{Matrix3, Point3, Vector3};
use std::f64::consts::PI;

const TWO_DIV_SQRT_PI: f64 = 1.128_379_167_095_512_6;

/// The reciprocal lattice bounds covering wave vectors up to `gcut`,
/// recomputed whenever the cell changes.
pub fn gmax_for(cell: &Cell, gcut: f64) -> [i32; 3] {
    let mut gmax = [0i32; 3];
    for (axis, spacing) in cell.gspacings().iter().enumerate() {
        gmax[axis] = (gcut * spacing - 0.5).ceil().max(0.0) as i32;
    }
    gmax
}

/// The reciprocal-space part of the Ewald summation for point charges:
/// a structure-factor sum over the reciprocal lattice vectors within
/// `gmax`, with analytic gradient and virial contributions.
pub fn compute_reciprocal(
    pos: &[Point3<f64>],
    charges: &[f64],
    cell: &Cell,
    alpha: f64,
    gmax: [i32; 3],
    dielectric: f64,
    mut gpos: Option<&mut [Vector3<f64>]>,
    mut vtens: Option<&mut Matrix3<f64>>,
) -> f64 {
    let gvecs = cell.gvecs();
    let fac1 = 2.0 * PI / (cell.volume() * dielectric);
    let fac2 = 0.25 / (alpha * alpha);
    let natom = pos.len();
    let mut work = vec![(0.0f64, 0.0f64); natom];
    let mut energy = 0.0;
    for j0 in -gmax[0]..=gmax[0] {
        for j1 in -gmax[1]..=gmax[1] {
            for j2 in -gmax[2]..=gmax[2] {
                if j0 == 0 && j1 == 0 && j2 == 0 {
                    continue;
                }
                let k = (gvecs[0] * j0 as f64 + gvecs[1] * j1 as f64 + gvecs[2] * j2 as f64)
                    * (2.0 * PI);
                let ksq = k.norm_squared();
                let mut cosfac = 0.0;
                let mut sinfac = 0.0;
                for (i, p) in pos.iter().enumerate() {
                    let x = k.dot(&p.coords);
                    let c = charges[i] * x.cos();
                    let s = charges[i] * x.sin();
                    cosfac += c;
                    sinfac += s;
                    work[i] = (2.0 * c, -2.0 * s);
                }
                let c = fac1 * (-ksq * fac2).exp() / ksq;
                let term = c * (cosfac * cosfac + sinfac * sinfac);
                energy += term;
                if let Some(gpos) = gpos.as_deref_mut() {
                    for (i, &(wc, ws)) in work.iter().enumerate() {
                        let x = c * (cosfac * ws + sinfac * wc);
                        gpos[i] += k * x;
                    }
                }
                if let Some(vtens) = vtens.as_deref_mut() {
                    let vterm = 2.0 * (1.0 / ksq + fac2) * term;
                    *vtens += k * k.transpose() * vterm - Matrix3::identity() * term;
                }
            }
        }
    }
    energy
}

/// The correction part of the Ewald summation: subtracts the Gaussian
/// self-interaction and the reciprocal-space double counting of pairs
/// whose real-space interaction is scaled down.
pub fn compute_correction(
    pos: &[Point3<f64>],
    charges: &[f64],
    cell: &Cell,
    alpha: f64,
    scalings: &Scalings,
    dielectric: f64,
    mut gpos: Option<&mut [Vector3<f64>]>,
    mut vtens: Option<&mut Matrix3<f64>>,
) -> f64 {
    let mut energy = 0.0;
    // Self-interaction, no gradient or virial contribution.
    for &q in charges {
        energy -= alpha / PI.sqrt() * q * q / dielectric;
    }
    // Scaled-neighbor corrections.
    for (i, j, scale) in scalings.pairs() {
        let mut delta = pos[i] - pos[j];
        cell.mic(&mut delta);
        let d = delta.norm();
        let x = alpha * d;
        let pot = erf(x) / d;
        let fac = (1.0 - scale) * charges[i] * charges[j] / dielectric;
        energy -= fac * pot;
        if gpos.is_some() || vtens.is_some() {
            let g = -fac * (TWO_DIV_SQRT_PI * alpha * (-x * x).exp() - pot) / (d * d);
            if let Some(gpos) = gpos.as_deref_mut() {
                gpos[i] += delta * g;
                gpos[j] -= delta * g;
            }
            if let Some(vtens) = vtens.as_deref_mut() {
                *vtens += delta * delta.transpose() * g;
            }
        }
    }
    energy
}

/// The neutralizing-background part of the Ewald summation, required when
/// the total charge does not vanish. Gaussian charge radii, when present,
/// refine the interaction of the smeared charges with the background.
pub fn compute_neutralizing(
    charges: &[f64],
    radii: Option<&[f64]>,
    cell: &Cell,
    alpha: f64,
    dielectric: f64,
    vtens: Option<&mut Matrix3<f64>>,
) -> f64 {
    let total_charge: f64 = charges.iter().sum();
    let volume = cell.volume();
    let mut fac = total_charge * total_charge * PI / (2.0 * volume * alpha * alpha) / dielectric;
    if let Some(radii) = radii {
        let smear: f64 = charges
            .iter()
            .zip(radii)
            .map(|(&q, &r)| q * r * r)
            .sum();
        fac -= total_charge * PI / (2.0 * volume) * smear / dielectric;
    }
    if let Some(vtens) = vtens {
        *vtens -= Matrix3::identity() * fac;
    }
    fac
}
