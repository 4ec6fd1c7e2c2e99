//! Shared fixtures and finite-difference harnesses for the unit tests.

use crate::core::models::cell::Cell;
use crate::core::models::system::System;
use crate::engine::ff::ForceField;
use nalgebra::{Matrix3, Point3, Vector3};

/// Four water molecules in a cubic box, with bonds, SPC-like charges,
/// masses, and atom types. Small enough for finite differences, periodic
/// enough to exercise every interaction kind.
pub(crate) fn water_box() -> System {
    let length = 6.2;
    let mut pos = Vec::new();
    let mut numbers = Vec::new();
    let mut bonds = Vec::new();
    let offsets = [
        Vector3::new(0.7, 0.9, 0.8),
        Vector3::new(3.9, 1.0, 0.7),
        Vector3::new(0.8, 3.8, 4.0),
        Vector3::new(3.7, 4.1, 3.2),
    ];
    for (imol, offset) in offsets.iter().enumerate() {
        let twist = 0.3 * imol as f64;
        let oxygen = Point3::from(*offset);
        let h1 = oxygen + Vector3::new(0.76 * twist.cos(), 0.59, 0.76 * twist.sin());
        let h2 = oxygen + Vector3::new(-0.76 * twist.cos(), 0.59, -0.76 * twist.sin());
        let base = pos.len();
        pos.extend([oxygen, h1, h2]);
        numbers.extend([8u8, 1, 1]);
        bonds.push([base, base + 1]);
        bonds.push([base, base + 2]);
    }
    let cell = Cell::new(&[
        Vector3::new(length, 0.0, 0.0),
        Vector3::new(0.0, length, 0.0),
        Vector3::new(0.0, 0.0, length),
    ])
    .unwrap();
    let mut system = System::new(numbers, pos, cell).unwrap();
    system.set_bonds(bonds).unwrap();
    system
        .set_charges(vec![-0.8, 0.4, 0.4, -0.8, 0.4, 0.4, -0.8, 0.4, 0.4, -0.8, 0.4, 0.4])
        .unwrap();
    system.set_standard_masses().unwrap();
    system
        .set_ffatypes(&["O", "H", "H", "O", "H", "H", "O", "H", "H", "O", "H", "H"])
        .unwrap();
    system
}

/// Per-atom Lennard-Jones parameters matching the `water_box` fixture.
pub(crate) fn water_lj_parameters() -> (Vec<f64>, Vec<f64>) {
    let mut sigmas = Vec::new();
    let mut epsilons = Vec::new();
    for _ in 0..4 {
        sigmas.extend([1.7, 1.2, 1.2]);
        epsilons.extend([0.15, 0.02, 0.02]);
    }
    (sigmas, epsilons)
}

/// Checks the analytic gradient of a force field against central finite
/// differences of its energy.
pub(crate) fn check_gradient(ff: &mut ForceField, eps: f64, tol: f64) {
    let base = ff.system().pos().to_vec();
    let natom = base.len();
    let mut gpos = vec![Vector3::zeros(); natom];
    ff.update_pos(&base).unwrap();
    ff.compute(Some(&mut gpos), None).unwrap();
    for iatom in 0..natom {
        for axis in 0..3 {
            let mut plus = base.clone();
            plus[iatom][axis] += eps;
            ff.update_pos(&plus).unwrap();
            let e_plus = ff.compute(None, None).unwrap();
            let mut minus = base.clone();
            minus[iatom][axis] -= eps;
            ff.update_pos(&minus).unwrap();
            let e_minus = ff.compute(None, None).unwrap();
            let numeric = (e_plus - e_minus) / (2.0 * eps);
            assert!(
                (gpos[iatom][axis] - numeric).abs() < tol,
                "gradient mismatch at atom {iatom} axis {axis}: analytic {} vs numeric {numeric}",
                gpos[iatom][axis]
            );
        }
    }
    ff.update_pos(&base).unwrap();
}

/// Checks the analytic virial of a force field against central finite
/// differences of its energy under uniform deformations of positions and
/// cell.
pub(crate) fn check_virial(ff: &mut ForceField, eps: f64, tol: f64) {
    let base_pos = ff.system().pos().to_vec();
    let base_rvecs = ff.system().cell().rvecs().to_vec();
    let mut vtens = Matrix3::zeros();
    ff.compute(None, Some(&mut vtens)).unwrap();
    for a in 0..3 {
        for b in 0..3 {
            let mut numeric = 0.0;
            for (sign, factor) in [(1.0, 0.5 / eps), (-1.0, -0.5 / eps)] {
                let mut strain = Matrix3::identity();
                strain[(a, b)] += sign * eps;
                let new_pos: Vec<Point3<f64>> = base_pos
                    .iter()
                    .map(|p| Point3::from(strain * p.coords))
                    .collect();
                let new_rvecs: Vec<Vector3<f64>> =
                    base_rvecs.iter().map(|r| strain * r).collect();
                ff.update_rvecs(&new_rvecs).unwrap();
                ff.update_pos(&new_pos).unwrap();
                numeric += factor * ff.compute(None, None).unwrap();
            }
            assert!(
                (vtens[(a, b)] - numeric).abs() < tol,
                "virial mismatch at ({a},{b}): analytic {} vs numeric {numeric}",
                vtens[(a, b)]
            );
        }
    }
    ff.update_rvecs(&base_rvecs).unwrap();
    ff.update_pos(&base_pos).unwrap();
}
