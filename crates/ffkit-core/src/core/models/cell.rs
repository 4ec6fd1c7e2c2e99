use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CellError {
    #[error("a cell takes at most 3 lattice vectors, got {0}")]
    TooManyVectors(usize),
    #[error("the lattice vectors span a degenerate (zero-volume) cell")]
    Degenerate,
}

/// The periodic boundary conditions of a simulation cell.
///
/// A cell holds 0, 1, 2, or 3 lattice vectors, supporting aperiodic
/// systems, wires, slabs, and fully 3D periodic crystals. The reciprocal
/// vectors (without the conventional 2π factor) and the generalized volume
/// are derived once at construction, so a `Cell` is an immutable value:
/// changing the lattice means building a new `Cell`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    rvecs: Vec<Vector3<f64>>,
    gvecs: Vec<Vector3<f64>>,
    volume: f64,
}

impl Cell {
    /// Creates a cell from 0 to 3 lattice vectors.
    pub fn new(rvecs: &[Vector3<f64>]) -> Result<Self, CellError> {
        if rvecs.len() > 3 {
            return Err(CellError::TooManyVectors(rvecs.len()));
        }
        let (gvecs, volume) = derive_reciprocal(rvecs)?;
        Ok(Self {
            rvecs: rvecs.to_vec(),
            gvecs,
            volume,
        })
    }

    /// Creates an aperiodic (isolated) cell.
    pub fn empty() -> Self {
        Self {
            rvecs: Vec::new(),
            gvecs: Vec::new(),
            volume: 0.0,
        }
    }

    /// The number of periodic directions (0 to 3).
    pub fn nvec(&self) -> usize {
        self.rvecs.len()
    }

    /// The real-space lattice vectors.
    pub fn rvecs(&self) -> &[Vector3<f64>] {
        &self.rvecs
    }

    /// The reciprocal lattice vectors, without the 2π factor, satisfying
    /// `rvecs[i] · gvecs[j] = δ_ij`.
    pub fn gvecs(&self) -> &[Vector3<f64>] {
        &self.gvecs
    }

    /// The generalized volume: length, area, or volume for 1, 2, or 3
    /// periodic directions; 0.0 for an aperiodic cell.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// The spacing between crystal planes along each periodic direction.
    pub fn gspacings(&self) -> Vec<f64> {
        self.gvecs.iter().map(|g| 1.0 / g.norm()).collect()
    }

    /// Applies the minimum-image convention to a relative vector.
    pub fn mic(&self, delta: &mut Vector3<f64>) {
        // Two sweeps handle moderately skewed cells; strongly non-orthogonal
        // lattices must be reduced by the caller first.
        for _ in 0..2 {
            let mut changed = false;
            for (rvec, gvec) in self.rvecs.iter().zip(&self.gvecs) {
                let shift = delta.dot(gvec).round();
                if shift != 0.0 {
                    *delta -= rvec * shift;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// The fractional coordinates of a Cartesian vector, one component per
    /// periodic direction.
    pub fn to_frac(&self, cart: &Vector3<f64>) -> Vec<f64> {
        self.gvecs.iter().map(|g| cart.dot(g)).collect()
    }

    /// Rotates the cell into its lower-triangular canonical form.
    ///
    /// Returns the rotated cell and the rotation matrix `q` such that each
    /// rotated lattice vector is `q * rvec`. The first lattice vector ends
    /// up along x, the second in the xy-plane. Requires a 3D periodic cell.
    pub fn to_lower_triangular(&self) -> (Cell, Matrix3<f64>) {
        assert_eq!(self.nvec(), 3, "cell lowering requires a 3D periodic cell");
        let a = self.rvecs[0];
        let b = self.rvecs[1];
        let u0 = a.normalize();
        let u1 = (b - u0 * b.dot(&u0)).normalize();
        let u2 = u0.cross(&u1);
        let q = Matrix3::from_rows(&[u0.transpose(), u1.transpose(), u2.transpose()]);
        let rotated: Vec<Vector3<f64>> = self.rvecs.iter().map(|r| q * r).collect();
        let cell = Cell::new(&rotated).expect("rotation preserves the cell volume");
        (cell, q)
    }
}

fn derive_reciprocal(rvecs: &[Vector3<f64>]) -> Result<(Vec<Vector3<f64>>, f64), CellError> {
    match rvecs {
        [] => Ok((Vec::new(), 0.0)),
        [a] => {
            let norm_sq = a.norm_squared();
            if norm_sq == 0.0 {
                return Err(CellError::Degenerate);
            }
            Ok((vec![a / norm_sq], norm_sq.sqrt()))
        }
        [a, b] => {
            let normal = a.cross(b);
            let area = normal.norm();
            if area == 0.0 {
                return Err(CellError::Degenerate);
            }
            // Complete to a full basis with the plane normal, invert, and
            // keep the two in-plane reciprocal rows.
            let full = Matrix3::from_rows(&[a.transpose(), b.transpose(), (normal / area).transpose()]);
            let inv = full.try_inverse().ok_or(CellError::Degenerate)?;
            Ok((vec![inv.column(0).into_owned(), inv.column(1).into_owned()], area))
        }
        [a, b, c] => {
            let mat = Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]);
            let det = mat.determinant();
            if det.abs() < f64::EPSILON {
                return Err(CellError::Degenerate);
            }
            let inv = mat.try_inverse().ok_or(CellError::Degenerate)?;
            Ok((
                vec![
                    inv.column(0).into_owned(),
                    inv.column(1).into_owned(),
                    inv.column(2).into_owned(),
                ],
                det.abs(),
            ))
        }
        _ => Err(CellError::TooManyVectors(rvecs.len())),
    }
}
