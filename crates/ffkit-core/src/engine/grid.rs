use super::error::BuildError;
use crate::core::models::cell::Cell;
use nalgebra::Point3;

/// A 3D table of energies on a regular grid over the fractional
/// coordinates of a periodic cell, evaluated by trilinear interpolation
/// with periodic wrap-around.
#[derive(Debug, Clone)]
pub struct EnergyGrid {
    shape: [usize; 3],
    data: Vec<f64>,
}

impl EnergyGrid {
    pub fn new(shape: [usize; 3], data: Vec<f64>) -> Result<Self, BuildError> {
        let expected = shape[0] * shape[1] * shape[2];
        if expected == 0 || data.len() != expected {
            return Err(BuildError::LengthMismatch {
                field: "grid data",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn at(&self, i0: usize, i1: usize, i2: usize) -> f64 {
        self.data[(i0 * self.shape[1] + i1) * self.shape[2] + i2]
    }

    /// Interpolates the energy at a Cartesian position in the given cell.
    pub fn interpolate(&self, cell: &Cell, pos: &Point3<f64>) -> f64 {
        let frac = cell.to_frac(&pos.coords);
        let mut base = [0usize; 3];
        let mut frac_part = [0.0f64; 3];
        for axis in 0..3 {
            let t = frac[axis] * self.shape[axis] as f64;
            let floor = t.floor();
            base[axis] = (floor as i64).rem_euclid(self.shape[axis] as i64) as usize;
            frac_part[axis] = t - floor;
        }
        let mut energy = 0.0;
        for corner in 0..8usize {
            let mut weight = 1.0;
            let mut index = [0usize; 3];
            for axis in 0..3 {
                if corner >> axis & 1 == 1 {
                    weight *= frac_part[axis];
                    index[axis] = (base[axis] + 1) % self.shape[axis];
                } else {
                    weight *= 1.0 - frac_part[axis];
                    index[axis] = base[axis];
                }
            }
            energy += weight * self.at(index[0], index[1], index[2]);
        }
        energy
    }
}
