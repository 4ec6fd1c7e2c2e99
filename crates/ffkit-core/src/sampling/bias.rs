use super::colvar::CollectiveVariable;
use crate::core::models::system::System;
use crate::engine::error::{BuildError, ComputeError};
use crate::engine::part::ValencePart;
use crate::engine::vlist::ValenceTerm;
use nalgebra::{Matrix3, Vector3};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathLoadError {
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("invalid number in '{path}' at line {line}")]
    Parse { path: String, line: usize },
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// An energy term used to bias the system along one or more collective
/// variables. Derivatives follow from the chain rule: the CV writes its
/// own gradient and virial into the caller buffers, and the bias scales
/// them in place by its derivative towards the CV value.
#[derive(Debug, Clone)]
pub enum BiasPotential {
    /// `0.5 * fc * (q - rv)^2`
    Harmonic {
        fc: f64,
        rv: f64,
        cv: CollectiveVariable,
    },
    /// Harmonic below the rest value, zero above it.
    LowerWall {
        fc: f64,
        rv: f64,
        cv: CollectiveVariable,
    },
    /// Harmonic above the rest value, zero below it.
    UpperWall {
        fc: f64,
        rv: f64,
        cv: CollectiveVariable,
    },
    /// A Legendre series over the CV, mapped from `domain` to [-1, 1].
    Legendre {
        coeffs: Vec<f64>,
        domain: [f64; 2],
        cv: CollectiveVariable,
    },
    /// A restraint towards a discrete path in CV space.
    PathDeviation(PathDeviationBias),
}

impl BiasPotential {
    pub fn legendre(
        coeffs: Vec<f64>,
        domain: [f64; 2],
        cv: CollectiveVariable,
    ) -> Result<Self, BuildError> {
        if domain[0] == domain[1] {
            return Err(BuildError::InvalidPath(
                "the Legendre domain must have a nonzero width",
            ));
        }
        Ok(Self::Legendre { coeffs, domain, cv })
    }

    /// Computes the bias energy; when buffers are given, writes the
    /// energy derivatives into them.
    pub fn compute(
        &mut self,
        system: &System,
        gpos: Option<&mut [Vector3<f64>]>,
        vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        self.compute_full(system, gpos, vtens).map(|(e, _)| e)
    }

    /// The values of the collective variables this bias acts on.
    pub fn cv_values(&mut self, system: &System) -> Result<Vec<f64>, ComputeError> {
        self.compute_full(system, None, None).map(|(_, values)| values)
    }

    pub(crate) fn compute_full(
        &mut self,
        system: &System,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<(f64, Vec<f64>), ComputeError> {
        match self {
            Self::PathDeviation(bias) => bias.compute_full(system, gpos, vtens),
            Self::Harmonic { fc, rv, cv } => {
                let q = cv.compute(system, gpos.as_deref_mut(), vtens.as_deref_mut())?;
                Ok((harmonic_restraint(*fc, q - *rv, gpos, vtens), vec![q]))
            }
            Self::LowerWall { fc, rv, cv } => {
                let q = cv.compute(system, gpos.as_deref_mut(), vtens.as_deref_mut())?;
                let x = if q < *rv { q - *rv } else { 0.0 };
                Ok((harmonic_restraint(*fc, x, gpos, vtens), vec![q]))
            }
            Self::UpperWall { fc, rv, cv } => {
                let q = cv.compute(system, gpos.as_deref_mut(), vtens.as_deref_mut())?;
                let x = if q > *rv { q - *rv } else { 0.0 };
                Ok((harmonic_restraint(*fc, x, gpos, vtens), vec![q]))
            }
            Self::Legendre { coeffs, domain, cv } => {
                let q = cv.compute(system, gpos.as_deref_mut(), vtens.as_deref_mut())?;
                let slope = 2.0 / (domain[1] - domain[0]);
                let x = (2.0 * q - domain[0] - domain[1]) / (domain[1] - domain[0]);
                let (value, deriv) = legendre_series(coeffs, x);
                scale_buffers(gpos, vtens, deriv * slope);
                Ok((value, vec![q]))
            }
        }
    }
}

/// `0.5 * fc * x^2` with the chain rule applied to the CV derivatives
/// already sitting in the buffers.
fn harmonic_restraint(
    fc: f64,
    x: f64,
    gpos: Option<&mut [Vector3<f64>]>,
    vtens: Option<&mut Matrix3<f64>>,
) -> f64 {
    scale_buffers(gpos, vtens, fc * x);
    0.5 * fc * x * x
}

fn scale_buffers(
    gpos: Option<&mut [Vector3<f64>]>,
    vtens: Option<&mut Matrix3<f64>>,
    factor: f64,
) {
    if let Some(gpos) = gpos {
        for g in gpos {
            *g *= factor;
        }
    }
    if let Some(vtens) = vtens {
        *vtens *= factor;
    }
}

/// Evaluates a Legendre series and its derivative at `x` through the
/// Bonnet recurrences.
fn legendre_series(coeffs: &[f64], x: f64) -> (f64, f64) {
    let mut value = 0.0;
    let mut deriv = 0.0;
    let mut p_prev = 1.0;
    let mut dp_prev = 0.0;
    let mut p = x;
    let mut dp = 1.0;
    if let Some(&c0) = coeffs.first() {
        value += c0 * p_prev;
    }
    if let Some(&c1) = coeffs.get(1) {
        value += c1 * p;
        deriv += c1 * dp;
    }
    for (k, &c) in coeffs.iter().enumerate().skip(2) {
        let n = (k - 1) as f64;
        let p_next = ((2.0 * n + 1.0) * x * p - n * p_prev) / (n + 1.0);
        let dp_next = dp_prev + (2.0 * n + 1.0) * p;
        p_prev = p;
        dp_prev = dp;
        p = p_next;
        dp = dp_next;
        value += c * p;
        deriv += c * dp;
    }
    (value, deriv)
}

/// A restraint towards a discrete reference path in CV space: the energy
/// of the nearest path point, interpolated between its neighbors with
/// inverse-squared-distance weights, plus a harmonic penalty on the
/// distance to that point.
///
/// Distances use a per-CV weighted Euclidean metric, with optional
/// periodic wrap-around per CV. The potential is *not* continuous when
/// the nearest path point changes; this is a documented property of the
/// method, not a defect.
#[derive(Debug, Clone)]
pub struct PathDeviationBias {
    cvs: Vec<CollectiveVariable>,
    coordinates: Vec<Vec<f64>>,
    energies: Vec<f64>,
    fc: f64,
    weights: Vec<f64>,
    periodicities: Vec<Option<f64>>,
    values: Vec<f64>,
    cv_gpos: Vec<Vec<Vector3<f64>>>,
    cv_vtens: Vec<Matrix3<f64>>,
}

impl PathDeviationBias {
    /// `path` rows hold the CV coordinates of one path point followed by
    /// its reference energy.
    pub fn new(
        system: &System,
        cvs: Vec<CollectiveVariable>,
        path: &[Vec<f64>],
        fc: f64,
        weights: Option<Vec<f64>>,
        periodicities: Option<Vec<Option<f64>>>,
    ) -> Result<Self, BuildError> {
        let ncv = cvs.len();
        if ncv == 0 {
            return Err(BuildError::InvalidPath(
                "a path bias needs at least one collective variable",
            ));
        }
        if path.len() < 2 {
            return Err(BuildError::InvalidPath("a path needs at least two points"));
        }
        let mut coordinates = Vec::with_capacity(path.len());
        let mut energies = Vec::with_capacity(path.len());
        for row in path {
            if row.len() != ncv + 1 {
                return Err(BuildError::InvalidPath(
                    "every path row must hold one coordinate per CV plus an energy",
                ));
            }
            coordinates.push(row[..ncv].to_vec());
            energies.push(row[ncv]);
        }
        let weights = weights.unwrap_or_else(|| vec![1.0; ncv]);
        if weights.len() != ncv {
            return Err(BuildError::LengthMismatch {
                field: "weights",
                expected: ncv,
                actual: weights.len(),
            });
        }
        let periodicities = periodicities.unwrap_or_else(|| vec![None; ncv]);
        if periodicities.len() != ncv {
            return Err(BuildError::LengthMismatch {
                field: "periodicities",
                expected: ncv,
                actual: periodicities.len(),
            });
        }
        let natom = system.natom();
        Ok(Self {
            cvs,
            coordinates,
            energies,
            fc,
            weights,
            periodicities,
            values: vec![0.0; ncv],
            cv_gpos: vec![vec![Vector3::zeros(); natom]; ncv],
            cv_vtens: vec![Matrix3::zeros(); ncv],
        })
    }

    /// Loads the path table from a headerless CSV file, one path point
    /// per row: the CV coordinates followed by the reference energy.
    pub fn from_csv(
        file: &Path,
        system: &System,
        cvs: Vec<CollectiveVariable>,
        fc: f64,
        weights: Option<Vec<f64>>,
        periodicities: Option<Vec<Option<f64>>>,
    ) -> Result<Self, PathLoadError> {
        let display = file.to_string_lossy().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(file)
            .map_err(|e| PathLoadError::Csv {
                path: display.clone(),
                source: e,
            })?;
        let mut path = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| PathLoadError::Csv {
                path: display.clone(),
                source: e,
            })?;
            let row = record
                .iter()
                .map(|field| field.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|_| PathLoadError::Parse {
                    path: display.clone(),
                    line: line + 1,
                })?;
            path.push(row);
        }
        Ok(Self::new(system, cvs, &path, fc, weights, periodicities)?)
    }

    /// Finds the path point closest to `x` under the weighted metric.
    /// Returns its index plus the windows of squared distances and
    /// connecting vectors around it, zero-padded at the path ends.
    fn find_nearest(&self, x: &[f64]) -> (usize, [f64; 3], [Vec<f64>; 3]) {
        let ncv = self.cvs.len();
        let npoints = self.coordinates.len();
        let mut deltas = Vec::with_capacity(npoints);
        let mut sqdists = Vec::with_capacity(npoints);
        for point in &self.coordinates {
            let mut delta = vec![0.0; ncv];
            let mut sq = 0.0;
            for icv in 0..ncv {
                let mut diff = x[icv] - point[icv];
                if let Some(period) = self.periodicities[icv] {
                    diff -= period * (diff / period).round();
                }
                delta[icv] = diff;
                sq += (self.weights[icv] * diff).powi(2);
            }
            deltas.push(delta);
            sqdists.push(sq);
        }
        let index = sqdists
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let pick_sq = |p: isize| {
            if p < 0 || p as usize >= npoints {
                0.0
            } else {
                sqdists[p as usize]
            }
        };
        let pick_delta = |p: isize| {
            if p < 0 || p as usize >= npoints {
                vec![0.0; ncv]
            } else {
                deltas[p as usize].clone()
            }
        };
        let p = index as isize;
        (
            index,
            [pick_sq(p - 1), pick_sq(p), pick_sq(p + 1)],
            [pick_delta(p - 1), pick_delta(p), pick_delta(p + 1)],
        )
    }

    fn compute_full(
        &mut self,
        system: &System,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<(f64, Vec<f64>), ComputeError> {
        let ncv = self.cvs.len();
        let want_gpos = gpos.is_some();
        let want_vtens = vtens.is_some();
        for icv in 0..ncv {
            let cv_gpos = if want_gpos {
                Some(&mut self.cv_gpos[icv][..])
            } else {
                None
            };
            let cv_vtens = if want_vtens {
                Some(&mut self.cv_vtens[icv])
            } else {
                None
            };
            self.values[icv] = self.cvs[icv].compute(system, cv_gpos, cv_vtens)?;
        }
        let npoints = self.coordinates.len();
        let (index, sq, deltas) = self.find_nearest(&self.values);
        let at_endpoint = index == 0 || index == npoints - 1;
        let energy_window = [
            if index > 0 { self.energies[index - 1] } else { 0.0 },
            self.energies[index],
            if index + 1 < npoints {
                self.energies[index + 1]
            } else {
                0.0
            },
        ];

        // Inverse-squared-distance interpolation coefficients; at an
        // exactly hit endpoint the 0/0 limit from the zero padding is 0.5
        // on the padded side, which the endpoint doubling compensates.
        let denom01 = sq[0] + sq[1];
        let denom12 = sq[1] + sq[2];
        let mut c0 = 0.5;
        let mut c1 = 0.0;
        if denom01 > 0.0 {
            c0 = 0.5 * sq[1] / denom01;
            c1 += 0.5 * sq[0] / denom01;
        }
        let mut c2 = 0.5;
        if denom12 > 0.0 {
            c2 = 0.5 * sq[1] / denom12;
            c1 += 0.5 * sq[2] / denom12;
        }
        let mut energy = c0 * energy_window[0] + c1 * energy_window[1] + c2 * energy_window[2];
        if at_endpoint {
            energy *= 2.0;
        }

        if want_gpos || want_vtens {
            let mut path_derivatives = vec![0.0; ncv];
            for icv in 0..ncv {
                let mut deriv = 0.0;
                if denom01 > 0.0 {
                    deriv += (deltas[0][icv] * sq[1] - deltas[1][icv] * sq[0])
                        * (energy_window[1] - energy_window[0])
                        / (denom01 * denom01);
                }
                if denom12 > 0.0 {
                    deriv += (deltas[2][icv] * sq[1] - deltas[1][icv] * sq[2])
                        * (energy_window[1] - energy_window[2])
                        / (denom12 * denom12);
                }
                deriv *= self.weights[icv] * self.weights[icv];
                if at_endpoint {
                    deriv *= 2.0;
                }
                // Chain rule: path interpolation plus harmonic restraint.
                path_derivatives[icv] =
                    deriv + self.fc * self.weights[icv] * self.weights[icv] * deltas[1][icv];
            }
            if let Some(gpos) = gpos.as_deref_mut() {
                gpos.fill(Vector3::zeros());
                for icv in 0..ncv {
                    for (out, cv_g) in gpos.iter_mut().zip(&self.cv_gpos[icv]) {
                        *out += cv_g * path_derivatives[icv];
                    }
                }
            }
            if let Some(vtens) = vtens.as_deref_mut() {
                *vtens = Matrix3::zeros();
                for icv in 0..ncv {
                    *vtens += self.cv_vtens[icv] * path_derivatives[icv];
                }
            }
        }
        energy += 0.5 * self.fc * sq[1];
        Ok((energy, self.values.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
enum TermRef {
    Valence(usize),
    Potential(usize),
}

/// A biasing force part for enhanced sampling: hosts valence-style bias
/// terms (evaluated through a private three-layer pipeline) next to
/// CV-based bias potentials, and records per-term energies and CV values
/// for the sampling driver to inspect after each compute.
#[derive(Debug, Clone)]
pub struct BiasPart {
    valence: ValencePart,
    potentials: Vec<BiasPotential>,
    lookup: Vec<TermRef>,
    potential_state: Vec<(f64, Vec<f64>)>,
    scratch_gpos: Vec<Vector3<f64>>,
    scratch_vtens: Matrix3<f64>,
}

impl BiasPart {
    pub fn new(system: &System) -> Self {
        Self {
            valence: ValencePart::new(system),
            potentials: Vec::new(),
            lookup: Vec::new(),
            potential_state: Vec::new(),
            scratch_gpos: vec![Vector3::zeros(); system.natom()],
            scratch_vtens: Matrix3::zeros(),
        }
    }

    /// Adds a valence-style bias term acting on atoms. Returns the term
    /// index within this part.
    pub fn add_term(&mut self, term: &ValenceTerm) -> Result<usize, BuildError> {
        let row = self.valence.add_term(term)?;
        self.lookup.push(TermRef::Valence(row));
        Ok(self.lookup.len() - 1)
    }

    /// Adds a CV-based bias potential. Returns the term index within this
    /// part.
    pub fn add_potential(&mut self, potential: BiasPotential) -> usize {
        self.potentials.push(potential);
        self.potential_state.push((f64::NAN, Vec::new()));
        self.lookup.push(TermRef::Potential(self.potentials.len() - 1));
        self.lookup.len() - 1
    }

    pub fn nterm(&self) -> usize {
        self.lookup.len()
    }

    /// The energy of one bias term as of the last compute.
    pub fn term_energy(&self, index: usize) -> f64 {
        match self.lookup[index] {
            TermRef::Valence(row) => self.valence.term_energy(row),
            TermRef::Potential(ipot) => self.potential_state[ipot].0,
        }
    }

    /// The energies of all bias terms as of the last compute.
    pub fn term_energies(&self) -> Vec<f64> {
        (0..self.nterm()).map(|i| self.term_energy(i)).collect()
    }

    /// The CV (or internal coordinate) values one term acted on, as of
    /// the last compute.
    pub fn term_cv_values(&self, index: usize) -> Vec<f64> {
        match self.lookup[index] {
            TermRef::Valence(row) => self.valence.term_ic_values(row),
            TermRef::Potential(ipot) => self.potential_state[ipot].1.clone(),
        }
    }

    pub(crate) fn compute(
        &mut self,
        system: &System,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        let BiasPart {
            valence,
            potentials,
            potential_state,
            scratch_gpos,
            scratch_vtens,
            ..
        } = self;
        let mut energy = valence.compute(system, gpos.as_deref_mut(), vtens.as_deref_mut());
        for (potential, state) in potentials.iter_mut().zip(potential_state.iter_mut()) {
            let want_gpos = gpos.is_some();
            let want_vtens = vtens.is_some();
            if want_gpos {
                scratch_gpos.fill(Vector3::zeros());
            }
            if want_vtens {
                *scratch_vtens = Matrix3::zeros();
            }
            let scratch = if want_gpos {
                Some(&mut scratch_gpos[..])
            } else {
                None
            };
            let scratch_v = if want_vtens {
                Some(&mut *scratch_vtens)
            } else {
                None
            };
            let (e, values) = potential.compute_full(system, scratch, scratch_v)?;
            *state = (e, values);
            energy += e;
            if let Some(gpos) = gpos.as_deref_mut() {
                for (out, mine) in gpos.iter_mut().zip(scratch_gpos.iter()) {
                    *out += mine;
                }
            }
            if let Some(vtens) = vtens.as_deref_mut() {
                *vtens += *scratch_vtens;
            }
        }
        Ok(energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::cell::Cell;
    use crate::engine::iclist::InternalCoordinate;
    use crate::engine::vlist::TermKind;
    use nalgebra::Point3;
    use std::io::Write;

    fn cubic_system(positions: Vec<Point3<f64>>, length: f64) -> System {
        let cell = Cell::new(&[
            Vector3::new(length, 0.0, 0.0),
            Vector3::new(0.0, length, 0.0),
            Vector3::new(0.0, 0.0, length),
        ])
        .unwrap();
        System::new(vec![6u8; positions.len()], positions, cell).unwrap()
    }

    fn bond_cv(system: &System) -> CollectiveVariable {
        CollectiveVariable::internal_coordinate(system, InternalCoordinate::Bond(0, 1), None)
            .unwrap()
    }

    fn two_atoms(distance: f64) -> System {
        cubic_system(
            vec![
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(1.0 + distance, 1.0, 1.0),
            ],
            20.0,
        )
    }

    #[test]
    fn harmonic_bias_on_volume_cv() {
        let system = cubic_system(vec![Point3::origin()], 4.0);
        let cv = CollectiveVariable::volume(&system).unwrap();
        let mut bias = BiasPotential::Harmonic {
            fc: 2.0,
            rv: 60.0,
            cv,
        };
        let mut vtens = Matrix3::zeros();
        let energy = bias.compute(&system, None, Some(&mut vtens)).unwrap();
        assert!((energy - 0.5 * 2.0 * 16.0).abs() < 1e-12);
        // Chain rule: d(bias)/d(eps) = fc * (V - rv) * V * I.
        assert!((vtens - Matrix3::identity() * (2.0 * 4.0 * 64.0)).norm() < 1e-9);
    }

    #[test]
    fn harmonic_bias_gradient_matches_finite_difference() {
        let system = two_atoms(1.7);
        let mut bias = BiasPotential::Harmonic {
            fc: 3.0,
            rv: 1.5,
            cv: bond_cv(&system),
        };
        let mut gpos = vec![Vector3::zeros(); 2];
        bias.compute(&system, Some(&mut gpos), None).unwrap();
        let eps = 1e-6;
        for axis in 0..3 {
            let mut plus = system.pos().to_vec();
            plus[1][axis] += eps;
            let mut minus = system.pos().to_vec();
            minus[1][axis] -= eps;
            let e_plus = bias
                .compute(&cubic_system(plus, 20.0), None, None)
                .unwrap();
            let e_minus = bias
                .compute(&cubic_system(minus, 20.0), None, None)
                .unwrap();
            let numeric = (e_plus - e_minus) / (2.0 * eps);
            assert!((gpos[1][axis] - numeric).abs() < 1e-6);
        }
    }

    #[test]
    fn walls_are_one_sided() {
        let system = two_atoms(1.7);
        let mut lower = BiasPotential::LowerWall {
            fc: 4.0,
            rv: 2.0,
            cv: bond_cv(&system),
        };
        let mut upper = BiasPotential::UpperWall {
            fc: 4.0,
            rv: 2.0,
            cv: bond_cv(&system),
        };
        // Below the rest value the lower wall pushes, the upper is silent.
        let e_lower = lower.compute(&system, None, None).unwrap();
        let e_upper = upper.compute(&system, None, None).unwrap();
        assert!((e_lower - 0.5 * 4.0 * 0.09).abs() < 1e-9);
        assert_eq!(e_upper, 0.0);
        let stretched = two_atoms(2.4);
        let e_lower = lower.compute(&stretched, None, None).unwrap();
        let e_upper = upper.compute(&stretched, None, None).unwrap();
        assert_eq!(e_lower, 0.0);
        assert!((e_upper - 0.5 * 4.0 * 0.16).abs() < 1e-9);
    }

    #[test]
    fn upper_wall_gradient_is_zero_inside_and_harmonic_outside() {
        let stretched = two_atoms(2.4);
        let mut upper = BiasPotential::UpperWall {
            fc: 4.0,
            rv: 2.0,
            cv: bond_cv(&stretched),
        };
        let mut gpos = vec![Vector3::zeros(); 2];
        upper.compute(&stretched, Some(&mut gpos), None).unwrap();
        assert!((gpos[1] - Vector3::new(4.0 * 0.4, 0.0, 0.0)).norm() < 1e-9);
        let inside = two_atoms(1.7);
        let mut gpos = vec![Vector3::repeat(9.0); 2];
        upper.compute(&inside, Some(&mut gpos), None).unwrap();
        assert!(gpos[0].norm() < 1e-12 && gpos[1].norm() < 1e-12);
    }

    #[test]
    fn legendre_series_matches_closed_forms() {
        // P2(x) = (3x^2 - 1) / 2 over the default domain.
        let (value, deriv) = legendre_series(&[0.0, 0.0, 1.0], 0.4);
        assert!((value - 0.5 * (3.0 * 0.16 - 1.0)).abs() < 1e-12);
        assert!((deriv - 3.0 * 0.4).abs() < 1e-12);
        // P3(x) = (5x^3 - 3x) / 2.
        let (value, deriv) = legendre_series(&[0.0, 0.0, 0.0, 1.0], -0.3);
        assert!((value - 0.5 * (5.0 * -0.027 - 3.0 * -0.3)).abs() < 1e-12);
        assert!((deriv - 0.5 * (15.0 * 0.09 - 3.0)).abs() < 1e-12);
    }

    #[test]
    fn legendre_bias_gradient_matches_finite_difference() {
        let system = two_atoms(1.6);
        let mut bias = BiasPotential::legendre(
            vec![0.2, -1.0, 0.7, 0.3],
            [1.0, 2.0],
            bond_cv(&system),
        )
        .unwrap();
        let mut gpos = vec![Vector3::zeros(); 2];
        bias.compute(&system, Some(&mut gpos), None).unwrap();
        let eps = 1e-6;
        for axis in 0..3 {
            let mut plus = system.pos().to_vec();
            plus[1][axis] += eps;
            let mut minus = system.pos().to_vec();
            minus[1][axis] -= eps;
            let e_plus = bias.compute(&cubic_system(plus, 20.0), None, None).unwrap();
            let e_minus = bias
                .compute(&cubic_system(minus, 20.0), None, None)
                .unwrap();
            let numeric = (e_plus - e_minus) / (2.0 * eps);
            assert!((gpos[1][axis] - numeric).abs() < 1e-6);
        }
    }

    fn path_bias_1d(system: &System, path: &[Vec<f64>], fc: f64) -> PathDeviationBias {
        PathDeviationBias::new(system, vec![bond_cv(system)], path, fc, None, None).unwrap()
    }

    #[test]
    fn path_bias_at_an_interior_point_returns_the_path_energy() {
        // Path over the bond length with energies [0, 10, 0].
        let path = vec![vec![1.0, 0.0], vec![1.5, 10.0], vec![2.0, 0.0]];
        let system = two_atoms(1.5);
        let mut bias = path_bias_1d(&system, &path, 7.0);
        let (energy, values) = bias.compute_full(&system, None, None).unwrap();
        assert!((energy - 10.0).abs() < 1e-9);
        assert!((values[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn path_bias_doubles_the_interpolation_at_the_first_point() {
        let path = vec![vec![1.0, 4.0], vec![1.5, 10.0], vec![2.0, 0.0]];
        let system = two_atoms(1.0);
        let mut bias = path_bias_1d(&system, &path, 7.0);
        let (energy, _) = bias.compute_full(&system, None, None).unwrap();
        // Half the weight falls on the zero padding; doubling restores the
        // path energy, with no harmonic contribution at the exact point.
        assert!((energy - 4.0).abs() < 1e-9);
    }

    #[test]
    fn path_bias_adds_a_harmonic_restraint_off_the_path() {
        let path = vec![vec![1.0, 0.0], vec![1.5, 0.0], vec![2.0, 0.0]];
        let system = two_atoms(1.6);
        let mut bias = path_bias_1d(&system, &path, 8.0);
        let (energy, _) = bias.compute_full(&system, None, None).unwrap();
        assert!((energy - 0.5 * 8.0 * 0.01).abs() < 1e-9);
    }

    #[test]
    fn path_bias_gradient_matches_finite_difference() {
        let path = vec![vec![1.0, 1.0], vec![1.5, 6.0], vec![2.0, 2.0]];
        let system = two_atoms(1.62);
        let mut bias = path_bias_1d(&system, &path, 5.0);
        let mut gpos = vec![Vector3::zeros(); 2];
        bias.compute_full(&system, Some(&mut gpos), None).unwrap();
        let eps = 1e-7;
        for axis in 0..3 {
            let mut plus = system.pos().to_vec();
            plus[1][axis] += eps;
            let mut minus = system.pos().to_vec();
            minus[1][axis] -= eps;
            let (e_plus, _) = bias
                .compute_full(&cubic_system(plus, 20.0), None, None)
                .unwrap();
            let (e_minus, _) = bias
                .compute_full(&cubic_system(minus, 20.0), None, None)
                .unwrap();
            let numeric = (e_plus - e_minus) / (2.0 * eps);
            assert!(
                (gpos[1][axis] - numeric).abs() < 1e-5,
                "axis {axis}: {} vs {numeric}",
                gpos[1][axis]
            );
        }
    }

    #[test]
    fn periodic_cv_wraps_to_the_nearest_path_image() {
        let path = vec![vec![0.2, 1.0], vec![0.5, 2.0]];
        // A bond of 1.2 is one full period away from a bond of 0.2.
        let system = two_atoms(1.2);
        let mut wrapped = PathDeviationBias::new(
            &system,
            vec![bond_cv(&system)],
            &path,
            3.0,
            None,
            Some(vec![Some(1.0)]),
        )
        .unwrap();
        let (energy_wrapped, _) = wrapped.compute_full(&system, None, None).unwrap();
        let shifted = two_atoms(0.2);
        let mut plain = PathDeviationBias::new(
            &system,
            vec![bond_cv(&system)],
            &path,
            3.0,
            None,
            Some(vec![Some(1.0)]),
        )
        .unwrap();
        let (energy_at_image, _) = plain.compute_full(&shifted, None, None).unwrap();
        assert!((energy_wrapped - energy_at_image).abs() < 1e-9);
    }

    #[test]
    fn path_rows_must_match_the_cv_count() {
        let system = two_atoms(1.0);
        let result = PathDeviationBias::new(
            &system,
            vec![bond_cv(&system)],
            &[vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]],
            1.0,
            None,
            None,
        );
        assert!(matches!(result, Err(BuildError::InvalidPath(_))));
    }

    #[test]
    fn path_loads_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("path.csv");
        let mut handle = std::fs::File::create(&file).unwrap();
        writeln!(handle, "1.0, 0.0").unwrap();
        writeln!(handle, "1.5, 10.0").unwrap();
        writeln!(handle, "2.0, 0.0").unwrap();
        drop(handle);
        let system = two_atoms(1.5);
        let mut bias = PathDeviationBias::from_csv(
            &file,
            &system,
            vec![bond_cv(&system)],
            7.0,
            None,
            None,
        )
        .unwrap();
        let (energy, _) = bias.compute_full(&system, None, None).unwrap();
        assert!((energy - 10.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_csv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("path.csv");
        std::fs::write(&file, "1.0, not-a-number\n").unwrap();
        let system = two_atoms(1.5);
        let result = PathDeviationBias::from_csv(
            &file,
            &system,
            vec![bond_cv(&system)],
            7.0,
            None,
            None,
        );
        assert!(matches!(result, Err(PathLoadError::Parse { line: 1, .. })));
    }

    #[test]
    fn bias_part_sums_terms_and_potentials() {
        let system = two_atoms(1.7);
        let mut part = BiasPart::new(&system);
        let term = ValenceTerm::new(
            TermKind::Harmonic { fc: 10.0, rv: 1.5 },
            vec![InternalCoordinate::Bond(0, 1)],
        )
        .unwrap();
        part.add_term(&term).unwrap();
        part.add_potential(BiasPotential::Harmonic {
            fc: 2.0,
            rv: 1.0,
            cv: bond_cv(&system),
        });
        let mut gpos = vec![Vector3::zeros(); 2];
        let energy = part.compute(&system, Some(&mut gpos), None).unwrap();
        let expected_term = 0.5 * 10.0 * 0.04;
        let expected_pot = 0.5 * 2.0 * 0.49;
        assert!((energy - expected_term - expected_pot).abs() < 1e-9);
        assert_eq!(part.nterm(), 2);
        let energies = part.term_energies();
        assert!((energies[0] - expected_term).abs() < 1e-9);
        assert!((energies[1] - expected_pot).abs() < 1e-9);
        assert!((part.term_cv_values(0)[0] - 1.7).abs() < 1e-12);
        assert!((part.term_cv_values(1)[0] - 1.7).abs() < 1e-12);
        // The analytic gradient of both harmonic contributions.
        let expected_grad = 10.0 * 0.2 + 2.0 * 0.7;
        assert!((gpos[1] - Vector3::new(expected_grad, 0.0, 0.0)).norm() < 1e-9);
    }
}
