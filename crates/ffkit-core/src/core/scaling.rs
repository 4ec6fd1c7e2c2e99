use super::models::system::System;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("scaling factor {name} = {value} lies outside [0, 1]")]
    OutOfRange { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingRow {
    pub other: usize,
    pub scale: f64,
}

/// Per-pair damping factors for non-bonded interactions between covalently
/// close atoms.
///
/// Built once from the bond topology: pairs at one, two, three, or four
/// bonds receive `scale1` through `scale4` respectively; everything more
/// distant interacts at full strength. When rings make a pair reachable at
/// several bond distances, the shortest one wins. The table is immutable
/// after construction and only stores pairs whose factor differs from 1.
#[derive(Debug, Clone)]
pub struct Scalings {
    scale1: f64,
    scale2: f64,
    scale3: f64,
    scale4: f64,
    rows: Vec<Vec<ScalingRow>>,
}

impl Scalings {
    pub fn new(
        system: &System,
        scale1: f64,
        scale2: f64,
        scale3: f64,
        scale4: f64,
    ) -> Result<Self, ScalingError> {
        for (name, value) in [
            ("scale1", scale1),
            ("scale2", scale2),
            ("scale3", scale3),
            ("scale4", scale4),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScalingError::OutOfRange { name, value });
            }
        }
        let mut rows = vec![Vec::new(); system.natom()];
        for i in 0..system.natom() {
            for &j in &system.neighs1()[i] {
                push_row(&mut rows[i], j, scale1);
            }
            for &j in &system.neighs2()[i] {
                push_row(&mut rows[i], j, scale2);
            }
            for &j in &system.neighs3()[i] {
                push_row(&mut rows[i], j, scale3);
            }
            for &j in &system.neighs4()[i] {
                push_row(&mut rows[i], j, scale4);
            }
            rows[i].retain(|row| row.scale != 1.0);
            rows[i].sort_by_key(|row| row.other);
        }
        Ok(Self {
            scale1,
            scale2,
            scale3,
            scale4,
            rows,
        })
    }

    /// A table that leaves every pair untouched.
    pub fn trivial(system: &System) -> Self {
        Self {
            scale1: 1.0,
            scale2: 1.0,
            scale3: 1.0,
            scale4: 1.0,
            rows: vec![Vec::new(); system.natom()],
        }
    }

    pub fn scale1(&self) -> f64 {
        self.scale1
    }

    pub fn scale2(&self) -> f64 {
        self.scale2
    }

    pub fn scale3(&self) -> f64 {
        self.scale3
    }

    pub fn scale4(&self) -> f64 {
        self.scale4
    }

    /// The damping factor for one ordered atom pair; 1.0 when the pair is
    /// not covalently close.
    pub fn scale(&self, i: usize, j: usize) -> f64 {
        match self.rows[i].binary_search_by_key(&j, |row| row.other) {
            Ok(pos) => self.rows[i][pos].scale,
            Err(_) => 1.0,
        }
    }

    /// Iterates over the damped pairs, each unordered pair visited once
    /// with `j < i`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows.iter().enumerate().flat_map(|(i, rows)| {
            rows.iter()
                .take_while(move |row| row.other < i)
                .map(move |row| (i, row.other, row.scale))
        })
    }
}

fn push_row(rows: &mut Vec<ScalingRow>, other: usize, scale: f64) {
    // The shortest bond distance has precedence for ring topologies.
    if !rows.iter().any(|row| row.other == other) {
        rows.push(ScalingRow { other, scale });
    }
}
