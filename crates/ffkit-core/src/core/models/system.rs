use super::cell::Cell;
use super::masses::standard_mass;
use nalgebra::Point3;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("expected {expected} entries for `{field}`, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("atom index {index} is out of bounds for a system of {natom} atoms")]
    AtomIndexOutOfBounds { index: usize, natom: usize },
    #[error("atom {0} is bonded to itself")]
    SelfBond(usize),
    #[error("no standard mass is tabulated for atomic number {0}")]
    UnknownMass(u8),
}

/// The mutable state of a molecular system read by the evaluation engine:
/// positions, the periodic cell, the bond topology, and optional per-atom
/// properties (charges, Gaussian charge radii, masses, force-field atom
/// types).
///
/// Positions and cell vectors are the only quantities that change between
/// energy evaluations; everything else is fixed at setup time. Mutation
/// normally goes through `ForceField::update_pos` / `update_rvecs`, which
/// also invalidate the engine's caches.
#[derive(Debug, Clone)]
pub struct System {
    numbers: Vec<u8>,
    pos: Vec<Point3<f64>>,
    cell: Cell,
    bonds: Vec<[usize; 2]>,
    ffatypes: Vec<String>,
    ffatype_ids: Vec<usize>,
    charges: Option<Vec<f64>>,
    radii: Option<Vec<f64>>,
    masses: Option<Vec<f64>>,
    neighs1: Vec<BTreeSet<usize>>,
    neighs2: Vec<BTreeSet<usize>>,
    neighs3: Vec<BTreeSet<usize>>,
    neighs4: Vec<BTreeSet<usize>>,
}

impl System {
    pub fn new(numbers: Vec<u8>, pos: Vec<Point3<f64>>, cell: Cell) -> Result<Self, SystemError> {
        if numbers.len() != pos.len() {
            return Err(SystemError::LengthMismatch {
                field: "pos",
                expected: numbers.len(),
                actual: pos.len(),
            });
        }
        let natom = numbers.len();
        Ok(Self {
            numbers,
            pos,
            cell,
            bonds: Vec::new(),
            ffatypes: Vec::new(),
            ffatype_ids: Vec::new(),
            charges: None,
            radii: None,
            masses: None,
            neighs1: vec![BTreeSet::new(); natom],
            neighs2: vec![BTreeSet::new(); natom],
            neighs3: vec![BTreeSet::new(); natom],
            neighs4: vec![BTreeSet::new(); natom],
        })
    }

    pub fn natom(&self) -> usize {
        self.numbers.len()
    }

    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    pub fn pos(&self) -> &[Point3<f64>] {
        &self.pos
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn bonds(&self) -> &[[usize; 2]] {
        &self.bonds
    }

    pub fn charges(&self) -> Option<&[f64]> {
        self.charges.as_deref()
    }

    pub fn radii(&self) -> Option<&[f64]> {
        self.radii.as_deref()
    }

    pub fn masses(&self) -> Option<&[f64]> {
        self.masses.as_deref()
    }

    /// The distinct force-field atom type names.
    pub fn ffatypes(&self) -> &[String] {
        &self.ffatypes
    }

    /// The force-field atom type name of one atom.
    pub fn ffatype(&self, iatom: usize) -> Option<&str> {
        self.ffatype_ids
            .get(iatom)
            .map(|&id| self.ffatypes[id].as_str())
    }

    /// Atoms bonded directly to each atom.
    pub fn neighs1(&self) -> &[BTreeSet<usize>] {
        &self.neighs1
    }

    /// Atoms separated by exactly two bonds from each atom.
    pub fn neighs2(&self) -> &[BTreeSet<usize>] {
        &self.neighs2
    }

    /// Atoms separated by exactly three bonds from each atom.
    pub fn neighs3(&self) -> &[BTreeSet<usize>] {
        &self.neighs3
    }

    /// Atoms separated by exactly four bonds from each atom.
    pub fn neighs4(&self) -> &[BTreeSet<usize>] {
        &self.neighs4
    }

    /// Overwrites the atomic positions. The caller is responsible for
    /// invalidating any engine caches; `ForceField::update_pos` does both.
    pub fn set_pos(&mut self, pos: &[Point3<f64>]) -> Result<(), SystemError> {
        if pos.len() != self.natom() {
            return Err(SystemError::LengthMismatch {
                field: "pos",
                expected: self.natom(),
                actual: pos.len(),
            });
        }
        self.pos.copy_from_slice(pos);
        Ok(())
    }

    /// Replaces the periodic cell.
    pub fn set_cell(&mut self, cell: Cell) {
        self.cell = cell;
    }

    /// Sets the bond topology and rebuilds the derived neighbor shells.
    pub fn set_bonds(&mut self, bonds: Vec<[usize; 2]>) -> Result<(), SystemError> {
        let natom = self.natom();
        for &[i, j] in &bonds {
            let index = i.max(j);
            if index >= natom {
                return Err(SystemError::AtomIndexOutOfBounds { index, natom });
            }
            if i == j {
                return Err(SystemError::SelfBond(i));
            }
        }
        self.bonds = bonds;
        self.rebuild_neighbor_shells();
        Ok(())
    }

    pub fn set_charges(&mut self, charges: Vec<f64>) -> Result<(), SystemError> {
        self.check_length("charges", charges.len())?;
        self.charges = Some(charges);
        Ok(())
    }

    pub fn set_radii(&mut self, radii: Vec<f64>) -> Result<(), SystemError> {
        self.check_length("radii", radii.len())?;
        self.radii = Some(radii);
        Ok(())
    }

    pub fn set_masses(&mut self, masses: Vec<f64>) -> Result<(), SystemError> {
        self.check_length("masses", masses.len())?;
        self.masses = Some(masses);
        Ok(())
    }

    /// Fills the masses from the standard atomic mass table.
    pub fn set_standard_masses(&mut self) -> Result<(), SystemError> {
        let masses = self
            .numbers
            .iter()
            .map(|&n| standard_mass(n).ok_or(SystemError::UnknownMass(n)))
            .collect::<Result<Vec<_>, _>>()?;
        self.masses = Some(masses);
        Ok(())
    }

    /// Assigns a force-field atom type name to every atom. The distinct
    /// names and the per-atom type ids are derived here.
    pub fn set_ffatypes(&mut self, names: &[&str]) -> Result<(), SystemError> {
        self.check_length("ffatypes", names.len())?;
        let mut distinct: Vec<String> = Vec::new();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = match distinct.iter().position(|t| t == name) {
                Some(id) => id,
                None => {
                    distinct.push((*name).to_string());
                    distinct.len() - 1
                }
            };
            ids.push(id);
        }
        self.ffatypes = distinct;
        self.ffatype_ids = ids;
        Ok(())
    }

    fn check_length(&self, field: &'static str, actual: usize) -> Result<(), SystemError> {
        if actual != self.natom() {
            return Err(SystemError::LengthMismatch {
                field,
                expected: self.natom(),
                actual,
            });
        }
        Ok(())
    }

    fn rebuild_neighbor_shells(&mut self) {
        let natom = self.natom();
        let mut neighs1 = vec![BTreeSet::new(); natom];
        for &[i, j] in &self.bonds {
            neighs1[i].insert(j);
            neighs1[j].insert(i);
        }
        let mut neighs2 = vec![BTreeSet::new(); natom];
        for i in 0..natom {
            for &j in &neighs1[i] {
                for &k in &neighs1[j] {
                    if k != i {
                        neighs2[i].insert(k);
                    }
                }
            }
        }
        let mut neighs3 = vec![BTreeSet::new(); natom];
        for i in 0..natom {
            for &j in &neighs2[i] {
                for &k in &neighs1[j] {
                    if k != i && !neighs1[i].contains(&k) {
                        neighs3[i].insert(k);
                    }
                }
            }
        }
        let mut neighs4 = vec![BTreeSet::new(); natom];
        for i in 0..natom {
            for &j in &neighs3[i] {
                for &k in &neighs1[j] {
                    if k != i && !neighs1[i].contains(&k) && !neighs2[i].contains(&k) {
                        neighs4[i].insert(k);
                    }
                }
            }
        }
        self.neighs1 = neighs1;
        self.neighs2 = neighs2;
        self.neighs3 = neighs3;
        self.neighs4 = neighs4;
    }
}
