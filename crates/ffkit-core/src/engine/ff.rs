use super::error::{BuildError, ComputeError};
use super::nlist::NeighborList;
use super::part::ForcePart;
use crate::core::models::cell::{Cell, CellError};
use crate::core::models::system::{System, SystemError};
use nalgebra::{Matrix3, Point3, Vector3};
use std::collections::HashMap;
use tracing::{debug, info};

/// A complete force field: the owner of the system state, a list of
/// force parts, and the neighbor list they share.
///
/// Positions and cell vectors change only through `update_pos` and
/// `update_rvecs`, which clear every part's cache and mark the neighbor
/// list dirty; `compute` rebuilds the list exactly when that flag is set,
/// then sums all parts, accumulating gradients and the virial into the
/// caller's buffers.
#[derive(Debug)]
pub struct ForceField {
    system: System,
    parts: Vec<ForcePart>,
    keys: HashMap<String, usize>,
    nlist: Option<NeighborList>,
    nlist_dirty: bool,
}

impl ForceField {
    pub fn new(system: System, nlist: Option<NeighborList>) -> Self {
        info!(natom = system.natom(), nvec = system.cell().nvec(), "assembling force field");
        let nlist_dirty = nlist.is_some();
        Self {
            system,
            parts: Vec::new(),
            keys: HashMap::new(),
            nlist,
            nlist_dirty,
        }
    }

    /// Registers a force part under its key. Keys are unique: adding two
    /// parts of the same kind is a configuration error.
    pub fn add_part(&mut self, part: ForcePart) -> Result<(), BuildError> {
        if self.keys.contains_key(part.key()) {
            return Err(BuildError::DuplicatePart(part.key().to_string()));
        }
        if let Some(rcut) = part.required_rcut() {
            match &mut self.nlist {
                Some(nlist) => {
                    nlist.request_rcut(rcut);
                    self.nlist_dirty = true;
                }
                None => return Err(BuildError::MissingNeighborList(part.key().to_string())),
            }
        }
        debug!(key = part.key(), "added force part");
        self.keys.insert(part.key().to_string(), self.parts.len());
        self.parts.push(part);
        Ok(())
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn nlist(&self) -> Option<&NeighborList> {
        self.nlist.as_ref()
    }

    pub fn parts(&self) -> &[ForcePart] {
        &self.parts
    }

    pub fn part(&self, key: &str) -> Option<&ForcePart> {
        self.keys.get(key).map(|&index| &self.parts[index])
    }

    pub fn part_mut(&mut self, key: &str) -> Option<&mut ForcePart> {
        match self.keys.get(key) {
            Some(&index) => Some(&mut self.parts[index]),
            None => None,
        }
    }

    /// Moves the atoms: stores the new positions, clears all caches, and
    /// schedules a neighbor list refresh for the next compute.
    pub fn update_pos(&mut self, pos: &[Point3<f64>]) -> Result<(), SystemError> {
        self.system.set_pos(pos)?;
        for part in &mut self.parts {
            part.update_pos();
        }
        if self.nlist.is_some() {
            self.nlist_dirty = true;
        }
        Ok(())
    }

    /// Deforms the cell: stores the new lattice vectors, clears all
    /// caches (letting cell-dependent parts refresh their bounds), and
    /// schedules a neighbor list refresh for the next compute.
    pub fn update_rvecs(&mut self, rvecs: &[Vector3<f64>]) -> Result<(), CellError> {
        let cell = Cell::new(rvecs)?;
        self.system.set_cell(cell);
        let Self { system, parts, .. } = self;
        for part in parts.iter_mut() {
            part.update_rvecs(system.cell());
        }
        if self.nlist.is_some() {
            self.nlist_dirty = true;
        }
        Ok(())
    }

    /// Computes the total energy; gradient and virial contributions are
    /// *added* into the buffers when present. The neighbor list is
    /// refreshed first when positions or cell changed since the last
    /// compute, and only then.
    pub fn compute(
        &mut self,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64, ComputeError> {
        let Self {
            system,
            parts,
            nlist,
            nlist_dirty,
            ..
        } = self;
        if let Some(nlist) = nlist.as_mut() {
            if *nlist_dirty {
                nlist.update(system);
                *nlist_dirty = false;
            }
        }
        let mut energy = 0.0;
        for part in parts.iter_mut() {
            energy += part.compute(
                system,
                nlist.as_ref(),
                gpos.as_deref_mut(),
                vtens.as_deref_mut(),
            )?;
        }
        Ok(energy)
    }
}
