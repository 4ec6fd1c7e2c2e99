use super::dlist::DeltaList;
use super::error::BuildError;
use crate::core::models::system::System;
use nalgebra::{Point3, Vector3};

/// One group of atoms aggregated into a bead. Weights do not have to add
/// up to one; mass-weighted groups yield centers of mass.
#[derive(Debug, Clone)]
pub struct ComGroup {
    pub atoms: Vec<usize>,
    pub weights: Vec<f64>,
}

impl ComGroup {
    /// A mass-weighted group taken from the system's masses.
    pub fn center_of_mass(system: &System, atoms: Vec<usize>) -> Result<Self, BuildError> {
        let masses = system.masses().ok_or(BuildError::MissingAtomData {
            part: "com group",
            field: "masses",
        })?;
        let weights = atoms
            .iter()
            .map(|&i| {
                masses
                    .get(i)
                    .copied()
                    .ok_or(BuildError::AtomIndexOutOfBounds {
                        index: i,
                        natom: system.natom(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { atoms, weights })
    }
}

/// An optional layer below the covalent pipeline that aggregates atomic
/// positions into bead positions.
///
/// Beads are computed from minimum-image relative vectors against each
/// group's first atom, so groups may be split over cell boundaries. The
/// backward pass scatters bead gradients onto the member atoms; the virial
/// needs no separate treatment here because bead positions transform
/// linearly under uniform deformations, so the bead-level delta list
/// already accounts for it.
#[derive(Debug, Clone)]
pub struct ComList {
    groups: Vec<ComGroup>,
    total_weights: Vec<f64>,
    dlist: DeltaList,
    slots: Vec<Vec<usize>>,
    pos: Vec<Point3<f64>>,
    gpos: Vec<Vector3<f64>>,
}

impl ComList {
    pub fn new(system: &System, groups: Vec<ComGroup>) -> Result<Self, BuildError> {
        let natom = system.natom();
        let mut dlist = DeltaList::new();
        let mut slots = Vec::with_capacity(groups.len());
        let mut total_weights = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            if group.atoms.is_empty() {
                return Err(BuildError::InvalidComGroup {
                    index,
                    reason: "the group contains no atoms",
                });
            }
            if group.atoms.len() != group.weights.len() {
                return Err(BuildError::InvalidComGroup {
                    index,
                    reason: "the weight list does not match the atom list",
                });
            }
            if let Some(&bad) = group.atoms.iter().find(|&&i| i >= natom) {
                return Err(BuildError::AtomIndexOutOfBounds {
                    index: bad,
                    natom,
                });
            }
            let total: f64 = group.weights.iter().sum();
            if total <= 0.0 {
                return Err(BuildError::InvalidComGroup {
                    index,
                    reason: "the total weight must be positive",
                });
            }
            let reference = group.atoms[0];
            let mut group_slots = Vec::with_capacity(group.atoms.len() - 1);
            for &member in &group.atoms[1..] {
                let (slot, _) = dlist.register(reference, member);
                group_slots.push(slot);
            }
            slots.push(group_slots);
            total_weights.push(total);
        }
        let nbead = groups.len();
        Ok(Self {
            groups,
            total_weights,
            dlist,
            slots,
            pos: vec![Point3::origin(); nbead],
            gpos: vec![Vector3::zeros(); nbead],
        })
    }

    pub fn nbead(&self) -> usize {
        self.groups.len()
    }

    /// The bead positions as of the last forward pass.
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.pos
    }

    /// The bead gradient buffer filled in by the layer above, consumed by
    /// `back`.
    pub fn gpos_mut(&mut self) -> &mut [Vector3<f64>] {
        &mut self.gpos
    }

    pub fn reset_gpos(&mut self) {
        self.gpos.fill(Vector3::zeros());
    }

    /// Computes the bead positions from the current atomic positions.
    pub fn forward(&mut self, system: &System) {
        self.dlist.forward(system.pos(), system.cell());
        for (ibead, group) in self.groups.iter().enumerate() {
            let reference = system.pos()[group.atoms[0]];
            let mut shift = Vector3::zeros();
            for (slot, &weight) in self.slots[ibead].iter().zip(&group.weights[1..]) {
                shift += self.dlist.delta(*slot).d * weight;
            }
            self.pos[ibead] = reference + shift / self.total_weights[ibead];
        }
    }

    /// Scatters the bead gradients in `gpos_mut` onto the member atoms.
    /// The virial is complete at the bead level (beads transform linearly
    /// under uniform deformations), so no virial is accumulated here.
    pub fn back(&mut self, mut gpos: Option<&mut [Vector3<f64>]>) {
        for (ibead, group) in self.groups.iter().enumerate() {
            let gbead = self.gpos[ibead];
            if let Some(gpos) = gpos.as_deref_mut() {
                gpos[group.atoms[0]] += gbead;
            }
            for (slot, &weight) in self.slots[ibead].iter().zip(&group.weights[1..]) {
                self.dlist
                    .add_grad(*slot, gbead * (weight / self.total_weights[ibead]));
            }
        }
        self.dlist.back(gpos, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::cell::Cell;
    use nalgebra::Point3;

    fn cubic_system(positions: Vec<Point3<f64>>) -> System {
        let cell = Cell::new(&[
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
        ])
        .unwrap();
        System::new(vec![6u8; positions.len()], positions, cell).unwrap()
    }

    #[test]
    fn bead_is_the_weighted_average_for_a_compact_group() {
        let system = cubic_system(vec![
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(3.0, 1.0, 1.0),
        ]);
        let mut comlist = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![0, 1],
                weights: vec![1.0, 3.0],
            }],
        )
        .unwrap();
        comlist.forward(&system);
        assert!((comlist.positions()[0] - Point3::new(2.5, 1.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn groups_split_over_the_cell_boundary_stay_compact() {
        let system = cubic_system(vec![
            Point3::new(9.9, 0.0, 0.0),
            Point3::new(0.1, 0.0, 0.0),
        ]);
        let mut comlist = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![0, 1],
                weights: vec![1.0, 1.0],
            }],
        )
        .unwrap();
        comlist.forward(&system);
        // The bead sits between the reference atom and the nearest image of
        // its partner, not in the middle of the box.
        assert!((comlist.positions()[0] - Point3::new(10.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn back_distributes_bead_gradient_by_weight() {
        let system = cubic_system(vec![
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(3.0, 1.0, 1.0),
        ]);
        let mut comlist = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![0, 1],
                weights: vec![1.0, 3.0],
            }],
        )
        .unwrap();
        comlist.forward(&system);
        comlist.gpos_mut()[0] = Vector3::new(1.0, 0.0, 0.0);
        let mut gpos = vec![Vector3::zeros(); 2];
        comlist.back(Some(&mut gpos));
        assert!((gpos[0] - Vector3::new(0.25, 0.0, 0.0)).norm() < 1e-12);
        assert!((gpos[1] - Vector3::new(0.75, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn empty_group_is_rejected() {
        let system = cubic_system(vec![Point3::origin()]);
        let result = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![],
                weights: vec![],
            }],
        );
        assert!(matches!(
            result,
            Err(BuildError::InvalidComGroup { index: 0, .. })
        ));
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let system = cubic_system(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        let result = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![0, 1],
                weights: vec![1.0],
            }],
        );
        assert!(matches!(result, Err(BuildError::InvalidComGroup { .. })));
    }

    #[test]
    fn out_of_bounds_member_is_rejected() {
        let system = cubic_system(vec![Point3::origin()]);
        let result = ComList::new(
            &system,
            vec![ComGroup {
                atoms: vec![0, 4],
                weights: vec![1.0, 1.0],
            }],
        );
        assert!(matches!(
            result,
            Err(BuildError::AtomIndexOutOfBounds { index: 4, natom: 1 })
        ));
    }

    #[test]
    fn center_of_mass_group_uses_the_system_masses() {
        let mut system = cubic_system(vec![Point3::origin(), Point3::new(2.0, 0.0, 0.0)]);
        system.set_masses(vec![1.0, 3.0]).unwrap();
        let group = ComGroup::center_of_mass(&system, vec![0, 1]).unwrap();
        assert_eq!(group.weights, vec![1.0, 3.0]);
        let system_without_masses = cubic_system(vec![Point3::origin()]);
        assert!(matches!(
            ComGroup::center_of_mass(&system_without_masses, vec![0]),
            Err(BuildError::MissingAtomData { .. })
        ));
    }
}
