use super::error::BuildError;
use crate::core::models::system::System;
use nalgebra::{Point3, Vector3};
use tracing::debug;

/// One atom pair within the cutoff: `delta` points from `i` to the
/// (possibly shifted) image of `j`, `shift` counts the lattice
/// translations applied on top of the minimum image.
#[derive(Debug, Clone, Copy)]
pub struct NeighborEntry {
    pub i: usize,
    pub j: usize,
    pub delta: Vector3<f64>,
    pub d: f64,
    pub shift: [i32; 3],
}

/// Enumerates atom pairs within `rcut + skin`, shared by all pairwise
/// force parts of one force field.
///
/// Each physical pair appears exactly once: the zero shift stores `i < j`
/// pairs under the minimum-image convention, non-zero shifts run over a
/// lexicographic half-space and include self-image pairs (`i == j`).
/// With a positive skin the stored pairs stay valid while no atom has
/// moved more than half the skin since the last rebuild; the list is then
/// only re-evaluated in place, which preserves correctness, not just
/// speed. The owning force field decides when `update` runs.
#[derive(Debug, Clone)]
pub struct NeighborList {
    rcut: f64,
    skin: f64,
    entries: Vec<NeighborEntry>,
    ref_pos: Vec<Point3<f64>>,
    built: bool,
}

impl NeighborList {
    pub fn new(skin: f64) -> Result<Self, BuildError> {
        if skin < 0.0 {
            return Err(BuildError::NegativeSkin(skin));
        }
        Ok(Self {
            rcut: 0.0,
            skin,
            entries: Vec::new(),
            ref_pos: Vec::new(),
            built: false,
        })
    }

    /// Grows the cutoff to cover a pair potential's range. The list is
    /// rebuilt on the next update.
    pub fn request_rcut(&mut self, rcut: f64) {
        if rcut > self.rcut {
            self.rcut = rcut;
            self.built = false;
        }
    }

    pub fn rcut(&self) -> f64 {
        self.rcut
    }

    pub fn skin(&self) -> f64 {
        self.skin
    }

    pub fn entries(&self) -> &[NeighborEntry] {
        &self.entries
    }

    /// Brings the list in sync with the current positions and cell:
    /// either a cheap in-place re-evaluation of the stored pairs, or a
    /// full rebuild when an atom crossed the skin margin.
    pub fn update(&mut self, system: &System) {
        if self.needs_rebuild(system) {
            self.rebuild(system);
        } else {
            self.reevaluate(system);
        }
    }

    fn needs_rebuild(&self, system: &System) -> bool {
        if !self.built || self.ref_pos.len() != system.natom() {
            return true;
        }
        let margin_sq = (0.5 * self.skin) * (0.5 * self.skin);
        system
            .pos()
            .iter()
            .zip(&self.ref_pos)
            .any(|(now, then)| (now - then).norm_squared() > margin_sq)
    }

    fn rebuild(&mut self, system: &System) {
        let cutoff = self.rcut + self.skin;
        let cutoff_sq = cutoff * cutoff;
        let cell = system.cell();
        let pos = system.pos();
        let natom = system.natom();
        self.entries.clear();

        // Zero shift: minimum-image pairs, each stored once.
        for i in 0..natom {
            for j in (i + 1)..natom {
                let mut delta = pos[j] - pos[i];
                cell.mic(&mut delta);
                let d_sq = delta.norm_squared();
                if d_sq <= cutoff_sq {
                    self.entries.push(NeighborEntry {
                        i,
                        j,
                        delta,
                        d: d_sq.sqrt(),
                        shift: [0, 0, 0],
                    });
                }
            }
        }

        // Non-zero shifts over a lexicographic half-space, so that every
        // periodic image pair appears exactly once.
        let nvec = cell.nvec();
        if nvec > 0 {
            let mut lmax = [0i32; 3];
            for (axis, spacing) in cell.gspacings().iter().enumerate() {
                lmax[axis] = (cutoff / spacing).ceil() as i32 + 1;
            }
            for l0 in -lmax[0]..=lmax[0] {
                for l1 in -lmax[1]..=lmax[1] {
                    for l2 in -lmax[2]..=lmax[2] {
                        let shift = [l0, l1, l2];
                        if !is_positive_half(shift) {
                            continue;
                        }
                        let shift_vec = shift_vector(cell.rvecs(), shift);
                        for i in 0..natom {
                            for j in 0..natom {
                                let mut delta = pos[j] - pos[i];
                                cell.mic(&mut delta);
                                let delta = delta + shift_vec;
                                let d_sq = delta.norm_squared();
                                if d_sq <= cutoff_sq {
                                    self.entries.push(NeighborEntry {
                                        i,
                                        j,
                                        delta,
                                        d: d_sq.sqrt(),
                                        shift,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        self.ref_pos = pos.to_vec();
        self.built = true;
        debug!(
            pairs = self.entries.len(),
            rcut = self.rcut,
            skin = self.skin,
            "rebuilt neighbor list"
        );
    }

    fn reevaluate(&mut self, system: &System) {
        let cell = system.cell();
        let pos = system.pos();
        for entry in &mut self.entries {
            let mut delta = pos[entry.j] - pos[entry.i];
            cell.mic(&mut delta);
            entry.delta = delta + shift_vector(cell.rvecs(), entry.shift);
            entry.d = entry.delta.norm();
        }
    }
}

fn is_positive_half(shift: [i32; 3]) -> bool {
    match shift {
        [0, 0, 0] => false,
        [0, 0, l2] => l2 > 0,
        [0, l1, _] => l1 > 0,
        [l0, _, _] => l0 > 0,
    }
}

fn shift_vector(rvecs: &[Vector3<f64>], shift: [i32; 3]) -> Vector3<f64> {
    let mut out = Vector3::zeros();
    for (rvec, &l) in rvecs.iter().zip(&shift) {
        out += rvec * l as f64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::cell::Cell;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn random_cubic_system(natom: usize, length: f64, seed: u64) -> System {
        let mut rng = StdRng::seed_from_u64(seed);
        let pos = (0..natom)
            .map(|_| {
                Point3::new(
                    rng.gen_range(0.0..length),
                    rng.gen_range(0.0..length),
                    rng.gen_range(0.0..length),
                )
            })
            .collect();
        let cell = Cell::new(&[
            Vector3::new(length, 0.0, 0.0),
            Vector3::new(0.0, length, 0.0),
            Vector3::new(0.0, 0.0, length),
        ])
        .unwrap();
        System::new(vec![18u8; natom], pos, cell).unwrap()
    }

    fn brute_force_pairs(system: &System, rcut: f64) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        for i in 0..system.natom() {
            for j in (i + 1)..system.natom() {
                let mut delta = system.pos()[j] - system.pos()[i];
                system.cell().mic(&mut delta);
                if delta.norm() <= rcut {
                    pairs.insert((i, j));
                }
            }
        }
        pairs
    }

    fn listed_pairs(nlist: &NeighborList, rcut: f64) -> BTreeSet<(usize, usize)> {
        nlist
            .entries()
            .iter()
            .filter(|entry| entry.shift == [0, 0, 0] && entry.d <= rcut)
            .map(|entry| (entry.i, entry.j))
            .collect()
    }

    #[test]
    fn negative_skin_is_rejected() {
        assert!(matches!(
            NeighborList::new(-0.1),
            Err(BuildError::NegativeSkin(_))
        ));
    }

    #[test]
    fn matches_brute_force_for_any_skin() {
        let rcut = 3.5;
        for (seed, skin) in [(7u64, 0.0), (8, 0.5), (9, 1.0)] {
            let system = random_cubic_system(20, 10.0, seed);
            let mut nlist = NeighborList::new(skin).unwrap();
            nlist.request_rcut(rcut);
            nlist.update(&system);
            let expected = brute_force_pairs(&system, rcut);
            let actual = listed_pairs(&nlist, rcut);
            assert!(
                actual.is_superset(&expected) && actual.is_subset(&expected),
                "skin {skin}: {} listed vs {} brute force",
                actual.len(),
                expected.len()
            );
        }
    }

    #[test]
    fn small_cell_includes_self_image_pairs() {
        let system = random_cubic_system(4, 3.0, 11);
        let mut nlist = NeighborList::new(0.0).unwrap();
        nlist.request_rcut(4.0);
        nlist.update(&system);
        assert!(
            nlist
                .entries()
                .iter()
                .any(|entry| entry.i == entry.j && entry.shift != [0, 0, 0])
        );
    }

    #[test]
    fn image_entries_are_unique() {
        let system = random_cubic_system(4, 3.0, 12);
        let mut nlist = NeighborList::new(0.0).unwrap();
        nlist.request_rcut(4.5);
        nlist.update(&system);
        let mut seen = BTreeSet::new();
        for entry in nlist.entries() {
            let key = (entry.i, entry.j, entry.shift);
            assert!(seen.insert(key), "duplicate entry {key:?}");
            // The mirrored key must not show up either.
            let mirror = (
                entry.j,
                entry.i,
                [-entry.shift[0], -entry.shift[1], -entry.shift[2]],
            );
            assert!(!seen.contains(&mirror), "mirrored entry {mirror:?}");
        }
    }

    #[test]
    fn aperiodic_system_lists_plain_pairs() {
        let pos = vec![
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(6.0, 0.0, 0.0),
        ];
        let system = System::new(vec![18u8; 3], pos, Cell::empty()).unwrap();
        let mut nlist = NeighborList::new(0.0).unwrap();
        nlist.request_rcut(2.0);
        nlist.update(&system);
        assert_eq!(nlist.entries().len(), 1);
        assert_eq!((nlist.entries()[0].i, nlist.entries()[0].j), (0, 1));
    }

    #[test]
    fn small_moves_reuse_the_stored_pairs_with_fresh_distances() {
        let mut system = random_cubic_system(10, 10.0, 13);
        let mut nlist = NeighborList::new(1.0).unwrap();
        nlist.request_rcut(3.0);
        nlist.update(&system);
        let before: Vec<_> = nlist
            .entries()
            .iter()
            .map(|entry| (entry.i, entry.j, entry.shift))
            .collect();
        // Move every atom well below the skin/2 margin.
        let moved: Vec<_> = system
            .pos()
            .iter()
            .map(|p| p + Vector3::new(0.05, -0.03, 0.02))
            .collect();
        system.set_pos(&moved).unwrap();
        nlist.update(&system);
        let after: Vec<_> = nlist
            .entries()
            .iter()
            .map(|entry| (entry.i, entry.j, entry.shift))
            .collect();
        assert_eq!(before, after);
        // Distances follow the new positions exactly.
        for entry in nlist.entries() {
            let mut delta = system.pos()[entry.j] - system.pos()[entry.i];
            system.cell().mic(&mut delta);
            let expected = delta + shift_vector(system.cell().rvecs(), entry.shift);
            assert!((entry.delta - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn growing_the_cutoff_forces_a_rebuild() {
        let system = random_cubic_system(10, 10.0, 14);
        let mut nlist = NeighborList::new(1.0).unwrap();
        nlist.request_rcut(2.0);
        nlist.update(&system);
        let small = nlist.entries().len();
        nlist.request_rcut(4.0);
        nlist.update(&system);
        assert!(nlist.entries().len() > small);
    }
}
