use crate::core::models::cell::Cell;
use nalgebra::{Matrix3, Point3, Vector3};
use std::collections::HashMap;

/// One registered relative vector: the minimum-image displacement from
/// atom (or bead) `i` to `j`, plus the accumulator for the derivative of
/// the energy towards that displacement.
#[derive(Debug, Clone)]
pub struct Delta {
    pub i: usize,
    pub j: usize,
    pub d: Vector3<f64>,
    pub grad: Vector3<f64>,
}

/// The first layer of the covalent evaluation pipeline.
///
/// The delta list is the single place where Cartesian coordinates enter
/// the pipeline and where derivatives leave it again. The forward pass
/// recomputes every registered relative vector under the minimum-image
/// convention; the backward pass folds the accumulated per-vector
/// derivatives into per-atom gradients and the virial tensor.
#[derive(Debug, Clone, Default)]
pub struct DeltaList {
    deltas: Vec<Delta>,
    lookup: HashMap<(usize, usize), usize>,
}

impl DeltaList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the relative vector from `i` to `j` and returns its slot
    /// together with a sign. Both orientations of one physical pair share
    /// a slot: the second consumer receives sign −1 and must flip the
    /// vector and its derivative accordingly.
    pub fn register(&mut self, i: usize, j: usize) -> (usize, f64) {
        if let Some(&index) = self.lookup.get(&(i, j)) {
            return (index, 1.0);
        }
        if let Some(&index) = self.lookup.get(&(j, i)) {
            return (index, -1.0);
        }
        let index = self.deltas.len();
        self.deltas.push(Delta {
            i,
            j,
            d: Vector3::zeros(),
            grad: Vector3::zeros(),
        });
        self.lookup.insert((i, j), index);
        (index, 1.0)
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn delta(&self, index: usize) -> &Delta {
        &self.deltas[index]
    }

    /// Recomputes all relative vectors from the given positions and cell,
    /// and resets the derivative accumulators.
    pub fn forward(&mut self, pos: &[Point3<f64>], cell: &Cell) {
        for delta in &mut self.deltas {
            let mut d = pos[delta.j] - pos[delta.i];
            cell.mic(&mut d);
            delta.d = d;
            delta.grad = Vector3::zeros();
        }
    }

    /// Adds a contribution to the derivative accumulator of one slot.
    pub fn add_grad(&mut self, index: usize, grad: Vector3<f64>) {
        self.deltas[index].grad += grad;
    }

    /// Folds the accumulated derivatives into the per-atom gradient and
    /// the virial tensor, both additively.
    pub fn back(&self, mut gpos: Option<&mut [Vector3<f64>]>, mut vtens: Option<&mut Matrix3<f64>>) {
        for delta in &self.deltas {
            if let Some(gpos) = gpos.as_deref_mut() {
                gpos[delta.i] -= delta.grad;
                gpos[delta.j] += delta.grad;
            }
            if let Some(vtens) = vtens.as_deref_mut() {
                *vtens += delta.d * delta.grad.transpose();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_shares_slots_between_orientations() {
        let mut dlist = DeltaList::new();
        let (slot_a, sign_a) = dlist.register(0, 1);
        let (slot_b, sign_b) = dlist.register(1, 0);
        let (slot_c, sign_c) = dlist.register(0, 1);
        assert_eq!(slot_a, slot_b);
        assert_eq!(slot_a, slot_c);
        assert_eq!(sign_a, 1.0);
        assert_eq!(sign_b, -1.0);
        assert_eq!(sign_c, 1.0);
        assert_eq!(dlist.len(), 1);
    }

    #[test]
    fn forward_applies_minimum_image_convention() {
        let cell = Cell::new(&[
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
        ])
        .unwrap();
        let pos = vec![Point3::new(0.5, 0.0, 0.0), Point3::new(9.5, 0.0, 0.0)];
        let mut dlist = DeltaList::new();
        dlist.register(0, 1);
        dlist.forward(&pos, &cell);
        assert!((dlist.delta(0).d - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn forward_resets_gradient_accumulators() {
        let pos = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let mut dlist = DeltaList::new();
        dlist.register(0, 1);
        dlist.add_grad(0, Vector3::new(3.0, 0.0, 0.0));
        dlist.forward(&pos, &Cell::empty());
        assert_eq!(dlist.delta(0).grad, Vector3::zeros());
    }

    #[test]
    fn back_distributes_gradients_with_opposite_signs() {
        let pos = vec![Point3::origin(), Point3::new(1.0, 2.0, 2.0)];
        let mut dlist = DeltaList::new();
        dlist.register(0, 1);
        dlist.forward(&pos, &Cell::empty());
        let g = Vector3::new(0.5, -1.0, 2.0);
        dlist.add_grad(0, g);
        let mut gpos = vec![Vector3::zeros(); 2];
        dlist.back(Some(&mut gpos), None);
        assert!((gpos[0] + g).norm() < 1e-12);
        assert!((gpos[1] - g).norm() < 1e-12);
    }

    #[test]
    fn back_accumulates_outer_product_virial() {
        let pos = vec![Point3::origin(), Point3::new(1.0, 2.0, 2.0)];
        let mut dlist = DeltaList::new();
        dlist.register(0, 1);
        dlist.forward(&pos, &Cell::empty());
        let g = Vector3::new(0.5, -1.0, 2.0);
        dlist.add_grad(0, g);
        let mut vtens = Matrix3::zeros();
        dlist.back(None, Some(&mut vtens));
        let d = Vector3::new(1.0, 2.0, 2.0);
        assert!((vtens - d * g.transpose()).norm() < 1e-12);
    }

    #[test]
    fn back_adds_into_prefilled_buffers() {
        let pos = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let mut dlist = DeltaList::new();
        dlist.register(0, 1);
        dlist.forward(&pos, &Cell::empty());
        dlist.add_grad(0, Vector3::new(1.0, 0.0, 0.0));
        let mut gpos = vec![Vector3::new(10.0, 0.0, 0.0); 2];
        dlist.back(Some(&mut gpos), None);
        assert!((gpos[0] - Vector3::new(9.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((gpos[1] - Vector3::new(11.0, 0.0, 0.0)).norm() < 1e-12);
    }
}
