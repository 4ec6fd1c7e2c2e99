use super::dlist::DeltaList;
use nalgebra::Vector3;
use std::collections::HashMap;

/// Norms below this threshold mark a geometrically degenerate internal
/// coordinate; derivatives are zeroed instead of dividing by them.
const DEGENERATE_NORM_SQ: f64 = 1e-24;

/// A scalar geometric function of two to four atom (or bead) positions.
///
/// Angle-like coordinates take the central atom in the middle:
/// `BendAngle(i, j, k)` is the angle at `j`, `DihedAngle(i, j, k, l)` the
/// signed torsion around the `j`-`k` axis, and `OopDist(i, j, k, l)` the
/// signed distance of `l` from the plane through `i`, `j`, `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalCoordinate {
    Bond(usize, usize),
    BendCos(usize, usize, usize),
    BendAngle(usize, usize, usize),
    UreyBradley(usize, usize, usize),
    DihedCos(usize, usize, usize, usize),
    DihedAngle(usize, usize, usize, usize),
    OopDist(usize, usize, usize, usize),
}

impl InternalCoordinate {
    /// The atom indices this coordinate depends on.
    pub fn atoms(&self) -> Vec<usize> {
        match *self {
            Self::Bond(i, j) => vec![i, j],
            Self::BendCos(i, j, k) | Self::BendAngle(i, j, k) | Self::UreyBradley(i, j, k) => {
                vec![i, j, k]
            }
            Self::DihedCos(i, j, k, l)
            | Self::DihedAngle(i, j, k, l)
            | Self::OopDist(i, j, k, l) => vec![i, j, k, l],
        }
    }

    /// A normalized key so that equivalent orientations of one physical
    /// coordinate share a table row.
    fn canonical(&self) -> Self {
        match *self {
            Self::Bond(i, j) => Self::Bond(i.min(j), i.max(j)),
            Self::BendCos(i, j, k) => Self::BendCos(i.min(k), j, i.max(k)),
            Self::BendAngle(i, j, k) => Self::BendAngle(i.min(k), j, i.max(k)),
            Self::UreyBradley(i, j, k) => Self::UreyBradley(i.min(k), j, i.max(k)),
            Self::DihedCos(i, j, k, l) => {
                if (l, k, j, i) < (i, j, k, l) {
                    Self::DihedCos(l, k, j, i)
                } else {
                    *self
                }
            }
            Self::DihedAngle(i, j, k, l) => {
                if (l, k, j, i) < (i, j, k, l) {
                    Self::DihedAngle(l, k, j, i)
                } else {
                    *self
                }
            }
            // Cyclic permutations of the plane atoms leave the signed
            // distance unchanged.
            Self::OopDist(i, j, k, l) => {
                let mut best = (i, j, k);
                for candidate in [(j, k, i), (k, i, j)] {
                    if candidate < best {
                        best = candidate;
                    }
                }
                Self::OopDist(best.0, best.1, best.2, l)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    sign: f64,
}

#[derive(Debug, Clone)]
struct IcRow {
    ic: InternalCoordinate,
    slots: [Slot; 3],
    nslot: usize,
    value: f64,
    grad: f64,
}

/// The second layer of the covalent evaluation pipeline.
///
/// The forward pass computes every registered internal coordinate from the
/// relative vectors; the backward pass converts the accumulated per-row
/// energy derivatives into per-vector derivatives and hands them to the
/// delta list. Rows are deduplicated so that valence terms sharing one
/// coordinate also share its row and its derivative accumulator.
#[derive(Debug, Clone, Default)]
pub struct InternalCoordinateList {
    rows: Vec<IcRow>,
    lookup: HashMap<InternalCoordinate, usize>,
}

impl InternalCoordinateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an internal coordinate, reusing an existing row when the
    /// same physical coordinate was added before. Returns the row index.
    pub fn add_ic(&mut self, dlist: &mut DeltaList, ic: InternalCoordinate) -> usize {
        let key = ic.canonical();
        if let Some(&row) = self.lookup.get(&key) {
            return row;
        }
        let dummy = Slot {
            index: usize::MAX,
            sign: 0.0,
        };
        let (slots, nslot) = match key {
            InternalCoordinate::Bond(i, j) => {
                let (s0, g0) = dlist.register(i, j);
                (
                    [
                        Slot { index: s0, sign: g0 },
                        dummy,
                        dummy,
                    ],
                    1,
                )
            }
            InternalCoordinate::BendCos(i, j, k) | InternalCoordinate::BendAngle(i, j, k) => {
                let (s0, g0) = dlist.register(j, i);
                let (s1, g1) = dlist.register(j, k);
                (
                    [
                        Slot { index: s0, sign: g0 },
                        Slot { index: s1, sign: g1 },
                        dummy,
                    ],
                    2,
                )
            }
            InternalCoordinate::UreyBradley(i, j, k) => {
                let (s0, g0) = dlist.register(i, j);
                let (s1, g1) = dlist.register(j, k);
                (
                    [
                        Slot { index: s0, sign: g0 },
                        Slot { index: s1, sign: g1 },
                        dummy,
                    ],
                    2,
                )
            }
            InternalCoordinate::DihedCos(i, j, k, l)
            | InternalCoordinate::DihedAngle(i, j, k, l) => {
                let (s0, g0) = dlist.register(i, j);
                let (s1, g1) = dlist.register(j, k);
                let (s2, g2) = dlist.register(k, l);
                (
                    [
                        Slot { index: s0, sign: g0 },
                        Slot { index: s1, sign: g1 },
                        Slot { index: s2, sign: g2 },
                    ],
                    3,
                )
            }
            InternalCoordinate::OopDist(i, j, k, l) => {
                let (s0, g0) = dlist.register(l, i);
                let (s1, g1) = dlist.register(l, j);
                let (s2, g2) = dlist.register(l, k);
                (
                    [
                        Slot { index: s0, sign: g0 },
                        Slot { index: s1, sign: g1 },
                        Slot { index: s2, sign: g2 },
                    ],
                    3,
                )
            }
        };
        let row = self.rows.len();
        self.rows.push(IcRow {
            ic: key,
            slots,
            nslot,
            value: f64::NAN,
            grad: 0.0,
        });
        self.lookup.insert(key, row);
        row
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize) -> f64 {
        self.rows[row].value
    }

    /// Adds a contribution to the energy derivative accumulator of a row.
    /// Several valence terms may target the same row; contributions add up
    /// and are consumed by the next backward pass.
    pub fn add_grad(&mut self, row: usize, grad: f64) {
        self.rows[row].grad += grad;
    }

    /// Computes all internal coordinate values from the current relative
    /// vectors and resets the derivative accumulators.
    pub fn forward(&mut self, dlist: &DeltaList) {
        for row in &mut self.rows {
            let v = gather(row, dlist);
            row.value = match row.ic {
                InternalCoordinate::Bond(..) => v[0].norm(),
                InternalCoordinate::BendCos(..) => bend_cos(&v[0], &v[1]),
                InternalCoordinate::BendAngle(..) => bend_cos(&v[0], &v[1]).clamp(-1.0, 1.0).acos(),
                InternalCoordinate::UreyBradley(..) => (v[0] + v[1]).norm(),
                InternalCoordinate::DihedCos(..) => dihed_cos(&v[0], &v[1], &v[2]),
                InternalCoordinate::DihedAngle(..) => dihed_angle(&v[0], &v[1], &v[2]),
                InternalCoordinate::OopDist(..) => oop_dist(&v[0], &v[1], &v[2]),
            };
            row.grad = 0.0;
        }
    }

    /// Converts the accumulated per-coordinate derivatives into relative
    /// vector derivatives, added into the delta list.
    pub fn back(&self, dlist: &mut DeltaList) {
        for row in &self.rows {
            let v = gather(row, dlist);
            let derivs: [Vector3<f64>; 3] = match row.ic {
                InternalCoordinate::Bond(..) => {
                    [v[0] / v[0].norm(), Vector3::zeros(), Vector3::zeros()]
                }
                InternalCoordinate::BendCos(..) => {
                    let (d0, d1) = bend_cos_back(&v[0], &v[1]);
                    [d0, d1, Vector3::zeros()]
                }
                InternalCoordinate::BendAngle(..) => {
                    let c = bend_cos(&v[0], &v[1]).clamp(-1.0, 1.0);
                    let s_sq = 1.0 - c * c;
                    let factor = if s_sq < DEGENERATE_NORM_SQ {
                        0.0
                    } else {
                        -1.0 / s_sq.sqrt()
                    };
                    let (d0, d1) = bend_cos_back(&v[0], &v[1]);
                    [d0 * factor, d1 * factor, Vector3::zeros()]
                }
                InternalCoordinate::UreyBradley(..) => {
                    let r = v[0] + v[1];
                    let unit = r / r.norm();
                    [unit, unit, Vector3::zeros()]
                }
                InternalCoordinate::DihedCos(..) => dihed_cos_back(&v[0], &v[1], &v[2]),
                InternalCoordinate::DihedAngle(..) => dihed_angle_back(&v[0], &v[1], &v[2]),
                InternalCoordinate::OopDist(..) => oop_dist_back(&v[0], &v[1], &v[2]),
            };
            for (slot, deriv) in row.slots.iter().zip(derivs).take(row.nslot) {
                dlist.add_grad(slot.index, deriv * (slot.sign * row.grad));
            }
        }
    }
}

fn gather(row: &IcRow, dlist: &DeltaList) -> [Vector3<f64>; 3] {
    let mut v = [Vector3::zeros(); 3];
    for (slot, out) in row.slots.iter().zip(v.iter_mut()).take(row.nslot) {
        *out = dlist.delta(slot.index).d * slot.sign;
    }
    v
}

fn bend_cos(v0: &Vector3<f64>, v1: &Vector3<f64>) -> f64 {
    v0.dot(v1) / (v0.norm() * v1.norm())
}

fn bend_cos_back(v0: &Vector3<f64>, v1: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let n0 = v0.norm();
    let n1 = v1.norm();
    let c = v0.dot(v1) / (n0 * n1);
    (
        v1 / (n0 * n1) - v0 * (c / (n0 * n0)),
        v0 / (n0 * n1) - v1 * (c / (n1 * n1)),
    )
}

/// Projects the outer bond vectors onto the plane perpendicular to the
/// central bond. Returns (t, u, e) with e the unit central bond vector.
fn dihed_frame(
    b1: &Vector3<f64>,
    b2: &Vector3<f64>,
    b3: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
    let e = b2 / b2.norm();
    let p = -b1;
    let t = p - e * p.dot(&e);
    let u = b3 - e * b3.dot(&e);
    (t, u, e)
}

fn dihed_cos(b1: &Vector3<f64>, b2: &Vector3<f64>, b3: &Vector3<f64>) -> f64 {
    let (t, u, _) = dihed_frame(b1, b2, b3);
    let tt = t.norm_squared();
    let uu = u.norm_squared();
    if tt < DEGENERATE_NORM_SQ || uu < DEGENERATE_NORM_SQ {
        return 0.0;
    }
    (t.dot(&u) / (tt * uu).sqrt()).clamp(-1.0, 1.0)
}

fn dihed_cos_back(b1: &Vector3<f64>, b2: &Vector3<f64>, b3: &Vector3<f64>) -> [Vector3<f64>; 3] {
    let (t, u, e) = dihed_frame(b1, b2, b3);
    let tt = t.norm_squared();
    let uu = u.norm_squared();
    if tt < DEGENERATE_NORM_SQ || uu < DEGENERATE_NORM_SQ {
        return [Vector3::zeros(); 3];
    }
    let nt = tt.sqrt();
    let nu = uu.sqrt();
    let c = t.dot(&u) / (nt * nu);
    let gt = u / (nt * nu) - t * (c / tt);
    let gu = t / (nt * nu) - u * (c / uu);
    let p = -b1;
    let db2 = -(gt * p.dot(&e) + gu * b3.dot(&e)) / b2.norm();
    [-gt, db2, gu]
}

fn dihed_angle(b1: &Vector3<f64>, b2: &Vector3<f64>, b3: &Vector3<f64>) -> f64 {
    let (t, u, e) = dihed_frame(b1, b2, b3);
    if t.norm_squared() < DEGENERATE_NORM_SQ || u.norm_squared() < DEGENERATE_NORM_SQ {
        return 0.0;
    }
    t.cross(&u).dot(&e).atan2(t.dot(&u))
}

fn dihed_angle_back(b1: &Vector3<f64>, b2: &Vector3<f64>, b3: &Vector3<f64>) -> [Vector3<f64>; 3] {
    let n1 = b1.cross(b2);
    let n2 = b2.cross(b3);
    let n1_sq = n1.norm_squared();
    let n2_sq = n2.norm_squared();
    if n1_sq < DEGENERATE_NORM_SQ || n2_sq < DEGENERATE_NORM_SQ {
        return [Vector3::zeros(); 3];
    }
    let nb2 = b2.norm();
    let db1 = n1 * (nb2 / n1_sq);
    let db3 = n2 * (nb2 / n2_sq);
    let db2 = n2 * (b3.dot(b2) / (nb2 * n2_sq)) + n1 * (b1.dot(b2) / (nb2 * n1_sq));
    [db1, db2, db3]
}

fn oop_dist(v0: &Vector3<f64>, v1: &Vector3<f64>, v2: &Vector3<f64>) -> f64 {
    let n = v1.cross(v2) + v0.cross(v1) + v2.cross(v0);
    let n_sq = n.norm_squared();
    if n_sq < DEGENERATE_NORM_SQ {
        return 0.0;
    }
    v0.dot(&n) / n_sq.sqrt()
}

fn oop_dist_back(v0: &Vector3<f64>, v1: &Vector3<f64>, v2: &Vector3<f64>) -> [Vector3<f64>; 3] {
    let n = v1.cross(v2) + v0.cross(v1) + v2.cross(v0);
    let n_sq = n.norm_squared();
    if n_sq < DEGENERATE_NORM_SQ {
        return [Vector3::zeros(); 3];
    }
    let norm = n_sq.sqrt();
    let u = v0 / norm - n * (v0.dot(&n) / (n_sq * norm));
    [
        n / norm + v1.cross(&u) + u.cross(v2),
        v2.cross(&u) + u.cross(v0),
        u.cross(v1) + v0.cross(&u),
    ]
}
