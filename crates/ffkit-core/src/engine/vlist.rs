use super::dlist::DeltaList;
use super::error::BuildError;
use super::iclist::{InternalCoordinate, InternalCoordinateList};

/// The functional form of one covalent energy term, with its parameters
/// baked in at construction.
///
/// Periodic torsions come in two flavors: `Cosine` acts on a dihedral
/// angle, `Chebychev` expresses the same physics as a polynomial in the
/// dihedral cosine, which avoids the angle's arccos in the forward pass.
/// The `sign` of a Chebychev term selects which half of the cosine range
/// is the energy minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TermKind {
    /// `0.5 * fc * (q - rv)^2`
    Harmonic { fc: f64, rv: f64 },
    /// `c1*q + c2*q^2 + c3*q^3 + c4*q^4`
    PolyFour { coeffs: [f64; 4] },
    /// `depth * (exp(-2*width*(q - rv)) - 2*exp(-width*(q - rv)))`
    Morse { depth: f64, width: f64, rv: f64 },
    /// `0.5 * fc * (1 - cos(m*(q - phase)))` on a dihedral angle
    Cosine { multiplicity: i32, fc: f64, phase: f64 },
    /// `0.5 * fc * (1 + sign * T_m(q))` on a dihedral cosine
    Chebychev { multiplicity: i32, fc: f64, sign: f64 },
    /// `fc * (q0 - rv0) * (q1 - rv1)` coupling two internal coordinates
    Cross { fc: f64, rv0: f64, rv1: f64 },
}

impl TermKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Harmonic { .. } => "Harmonic",
            Self::PolyFour { .. } => "PolyFour",
            Self::Morse { .. } => "Morse",
            Self::Cosine { .. } => "Cosine",
            Self::Chebychev { .. } => "Chebychev",
            Self::Cross { .. } => "Cross",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Cross { .. } => 2,
            _ => 1,
        }
    }
}

/// A covalent energy term: a functional form over one or two internal
/// coordinates.
#[derive(Debug, Clone)]
pub struct ValenceTerm {
    pub(crate) kind: TermKind,
    pub(crate) ics: Vec<InternalCoordinate>,
}

impl ValenceTerm {
    pub fn new(kind: TermKind, ics: Vec<InternalCoordinate>) -> Result<Self, BuildError> {
        if ics.len() != kind.arity() {
            return Err(BuildError::TermArity {
                kind: kind.name(),
                expected: kind.arity(),
                actual: ics.len(),
            });
        }
        if let TermKind::Cosine { multiplicity, .. } | TermKind::Chebychev { multiplicity, .. } =
            kind
        {
            if ![1, 2, 3, 4, 6].contains(&multiplicity) {
                return Err(BuildError::UnsupportedMultiplicity(multiplicity));
            }
        }
        Ok(Self { kind, ics })
    }

    pub fn kind(&self) -> &TermKind {
        &self.kind
    }

    pub fn ics(&self) -> &[InternalCoordinate] {
        &self.ics
    }
}

#[derive(Debug, Clone)]
struct TermRow {
    kind: TermKind,
    ic0: usize,
    ic1: usize,
    energy: f64,
}

/// The third layer of the covalent evaluation pipeline: computes each
/// term's energy from the internal coordinate values, and each term's
/// derivative towards its coordinates, accumulated into the shared rows.
#[derive(Debug, Clone, Default)]
pub struct ValenceTermList {
    rows: Vec<TermRow>,
}

impl ValenceTermList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a term, wiring its internal coordinates through the lower
    /// pipeline layers. Registration is append-only. Returns the row index.
    pub fn add_term(
        &mut self,
        dlist: &mut DeltaList,
        iclist: &mut InternalCoordinateList,
        term: &ValenceTerm,
    ) -> usize {
        let ic0 = iclist.add_ic(dlist, term.ics[0]);
        let ic1 = if term.ics.len() > 1 {
            iclist.add_ic(dlist, term.ics[1])
        } else {
            usize::MAX
        };
        let row = self.rows.len();
        self.rows.push(TermRow {
            kind: term.kind,
            ic0,
            ic1,
            energy: f64::NAN,
        });
        row
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The energy of one term as of the last forward pass.
    pub fn term_energy(&self, row: usize) -> f64 {
        self.rows[row].energy
    }

    /// The internal coordinate rows one term reads.
    pub fn term_ic_rows(&self, row: usize) -> Vec<usize> {
        let term = &self.rows[row];
        if term.kind.arity() == 2 {
            vec![term.ic0, term.ic1]
        } else {
            vec![term.ic0]
        }
    }

    /// Sums all term energies from the current internal coordinate values.
    pub fn forward(&mut self, iclist: &InternalCoordinateList) -> f64 {
        let mut total = 0.0;
        for row in &mut self.rows {
            let q0 = iclist.value(row.ic0);
            row.energy = match row.kind {
                TermKind::Harmonic { fc, rv } => {
                    let x = q0 - rv;
                    0.5 * fc * x * x
                }
                TermKind::PolyFour { coeffs } => {
                    let [c1, c2, c3, c4] = coeffs;
                    q0 * (c1 + q0 * (c2 + q0 * (c3 + q0 * c4)))
                }
                TermKind::Morse { depth, width, rv } => {
                    let long = (-2.0 * width * (q0 - rv)).exp();
                    let short = (-width * (q0 - rv)).exp();
                    depth * (long - 2.0 * short)
                }
                TermKind::Cosine {
                    multiplicity,
                    fc,
                    phase,
                } => 0.5 * fc * (1.0 - (multiplicity as f64 * (q0 - phase)).cos()),
                TermKind::Chebychev {
                    multiplicity,
                    fc,
                    sign,
                } => 0.5 * fc * (1.0 + sign * chebychev(multiplicity, q0)),
                TermKind::Cross { fc, rv0, rv1 } => {
                    let q1 = iclist.value(row.ic1);
                    fc * (q0 - rv0) * (q1 - rv1)
                }
            };
            total += row.energy;
        }
        total
    }

    /// Accumulates each term's energy derivative into the internal
    /// coordinate rows it reads.
    pub fn back(&self, iclist: &mut InternalCoordinateList) {
        for row in &self.rows {
            let q0 = iclist.value(row.ic0);
            match row.kind {
                TermKind::Harmonic { fc, rv } => iclist.add_grad(row.ic0, fc * (q0 - rv)),
                TermKind::PolyFour { coeffs } => {
                    let [c1, c2, c3, c4] = coeffs;
                    iclist.add_grad(
                        row.ic0,
                        c1 + q0 * (2.0 * c2 + q0 * (3.0 * c3 + q0 * 4.0 * c4)),
                    );
                }
                TermKind::Morse { depth, width, rv } => {
                    let long = (-2.0 * width * (q0 - rv)).exp();
                    let short = (-width * (q0 - rv)).exp();
                    iclist.add_grad(row.ic0, 2.0 * depth * width * (short - long));
                }
                TermKind::Cosine {
                    multiplicity,
                    fc,
                    phase,
                } => {
                    let m = multiplicity as f64;
                    iclist.add_grad(row.ic0, 0.5 * fc * m * (m * (q0 - phase)).sin());
                }
                TermKind::Chebychev {
                    multiplicity,
                    fc,
                    sign,
                } => {
                    iclist.add_grad(row.ic0, 0.5 * fc * sign * chebychev_deriv(multiplicity, q0));
                }
                TermKind::Cross { fc, rv0, rv1 } => {
                    let q1 = iclist.value(row.ic1);
                    iclist.add_grad(row.ic0, fc * (q1 - rv1));
                    iclist.add_grad(row.ic1, fc * (q0 - rv0));
                }
            }
        }
    }
}

/// Chebyshev polynomial of the first kind, `T_m(c) = cos(m * acos(c))`,
/// for the supported torsion multiplicities.
fn chebychev(multiplicity: i32, c: f64) -> f64 {
    match multiplicity {
        1 => c,
        2 => 2.0 * c * c - 1.0,
        3 => c * (4.0 * c * c - 3.0),
        4 => {
            let c2 = c * c;
            c2 * (8.0 * c2 - 8.0) + 1.0
        }
        6 => {
            let c2 = c * c;
            c2 * (c2 * (32.0 * c2 - 48.0) + 18.0) - 1.0
        }
        _ => unreachable!("multiplicity validated at construction"),
    }
}

fn chebychev_deriv(multiplicity: i32, c: f64) -> f64 {
    match multiplicity {
        1 => 1.0,
        2 => 4.0 * c,
        3 => 12.0 * c * c - 3.0,
        4 => c * (32.0 * c * c - 16.0),
        6 => {
            let c2 = c * c;
            c * (c2 * (192.0 * c2 - 192.0) + 36.0)
        }
        _ => unreachable!("multiplicity validated at construction"),
    }
}
