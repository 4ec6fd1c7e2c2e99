use crate::core::models::cell::CellError;
use crate::core::scaling::ScalingError;
use thiserror::Error;

/// Configuration errors raised while assembling a force field. These are
/// never retried: an incompatible request has to be fixed by the caller.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("`{part}` requires a {expected}D periodic cell, the system has {actual} cell vector(s)")]
    WrongPeriodicity {
        part: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("`{part}` requires the system to define {field}")]
    MissingAtomData {
        part: &'static str,
        field: &'static str,
    },
    #[error("`{0}` requires a periodic cell")]
    Aperiodic(&'static str),
    #[error("a force part with key `{0}` is already present in the force field")]
    DuplicatePart(String),
    #[error("force part `{0}` needs a neighbor list, but the force field has none")]
    MissingNeighborList(String),
    #[error("tail corrections diverge for the `{0}` pair potential")]
    DivergentTailCorrection(&'static str),
    #[error("tail corrections require an untruncated pair potential")]
    TruncatedTailCorrection,
    #[error("atom index {index} is out of bounds for a system of {natom} atoms")]
    AtomIndexOutOfBounds { index: usize, natom: usize },
    #[error("expected {expected} entries for `{field}`, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("a `{kind}` term couples {expected} internal coordinate(s), got {actual}")]
    TermArity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported torsion multiplicity {0}, expected one of 1, 2, 3, 4, 6")]
    UnsupportedMultiplicity(i32),
    #[error("the neighbor list skin must be non-negative, got {0}")]
    NegativeSkin(f64),
    #[error("center-of-mass group {index} is invalid: {reason}")]
    InvalidComGroup { index: usize, reason: &'static str },
    #[error("no energy grid was provided for atom type `{0}`")]
    MissingGrid(String),
    #[error("{0}")]
    InvalidPath(&'static str),
    #[error(transparent)]
    Scaling(#[from] ScalingError),
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Fatal numeric or capability errors raised while evaluating energies.
/// A non-finite result is surfaced immediately instead of being clamped:
/// it signals a degenerate geometry or a programming defect.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("force part `{0}` produced a non-finite energy")]
    NonFiniteEnergy(String),
    #[error("force part `{0}` produced a non-finite gradient element")]
    NonFiniteGradient(String),
    #[error("force part `{0}` produced a non-finite virial element")]
    NonFiniteVirial(String),
    #[error("{0}")]
    Unsupported(&'static str),
}
