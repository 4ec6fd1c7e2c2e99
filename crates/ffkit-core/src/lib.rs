//! # ffkit Core Library
//!
//! A composable evaluator for classical molecular-mechanics force fields:
//! given atomic positions and a periodic cell, it computes a potential
//! energy together with its analytic gradient and virial (stress) tensor by
//! summing independently pluggable interaction terms.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to keep
//! the numerical machinery modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`System`, `Cell`,
//!   scaling tables, standard masses) and pure mathematical kernels.
//!
//! - **[`engine`]: The Logic Core.** The stateful evaluation machinery: the
//!   neighbor list, the three-layer covalent pipeline (relative-vector
//!   list → internal-coordinate list → valence-term list) with its manual
//!   reverse-mode differentiation scheme, pairwise potentials, the Ewald
//!   electrostatics split, and the force-part composition that sums all
//!   contributions through one `ForceField`.
//!
//! - **[`sampling`]: Enhanced-Sampling Support.** Collective variables and
//!   bias potentials that reuse the engine's differentiation machinery to
//!   deliver restraint energies and their chain-ruled derivatives.

pub mod core;
pub mod engine;
pub mod sampling;

#[cfg(test)]
pub(crate) mod testing;
