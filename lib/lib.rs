//! Infinite density matrix renormalization group (iDMRG) for spin-1 chains,
//! built on a small labeled-tensor engine.
//!
//! The pieces, leaf first:
//! - [`tensor`]: dense `f64` tensors whose legs are tagged, primed index
//!   values; contraction over common legs and truncated SVD.
//! - [`sites`]: spin-1 local spaces with named states and operators.
//! - [`mpo`]: the Heisenberg Hamiltonian as a matrix product operator.
//! - [`mps`]: finite matrix product states in mixed-canonical form and
//!   product-state initialization.
//! - [`sweeps`]: per-sweep bond dimension, cutoff and solver budgets.
//! - [`lanczos`]: the local ground-state eigensolver.
//! - [`idmrg`]: two-site (i)DMRG sweeps and window growth.
//! - [`correlation`]: the converged unit cell and lazy two-point functions.

pub mod tensor;
pub mod sites;
pub mod mpo;
pub mod mps;
pub mod sweeps;
pub mod lanczos;
pub mod idmrg;
pub mod correlation;
