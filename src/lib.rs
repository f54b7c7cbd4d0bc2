//! The Equihash Proof-of-Work function.
//!
//! Equihash is an asymmetric memory-hard proof-of-work based on the
//! Generalised Birthday Problem: find `2^k` distinct 32-bit indices whose
//! `n`-bit BLAKE2b outputs XOR to zero under a prescribed collision tree.
//! This crate provides two CPU solvers (a straightforward Wagner-style
//! solver and a memory-reduced two-phase solver) and a verifier.
//!
//! Callers seed a hash state with [`initialise_state`], append whatever
//! input and nonce bytes define the mining attempt, and hand the state to a
//! solver. Nonce iteration and block encoding are the caller's business.

mod params;
mod row;
mod solve;
mod state;
mod verify;

pub use params::Params;
pub use solve::{basic_solve, optimised_solve, SolverCancelCheck, SolverCancelled};
pub use state::initialise_state;
pub use verify::{is_valid_solution, validate_solution, Error};
