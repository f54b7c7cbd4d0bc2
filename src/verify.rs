//! Verification of candidate Equihash solutions.

use std::fmt;
use std::mem::size_of;

use blake2b_simd::State as Blake2bState;
use tracing::debug;

use crate::params::Params;
use crate::row::{distinct_indices, has_collision, FullStepRow, StepRow};

/// An Equihash solution failed to verify.
#[derive(Debug)]
pub struct Error(pub(crate) Kind);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid solution: {}", self.0)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    SolutionSize,
    Collision,
    OutOfOrder,
    DuplicateIdxs,
    NonZeroRootHash,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::SolutionSize => f.write_str("incorrect solution size"),
            Kind::Collision => f.write_str("invalid collision length between StepRows"),
            Kind::OutOfOrder => f.write_str("Index tree incorrectly ordered"),
            Kind::DuplicateIdxs => f.write_str("duplicate indices"),
            Kind::NonZeroRootHash => f.write_str("root hash of tree is non-zero"),
        }
    }
}

fn validate_subtrees(
    p: &Params,
    a: &FullStepRow,
    b: &FullStepRow,
    hash_len: usize,
    len_indices: usize,
) -> Result<(), Kind> {
    if !has_collision(a, b, p.collision_byte_length()) {
        Err(Kind::Collision)
    } else if b.indices_before(a, hash_len, len_indices) {
        Err(Kind::OutOfOrder)
    } else if !distinct_indices(a, b, hash_len, len_indices) {
        Err(Kind::DuplicateIdxs)
    } else {
        Ok(())
    }
}

/// Checks whether `indices` is a valid solution under the seeded state,
/// mirroring the solvers' reduction: each adjacent pair must collide on the
/// next collision block, be canonically ordered, and share no index; the
/// surviving root row must XOR to zero.
pub fn validate_solution(
    p: Params,
    base_state: &Blake2bState,
    indices: &[u32],
) -> Result<(), Error> {
    if indices.len() != p.solution_size() {
        return Err(Error(Kind::SolutionSize));
    }

    let mut x: Vec<FullStepRow> = indices
        .iter()
        .map(|&i| FullStepRow::new(&p, base_state, i))
        .collect();

    let mut hash_len = p.hash_length();
    let mut len_indices = size_of::<u32>();
    while x.len() > 1 {
        let mut xc = Vec::with_capacity(x.len() / 2);
        for pair in x.chunks_exact(2) {
            let (a, b) = (&pair[0], &pair[1]);
            validate_subtrees(&p, a, b, hash_len, len_indices).map_err(Error)?;
            xc.push(FullStepRow::from_children(
                a,
                b,
                hash_len,
                len_indices,
                p.collision_byte_length(),
            ));
        }
        x = xc;
        hash_len -= p.collision_byte_length();
        len_indices *= 2;
    }

    if x[0].is_zero(hash_len) {
        Ok(())
    } else {
        Err(Error(Kind::NonZeroRootHash))
    }
}

/// Boolean form of [`validate_solution`]: logs the failure reason and
/// returns `false` instead of surfacing an error.
pub fn is_valid_solution(p: Params, base_state: &Blake2bState, indices: &[u32]) -> bool {
    match validate_solution(p, base_state, indices) {
        Ok(()) => true,
        Err(e) => {
            debug!("{}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use blake2b_simd::State as Blake2bState;

    use super::{is_valid_solution, validate_solution, Kind};
    use crate::params::Params;
    use crate::solve::basic_solve;
    use crate::state::initialise_state;

    /// Solves over successive single-byte nonces until a solution appears.
    fn first_solution(p: Params) -> (Blake2bState, Vec<u32>) {
        for nonce in 0..16 {
            let mut state = initialise_state(p);
            let mut n = [0u8; 32];
            n[0] = nonce;
            state.update(&n);
            let solns = basic_solve(p, &state, |_| false).unwrap();
            if let Some(soln) = solns.into_iter().next() {
                return (state, soln);
            }
        }
        panic!("no solution found in sixteen nonces");
    }

    #[test]
    fn accepts_solver_output() {
        let p = Params::new(48, 5).unwrap();
        let (state, soln) = first_solution(p);
        assert!(validate_solution(p, &state, &soln).is_ok());
        assert!(is_valid_solution(p, &state, &soln));
    }

    #[test]
    fn rejects_wrong_solution_size() {
        let p = Params::new(48, 5).unwrap();
        let (state, soln) = first_solution(p);
        assert_eq!(
            validate_solution(p, &state, &soln[..soln.len() - 1])
                .unwrap_err()
                .0,
            Kind::SolutionSize,
        );
        assert_eq!(
            validate_solution(p, &state, &[]).unwrap_err().0,
            Kind::SolutionSize,
        );
    }

    #[test]
    fn rejects_sibling_swap() {
        let p = Params::new(48, 5).unwrap();
        let (state, soln) = first_solution(p);
        let mut swapped = soln;
        swapped.swap(0, 1);
        assert_eq!(
            validate_solution(p, &state, &swapped).unwrap_err().0,
            Kind::OutOfOrder,
        );
    }

    #[test]
    fn rejects_duplicated_index() {
        let p = Params::new(48, 5).unwrap();
        let (state, soln) = first_solution(p);
        let mut duped = soln;
        duped[1] = duped[0];
        assert_eq!(
            validate_solution(p, &state, &duped).unwrap_err().0,
            Kind::DuplicateIdxs,
        );
    }

    #[test]
    fn rejects_other_perturbations() {
        let p = Params::new(48, 5).unwrap();
        let (state, soln) = first_solution(p);

        // Swapping non-sibling indices breaks a collision or the ordering.
        let mut crossed = soln.clone();
        crossed.swap(0, 2);
        assert!(!is_valid_solution(p, &state, &crossed));

        // So does rewriting any index's low bits.
        let mut flipped = soln.clone();
        flipped[0] ^= 0xff;
        assert!(!is_valid_solution(p, &state, &flipped));

        // The unperturbed solution still verifies.
        assert!(is_valid_solution(p, &state, &soln));
    }
}
