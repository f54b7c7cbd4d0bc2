//! Wagner-style solvers for the Equihash Proof-of-Work function.
//!
//! Both solvers run `k - 1` collision rounds over a sorted list followed by
//! a final collision on the remaining two blocks. [`basic_solve`] carries
//! full 4-byte indices throughout. [`optimised_solve`] first runs the same
//! search with 1-byte truncated trails, then recreates the full indices of
//! each surviving partial solution by re-solving the tiny per-position
//! candidate lists the truncated bytes admit.

use std::collections::BTreeSet;
use std::fmt;
use std::mem::size_of;

use blake2b_simd::State as Blake2bState;
use tracing::debug;

use crate::params::Params;
use crate::row::{
    compare_step_rows, distinct_indices, has_collision, is_probably_duplicate, untruncate_index,
    FullStepRow, StepRow, TruncatedStepRow,
};

/// The checkpoints at which the solvers consult the caller's cancellation
/// probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverCancelCheck {
    ListGeneration,
    ListSorting,
    ListColliding,
    RoundEnd,
    FinalSorting,
    FinalColliding,
    PartialGeneration,
    PartialSorting,
    PartialSubtreeEnd,
    PartialIndexEnd,
    PartialEnd,
}

/// The cancellation probe asked the solver to stop.
#[derive(Debug, PartialEq, Eq)]
pub struct SolverCancelled;

impl fmt::Display for SolverCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Equihash solver was cancelled")
    }
}

impl std::error::Error for SolverCancelled {}

fn probe<C>(cancelled: &mut C, checkpoint: SolverCancelCheck) -> Result<(), SolverCancelled>
where
    C: FnMut(SolverCancelCheck) -> bool,
{
    if cancelled(checkpoint) {
        Err(SolverCancelled)
    } else {
        Ok(())
    }
}

/// Moves merged rows from `xc` into the vacated prefix of `x`, up to
/// `limit`. Returns the next free slot.
fn store_in_place<R>(x: &mut [R], xc: &mut Vec<R>, mut pos_free: usize, limit: usize) -> usize {
    while pos_free < limit {
        match xc.pop() {
            Some(row) => {
                x[pos_free] = row;
                pos_free += 1;
            }
            None => break,
        }
    }
    pos_free
}

/// Ends a collision pass: spills whatever merges did not fit in the vacated
/// prefix, or drops the unused tail.
fn finish_compaction<R>(x: &mut Vec<R>, mut xc: Vec<R>, pos_free: usize) {
    let limit = x.len();
    let pos_free = store_in_place(x, &mut xc, pos_free, limit);
    if !xc.is_empty() {
        x.append(&mut xc);
    } else if pos_free < x.len() {
        x.truncate(pos_free);
        x.shrink_to_fit();
    }
}

/// Finds a set of `2^k` distinct indices whose hashes XOR to zero under the
/// prescribed collision tree, carrying full indices throughout.
///
/// `cancelled` is consulted at every [`SolverCancelCheck`] checkpoint; if it
/// returns `true` the solver unwinds immediately without surfacing any
/// partial work. An empty set is a successful outcome: not every seed has
/// solutions.
pub fn basic_solve<C>(
    p: Params,
    base_state: &Blake2bState,
    mut cancelled: C,
) -> Result<BTreeSet<Vec<u32>>, SolverCancelled>
where
    C: FnMut(SolverCancelCheck) -> bool,
{
    let collision_byte_length = p.collision_byte_length();
    let mut hash_len = p.hash_length();
    let mut len_indices = size_of::<u32>();

    debug!("N = {}, K = {}", p.n, p.k);
    debug!("Generating first list");
    let mut x = Vec::with_capacity(p.init_size() as usize);
    for i in 0..p.init_size() {
        x.push(FullStepRow::new(&p, base_state, i));
        probe(&mut cancelled, SolverCancelCheck::ListGeneration)?;
    }

    // Repeat the collision step until 2n/(k+1) bits remain.
    for r in 1..p.k {
        if x.is_empty() {
            break;
        }
        debug!("Round {}:", r);
        debug!("- Size {}", x.len());
        debug!("- Sorting list");
        x.sort_unstable_by(compare_step_rows(collision_byte_length));
        probe(&mut cancelled, SolverCancelCheck::ListSorting)?;

        debug!("- Finding collisions");
        let mut i = 0;
        let mut pos_free = 0;
        let mut xc = Vec::new();
        while i + 1 < x.len() {
            // Find the run of rows colliding on the next n/(k+1) bits.
            let mut j = 1;
            while i + j < x.len() && has_collision(&x[i], &x[i + j], collision_byte_length) {
                j += 1;
            }

            // Merge every unordered pair in the run with disjoint trails.
            for l in 0..j - 1 {
                for m in l + 1..j {
                    if distinct_indices(&x[i + l], &x[i + m], hash_len, len_indices) {
                        xc.push(FullStepRow::from_children(
                            &x[i + l],
                            &x[i + m],
                            hash_len,
                            len_indices,
                            collision_byte_length,
                        ));
                    }
                }
            }

            pos_free = store_in_place(&mut x, &mut xc, pos_free, i + j);
            i += j;
            probe(&mut cancelled, SolverCancelCheck::ListColliding)?;
        }

        finish_compaction(&mut x, xc, pos_free);

        hash_len -= collision_byte_length;
        len_indices *= 2;
        probe(&mut cancelled, SolverCancelCheck::RoundEnd)?;
    }

    // Find a collision on the last 2n/(k+1) bits.
    debug!("Final round:");
    debug!("- Size {}", x.len());
    let mut solns = BTreeSet::new();
    if x.len() > 1 {
        debug!("- Sorting list");
        x.sort_unstable_by(compare_step_rows(hash_len));
        probe(&mut cancelled, SolverCancelCheck::FinalSorting)?;

        debug!("- Finding collisions");
        let mut i = 0;
        while i + 1 < x.len() {
            let mut j = 1;
            while i + j < x.len() && has_collision(&x[i], &x[i + j], hash_len) {
                j += 1;
            }

            for l in 0..j - 1 {
                for m in l + 1..j {
                    if distinct_indices(&x[i + l], &x[i + m], hash_len, len_indices) {
                        let res = FullStepRow::from_children(
                            &x[i + l],
                            &x[i + m],
                            hash_len,
                            len_indices,
                            0,
                        );
                        solns.insert(res.indices(hash_len, 2 * len_indices));
                    }
                }
            }

            i += j;
            probe(&mut cancelled, SolverCancelCheck::FinalColliding)?;
        }
    } else {
        debug!("- List is empty");
    }

    debug!("- Number of solutions found: {}", solns.len());
    Ok(solns)
}

/// One branch-constrained collision pass during recreation.
///
/// As the ordinary collision step, but each merged pair must additionally
/// sit on the correct sides of the subtree being rebuilt: one row must
/// descend from the branch whose truncated index is `lt` and the other from
/// the branch whose truncated index is `rt`. The merge is emitted in that
/// orientation.
fn collide_branches(
    x: &mut Vec<FullStepRow>,
    hash_len: usize,
    len_indices: usize,
    clen: usize,
    ilen: usize,
    lt: u8,
    rt: u8,
) {
    let mut i = 0;
    let mut pos_free = 0;
    let mut xc = Vec::new();
    while i + 1 < x.len() {
        let mut j = 1;
        while i + j < x.len() && has_collision(&x[i], &x[i + j], clen) {
            j += 1;
        }

        for l in 0..j - 1 {
            for m in l + 1..j {
                let (a, b) = (&x[i + l], &x[i + m]);
                if distinct_indices(a, b, hash_len, len_indices) {
                    if a.is_valid_branch(hash_len, ilen, lt) && b.is_valid_branch(hash_len, ilen, rt)
                    {
                        xc.push(FullStepRow::from_children(a, b, hash_len, len_indices, clen));
                    } else if b.is_valid_branch(hash_len, ilen, lt)
                        && a.is_valid_branch(hash_len, ilen, rt)
                    {
                        xc.push(FullStepRow::from_children(b, a, hash_len, len_indices, clen));
                    }
                }
            }
        }

        pos_free = store_in_place(x, &mut xc, pos_free, i + j);
        i += j;
    }

    finish_compaction(x, xc, pos_free);
}

/// As [`basic_solve`], but trading extra search work for roughly a quarter
/// of the memory: the collision rounds run over rows whose trails hold
/// 1-byte truncated indices, and full indices are only recreated for the
/// handful of partial solutions that survive to the final round.
pub fn optimised_solve<C>(
    p: Params,
    base_state: &Blake2bState,
    mut cancelled: C,
) -> Result<BTreeSet<Vec<u32>>, SolverCancelled>
where
    C: FnMut(SolverCancelCheck) -> bool,
{
    let collision_byte_length = p.collision_byte_length();
    let ilen = p.index_bit_length();

    // Phase 1: run the collision rounds with truncated trails. The scope
    // ensures the truncated list is freed before recreation begins.
    let partial_solns = {
        let mut hash_len = p.hash_length();
        let mut len_indices = size_of::<u8>();

        debug!("N = {}, K = {}", p.n, p.k);
        debug!("Generating first list");
        let mut xt = Vec::with_capacity(p.init_size() as usize);
        for i in 0..p.init_size() {
            xt.push(TruncatedStepRow::new(&p, base_state, i, ilen));
            probe(&mut cancelled, SolverCancelCheck::ListGeneration)?;
        }

        for r in 1..p.k {
            if xt.is_empty() {
                break;
            }
            debug!("Round {}:", r);
            debug!("- Size {}", xt.len());
            debug!("- Sorting list");
            xt.sort_unstable_by(compare_step_rows(collision_byte_length));
            probe(&mut cancelled, SolverCancelCheck::ListSorting)?;

            debug!("- Finding collisions");
            let mut i = 0;
            let mut pos_free = 0;
            let mut xc = Vec::new();
            while i + 1 < xt.len() {
                let mut j = 1;
                while i + j < xt.len() && has_collision(&xt[i], &xt[i + j], collision_byte_length) {
                    j += 1;
                }

                for l in 0..j - 1 {
                    for m in l + 1..j {
                        // Truncated trails cannot be checked for distinct
                        // indices; drop a merge only when its hash region
                        // has already collapsed to zero and its trail looks
                        // like every index occurring twice.
                        let xi = TruncatedStepRow::from_children(
                            &xt[i + l],
                            &xt[i + m],
                            hash_len,
                            len_indices,
                            collision_byte_length,
                        );
                        if !(xi.is_zero(hash_len - collision_byte_length)
                            && is_probably_duplicate(&xi.truncated_indices(
                                hash_len - collision_byte_length,
                                2 * len_indices,
                            )))
                        {
                            xc.push(xi);
                        }
                    }
                }

                pos_free = store_in_place(&mut xt, &mut xc, pos_free, i + j);
                i += j;
                probe(&mut cancelled, SolverCancelCheck::ListColliding)?;
            }

            finish_compaction(&mut xt, xc, pos_free);

            hash_len -= collision_byte_length;
            len_indices *= 2;
            probe(&mut cancelled, SolverCancelCheck::RoundEnd)?;
        }

        debug!("Final round:");
        debug!("- Size {}", xt.len());
        let mut partial_solns: Vec<Vec<u8>> = Vec::new();
        if xt.len() > 1 {
            debug!("- Sorting list");
            xt.sort_unstable_by(compare_step_rows(hash_len));
            probe(&mut cancelled, SolverCancelCheck::FinalSorting)?;

            debug!("- Finding collisions");
            let mut i = 0;
            while i + 1 < xt.len() {
                let mut j = 1;
                while i + j < xt.len() && has_collision(&xt[i], &xt[i + j], hash_len) {
                    j += 1;
                }

                for l in 0..j - 1 {
                    for m in l + 1..j {
                        let res = TruncatedStepRow::from_children(
                            &xt[i + l],
                            &xt[i + m],
                            hash_len,
                            len_indices,
                            0,
                        );
                        partial_solns.push(res.truncated_indices(hash_len, 2 * len_indices));
                    }
                }

                i += j;
                probe(&mut cancelled, SolverCancelCheck::FinalColliding)?;
            }
        } else {
            debug!("- List is empty");
        }

        partial_solns
    };

    debug!("Found {} partial solutions", partial_solns.len());

    // Phase 2: for each partial solution, rebuild the candidate full rows
    // position by position and merge subtrees as they complete, like a
    // binary counter propagating carries.
    debug!("Culling solutions");
    let mut solns = BTreeSet::new();
    let mut invalid_count = 0;

    'partials: for partial_soln in &partial_solns {
        let mut x: Vec<Option<Vec<FullStepRow>>> = Vec::with_capacity(p.k as usize + 1);

        for (i, &t) in partial_soln.iter().enumerate() {
            // All full indices whose truncation matches this position.
            let mut ic = Vec::with_capacity(p.recreation_size() as usize);
            for j in 0..p.recreation_size() {
                ic.push(FullStepRow::new(&p, base_state, untruncate_index(t, j, ilen)));
                probe(&mut cancelled, SolverCancelCheck::PartialGeneration)?;
            }

            let mut hash_len = p.hash_length();
            let mut len_indices = size_of::<u32>();
            let mut rti = i;
            for r in 0..=p.k as usize {
                if r < x.len() {
                    if let Some(mut column) = x[r].take() {
                        // A subtree of this height is already waiting: merge
                        // it in and carry the result upwards.
                        ic.append(&mut column);
                        ic.sort_unstable_by(compare_step_rows(hash_len));
                        probe(&mut cancelled, SolverCancelCheck::PartialSorting)?;

                        let lti = rti - (1 << r);
                        collide_branches(
                            &mut ic,
                            hash_len,
                            len_indices,
                            collision_byte_length,
                            ilen,
                            partial_soln[lti],
                            partial_soln[rti],
                        );

                        if ic.is_empty() {
                            invalid_count += 1;
                            continue 'partials;
                        }

                        hash_len -= collision_byte_length;
                        len_indices *= 2;
                        rti = lti;
                    } else {
                        x[r] = Some(ic);
                        break;
                    }
                } else {
                    x.push(Some(ic));
                    break;
                }
                probe(&mut cancelled, SolverCancelCheck::PartialSubtreeEnd)?;
            }
            probe(&mut cancelled, SolverCancelCheck::PartialIndexEnd)?;
        }

        // We are at the top of the tree. Each surviving root row has one
        // unexamined collision block left; only those that close the tree
        // with a zero XOR are genuine solutions.
        debug_assert_eq!(x.len(), p.k as usize + 1);
        let root_hash_len = p.collision_byte_length();
        if let Some(roots) = x.last().and_then(|roots| roots.as_ref()) {
            for row in roots {
                if row.is_zero(root_hash_len) {
                    solns.insert(row.indices(root_hash_len, p.solution_trail_length()));
                }
            }
        }
        probe(&mut cancelled, SolverCancelCheck::PartialEnd)?;
    }

    debug!("- Number of invalid solutions found: {}", invalid_count);
    debug!("- Number of solutions found: {}", solns.len());
    Ok(solns)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use blake2b_simd::State as Blake2bState;

    use super::{basic_solve, optimised_solve, SolverCancelCheck, SolverCancelled};
    use crate::params::Params;
    use crate::state::initialise_state;
    use crate::verify::is_valid_solution;

    fn state_with_nonce(p: Params, nonce: u8) -> Blake2bState {
        let mut state = initialise_state(p);
        let mut n = [0u8; 32];
        n[0] = nonce;
        state.update(&n);
        state
    }

    fn assert_well_formed(p: Params, state: &Blake2bState, solns: &BTreeSet<Vec<u32>>) {
        for soln in solns {
            assert_eq!(soln.len(), p.solution_size());
            let distinct: BTreeSet<_> = soln.iter().collect();
            assert_eq!(distinct.len(), soln.len(), "indices must be distinct");
            assert!(is_valid_solution(p, state, soln));
        }
    }

    #[test]
    fn basic_solve_round_trip_48_5() {
        let p = Params::new(48, 5).unwrap();
        let mut found = 0;
        for nonce in 0..8 {
            let state = state_with_nonce(p, nonce);
            let solns = basic_solve(p, &state, |_| false).unwrap();
            assert_well_formed(p, &state, &solns);
            found += solns.len();
        }
        assert!(found > 0, "expected solutions within eight nonces");
    }

    #[test]
    fn solver_equivalence_48_5() {
        let p = Params::new(48, 5).unwrap();
        for nonce in 0..4 {
            let state = state_with_nonce(p, nonce);
            let basic = basic_solve(p, &state, |_| false).unwrap();
            let optimised = optimised_solve(p, &state, |_| false).unwrap();
            assert_eq!(basic, optimised);
            assert_well_formed(p, &state, &optimised);
        }
    }

    #[test]
    fn solver_equivalence_96_5() {
        let p = Params::new(96, 5).unwrap();
        for nonce in 0..2 {
            let state = state_with_nonce(p, nonce);
            let basic = basic_solve(p, &state, |_| false).unwrap();
            let optimised = optimised_solve(p, &state, |_| false).unwrap();
            assert_eq!(basic, optimised);
            assert_well_formed(p, &state, &basic);
        }
    }

    #[test]
    fn solving_is_deterministic() {
        let p = Params::new(48, 5).unwrap();
        let state = state_with_nonce(p, 1);
        assert_eq!(
            basic_solve(p, &state, |_| false).unwrap(),
            basic_solve(p, &state, |_| false).unwrap(),
        );
        assert_eq!(
            optimised_solve(p, &state, |_| false).unwrap(),
            optimised_solve(p, &state, |_| false).unwrap(),
        );
    }

    #[test]
    fn cancellation_during_second_sort() {
        let p = Params::new(48, 5).unwrap();
        let state = initialise_state(p);
        let mut sort_probes = 0;
        let result = basic_solve(p, &state, |checkpoint| {
            if checkpoint == SolverCancelCheck::ListSorting {
                sort_probes += 1;
                sort_probes == 2
            } else {
                false
            }
        });
        assert_eq!(result, Err(SolverCancelled));
        assert_eq!(sort_probes, 2, "probe fires once per round sort");
    }

    #[test]
    fn cancellation_of_each_solver() {
        let p = Params::new(48, 5).unwrap();
        let state = initialise_state(p);
        assert_eq!(
            basic_solve(p, &state, |c| c == SolverCancelCheck::ListGeneration),
            Err(SolverCancelled),
        );
        assert_eq!(
            optimised_solve(p, &state, |c| c == SolverCancelCheck::ListGeneration),
            Err(SolverCancelled),
        );
        assert_eq!(
            optimised_solve(p, &state, |c| c == SolverCancelCheck::RoundEnd),
            Err(SolverCancelled),
        );
    }

    #[test]
    #[ignore = "minutes of CPU; run with --ignored"]
    fn basic_solve_round_trip_200_9() {
        let p = Params::new(200, 9).unwrap();
        let mut found = 0;
        for nonce in 0..4 {
            let state = state_with_nonce(p, nonce);
            let solns = basic_solve(p, &state, |_| false).unwrap();
            assert_well_formed(p, &state, &solns);
            found += solns.len();
        }
        assert!(found > 0, "expected solutions within four nonces");
    }

    #[test]
    #[ignore = "needs several GiB for the 2^25-row initial list"]
    fn basic_solve_round_trip_96_3() {
        let p = Params::new(96, 3).unwrap();
        let state = state_with_nonce(p, 0);
        let solns = basic_solve(p, &state, |_| false).unwrap();
        assert_well_formed(p, &state, &solns);
        assert_eq!(solns, basic_solve(p, &state, |_| false).unwrap());
    }
}
