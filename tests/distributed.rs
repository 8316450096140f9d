//! Integration tests for running the solver on groups of thread ranks.
//!
//! A sharded run must reproduce the single-rank result: the random start vector
//! is generated per global index, and every reduction is summed in rank order,
//! so only the partial sums inside each shard differ between group sizes.

use anyhow::{Result, anyhow, ensure};
use lattice_lanczos::{
    Algorithm, Reorthogonalization, SolverConfig, SolverDriver, SolverResult,
    algorithms::lanczos::{StartVector, start_vector},
    comm::{Communicator, SelfComm, ThreadGroup},
    model::{HubbardParams, Lattice, ModelDescriptor},
    operator::DiagonalOperator,
    solve_model,
    utils::checkpoint,
    vector::ShardLayout,
};

const RANK_AGREEMENT: f64 = 1e-10;

fn chain_model(length: usize, u: f64) -> ModelDescriptor {
    let tables = Lattice::Chain {
        length,
        periodic: true,
    }
    .generate(&HubbardParams { t: 1.0, u, v: 0.5 });
    ModelDescriptor::new(tables, length, false).with_two_sz(0)
}

/// Runs `body` on `ranks` threads and returns rank 0's value after checking
/// that no rank failed.
fn run_on<T: Send>(
    ranks: usize,
    body: impl Fn(&dyn Communicator) -> Result<T> + Sync,
) -> Result<Vec<T>> {
    ThreadGroup::new(ranks)
        .run(|comm| body(comm))
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.map_err(|e| anyhow!("rank {rank}: {e:#}")))
        .collect()
}

fn first<T>(values: Vec<T>) -> Result<T> {
    values.into_iter().next().ok_or_else(|| anyhow!("empty group"))
}

#[test]
fn test_random_start_vector_independent_of_rank_count() -> Result<()> {
    let dim = 1000;
    let reference = start_vector(
        StartVector::Random,
        7,
        &ShardLayout::balanced(dim, 1),
        &SelfComm,
    )?
    .gather(&SelfComm)?;

    for ranks in [2, 3, 7] {
        let gathered = run_on(ranks, |comm| {
            let layout = ShardLayout::balanced(dim, comm.size());
            Ok(start_vector(StartVector::Random, 7, &layout, comm)?.gather(comm)?)
        })?;
        for (rank, g) in gathered.iter().enumerate() {
            ensure!(*g == reference, "{ranks} ranks: rank {rank} differs");
        }
    }
    Ok(())
}

/// Generates a test comparing a sharded Lanczos run with the single-rank one.
macro_rules! generate_rank_agreement_test {
    ($test_name:ident, $ranks:expr, $mode:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let model = chain_model(6, 4.0);
            let config = SolverConfig {
                algorithm: Algorithm::Lanczos,
                reorthogonalization: $mode,
                n_eigenvalues: 2,
                ..Default::default()
            };
            let reference = solve_model(&model, &config, &SelfComm)?;
            let results = run_on($ranks, |comm| Ok(solve_model(&model, &config, comm)?))?;

            for (rank, result) in results.iter().enumerate() {
                ensure!(result.status == reference.status, "rank {rank}: status");
                ensure!(result.eigenvalues.len() == reference.eigenvalues.len());
                for (got, want) in result.eigenvalues.iter().zip(&reference.eigenvalues) {
                    ensure!(
                        (got - want).abs() < RANK_AGREEMENT,
                        "rank {rank}: {got} vs single-rank {want}"
                    );
                }
                // Reductions are summed in the same order everywhere.
                ensure!(result.eigenvalues == results[0].eigenvalues);
            }
            Ok(())
        }
    };
}

generate_rank_agreement_test!(test_two_ranks_full_reorth, 2, Reorthogonalization::Full);
generate_rank_agreement_test!(test_three_ranks_full_reorth, 3, Reorthogonalization::Full);
generate_rank_agreement_test!(test_three_ranks_plain, 3, Reorthogonalization::None);
generate_rank_agreement_test!(test_four_ranks_plain, 4, Reorthogonalization::None);

#[test]
fn test_full_diagonalization_on_three_ranks() -> Result<()> {
    let model = chain_model(4, 2.0);
    let config = SolverConfig {
        algorithm: Algorithm::Full,
        eigenvectors: true,
        n_eigenvalues: 3,
        ..Default::default()
    };
    let reference = solve_model(&model, &config, &SelfComm)?;
    let results = run_on(3, |comm| {
        let result = solve_model(&model, &config, comm)?;
        let ground = result.eigenvectors[0].gather(comm)?;
        Ok((result, ground))
    })?;

    let dim = reference.eigenvectors[0].dim();
    let mut covered = 0;
    for (rank, (result, ground)) in results.iter().enumerate() {
        for (got, want) in result.eigenvalues.iter().zip(&reference.eigenvalues) {
            ensure!((got - want).abs() < RANK_AGREEMENT, "rank {rank}: {got} vs {want}");
        }
        ensure!(ground.len() == dim);
        covered += result.eigenvectors[0].local().len();
    }
    ensure!(covered == dim, "shards cover {covered} of {dim} amplitudes");
    Ok(())
}

#[test]
fn test_more_ranks_than_states() -> Result<()> {
    // Two sites, one electron of each spin: four states over six ranks.
    let tables = Lattice::Chain {
        length: 2,
        periodic: false,
    }
    .generate(&HubbardParams {
        t: 1.0,
        u: 4.0,
        v: 0.0,
    });
    let model = ModelDescriptor::new(tables, 2, false).with_two_sz(0);
    let config = SolverConfig {
        algorithm: Algorithm::Lanczos,
        ..Default::default()
    };
    let exact = (4.0 - 32.0f64.sqrt()) / 2.0;
    let energies = run_on(6, |comm| Ok(solve_model(&model, &config, comm)?.eigenvalues[0]))?;
    for energy in energies {
        ensure!((energy - exact).abs() < 1e-10, "got {energy}, expected {exact}");
    }
    Ok(())
}

#[test]
fn test_unbalanced_diagonal_operator() -> Result<()> {
    let diagonal: Vec<f64> = (0..37).map(|i| (i as f64 * 0.37).sin() + i as f64 * 0.1).collect();
    let lowest = diagonal.iter().copied().fold(f64::INFINITY, f64::min);
    let config = SolverConfig {
        algorithm: Algorithm::Lanczos,
        ..Default::default()
    };
    let energies = run_on(4, |comm| {
        let op = DiagonalOperator::new(diagonal.clone(), comm);
        Ok(SolverDriver::new(config.clone())?.solve(&op, comm)?.eigenvalues[0])
    })?;
    for energy in energies {
        ensure!((energy - lowest).abs() < 1e-10, "got {energy}, expected {lowest}");
    }
    Ok(())
}

#[test]
fn test_checkpoint_round_trip_across_ranks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("ground");
    let energies = dir.path().join("energies.csv");
    let model = chain_model(6, 4.0);
    let config = SolverConfig {
        algorithm: Algorithm::Lanczos,
        eigenvectors: true,
        ..Default::default()
    };

    let outputs = run_on(3, |comm| {
        let result: SolverResult = solve_model(&model, &config, comm)?;
        checkpoint::write_eigenvalues(&energies, &result, comm)?;
        let psi = &result.eigenvectors[0];
        checkpoint::write_shard(&prefix, psi)?;
        Ok((psi.layout().clone(), psi.gather(comm)?, result.eigenvalues))
    })?;
    let (layout, gathered, eigenvalues) = first(outputs)?;

    let mut concatenated = Vec::with_capacity(layout.dim());
    for rank in 0..layout.parts() {
        let shard = checkpoint::read_shard(&prefix, &layout, rank)?;
        ensure!(shard.global_range() == layout.range(rank));
        concatenated.extend_from_slice(shard.local());
    }
    ensure!(concatenated == gathered, "shards do not reassemble the vector");
    let norm: f64 = concatenated.iter().map(|x| x * x).sum::<f64>().sqrt();
    ensure!((norm - 1.0).abs() < 1e-10, "norm {norm}");

    let records = checkpoint::read_eigenvalues(&energies)?;
    ensure!(records.len() == eigenvalues.len());
    for (record, energy) in records.iter().zip(&eigenvalues) {
        ensure!(record.energy == *energy);
    }
    Ok(())
}
