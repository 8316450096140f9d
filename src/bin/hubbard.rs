//! Command-line solver for Hubbard models.
//!
//! Builds a nearest-neighbour Hubbard model on the requested lattice, runs the
//! solver on an in-process group of `--ranks` threads, prints the lowest
//! eigenvalues, and optionally writes them (and the eigenvector shards) to
//! `--output-dir`.

use anyhow::{Context, Result, anyhow, ensure};
use clap::{Parser, ValueEnum};
use lattice_lanczos::{
    Algorithm, Reorthogonalization, SolverConfig, SolverResult,
    algorithms::lanczos::StartVector,
    comm::{Communicator, ThreadGroup},
    model::{HubbardParams, Lattice, ModelDescriptor},
    solve_model,
    utils::{checkpoint, memory},
};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Geometry {
    Chain,
    Square,
    Triangular,
    Honeycomb,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReorthArg {
    None,
    Full,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AlgorithmArg {
    Auto,
    Lanczos,
    Full,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StartArg {
    Random,
    Unit,
}

/// Command-line arguments for a single solver run.
#[derive(Parser, Debug)]
#[clap(
    name = "hubbard",
    about = "Finds the lowest eigenvalues of a Hubbard model with distributed Lanczos."
)]
struct Args {
    /// Lattice geometry.
    #[clap(long, value_enum, default_value = "chain")]
    lattice: Geometry,
    /// Chain length, or the number of columns (unit cells for honeycomb).
    #[clap(long, default_value_t = 8)]
    width: usize,
    /// Number of rows; ignored for chains.
    #[clap(long, default_value_t = 1)]
    height: usize,
    /// Use open instead of periodic boundaries.
    #[clap(long)]
    open: bool,
    /// Hopping amplitude t.
    #[clap(long, default_value_t = 1.0)]
    t: f64,
    /// On-site repulsion U.
    #[clap(long, default_value_t = 4.0)]
    u: f64,
    /// Nearest-neighbour density interaction V.
    #[clap(long, default_value_t = 0.0)]
    v: f64,
    /// Chemical potential.
    #[clap(long, default_value_t = 0.0)]
    mu: f64,
    /// Electron count; defaults to half filling.
    #[clap(long)]
    electrons: Option<usize>,
    /// Fixed 2Sz = N_up - N_down. Without it every spin sector is kept.
    #[clap(long, allow_hyphen_values = true)]
    two_sz: Option<i64>,
    /// Work in the grand-canonical ensemble (all particle numbers).
    #[clap(long)]
    grand_canonical: bool,
    /// Number of ranks (threads) to distribute the Hilbert space over.
    #[clap(long, default_value_t = 1)]
    ranks: usize,

    #[clap(long, default_value_t = 500)]
    max_iterations: usize,
    #[clap(long, default_value_t = 1e-10)]
    tolerance: f64,
    #[clap(long, default_value_t = 1e-12)]
    breakdown_tolerance: f64,
    #[clap(long, default_value_t = 1)]
    check_interval: usize,
    #[clap(long, value_enum, default_value = "full")]
    reorthogonalization: ReorthArg,
    #[clap(long, default_value_t = 1)]
    n_eigenvalues: usize,
    /// initial_iv: seed of the random start vector, offset of the unit one.
    #[clap(long, default_value_t = 1, allow_hyphen_values = true)]
    seed: i64,
    #[clap(long, value_enum, default_value = "random")]
    start_vector: StartArg,
    #[clap(long, default_value_t = 1000)]
    full_diag_threshold: usize,
    #[clap(long, default_value_t = 2)]
    max_restarts: usize,
    #[clap(long, value_enum, default_value = "auto")]
    algorithm: AlgorithmArg,
    /// Memory budget for full diagonalization, in bytes.
    #[clap(long, default_value_t = 4 << 30)]
    memory_limit_bytes: u64,
    /// Also compute eigenvectors (written only with --output-dir).
    #[clap(long)]
    eigenvectors: bool,
    /// Directory for `energies.csv` and eigenvector shards.
    #[clap(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

impl Args {
    fn lattice(&self) -> Lattice {
        let periodic = !self.open;
        let (width, height) = (self.width, self.height);
        match self.lattice {
            Geometry::Chain => Lattice::Chain {
                length: width,
                periodic,
            },
            Geometry::Square => Lattice::Square {
                width,
                height,
                periodic,
            },
            Geometry::Triangular => Lattice::Triangular {
                width,
                height,
                periodic,
            },
            Geometry::Honeycomb => Lattice::Honeycomb {
                width,
                height,
                periodic,
            },
        }
    }

    fn config(&self) -> SolverConfig {
        SolverConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            breakdown_tolerance: self.breakdown_tolerance,
            check_interval: self.check_interval,
            reorthogonalization: match self.reorthogonalization {
                ReorthArg::None => Reorthogonalization::None,
                ReorthArg::Full => Reorthogonalization::Full,
            },
            n_eigenvalues: self.n_eigenvalues,
            seed: self.seed,
            start_vector: match self.start_vector {
                StartArg::Random => StartVector::Random,
                StartArg::Unit => StartVector::Unit,
            },
            full_diag_threshold: self.full_diag_threshold,
            max_restarts: self.max_restarts,
            algorithm: match self.algorithm {
                AlgorithmArg::Auto => Algorithm::Auto,
                AlgorithmArg::Lanczos => Algorithm::Lanczos,
                AlgorithmArg::Full => Algorithm::Full,
            },
            memory_limit_bytes: self.memory_limit_bytes,
            eigenvectors: self.eigenvectors,
        }
    }
}

/// Solves on one rank and writes this rank's share of the output.
fn run_rank(
    model: &ModelDescriptor,
    config: &SolverConfig,
    output_dir: Option<&PathBuf>,
    comm: &dyn Communicator,
) -> Result<SolverResult> {
    let result = solve_model(model, config, comm)?;
    if let Some(dir) = output_dir {
        checkpoint::write_eigenvalues(dir.join("energies.csv"), &result, comm)?;
        for (i, vector) in result.eigenvectors.iter().enumerate() {
            let path = checkpoint::write_shard(dir.join(format!("eigenvector-{i}")), vector)?;
            log::debug!("rank {} wrote {}", comm.rank(), path.display());
        }
    }
    Ok(result)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = Args::parse();
    ensure!(args.ranks >= 1, "--ranks must be at least 1");

    let lattice = args.lattice();
    let tables = lattice.generate(&HubbardParams {
        t: args.t,
        u: args.u,
        v: args.v,
    });
    let electrons = args.electrons.unwrap_or(lattice.sites());
    let mut model = ModelDescriptor::new(tables, electrons, args.grand_canonical)
        .with_chemical_potential(args.mu);
    model.two_sz = args.two_sz;
    let config = args.config();
    config.validate()?;

    if let Some(available) = memory::available_memory_bytes() {
        if config.memory_limit_bytes > available {
            log::warn!(
                "memory_limit_bytes = {} exceeds the {} bytes currently available",
                config.memory_limit_bytes,
                available
            );
        }
    }
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }
    log::info!("Solving {lattice:?} with {electrons} electrons on {} rank(s)", args.ranks);

    let outcomes = ThreadGroup::new(args.ranks)
        .run(|comm| run_rank(&model, &config, args.output_dir.as_ref(), comm));
    let mut results = Vec::with_capacity(outcomes.len());
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        results.push(outcome.with_context(|| format!("rank {rank} failed"))?);
    }
    let result = results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no ranks ran"))?;

    println!("status: {}", result.status);
    for (i, energy) in result.eigenvalues.iter().enumerate() {
        println!("E{i} = {energy:.15}");
    }
    log::info!(
        "Done: {} iteration(s), {} attempt(s), residual {:.3e}, peak memory {} kB",
        result.iterations,
        result.attempts,
        result.residual,
        memory::peak_rss_kb().unwrap_or(0)
    );
    Ok(())
}
