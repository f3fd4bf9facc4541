use clap::{Parser, Subcommand};
use jacobi_relax::config::{DeviceSelector, SolverConfig};
use jacobi_relax::device::{ComputeBackend, Context, HostBackend};
use jacobi_relax::error::Result;
use jacobi_relax::output;
use jacobi_relax::solver::{
    self, direct, LinearSystem, RandomDominantFill, SolveResult, SplineProblem,
};
use jacobi_relax::stats::Stats;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

/// GPU Jacobi relaxation for linear systems and natural cubic splines
#[derive(Parser)]
#[command(name = "jacobi-relax", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with solver settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Convergence tolerance on the relative L1 change per iteration
    #[arg(long, global = true)]
    epsilon: Option<f64>,

    /// Iteration cap
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    /// Only consider adapters whose name contains this text
    #[arg(long, global = true)]
    device: Option<String>,

    /// Run the kernels on the host instead of a GPU
    #[arg(long, global = true)]
    cpu: bool,

    /// Print performance stats to stderr
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a random strictly diagonally dominant system
    Linear {
        #[arg(long)]
        dimension: usize,

        /// Seed for the random fill
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Compare against a host Gaussian elimination
        #[arg(long)]
        verify: bool,
    },
    /// Fit a natural cubic spline through evenly spaced knots
    Spline {
        /// Comma-separated knot values
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        knots: Vec<f64>,

        /// Distance between consecutive knots
        #[arg(long, default_value_t = 1.0)]
        spacing: f64,

        /// Sample the spline at this many evenly spaced points instead of
        /// printing coefficients
        #[arg(long)]
        samples: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = if cli.stats { Some(Stats::new()) } else { None };

    let config = load_config(&cli).unwrap_or_else(|e| {
        eprintln!("Config error: {}", e);
        std::process::exit(1);
    });

    let outcome = if cli.cpu {
        run(&HostBackend::new(), &cli.command, &config, stats.as_mut())
    } else {
        let t = Instant::now();
        let context = Context::open(&config.device).unwrap_or_else(|e| {
            eprintln!("Device error: {}", e);
            std::process::exit(1);
        });
        if let Some(ref mut s) = stats {
            s.add_phase("device setup", t.elapsed());
        }
        run(&context, &cli.command, &config, stats.as_mut())
    };
    if let Err(e) = outcome {
        eprintln!("Solve error: {}", e);
        std::process::exit(1);
    }

    if let Some(ref stats) = stats {
        stats.display();
    }
}

fn load_config(cli: &Cli) -> Result<SolverConfig> {
    let mut config = match &cli.config {
        Some(path) => SolverConfig::load(path)?,
        None => SolverConfig::default(),
    };
    if let Some(epsilon) = cli.epsilon {
        config.epsilon = epsilon;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(name) = &cli.device {
        config.device = DeviceSelector::NameContains(name.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run<B: ComputeBackend>(
    backend: &B,
    command: &Command,
    config: &SolverConfig,
    mut stats: Option<&mut Stats>,
) -> Result<()> {
    let mut stdout = io::stdout();
    match command {
        Command::Linear {
            dimension,
            seed,
            verify,
        } => {
            let system =
                LinearSystem::assemble(*dimension, None, None, &mut RandomDominantFill::new(*seed))?;
            let result = solver::solve_linear(backend, &system, config, stats.as_deref_mut())?;
            report(&result);
            let reference = if *verify {
                let t = Instant::now();
                let reference =
                    direct::gaussian_elimination(system.dimension(), system.matrix(), system.rhs())?;
                if let Some(ref mut s) = stats {
                    s.add_phase("reference solve", t.elapsed());
                }
                let max_error = result
                    .values
                    .iter()
                    .zip(&reference)
                    .map(|(x, r)| (x - r).abs())
                    .fold(0.0, f64::max);
                eprintln!("max |x - x_ref| = {:e}", max_error);
                Some(reference)
            } else {
                None
            };
            output::write_solution_csv(&result, reference.as_deref(), &mut stdout)?;
        }
        Command::Spline {
            knots,
            spacing,
            samples,
        } => {
            let problem = SplineProblem::new(knots.clone(), *spacing)?;
            let fit = solver::solve_spline(backend, &problem, config, stats.as_deref_mut())?;
            report(&fit.moments);
            match samples {
                Some(count) => {
                    let points = solver::sample_on_device(
                        backend,
                        &fit.interpolator,
                        *count,
                        stats.as_deref_mut(),
                    )?;
                    output::write_samples_csv(&points, &mut stdout)?;
                }
                None => output::write_coefficients_csv(&fit.interpolator, &mut stdout)?,
            }
        }
    }
    Ok(())
}

fn report(result: &SolveResult) {
    if result.converged {
        eprintln!(
            "converged after {} iterations (residual {:e})",
            result.iterations_used, result.final_residual
        );
    } else {
        eprintln!(
            "warning: not converged after {} iterations (residual {:e})",
            result.iterations_used, result.final_residual
        );
    }
}
