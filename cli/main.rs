#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use l1l2::algorithms::{SolverOptions, l1_bounds, l1l2_path};
use l1l2::config::RunConfig;
use l1l2::data::{load_labels, load_matrix};
use l1l2::report::SelectionReport;
use l1l2::selection::model_selection;

#[derive(Args)]
pub struct SelectArgs {
    /// TOML run configuration (grids, folds, solver, normalization)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Training design matrix, one sample per row (.csv or .tsv, no header)
    #[arg(long, value_name = "PATH")]
    pub train_data: PathBuf,

    /// Training labels, one value per row
    #[arg(long, value_name = "PATH")]
    pub train_labels: PathBuf,

    /// Held-out design matrix scored by the model cascade
    #[arg(long, value_name = "PATH")]
    pub test_data: PathBuf,

    /// Held-out labels
    #[arg(long, value_name = "PATH")]
    pub test_labels: PathBuf,

    /// Write the TOML report here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct PathArgs {
    /// Design matrix, one sample per row
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,

    /// Labels, one value per row
    #[arg(long, value_name = "PATH")]
    pub labels: PathBuf,

    /// Correlation (L2) penalty
    #[arg(long, default_value = "0.0")]
    pub mu: f64,

    /// Strictly monotone sparsity penalties, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub tau: Vec<f64>,

    /// Iteration cap for each solve
    #[arg(long, default_value = "100000")]
    pub max_iter: usize,

    /// Relative change at which a solve stops
    #[arg(long, default_value = "1e-5")]
    pub tolerance: f64,

    /// Re-estimate the step size along each step
    #[arg(long)]
    pub adaptive: bool,
}

#[derive(Args)]
pub struct BoundsArgs {
    /// Design matrix, one sample per row
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,

    /// Labels, one value per row
    #[arg(long, value_name = "PATH")]
    pub labels: PathBuf,

    /// Margin pulled in from both bounds
    #[arg(long, default_value = "0.0")]
    pub eps: f64,
}

#[derive(Parser)]
#[command(
    name = "l1l2",
    about = "Elastic-net (L1L2) regularization paths and nested cross-validated model selection",
    long_about = "Computes sparse linear models with L1 and L2 penalties and selects the \
                 penalties by nested cross-validation."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run nested model selection and print or save the TOML report
    #[command(about = "Select (tau, lambda) by cross-validation and build the mu cascade")]
    Select(SelectArgs),

    /// Print the regularization path for a grid of sparsity penalties
    #[command(about = "Compute an L1L2 regularization path")]
    Path(PathArgs),

    /// Print the range of useful sparsity penalties for a dataset
    #[command(about = "Compute tau bounds for a dataset")]
    Bounds(BoundsArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Select(args)) => select(args),
        Some(Commands::Path(args)) => path(args),
        Some(Commands::Bounds(args)) => bounds(args),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn select(args: SelectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => {
            log::info!("No configuration given; using defaults.");
            RunConfig::default()
        }
    };
    let grids = config.resolve_grids()?;

    let train_x = load_matrix(&args.train_data)?;
    let train_y = load_labels(&args.train_labels)?;
    let test_x = load_matrix(&args.test_data)?;
    let test_y = load_labels(&args.test_labels)?;

    let folds = config.folds(train_y.view())?;
    let selection = model_selection(
        train_x.view(),
        train_y.view(),
        test_x.view(),
        test_y.view(),
        &grids.mu,
        &grids.tau,
        &grids.lambda,
        &folds,
        &config.selection_config(),
    )?;

    let report = SelectionReport::from_selection(&selection);
    match &args.output {
        Some(path) => {
            report.save(path)?;
            log::info!("Report written to {}", path.display());
        }
        None => print!("{}", report.to_toml()?),
    }
    Ok(())
}

fn path(args: PathArgs) -> Result<(), Box<dyn std::error::Error>> {
    let x = load_matrix(&args.data)?;
    let y = load_labels(&args.labels)?;
    let options = SolverOptions {
        max_iter: args.max_iter,
        tolerance: args.tolerance,
        adaptive: args.adaptive,
    };

    let path = l1l2_path(x.view(), y.view(), args.mu, &args.tau, None, &options)?;
    log::info!(
        "Solved {} of {} penalties; {} nonzero models.",
        path.evaluated,
        args.tau.len(),
        path.len()
    );

    println!("tau\tselected\titerations\tconverged");
    for ((tau, selected), diagnostic) in path
        .tau
        .iter()
        .zip(path.selected_counts())
        .zip(path.diagnostics.iter())
    {
        println!(
            "{tau:.6e}\t{selected}\t{}\t{}",
            diagnostic.iterations, diagnostic.converged
        );
    }
    Ok(())
}

fn bounds(args: BoundsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let x = load_matrix(&args.data)?;
    let y = load_labels(&args.labels)?;
    let (tau_min, tau_max) = l1_bounds(x.view(), y.view(), args.eps)?;
    println!("tau_min\t{tau_min:.6e}");
    println!("tau_max\t{tau_max:.6e}");
    Ok(())
}
