#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

mod csv_reader;
mod ml;
mod structs;

use clap::{Args, Parser, Subcommand};
use csv_reader::{load_name_map, CsvData};
use ml::output::OutputFormat;
use ml::pipeline::{
    self, AnalysisConfig, AnalysisEngine, ClusteringConfig, ClusteringJob, CorrelationJob,
    RegressionJob,
};
use std::path::{Path, PathBuf};
use structs::{AnalysisError, CancelToken, ClusterFamily, FeatureMatrix, NameMap, Result, TestSide};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rstat - clustering, correlation and regression over regional indicators
#[derive(Parser, Debug)]
#[command(name = "rstat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for per-run report directories
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Encoding of tables inside the report
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Wide CSV/TSV with region, period and indicator columns
    #[arg(short, long)]
    matrix: PathBuf,

    /// Two-column code,name CSV/TSV of display names
    #[arg(short, long)]
    names: Option<PathBuf>,

    /// Treat inputs as TSV instead of CSV
    #[arg(long)]
    tsv: bool,
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// Model family: mixture (gmm) or centroid (kmeans)
    #[arg(long)]
    family: Option<String>,

    /// Selection method: BIC, AIC, silhouette, wcss or fixed
    #[arg(long)]
    method: Option<String>,

    /// First candidate cluster count
    #[arg(long)]
    k_start: Option<usize>,

    /// End of the candidate range (exclusive)
    #[arg(long)]
    k_end: Option<usize>,

    /// Cluster count for the fixed method
    #[arg(short = 'k', long)]
    clusters: Option<usize>,

    /// Restarts of the final fit
    #[arg(long)]
    n_init: Option<usize>,

    /// Iteration limit of the final fit
    #[arg(long)]
    max_iter: Option<u64>,

    /// Covariance regularization of the mixture family
    #[arg(long)]
    reg_covar: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pairwise Pearson correlation with significance tiers
    Correlation {
        #[command(flatten)]
        input: InputArgs,

        /// two-sided, less or greater
        #[arg(long)]
        test_side: Option<String>,

        /// Keep coefficients numeric instead of tagging significant ones
        #[arg(long)]
        no_annotate: bool,
    },

    /// Least squares of one indicator on the others
    Regression {
        #[command(flatten)]
        input: InputArgs,

        /// Indicator code of the dependent variable
        #[arg(short, long)]
        dependent: Option<String>,
    },

    /// Cluster-count selection and clustering
    Clustering {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Clustering with labelled coordinates in the unified grid
    Spatial {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        cluster: ClusterArgs,

        /// Source coordinate system of the stored coordinates
        #[arg(long, default_value = "EPSG:5179")]
        crs: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "rstat=debug" } else { "rstat=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        eprintln!("No subcommand provided. Use 'rstat correlation|regression|clustering|spatial'.");
        eprintln!("Run 'rstat --help' for usage information.");
        std::process::exit(1);
    };

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output.output_dir = dir;
    }
    if let Some(format) = cli.format {
        config.output.format = format;
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, cancelling...");
        handler_token.cancel();
    })
    .map_err(|e| AnalysisError::Config(format!("Failed to set Ctrl+C handler: {e}")))?;

    let mut job: Box<dyn AnalysisEngine> = match command {
        Commands::Correlation {
            input,
            test_side,
            no_annotate,
        } => {
            if let Some(side) = test_side {
                config.correlation.test_side = side.parse::<TestSide>()?;
            }
            if no_annotate {
                config.correlation.annotate = false;
            }
            let (matrix, names) = load_inputs(&input)?;
            Box::new(CorrelationJob::new(matrix, names, config.correlation.clone()))
        }

        Commands::Regression { input, dependent } => {
            if dependent.is_some() {
                config.regression.dependent = dependent;
            }
            let (matrix, names) = load_inputs(&input)?;
            Box::new(RegressionJob::new(matrix, names, &config.regression, cancel)?)
        }

        Commands::Clustering { input, cluster } => {
            apply_cluster_args(&mut config.clustering, cluster)?;
            let (matrix, names) = load_inputs(&input)?;
            Box::new(ClusteringJob::new(
                matrix,
                names,
                config.clustering.clone(),
                cancel,
            )?)
        }

        Commands::Spatial {
            input,
            cluster,
            crs,
        } => {
            apply_cluster_args(&mut config.clustering, cluster)?;
            let (matrix, names) = load_inputs(&input)?;
            if matrix.coordinates.is_none() {
                warn!("no x_coord/y_coord columns; using the first two indicators as coordinates");
            }
            Box::new(
                ClusteringJob::new(matrix, names, config.clustering.clone(), cancel)?
                    .with_spatial_output(crs),
            )
        }
    };

    let out = pipeline::run(job.as_mut(), &config.output)?;

    eprintln!("Output written to {}", out.dir.display());
    for item in &out.items {
        eprintln!("  - {}", item.title);
    }
    if let Some(model) = &out.model {
        eprintln!("Model saved to {}", model.display());
    }

    Ok(())
}

fn apply_cluster_args(config: &mut ClusteringConfig, args: ClusterArgs) -> Result<()> {
    if let Some(family) = args.family {
        config.family = family.parse::<ClusterFamily>()?;
    }
    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(k) = args.k_start {
        config.k_start = k;
    }
    if let Some(k) = args.k_end {
        config.k_end = k;
    }
    if let Some(k) = args.clusters {
        config.clusters = k;
    }
    if args.n_init.is_some() {
        config.n_init = args.n_init;
    }
    if args.max_iter.is_some() {
        config.max_iter = args.max_iter;
    }
    if let Some(reg_covar) = args.reg_covar {
        config.reg_covar = reg_covar;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(())
}

fn load_inputs(input: &InputArgs) -> Result<(FeatureMatrix, NameMap)> {
    let matrix = load_matrix(&input.matrix, input.tsv)?;
    let names = match &input.names {
        Some(path) => {
            let names = load_name_map(path, input.tsv)?;
            if names.is_empty() {
                warn!(path = %path.display(), "name file has no entries; showing codes");
            }
            names
        }
        None => NameMap::new(),
    };
    info!(
        rows = matrix.n_samples(),
        indicators = matrix.n_features(),
        names = names.len(),
        "loaded inputs"
    );
    Ok((matrix, names))
}

fn load_matrix(path: &Path, tsv: bool) -> Result<FeatureMatrix> {
    if !path.exists() {
        return Err(AnalysisError::Config(format!(
            "Matrix file not found: {}",
            path.display()
        )));
    }
    let csv_data = CsvData::from_file(path, tsv)?;
    FeatureMatrix::from_csv(&csv_data)
}
