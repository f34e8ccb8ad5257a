use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nmdc_fetcher::api::{NmdcClient, NmdcHttpClient};
use nmdc_fetcher::app::{App, EcosystemQuery, ErrorKind, ToolResult};
use nmdc_fetcher::config::ConfigLoader;
use nmdc_fetcher::domain::{DoiCategory, DoiProvider, Filter, Projection};
use nmdc_fetcher::error::NmdcError;
use nmdc_fetcher::output::JsonOutput;

#[derive(Parser)]
#[command(name = "nmdc-fetch")]
#[command(about = "Paginated, batched and sampled retrieval from the NMDC runtime API")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (defaults to ./nmdc-fetcher.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Overrides the configured API base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Biosamples strictly between two elevations (meters)")]
    Elevation(ElevationArgs),
    #[command(about = "Biosamples inside a latitude/longitude bounding box")]
    Bbox(BboxArgs),
    #[command(about = "Biosamples matching ecosystem classification fields")]
    Ecosystem(EcosystemArgs),
    #[command(about = "Fetch one entity by NMDC id")]
    Entity { id: String },
    #[command(about = "Fetch several entities of one collection by id")]
    Entities(EntitiesArgs),
    #[command(about = "List collection names")]
    Collections,
    #[command(about = "Show per-collection document counts and sizes")]
    Stats,
    #[command(about = "Uniform random sample of ids from a collection")]
    RandomIds(RandomIdsArgs),
    #[command(about = "Random records drawn from an oversampled candidate pool")]
    RandomRecords(RandomRecordsArgs),
    #[command(about = "Split a collection's ids into fixed-size batches")]
    Batches(BatchesArgs),
    #[command(about = "Resolve the study a biosample belongs to")]
    StudyForBiosample { biosample_id: String },
    #[command(about = "Search studies by associated DOI")]
    DoiSearch(DoiSearchArgs),
}

#[derive(Args)]
struct ElevationArgs {
    #[arg(long, allow_negative_numbers = true)]
    min: i64,
    #[arg(long, allow_negative_numbers = true)]
    max: i64,
}

#[derive(Args)]
struct BboxArgs {
    #[arg(long, allow_negative_numbers = true)]
    lower_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    upper_lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    lower_lon: f64,
    #[arg(long, allow_negative_numbers = true)]
    upper_lon: f64,
}

#[derive(Args)]
struct EcosystemArgs {
    #[arg(long = "type")]
    ecosystem_type: Option<String>,
    #[arg(long = "category")]
    ecosystem_category: Option<String>,
    #[arg(long = "subtype")]
    ecosystem_subtype: Option<String>,
    #[arg(long, default_value_t = 50)]
    max_records: usize,
}

#[derive(Args)]
struct EntitiesArgs {
    #[arg(long)]
    collection: String,
    /// Comma-separated field names.
    #[arg(long)]
    projection: Option<Projection>,
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Args)]
struct RandomIdsArgs {
    collection: String,
    #[arg(long, default_value_t = 10)]
    sample_size: usize,
    #[arg(long)]
    seed: Option<u64>,
    /// MongoDB-style JSON filter.
    #[arg(long)]
    filter: Option<Filter>,
}

#[derive(Args)]
struct RandomRecordsArgs {
    collection: String,
    #[arg(long, default_value_t = 10)]
    sample_size: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    filter: Option<Filter>,
    #[arg(long)]
    projection: Option<Projection>,
}

#[derive(Args)]
struct BatchesArgs {
    collection: String,
    #[arg(long, default_value_t = 1_000)]
    batch_size: usize,
    #[arg(long)]
    max_batches: Option<usize>,
}

#[derive(Args)]
struct DoiSearchArgs {
    #[arg(long = "value")]
    doi_value: Option<String>,
    #[arg(long = "provider")]
    doi_provider: Option<DoiProvider>,
    #[arg(long = "category")]
    doi_category: Option<DoiCategory>,
    #[arg(long)]
    max_results: Option<usize>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<NmdcError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &NmdcError) -> u8 {
    exit_code_for(ErrorKind::of(error))
}

fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Request => 2,
        ErrorKind::Remote => 3,
        ErrorKind::Internal => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let config = ConfigLoader::resolve_config(config, cli.base_url.as_deref())?;
    tracing::debug!(base_url = %config.base_url, "resolved config");

    let client = NmdcHttpClient::new(&config)?;
    let app = App::new(client, config);
    run_command(&app, cli.command)
}

fn run_command<C: NmdcClient>(app: &App<C>, command: Commands) -> miette::Result<ExitCode> {
    match command {
        Commands::Elevation(args) => emit(app.samples_in_elevation_range(args.min, args.max)),
        Commands::Bbox(args) => emit(app.samples_within_lat_lon_bounding_box(
            args.lower_lat,
            args.upper_lat,
            args.lower_lon,
            args.upper_lon,
        )),
        Commands::Ecosystem(args) => {
            let query = EcosystemQuery {
                ecosystem_type: args.ecosystem_type,
                ecosystem_category: args.ecosystem_category,
                ecosystem_subtype: args.ecosystem_subtype,
            };
            emit(app.samples_by_ecosystem(&query, args.max_records))
        }
        Commands::Entity { id } => emit(app.entity_by_id(&id)),
        Commands::Entities(args) => emit(app.entities_by_ids_with_projection(
            &args.ids,
            &args.collection,
            args.projection,
        )),
        Commands::Collections => emit(app.collection_names()),
        Commands::Stats => emit(app.collection_stats()),
        Commands::RandomIds(args) => emit(app.random_collection_ids(
            &args.collection,
            args.sample_size,
            args.seed,
            args.filter,
        )),
        Commands::RandomRecords(args) => emit(app.random_records(
            &args.collection,
            args.sample_size,
            args.filter,
            args.projection,
            args.seed,
        )),
        Commands::Batches(args) => emit(app.collection_id_batches(
            &args.collection,
            args.batch_size,
            args.max_batches,
        )),
        Commands::StudyForBiosample { biosample_id } => {
            emit(app.study_for_biosample(&biosample_id))
        }
        Commands::DoiSearch(args) => emit(app.search_studies_by_doi(
            args.doi_value.as_deref(),
            args.doi_provider.as_ref().map(DoiProvider::as_str),
            args.doi_category.as_ref().map(DoiCategory::as_str),
            args.max_results,
        )),
    }
}

fn emit<T: Serialize>(result: ToolResult<T>) -> miette::Result<ExitCode> {
    JsonOutput::print_result(&result).into_diagnostic()?;
    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            tracing::warn!(error = %err.error, "request failed");
            Ok(ExitCode::from(exit_code_for(err.kind)))
        }
    }
}
