use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hydroviewer::app::{App, ProgressEvent};
use hydroviewer::config::{ConfigLoader, ResolvedConfig};
use hydroviewer::domain::{ForecastDate, RetroResolution, RiverId};
use hydroviewer::ensemble::{ExceedanceTable, STEPS_PER_DAY, exceedance_table};
use hydroviewer::error::HydroError;
use hydroviewer::geoglows::GeoglowsHttpClient;
use hydroviewer::output::{JsonOutput, OutputMode};
use hydroviewer::report::{BatchOrchestrator, BatchTask, FailurePolicy};
use hydroviewer::retro::{RetroAnalytics, analyze};
use hydroviewer::series::{EnsembleSeries, RetrospectiveSeries};
use hydroviewer::store::CacheStore;
use hydroviewer::zarr::ZarrHttpClient;

type HttpApp = App<ZarrHttpClient, GeoglowsHttpClient>;

#[derive(Parser)]
#[command(name = "hydroviewer")]
#[command(about = "River discharge forecasts, retrospective simulations and return periods")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch the ensemble forecast of a river")]
    Forecast(ForecastArgs),
    #[command(about = "Fetch the retrospective simulation of a river")]
    Retro(RetroArgs),
    #[command(about = "Fetch the return-period magnitudes of a river")]
    ReturnPeriods(ReturnPeriodsArgs),
    #[command(about = "Check that a river id exists")]
    Validate(ValidateArgs),
    #[command(about = "Fetch forecasts and return periods for many rivers")]
    Report(ReportArgs),
    #[command(about = "Manage the local cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct ForecastArgs {
    river: String,

    #[arg(long)]
    date: String,

    #[arg(long)]
    corrected: bool,

    /// Also report the share of members exceeding each return period per day.
    #[arg(long)]
    exceedance: bool,
}

#[derive(Args)]
struct RetroArgs {
    river: String,

    #[arg(long)]
    corrected: bool,

    #[arg(long, value_enum, default_value_t = RetroResolution::Daily)]
    resolution: RetroResolution,

    #[arg(long)]
    analytics: bool,
}

#[derive(Args)]
struct ReturnPeriodsArgs {
    river: String,

    #[arg(long)]
    corrected: bool,
}

#[derive(Args)]
struct ValidateArgs {
    river: String,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    date: String,

    /// Rivers to include; defaults to the configured river list.
    #[arg(long = "river")]
    rivers: Vec<String>,

    #[arg(long, value_enum)]
    policy: Option<FailurePolicy>,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete every cached entry")]
    Clear,
}

#[derive(Serialize)]
struct ForecastView<'a> {
    forecast: &'a EnsembleSeries,
    exceedance: ExceedanceTable,
}

#[derive(Serialize)]
struct RetroView<'a> {
    series: &'a RetrospectiveSeries,
    analytics: RetroAnalytics,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HydroError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HydroError) -> u8 {
    match error {
        HydroError::MissingConfig
        | HydroError::ConfigRead(_)
        | HydroError::ConfigParse(_)
        | HydroError::InvalidConfig(_) => 2,
        error if error.is_validation() => 2,
        error if error.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Forecast(args) => run_forecast(args, &build_app(&config)?),
        Commands::Retro(args) => run_retro(args, &build_app(&config)?),
        Commands::ReturnPeriods(args) => {
            let app = build_app(&config)?;
            let river_id: RiverId = args.river.parse()?;
            let table = app.get_return_periods(river_id, args.corrected)?;
            JsonOutput::print(&table).into_diagnostic()
        }
        Commands::Validate(args) => {
            let app = build_app(&config)?;
            let river_id: RiverId = args.river.parse()?;
            let result = app.validate_river(river_id)?;
            JsonOutput::print(&result).into_diagnostic()
        }
        Commands::Report(args) => run_report(args, &config, output_mode),
        Commands::Cache(CacheArgs {
            command: CacheCommand::Clear,
        }) => {
            let app = build_app(&config)?;
            let result = app.clear_cache()?;
            JsonOutput::print(&result).into_diagnostic()
        }
    }
}

fn build_app(config: &ResolvedConfig) -> Result<HttpApp, HydroError> {
    let root = match &config.cache_dir {
        Some(dir) => Utf8PathBuf::from(dir),
        None => CacheStore::default_root()?,
    };
    let store = CacheStore::new_with_root(root, config.cache_capacity);
    store.open()?;
    let zarr = ZarrHttpClient::new();
    let rest = GeoglowsHttpClient::new(config.rest_endpoint.clone(), config.http)?;
    Ok(App::new(store, zarr, rest, config.urls.clone()))
}

fn run_forecast(args: ForecastArgs, app: &HttpApp) -> miette::Result<()> {
    let river_id: RiverId = args.river.parse()?;
    let date: ForecastDate = args.date.parse()?;
    let forecast = app.get_forecast(river_id, &date, args.corrected)?;
    if !args.exceedance {
        return JsonOutput::print(&forecast).into_diagnostic();
    }
    let return_periods = app.get_return_periods(river_id, args.corrected)?;
    let view = ForecastView {
        exceedance: exceedance_table(&forecast, &return_periods, STEPS_PER_DAY),
        forecast: &forecast,
    };
    JsonOutput::print(&view).into_diagnostic()
}

fn run_retro(args: RetroArgs, app: &HttpApp) -> miette::Result<()> {
    let river_id: RiverId = args.river.parse()?;
    let series = match (args.resolution, args.corrected) {
        (RetroResolution::Daily, corrected) => app.get_retrospective(river_id, corrected)?,
        (resolution, false) => app.fetch_retrospective(river_id, resolution)?,
        (resolution, true) => {
            return Err(HydroError::InvalidResolution(format!(
                "{resolution} (bias-corrected series are daily only)"
            ))
            .into());
        }
    };
    if !args.analytics {
        return JsonOutput::print(&series).into_diagnostic();
    }
    let view = RetroView {
        analytics: analyze(&series),
        series: &series,
    };
    JsonOutput::print(&view).into_diagnostic()
}

fn run_report(
    args: ReportArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let date: ForecastDate = args.date.parse()?;
    let river_ids: Vec<RiverId> = if args.rivers.is_empty() {
        config.rivers.iter().map(|river| river.id).collect()
    } else {
        args.rivers
            .iter()
            .map(|value| value.parse::<RiverId>())
            .collect::<Result<Vec<_>, HydroError>>()?
    };
    if river_ids.is_empty() {
        return Err(HydroError::InvalidConfig(
            "no rivers given and none configured for the report".to_string(),
        )
        .into());
    }

    let tasks: Vec<BatchTask> = river_ids
        .into_iter()
        .map(|river_id| BatchTask::new(river_id, date.clone()))
        .collect();
    let policy = args.policy.unwrap_or(config.failure_policy);
    let orchestrator = BatchOrchestrator::new(config.pool_size, policy, |_worker| build_app(config));

    let sink = output_mode.sink();
    info!(rivers = tasks.len(), date = %date, "starting report");
    let report = orchestrator.run(tasks, sink.as_ref())?;
    let summary = report.summary();
    sink.event(ProgressEvent {
        message: format!(
            "report finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        ),
        elapsed: None,
    });
    JsonOutput::print(&summary).into_diagnostic()
}
