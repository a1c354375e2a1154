use std::collections::BTreeSet;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_geoextent::app::{App, TracingProgress};
use kira_geoextent::config::{ConfigLoader, ExtractionOptions, parse_size_limit};
use kira_geoextent::domain::DownloadMethod;
use kira_geoextent::error::GeoextentError;
use kira_geoextent::output::{ExtentResult, JsonOutput};

#[derive(Parser)]
#[command(name = "kira-ge")]
#[command(about = "Spatial and temporal extents for remote research datasets")]
#[command(version, author)]
struct Cli {
    /// Print only JSON; no progress or summary on stderr.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Extract the extent of one dataset (DOI, URL or repository identifier)")]
    Extract(ExtractArgs),
    #[command(about = "List configured repository adapters")]
    Providers,
}

#[derive(Args)]
struct ExtractArgs {
    reference: String,

    /// Download data files and derive the extent from them when possible.
    #[arg(long)]
    download_data: bool,

    /// Byte budget for downloads, e.g. 500, 10K, 2MB, 1.5GiB.
    #[arg(long)]
    max_size: Option<String>,

    #[arg(long, value_enum, default_value_t = DownloadMethod::Ordered)]
    method: DownloadMethod,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Skip files that do not look geospatial.
    #[arg(long)]
    skip_nogeo: bool,

    /// Extra extensions to keep with --skip-nogeo.
    #[arg(long = "skip-nogeo-ext", value_name = "EXT")]
    skip_nogeo_ext: Vec<String>,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long)]
    convex_hull: bool,

    #[arg(long, default_value = ".")]
    output: Utf8PathBuf,

    /// End-to-end time limit in seconds.
    #[arg(long)]
    timeout: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GeoextentError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeoextentError) -> u8 {
    match error {
        GeoextentError::Validation(_)
        | GeoextentError::AmbiguousReference { .. }
        | GeoextentError::NotFound(_)
        | GeoextentError::InvalidOption(_)
        | GeoextentError::ConfigRead(_)
        | GeoextentError::ConfigParse(_) => 2,
        GeoextentError::Upstream(_)
        | GeoextentError::UpstreamStatus { .. }
        | GeoextentError::RestrictedAccess(_)
        | GeoextentError::Timeout(_) => 3,
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
    let settings = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(settings)?;

    match cli.command {
        Commands::Extract(args) => run_extract(args, &app, cli.non_interactive),
        Commands::Providers => {
            JsonOutput::print_providers(&app.providers()).into_diagnostic()?;
            Ok(())
        }
    }
}

fn run_extract(args: ExtractArgs, app: &App, non_interactive: bool) -> miette::Result<()> {
    let max_size_bytes = args
        .max_size
        .as_deref()
        .map(parse_size_limit)
        .transpose()?;
    let options = ExtractionOptions {
        download_data: args.download_data,
        max_size_bytes,
        max_download_method: args.method,
        max_download_method_seed: args.seed,
        download_skip_nogeo: args.skip_nogeo,
        download_skip_nogeo_exts: args.skip_nogeo_ext.into_iter().collect::<BTreeSet<_>>(),
        max_download_workers: args.workers,
        convex_hull: args.convex_hull,
        timeout: args.timeout.map(Duration::from_secs),
    };

    let result = if non_interactive {
        app.extract(&args.reference, &options, &args.output, &JsonOutput)?
    } else {
        app.extract(&args.reference, &options, &args.output, &TracingProgress)?
    };
    JsonOutput::print_extent(&result).into_diagnostic()?;
    if !non_interactive {
        print_summary(&result);
    }
    Ok(())
}

fn print_summary(result: &ExtentResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    eprintln!("{cyan}KIRA-GE {} {}{reset}", result.source, result.dataset_id);
    if let Some(title) = &result.title {
        eprintln!("{cyan}   {title}{reset}");
    }
    match result.bbox {
        Some([west, south, east, north]) => {
            eprintln!("{green}   bbox: {west}, {south}, {east}, {north}{reset}")
        }
        None => eprintln!("{yellow}   bbox: not available{reset}"),
    }
    match &result.tbox {
        Some([start, end]) => eprintln!("{green}   tbox: {start} .. {end}{reset}"),
        None => eprintln!("{yellow}   tbox: not available{reset}"),
    }
    eprintln!(
        "{cyan}   strategy: {} ({} files){reset}",
        result.strategy,
        result.files.len()
    );
    if let Some(path) = &result.output {
        eprintln!("{cyan}   feature: {path}{reset}");
    }
}
