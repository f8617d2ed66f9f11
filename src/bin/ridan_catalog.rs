use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ridan_catalog::app::{CatalogManager, download_settings};
use ridan_catalog::config::{ConfigLoader, ResolvedConfig};
use ridan_catalog::domain::ExportFormat;
use ridan_catalog::download::{Downloader, FetchOutcome, HttpExportTransport};
use ridan_catalog::error::CatalogError;
use ridan_catalog::output::JsonOutput;

#[derive(Parser)]
#[command(name = "ridan-catalog")]
#[command(about = "Local mirror of the Ridan product catalog")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    download_path: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    database_path: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    format: Option<ExportFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the export if stale, then import it")]
    Update(UpdateArgs),
    #[command(about = "Download the export if stale")]
    Download(DownloadArgs),
    #[command(about = "Import a local spreadsheet")]
    Import(ImportArgs),
    #[command(about = "Show the cached export file")]
    Info,
    #[command(about = "Show row counts and store size")]
    Stats,
    #[command(about = "Look up one product by material code")]
    Product(ProductArgs),
    #[command(about = "List products, optionally excluding material codes")]
    List(ListArgs),
    #[command(about = "List distinct series")]
    Series,
    #[command(about = "List distinct subcategories")]
    Subcategories,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long)]
    force: bool,

    #[arg(long)]
    reset: bool,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ImportArgs {
    file: PathBuf,

    #[arg(long)]
    reset: bool,
}

#[derive(Args)]
struct ProductArgs {
    material: String,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long = "exclude", value_name = "MATERIAL")]
    exclude: Vec<String>,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = 20)]
    per_page: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::MissingConfig
        | CatalogError::ConfigRead(_)
        | CatalogError::ConfigParse(_)
        | CatalogError::MissingSetting(_)
        | CatalogError::InvalidDomain(_)
        | CatalogError::UnknownCategory(_) => 2,
        CatalogError::DownloadFailed(_)
        | CatalogError::Http(_)
        | CatalogError::HttpStatus { .. }
        | CatalogError::MalformedPage(_)
        | CatalogError::MissingToken(_)
        | CatalogError::UnexpectedContentType(_)
        | CatalogError::EmptyDownload(_) => 3,
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
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(path) = cli.download_path {
        config.download_path = path;
    }
    if let Some(path) = cli.database_path {
        config.database_path = path;
    }
    if let Some(format) = cli.format {
        config.export_format = format;
    }

    match cli.command {
        Commands::Download(args) => {
            let downloader = downloader(&config)?;
            let outcome = if args.force {
                downloader
                    .force_refetch()
                    .map(FetchOutcome::Downloaded)
            } else {
                downloader.fetch_if_needed()
            }
            .map_err(|err| CatalogError::DownloadFailed(Box::new(err)))?;
            JsonOutput::print_download(&outcome).into_diagnostic()?;
        }
        Commands::Info => {
            let downloader = downloader(&config)?;
            let info = downloader.file_info();
            JsonOutput::print_file_info(config.download_path.as_str(), info.as_ref())
                .into_diagnostic()?;
        }
        command => run_with_store(command, &config)?,
    }
    Ok(())
}

fn run_with_store(command: Commands, config: &ResolvedConfig) -> miette::Result<()> {
    let mut manager = CatalogManager::from_config(config)?;
    match command {
        Commands::Update(args) => {
            let stats = manager.update_and_import(args.force, args.reset)?;
            JsonOutput::print_stats(&stats).into_diagnostic()?;
        }
        Commands::Import(args) => {
            let stats = manager.process_file(&args.file, args.reset)?;
            JsonOutput::print_stats(&stats).into_diagnostic()?;
        }
        Commands::Stats => {
            let stats = manager.database_stats()?;
            JsonOutput::print_stats(&stats).into_diagnostic()?;
        }
        Commands::Product(args) => {
            let product = manager.find_product(&args.material)?;
            JsonOutput::print_product(&args.material, product.as_ref()).into_diagnostic()?;
        }
        Commands::List(args) => {
            let page = manager.find_products_excluding(&args.exclude, args.page, args.per_page)?;
            JsonOutput::print_page(&page).into_diagnostic()?;
        }
        Commands::Series => {
            let values = manager.unique_series()?;
            JsonOutput::print_values(&values).into_diagnostic()?;
        }
        Commands::Subcategories => {
            let values = manager.unique_subcategories()?;
            JsonOutput::print_values(&values).into_diagnostic()?;
        }
        Commands::Download(_) | Commands::Info => {}
    }
    Ok(())
}

fn downloader(config: &ResolvedConfig) -> Result<Downloader<HttpExportTransport>, CatalogError> {
    let transport =
        HttpExportTransport::new(&config.base_domain, config.connect_timeout, config.timeout)?;
    Ok(Downloader::new(transport, download_settings(config)))
}
