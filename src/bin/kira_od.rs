use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_omics_dashboard::analytics::{AnalyticsClient, HttpAnalyticsClient};
use kira_omics_dashboard::config::{ConfigLoader, ResolvedConfig};
use kira_omics_dashboard::domain::{GroupId, GroupPair, SortKey};
use kira_omics_dashboard::error::KiraError;
use kira_omics_dashboard::export::DirectorySink;
use kira_omics_dashboard::orchestrator::{CascadeOrchestrator, PrimaryOutcome};
use kira_omics_dashboard::output::{BiomarkerView, DeaView, JsonOutput, MetagenomicsView};
use kira_omics_dashboard::overview::{BiomarkerOverview, MetagenomicsOverview};

#[derive(Parser)]
#[command(name = "kira-od")]
#[command(about = "Multi-omics dashboard client: differential expression with a gated enrichment/PPI/drug cascade")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the study groups known to the analytics service")]
    Groups,
    #[command(about = "Run differential expression and its secondary cascade")]
    Dea(DeaArgs),
    #[command(about = "Show microbial composition and diversity")]
    Metagenomics,
    #[command(about = "Show gene-taxon correlation and PLS integration")]
    Biomarkers,
}

#[derive(Args)]
struct DeaArgs {
    group1: GroupId,

    group2: GroupId,

    /// Column to sort by; repeating the same column flips to descending.
    #[arg(long, value_enum)]
    sort: Vec<SortKey>,

    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Save the significant features as CSV.
    #[arg(long)]
    export: bool,

    #[arg(long)]
    export_dir: Option<Utf8PathBuf>,

    /// Print as soon as the primary query finishes.
    #[arg(long)]
    no_wait: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidGroup(_)
        | KiraError::InvalidSortKey(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::ConfigInvalid(_)
        | KiraError::NothingToExport => 2,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let client = HttpAnalyticsClient::new(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Groups => run_groups(&client).await,
            Commands::Dea(args) => run_dea(args, client, &config).await,
            Commands::Metagenomics => run_metagenomics(&client).await,
            Commands::Biomarkers => run_biomarkers(&client).await,
        }
    })
}

async fn run_groups(client: &HttpAnalyticsClient) -> miette::Result<()> {
    let summary = client.summary().await?;
    JsonOutput::print(&summary).into_diagnostic()
}

async fn run_dea(
    args: DeaArgs,
    client: HttpAnalyticsClient,
    config: &ResolvedConfig,
) -> miette::Result<()> {
    let orchestrator = CascadeOrchestrator::new(client, config.gate);
    for key in &args.sort {
        orchestrator.toggle_sort(*key);
    }

    let pair = GroupPair::new(args.group1, args.group2);
    let cascade = match orchestrator.run_primary_analysis(pair).await {
        PrimaryOutcome::Failed { error } => {
            let view = DeaView::build(&orchestrator.state(), orchestrator.gate(), args.top, None, None);
            JsonOutput::print(&view).into_diagnostic()?;
            return Err(error.into());
        }
        PrimaryOutcome::Superseded | PrimaryOutcome::NoSecondary => None,
        PrimaryOutcome::CascadeStarted(handle) if args.no_wait => {
            tracing::info!(generation = handle.generation(), "not waiting for cascade");
            None
        }
        PrimaryOutcome::CascadeStarted(handle) => Some(handle.settled().await?),
    };

    let export = if args.export {
        let sink = match args.export_dir.or_else(|| config.export_dir.clone()) {
            Some(dir) => DirectorySink::new(dir),
            None => DirectorySink::downloads()?,
        };
        Some(orchestrator.export_significant(&sink)?)
    } else {
        None
    };

    let view = DeaView::build(&orchestrator.state(), orchestrator.gate(), args.top, cascade, export);
    JsonOutput::print(&view).into_diagnostic()
}

async fn run_metagenomics(client: &HttpAnalyticsClient) -> miette::Result<()> {
    let overview = MetagenomicsOverview::load(client).await;
    JsonOutput::print(&MetagenomicsView::build(&overview)).into_diagnostic()
}

async fn run_biomarkers(client: &HttpAnalyticsClient) -> miette::Result<()> {
    let overview = BiomarkerOverview::load(client).await;
    JsonOutput::print(&BiomarkerView::build(&overview)).into_diagnostic()
}
