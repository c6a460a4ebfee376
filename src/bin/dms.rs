use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dms_engine::command::{Database, SearchQuery};
use dms_engine::config::EngineConfig;
use dms_engine::error_sink::ErrorSink;
use dms_engine::storage::{
    DataAsset, FileSystem, LocalFileSystem, MetaAsset, RemoteStore, Resource, ResourceInfo,
};
use dms_engine::transaction::{drive, DownloadUsers, SearchResources};
use dms_engine::version::{InMemoryVersionAuthority, VersionId};
use dms_engine::work::{
    spawn_job, CheckoutResourceJob, CreateResourceJob, JobReport, JobState, UpdateUi,
    WorkRequestor, WorkServices,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dms", version, about = "Document store client")]
struct Cli {
    /// Config file (default: ~/.config/dms/config.toml)
    #[arg(long, global = true, env = "DMS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database host, overrides the config file
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database port, overrides the config file
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Debug output (repeat for more)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List users
    Users,

    /// Full-text search, current versions only
    Search(SearchArgs),

    /// Store a local file as a new resource
    Create(CreateArgs),

    /// Download one version into a local file
    Checkout(CheckoutArgs),
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Bound field values, `field=value`; `x_start` / `x_stop` form a range
    #[arg(value_name = "FIELD=VALUE")]
    fields: Vec<String>,

    #[arg(long, default_value_t = 25)]
    limit: u32,
}

#[derive(Args, Debug)]
struct CreateArgs {
    file: PathBuf,

    #[arg(long)]
    title: Option<String>,

    #[arg(long, default_value = "application/octet-stream")]
    content_type: String,
}

#[derive(Args, Debug)]
struct CheckoutArgs {
    version: String,
    dest: PathBuf,
}

/// Draws job progress on a terminal progress bar.
struct BarRequestor {
    bar: ProgressBar,
}

impl WorkRequestor for BarRequestor {
    fn work_report(&self, update_ui: &UpdateUi, job: &JobReport, resource: &ResourceInfo) {
        update_ui(job);
        if !job.is_final() {
            return;
        }
        match job.error {
            None if job.state == JobState::FINISHED => self.bar.finish_with_message(format!(
                "{} done",
                resource.version.map(|v| v.to_string()).unwrap_or_default()
            )),
            None => self.bar.abandon_with_message(job.state.to_string()),
            Some(code) => self.bar.abandon_with_message(format!("{}: {}", job.state, code)),
        }
    }
}

fn progress_bar() -> (Arc<BarRequestor>, UpdateUi) {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner} [{bar:40}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);

    let ui = bar.clone();
    let update_ui: UpdateUi = Arc::new(move |job: &JobReport| {
        if job.bytes_total > 0 {
            ui.set_length(job.bytes_total);
        }
        ui.set_position(job.bytes_complete);
    });
    (Arc::new(BarRequestor { bar }), update_ui)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = cli.config.clone().or_else(EngineConfig::default_path);
    let mut config = EngineConfig::load_or_default(path.as_deref())
        .context("Failed to load configuration")?;
    if let Some(host) = &cli.host {
        config.database.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.database.port = port;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn database(config: &EngineConfig) -> Result<Database> {
    Database::from_config(&config.database).context("Invalid database address")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;
    // The version store lives outside this engine; a process-local
    // authority serves standalone use.
    let versions = Arc::new(InMemoryVersionAuthority::new());

    match cli.command {
        Commands::Users => {
            let users_db =
                Database::users_from_config(&config.database).context("Invalid database address")?;
            let users = drive(DownloadUsers::new(users_db, config.connection.clone()), |_| {})
                .await
                .context("Failed to download users")?;
            print_json(&users)?;
        }

        Commands::Search(args) => {
            let mut bound = BTreeMap::new();
            for field in &args.fields {
                let Some((key, value)) = field.split_once('=') else {
                    bail!("Expected FIELD=VALUE, got '{}'", field);
                };
                bound.insert(key.to_string(), value.to_string());
            }
            let task = SearchResources::new(
                database(&config)?,
                config.connection.clone(),
                SearchQuery::from_bound(&bound),
                versions,
            )?
            .with_limit(args.limit);
            let rows = drive(task, |_| {}).await.context("Search failed")?;
            print_json(&rows)?;
        }

        Commands::Create(args) => {
            let dir = args
                .file
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = args
                .file
                .file_name()
                .map(PathBuf::from)
                .context("Expected a file path")?;
            let fs = Arc::new(LocalFileSystem::new(dir));
            let data = DataAsset::from_file(fs.as_ref(), &name)
                .await
                .with_context(|| format!("Cannot read {}", args.file.display()))?
                .with_content_type(args.content_type);

            let mut properties = Map::new();
            let title = args.title.unwrap_or_else(|| name.display().to_string());
            properties.insert("title".to_string(), Value::String(title));

            let services = services(&config, fs, versions)?;
            let errors = services.errors.clone();
            let job = CreateResourceJob::new(Resource::new(MetaAsset::new(properties), data), services);
            run_job(job, &errors).await?;
        }

        Commands::Checkout(args) => {
            let version = VersionId::parse(&args.version)?;
            let dir = args
                .dest
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = args
                .dest
                .file_name()
                .map(PathBuf::from)
                .context("Expected a destination file path")?;
            let fs = Arc::new(LocalFileSystem::new(dir));

            let services = services(&config, fs, versions)?;
            let errors = services.errors.clone();
            run_job(CheckoutResourceJob::new(version, name, services), &errors).await?;
        }
    }
    Ok(())
}

fn services(
    config: &EngineConfig,
    fs: Arc<dyn FileSystem>,
    versions: Arc<InMemoryVersionAuthority>,
) -> Result<WorkServices> {
    Ok(WorkServices {
        store: RemoteStore {
            database: database(config)?,
            connection: config.connection.clone(),
            fs,
        },
        versions,
        errors: ErrorSink::new(),
        job_timeout: config.jobs.timeout(),
    })
}

async fn run_job<J: dms_engine::work::Job>(job: J, errors: &ErrorSink) -> Result<()> {
    let (requestor, update_ui) = progress_bar();
    let handle = spawn_job(job, requestor, update_ui)?;

    // Ctrl-C asks the job to stop at its next step
    let ctx = handle.context();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctx.request_abort();
        }
    });
    let outcome = handle.join().await?;
    interrupt.abort();

    if outcome.is_finished() {
        print_json(&outcome.resource.info().version.map(|v| v.to_string()))?;
        return Ok(());
    }
    for record in errors.drain() {
        eprintln!("{}: {}", record.title, record.user_message);
    }
    bail!("Job ended in state {}", outcome.report.state)
}
