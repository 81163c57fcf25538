use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hwcloud_provider::cloud::client::CloudClient;
use hwcloud_provider::cloud::http::{error_hint, format_api_error};
use hwcloud_provider::config::Config;
use hwcloud_provider::resource::{
    all_resource_types, get_kind, Lifecycle, ResourceData, ResourceKind, Timeouts,
};
use hwcloud_provider::VERSION;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Manage Huawei Cloud ER, SMS and VPC resources
#[derive(Parser, Debug)]
#[command(name = "hwcloud", version, about, long_about = None)]
struct Args {
    /// Region to use (overrides HW_REGION_NAME)
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Timeout in seconds for every phase, instead of the resource defaults
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported resource types
    Types,
    /// Create a resource from a JSON record ("-" reads stdin)
    Create { file: PathBuf },
    /// Refresh a resource record
    Read { file: PathBuf },
    /// Update a resource from its current record to a desired one
    Update { current: PathBuf, desired: PathBuf },
    /// Delete the resource described by a record
    Delete { file: PathBuf },
    /// Persist default settings
    Configure {
        #[arg(long)]
        cloud: Option<String>,
        #[arg(long)]
        project_id: Option<String>,
        /// Endpoint override as SERVICE=URL, may be repeated
        #[arg(long = "endpoint", value_parser = parse_endpoint)]
        endpoints: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(service, url)| !service.is_empty() && !url.is_empty())
        .map(|(service, url)| (service.to_string(), url.to_string()))
        .ok_or_else(|| format!("expected SERVICE=URL, got '{}'", raw))
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(tracing_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("hwcloud {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("hwcloud").join("hwcloud.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".hwcloud").join("hwcloud.log");
    }
    PathBuf::from("hwcloud.log")
}

fn read_record(path: &Path) -> Result<ResourceData> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read record from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
    };

    serde_json::from_str(&content).with_context(|| format!("Invalid resource record in {:?}", path))
}

fn resolve_kind(record: &ResourceData) -> Result<Box<dyn ResourceKind>> {
    get_kind(&record.resource_type).with_context(|| {
        format!(
            "Unsupported resource type '{}'. Run `hwcloud types` for the supported ones",
            record.resource_type
        )
    })
}

fn print_record(record: &ResourceData) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

/// Cancel in-flight waits on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

async fn run(args: Args, mut config: Config) -> Result<()> {
    let lifecycle = || -> Result<Lifecycle> {
        let client = CloudClient::new(&config)?;
        let mut lifecycle = Lifecycle::new(client).with_cancellation(cancel_on_ctrl_c());
        if let Some(secs) = args.timeout {
            lifecycle = lifecycle.with_timeouts(Timeouts::uniform(Duration::from_secs(secs)));
        }
        Ok(lifecycle)
    };

    match &args.command {
        Command::Types => {
            for name in all_resource_types() {
                match get_kind(name) {
                    Some(kind) => println!("{:<20} {}", name, kind.display_name()),
                    None => println!("{}", name),
                }
            }
        }
        Command::Create { file } => {
            let record = read_record(file)?;
            let kind = resolve_kind(&record)?;
            let created = lifecycle()?.create(kind.as_ref(), record).await?;
            print_record(&created)?;
        }
        Command::Read { file } => {
            let record = read_record(file)?;
            let kind = resolve_kind(&record)?;
            match lifecycle()?.read(kind.as_ref(), record).await? {
                Some(current) => print_record(&current)?,
                None => {
                    eprintln!("Resource no longer exists");
                    std::process::exit(2);
                }
            }
        }
        Command::Update { current, desired } => {
            let current = read_record(current)?;
            let desired = read_record(desired)?;
            anyhow::ensure!(
                current.resource_type == desired.resource_type,
                "Cannot change resource type from {} to {}",
                current.resource_type,
                desired.resource_type
            );
            let kind = resolve_kind(&current)?;
            let updated = lifecycle()?.update(kind.as_ref(), &current, desired).await?;
            print_record(&updated)?;
        }
        Command::Delete { file } => {
            let record = read_record(file)?;
            let kind = resolve_kind(&record)?;
            lifecycle()?.delete(kind.as_ref(), &record).await?;
        }
        Command::Configure {
            cloud,
            project_id,
            endpoints,
        } => {
            if let Some(cloud) = cloud {
                config.cloud = Some(cloud.clone());
            }
            if let Some(project_id) = project_id {
                config.project_id = Some(project_id.clone());
            }
            config.endpoints.extend(endpoints.iter().cloned());
            match args.region.as_deref() {
                Some(region) => config.set_region(region)?,
                None => config.save()?,
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut config = Config::load();
    if let Some(region) = args.region.as_deref() {
        config.region = Some(region.to_string());
    }

    if let Err(err) = run(args, config).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", format_api_error(&err));
        if let Some(hint) = error_hint(&err) {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}
