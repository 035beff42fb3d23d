//! forgesync — reconcile declared build-system objects against a hub.
//!
//! Usage:
//!   forgesync expand site/            → ingest + expand, print documents
//!   forgesync compare site/           → diff against the hub, no writes
//!   forgesync apply site/             → diff and apply ordered changes
//!   forgesync dump tag:f42-build ...  → render observed state as documents
//!   forgesync version                 → show version

use clap::{Parser, Subcommand};
use forgesync::format::{self, FormatOptions};
use forgesync::loader;
use forgesync_client::{HttpTransport, HubSession};
use forgesync_core::{ClientConfig, Key, RedefinePolicy, RunPolicies};
use forgesync_engine::{RunConfig, RunReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "forgesync",
    about = "Reconcile declared build-system configuration against a hub",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hub profile name from the config file
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Hub url (overrides the profile and FORGESYNC_HUB_URL)
    #[arg(long, global = true)]
    hub_url: Option<String>,

    /// Path to the client config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-batch deadline in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Redefinition policy: error, replace, warn, or skip
    #[arg(long, global = true, default_value = "error")]
    redefine: RedefinePolicy,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest and expand configuration, print the resulting documents
    Expand {
        /// Files or directories to load
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Emit fields whose value equals the kind's default
        #[arg(long)]
        show_defaults: bool,
    },
    /// Diff declared state against the hub without writing
    Compare {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Objects per multicall batch
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Accept undeclared references that already exist on the hub
        #[arg(long)]
        check_remote: bool,
        /// Also list objects with an empty diff
        #[arg(long)]
        show_unchanged: bool,
    },
    /// Apply ordered changes to the hub
    Apply {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Accept undeclared references that already exist on the hub
        #[arg(long)]
        check_remote: bool,
        /// Drop objects depending on undeclared keys instead of refusing
        #[arg(long)]
        skip_phantoms: bool,
        #[arg(long)]
        show_unchanged: bool,
    },
    /// Fetch observed state for the given kind:name keys
    Dump {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long)]
        show_defaults: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    let exit = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(exit);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Expand {
            ref paths,
            show_defaults,
        } => {
            let policies = RunPolicies {
                redefine: cli.redefine,
                include_defaults: show_defaults,
                ..RunPolicies::default()
            };
            let loaded = loader::load_paths(paths)?;
            let documents = forgesync_engine::expand(loaded.documents, &policies)?;
            print!("{}", format::format_documents(&documents));
            Ok(0)
        }

        Commands::Compare {
            ref paths,
            chunk_size,
            check_remote,
            show_unchanged,
        } => {
            let session = open_session(&cli)?;
            let policies = RunPolicies {
                redefine: cli.redefine,
                check_remote,
                ..RunPolicies::default()
            };
            let namespace = {
                let loaded = loader::load_paths(paths)?;
                forgesync_engine::build_namespace(loaded.documents, &policies)?
            };
            let config = run_config(policies, chunk_size);
            let run = forgesync_engine::compare(&namespace, &session, &config).await?;
            finish(run, show_unchanged)
        }

        Commands::Apply {
            ref paths,
            chunk_size,
            check_remote,
            skip_phantoms,
            show_unchanged,
        } => {
            let session = open_session(&cli)?;
            let policies = RunPolicies {
                redefine: cli.redefine,
                check_remote,
                skip_phantoms,
                ..RunPolicies::default()
            };
            let namespace = {
                let loaded = loader::load_paths(paths)?;
                forgesync_engine::build_namespace(loaded.documents, &policies)?
            };
            let config = run_config(policies, chunk_size);
            let run = forgesync_engine::apply(&namespace, &session, &config).await?;
            finish(run, show_unchanged)
        }

        Commands::Dump {
            ref keys,
            show_defaults,
        } => {
            let session = open_session(&cli)?;
            let keys = keys
                .iter()
                .map(|spec| {
                    Key::parse(spec).ok_or_else(|| {
                        anyhow::anyhow!("bad key `{}`, expected kind:name", spec)
                    })
                })
                .collect::<anyhow::Result<Vec<Key>>>()?;
            let policies = RunPolicies {
                include_defaults: show_defaults,
                ..RunPolicies::default()
            };
            let config = run_config(policies, None);
            let dump = forgesync_engine::dump(&keys, &session, &config).await?;
            print!("{}", format::format_documents(&dump.documents));
            for key in &dump.missing {
                eprintln!("warning: {} does not exist on the hub", key);
            }
            Ok(0)
        }

        Commands::Version => {
            println!("forgesync v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

/// Resolve profile + overrides into a live session.
fn open_session(cli: &Cli) -> anyhow::Result<HubSession> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::discover()?,
    };
    let mut profile = config.resolve(cli.profile.as_deref())?;

    if let Some(url) = &cli.hub_url {
        profile.url = Some(url.clone());
    } else if profile.url.is_none() {
        profile.url = std::env::var("FORGESYNC_HUB_URL").ok();
    }
    if let Some(timeout) = cli.timeout {
        profile.timeout_secs = Some(timeout);
    }

    let deadline = Duration::from_secs(profile.timeout_secs());
    let transport = HttpTransport::new(&profile)?;
    Ok(HubSession::new(Arc::new(transport), deadline))
}

fn run_config(policies: RunPolicies, chunk_size: Option<usize>) -> RunConfig {
    let cancel = CancellationToken::new();

    // ctrl-c stops between phases; an in-flight batch is never interrupted
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing the current batch");
            signal_cancel.cancel();
        }
    });

    RunConfig {
        policies,
        chunk_size: chunk_size.unwrap_or(forgesync_core::config::DEFAULT_CHUNK_SIZE),
        cancel,
    }
}

/// Print the run and map it to the exit-status contract: non-zero when any
/// object ended FAILED.
fn finish(run: RunReport, show_unchanged: bool) -> anyhow::Result<i32> {
    let opts = FormatOptions {
        show_unchanged,
        ..FormatOptions::default()
    };
    print!("{}", format::format_run(&run, &opts));
    Ok(if run.any_failed() { 1 } else { 0 })
}

fn init_tracing(log_file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forgesync=info,forgesync_engine=info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match log_file {
        Some(path) => {
            let appender = tracing_appender::rolling::never(
                std::path::Path::new(path)
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new(".")),
                std::path::Path::new(path)
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("forgesync.log")),
            );
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(appender)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
}
