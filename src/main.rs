// Request Throttle - CLI Entry Point
//
// Inspects and drives a persisted request throttle:
// - admission checks and recorded requests
// - status and localized limit messages
// - maintenance (cleanup, reset)
// - session role management
// - per-run Prometheus metrics (--print-metrics)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use request_throttle::config::Config;
use request_throttle::metrics;
use request_throttle::throttle::{
    DashboardBuilder, FileStore, FixedRole, KeyValueStore, Locale, MemoryStore, RequestThrottle,
    Role, RoleSource, SessionRoleSource, SystemClock, ThrottleStatus,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Exit status for a denied check, request or wait
const EXIT_DENIED: u8 = 2;

/// Advisory per-role request throttle
#[derive(Parser, Debug)]
#[command(name = "request-throttle")]
#[command(version)]
#[command(about = "Advisory per-role request throttle", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file, overriding the configured one
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Act as this role instead of reading the stored session
    #[arg(long, global = true)]
    role: Option<Role>,

    /// Message language (ar, en)
    #[arg(long, global = true, default_value = "ar")]
    lang: Locale,

    /// Print Prometheus metrics for this run after the command
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a request may proceed, without recording it
    Check { endpoint: Option<String> },
    /// Record a request if the quota allows it
    Request { endpoint: Option<String> },
    /// Show quota usage for an endpoint
    Status {
        endpoint: Option<String>,

        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wait until a request may proceed
    Wait {
        endpoint: Option<String>,

        /// Give up after this many milliseconds (default from config)
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },
    /// Drop expired records and freezes
    Cleanup,
    /// Forget recorded requests
    Reset {
        endpoint: Option<String>,

        /// Reset every role and endpoint
        #[arg(long)]
        all: bool,
    },
    /// Store a session for the given role
    Login {
        #[arg(value_name = "ROLE")]
        as_role: Role,
    },
    /// Remove the stored session
    Logout,
    /// Print a usage snapshot of every tracked key as JSON
    Dashboard,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(&config, args.verbose)?;
    metrics::init().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let store = open_store(&config, args.store.clone())?;
    let roles: Arc<dyn RoleSource> = match args.role {
        Some(role) => Arc::new(FixedRole(role)),
        None => Arc::new(SessionRoleSource::with_keys(
            store.clone(),
            &config.session.user_key,
            &config.session.role_key,
        )),
    };
    let throttle = RequestThrottle::new(
        config.throttle.clone(),
        store.clone(),
        Arc::new(SystemClock),
        roles,
    );

    debug!(role = %throttle.resolve_role(), "Throttle ready");

    let admitted = match args.command {
        Commands::Check { endpoint } => {
            let allowed = throttle.can_make_request(endpoint.as_deref());
            report_admission(&throttle, endpoint.as_deref(), allowed, args.lang);
            allowed
        }
        Commands::Request { endpoint } => {
            let allowed = throttle.make_request(endpoint.as_deref());
            report_admission(&throttle, endpoint.as_deref(), allowed, args.lang);
            allowed
        }
        Commands::Status { endpoint, json } => {
            let status = throttle.get_status(endpoint.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status, throttle.now_ms(), args.lang);
            }
            true
        }
        Commands::Wait {
            endpoint,
            max_wait_ms,
        } => {
            let max_wait = max_wait_ms.map(Duration::from_millis);
            let allowed = throttle
                .wait_for_available_slot(endpoint.as_deref(), max_wait)
                .await;
            report_admission(&throttle, endpoint.as_deref(), allowed, args.lang);
            allowed
        }
        Commands::Cleanup => {
            let report = throttle.cleanup();
            println!(
                "scanned {} keys, removed {}, compacted {}",
                report.scanned, report.removed, report.compacted
            );
            true
        }
        Commands::Reset { endpoint, all } => {
            if all {
                let removed = throttle.reset_all();
                println!("removed {} keys", removed);
            } else {
                throttle.reset(endpoint.as_deref());
                println!("reset {}", throttle.resolve_role());
            }
            true
        }
        Commands::Login { as_role: role } => {
            let user = json!({ "role": role });
            store
                .set(&config.session.user_key, &user.to_string())
                .context("Failed to store session")?;
            info!(%role, "Session stored");
            println!("logged in as {}", role);
            true
        }
        Commands::Logout => {
            store
                .remove(&config.session.user_key)
                .and_then(|_| store.remove(&config.session.role_key))
                .context("Failed to remove session")?;
            println!("logged out");
            true
        }
        Commands::Dashboard => {
            let dashboard = DashboardBuilder::new(throttle).build();
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
            true
        }
    };

    if args.print_metrics {
        print!("{}", metrics::gather_metrics()?);
    }

    Ok(if admitted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DENIED)
    })
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn open_store(config: &Config, override_path: Option<PathBuf>) -> Result<Arc<dyn KeyValueStore>> {
    if override_path.is_none() && config.storage.backend.eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = override_path.unwrap_or_else(|| config.state_path());
    let store = FileStore::open(&path)
        .with_context(|| format!("Failed to open throttle state at {:?}", path))?;
    debug!(path = ?store.path(), "Opened file store");
    Ok(Arc::new(store))
}

fn report_admission(
    throttle: &RequestThrottle,
    endpoint: Option<&str>,
    allowed: bool,
    lang: Locale,
) {
    if allowed {
        println!("allowed");
    } else {
        let status = throttle.get_status(endpoint);
        println!("denied: {}", status.limit_message(throttle.now_ms(), lang));
    }
}

fn print_status(status: &ThrottleStatus, now_ms: i64, lang: Locale) {
    println!("role:      {}", status.role);
    println!(
        "endpoint:  {}",
        status.endpoint.as_deref().unwrap_or("(any)")
    );
    println!("used:      {}/{}", status.current, status.limit);
    println!("remaining: {}", status.remaining);
    if let Some(reset_at) = status.reset_at() {
        println!("resets at: {}", reset_at.to_rfc3339());
    }
    if let Some(until) = status.freeze_end_time {
        println!("frozen until: {}", until);
    }
    println!("{}", status.limit_message(now_ms, lang));
}
