//! Exam proctor server entry point.
//!
//! Wires the storage, network and discovery adapters to one [`Dashboard`]
//! and serves student connections until Ctrl+C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config (TOML file + CLI overrides)
//!  └─ FileRowStore         -- tests, classes, students, answers
//!  └─ Dashboard            -- state machine, timer, sessions
//!       ├─ UdpDiscoveryBroadcaster (thread, only while HOSTING)
//!       └─ FileTokenArchive        (one file per hosting round)
//!  └─ TcpAcceptor          -- one tokio task per student connection
//!  └─ change logger        -- logs every dashboard change
//! ```
//!
//! Without a UI attached, `--test` and `--class` select and host a round
//! straight from the command line.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use proctor_server::application::content::{ExamContent, TestSelector};
use proctor_server::application::dashboard::{Dashboard, DashboardSettings};
use proctor_server::infrastructure::network::acceptor::TcpAcceptor;
use proctor_server::infrastructure::network::discovery::{BroadcastConfig, UdpDiscoveryBroadcaster};
use proctor_server::infrastructure::network::interfaces::{listen_address, resolve_bind_address};
use proctor_server::infrastructure::storage::config::{config_file_path, load_config_from, AppConfig};
use proctor_server::infrastructure::storage::row_store::FileRowStore;
use proctor_server::infrastructure::storage::token_archive::FileTokenArchive;
use proctor_server::infrastructure::ui_bridge;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Classroom exam server.
///
/// Hands out tasks to student clients on the LAN, collects their answers and
/// enforces the exam clock.
#[derive(Debug, Parser)]
#[command(name = "proctor-server", about = "Live proctored-exam server", version)]
struct Cli {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Exam data file (overrides `storage.data_file`).
    #[arg(long, env = "PROCTOR_DATA")]
    data: Option<PathBuf>,

    /// TCP port for student connections (overrides `network.tcp_port`).
    #[arg(long, env = "PROCTOR_PORT")]
    port: Option<u16>,

    /// `auto` or an IPv4 address (overrides `network.bind_address`).
    #[arg(long, env = "PROCTOR_BIND")]
    bind: Option<String>,

    /// Test to select at startup, by numeric id or exact name.
    #[arg(long)]
    test: Option<String>,

    /// Class to host the selected test for.  Requires `--test`.
    #[arg(long, requires = "test")]
    class: Option<i64>,

    /// Exam duration in minutes; 0 means untimed.
    #[arg(long, default_value_t = 0)]
    minutes: u64,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(data) = &self.data {
            config.storage.data_file = data.clone();
        }
        if let Some(port) = self.port {
            config.network.tcp_port = port;
        }
        if let Some(bind) = &self.bind {
            config.network.bind_address = bind.clone();
        }
    }

    fn test_selector(&self) -> Option<TestSelector> {
        self.test.as_deref().map(|t| match t.trim().parse::<i64>() {
            Ok(id) => TestSelector::Id(id),
            Err(_) => TestSelector::Name(t.to_string()),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("locating the configuration file")?,
    };
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    cli.apply_to(&mut config);
    config.validate().context("validating configuration")?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("exam server starting (config {})", config_path.display());

    // ── Storage ───────────────────────────────────────────────────────────────
    let store = FileRowStore::open(&config.storage.data_file).with_context(|| {
        format!("opening exam data {}", config.storage.data_file.display())
    })?;
    let content = ExamContent::new(Arc::new(store));

    // ── Network addresses ─────────────────────────────────────────────────────
    // The listener binds the same address that discovery advertises.
    let advertised_ip = resolve_bind_address(&config.network.bind_address)?;
    let listen_addr = listen_address(advertised_ip, config.network.tcp_port);

    let broadcaster = UdpDiscoveryBroadcaster::new(BroadcastConfig {
        target: SocketAddr::new(
            IpAddr::V4(config.network.broadcast_ip()?),
            config.network.discovery_port,
        ),
        bind_ip: Ipv4Addr::UNSPECIFIED,
        interval: Duration::from_millis(config.network.discovery_interval_ms),
    });

    // ── Dashboard ─────────────────────────────────────────────────────────────
    let dashboard = Dashboard::new(
        DashboardSettings {
            server_name: config.server.name.clone(),
            description: config.server.description.clone(),
            advertised_ip,
            tcp_port: config.network.tcp_port,
            tick_interval: Duration::from_millis(config.exam.tick_interval_ms),
        },
        content,
        Arc::new(broadcaster),
        Arc::new(FileTokenArchive::new(config.storage.token_dir.clone())),
    );

    let running = Arc::new(AtomicBool::new(true));
    let acceptor = TcpAcceptor::bind(
        listen_addr,
        Arc::clone(&dashboard),
        Arc::clone(&running),
    )
    .await?;
    let acceptor_task = tokio::spawn(acceptor.run());

    spawn_change_logger(Arc::clone(&dashboard));

    // ── Headless round ────────────────────────────────────────────────────────
    if let Some(selector) = cli.test_selector() {
        let test = dashboard
            .select_test(selector)
            .await
            .context("selecting the test given with --test")?;
        info!("selected \"{}\"", test.name);

        if let Some(class_id) = cli.class {
            let issued = dashboard
                .prepare_hosting(class_id, cli.minutes)
                .await
                .context("hosting the class given with --class")?;
            for holder in &issued {
                info!("token {} -> {}", holder.token, holder.full_name());
            }
        }
    }

    info!("exam server ready on port {}.  Press Ctrl-C to exit.", config.network.tcp_port);

    // ── Shutdown ──────────────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C signal: {e}");
    }
    info!("shutdown signal received");
    running.store(false, Ordering::Relaxed);
    dashboard.shutdown().await;
    if let Err(e) = acceptor_task.await {
        error!("accept loop failed: {e}");
    }

    info!("exam server stopped");
    Ok(())
}

/// Logs a one-line summary whenever the dashboard reports a change.
fn spawn_change_logger(dashboard: Arc<Dashboard>) {
    let mut changes = dashboard.subscribe_changes();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let snapshot = ui_bridge::get_snapshot(Arc::clone(&dashboard)).await;
            let Some(snapshot) = snapshot.data else {
                continue;
            };
            let raised = snapshot.clients.iter().filter(|c| c.hand_raised).count();
            info!(
                "dashboard {}: {} client(s), {} raised hand(s), {} warning(s), {} left",
                snapshot.state.state,
                snapshot.clients.len(),
                raised,
                snapshot.warnings.len(),
                snapshot.timer.remaining_text
            );
            if let Ok(json) = serde_json::to_string(&snapshot) {
                debug!("snapshot {json}");
            }
        }
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
