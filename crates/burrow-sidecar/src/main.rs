use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow::{LocalBackend, LocalBackendConfig};
use burrow_sidecar::{AppState, routes};

#[derive(Parser, Debug)]
#[command(name = "burrow-sidecar")]
#[command(about = "Sidecar daemon for sandboxed agent execution")]
#[command(version)]
struct Cli {
    /// Unix socket path to listen on
    #[arg(short, long, env = "BURROW_SOCKET")]
    socket: Option<PathBuf>,

    /// TCP address to listen on instead of a socket (host:port)
    #[arg(short, long, env = "BURROW_BIND")]
    bind: Option<String>,

    /// Workspace root all operations are sandboxed to
    #[arg(short, long, env = "BURROW_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Share one workspace across execution targets instead of namespacing
    /// a subdirectory per target
    #[arg(
        long,
        env = "BURROW_SHARED_WORKSPACE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    shared_workspace: bool,

    /// Bearer token required on every request
    #[arg(short, long, env = "BURROW_TOKEN")]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "BURROW_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "burrow_sidecar=debug,burrow=debug,tower_http=debug"
    } else {
        "burrow_sidecar=info,burrow=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.socket.is_some() && cli.bind.is_some() {
        bail!("--socket and --bind are mutually exclusive");
    }

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());
    if !workspace.is_dir() {
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("creating workspace {}", workspace.display()))?;
    }
    info!("serving workspace {}", workspace.display());

    let backend = LocalBackend::new(LocalBackendConfig {
        workspace_root: workspace,
        shared_workspace: cli.shared_workspace,
    })
    .context("initializing local backend")?;

    let app = routes::router(AppState::new(backend, cli.token));

    if let Some(bind) = cli.bind {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("binding {bind}"))?;
        info!("listening on tcp {bind}");
        axum::serve(listener, app).await?;
        return Ok(());
    }

    let socket = cli
        .socket
        .unwrap_or_else(|| std::env::temp_dir().join("burrow").join("sidecar.sock"));
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket directory {}", parent.display()))?;
    }
    // A socket left by a previous run would make bind fail.
    if socket.exists() {
        std::fs::remove_file(&socket)
            .with_context(|| format!("removing stale socket {}", socket.display()))?;
    }

    let listener = tokio::net::UnixListener::bind(&socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    info!("listening on unix socket {}", socket.display());
    axum::serve(listener, app).await?;

    Ok(())
}
