// Peerdrop Linux: terminal host that runs a peerdrop session over a TCP link.

mod config;
mod console;
mod transport;

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context};
use peerdrop_core::{driver, Role, SessionController};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
/// How long exit waits on blocking work (the stdin reader) before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

enum Mode {
    Listen(Option<u16>),
    Connect(String),
}

fn usage() -> &'static str {
    "usage: peerdrop-linux listen [port] | connect <host:port> | --version"
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<Mode>> {
    match args.next().as_deref() {
        Some("--version") | Some("-V") => Ok(None),
        Some("listen") => {
            let port = args
                .next()
                .map(|p| p.parse::<u16>().with_context(|| format!("invalid port {p}")))
                .transpose()?;
            Ok(Some(Mode::Listen(port)))
        }
        Some("connect") => match args.next() {
            Some(addr) => Ok(Some(Mode::Connect(addr))),
            None => bail!("{}", usage()),
        },
        _ => bail!("{}", usage()),
    }
}

fn main() -> anyhow::Result<()> {
    let Some(mode) = parse_args(std::env::args().skip(1))? else {
        println!("peerdrop-linux {}", VERSION);
        return Ok(());
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    cfg.session.validate()?;

    // One thread: the session core expects a single cooperative event loop.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    run_to_exit(rt, run(mode, cfg))
}

/// Drive `fut` to completion, then drop the runtime without waiting for a pending stdin read.
fn run_to_exit<F: Future>(rt: tokio::runtime::Runtime, fut: F) -> F::Output {
    let output = rt.block_on(fut);
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    output
}

async fn run(mode: Mode, cfg: config::Config) -> anyhow::Result<()> {
    let (stream, role) = match mode {
        Mode::Listen(port) => {
            let port = port.unwrap_or(cfg.listen_port);
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("cannot listen on port {port}"))?;
            println!("* waiting for a peer on port {port}");
            let (stream, addr) = listener.accept().await?;
            info!(%addr, "peer connected");
            (stream, Role::Responder)
        }
        Mode::Connect(addr) => {
            let stream = TcpStream::connect(&addr)
                .await
                .with_context(|| format!("cannot connect to {addr}"))?;
            info!(%addr, "connected");
            (stream, Role::Initiator)
        }
    };
    stream.set_nodelay(true)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (observer, observed) = mpsc::unbounded_channel();
    let controller = SessionController::new(cfg.session.clone(), observer);
    let (handle, commands) = driver::command_channel();
    let driver_task = tokio::spawn(driver::run(controller, events_rx, commands));
    transport::attach(stream, role, events_tx);
    let mut renderer = tokio::spawn(console::render_events(observed, cfg.download_dir.clone()));

    tokio::select! {
        res = console::run_console(handle.clone()) => res?,
        _ = &mut renderer => {}
        res = shutdown_signal() => {
            res?;
            let _ = handle.disconnect();
        }
    }
    drop(handle);
    driver_task.await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
