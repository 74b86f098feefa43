//! Echo server on top of chunkio.
//!
//! Every byte received on an accepted connection is sent straight back.

use chunkio::config::Config;
use chunkio::{Acceptor, MioReactor, Reactor, ReactorRef, logging};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "chunkio-echo")]
#[command(about = "TCP echo server built on chunkio")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return ExitCode::SUCCESS;
    }

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.address = listen;
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let shutdown = match install_signal_handler() {
        Ok(flag) => flag,
        Err(e) => {
            error!(error = %e, "failed to install signal handler");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(&config, &shutdown) {
        error!(error = %e, "echo server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(config: &Config, shutdown: &AtomicBool) -> Result<(), Box<dyn std::error::Error>> {
    let reactor = Rc::new(MioReactor::with_config(&config.reactor_config())?);
    let handle: ReactorRef = reactor.clone();

    let acceptor = Acceptor::with_backlog(handle, config.listener.backlog);
    let addr = config.listener.address;
    acceptor.init_address(&addr.ip().to_string(), addr.port())?;
    acceptor.set_conn_handler(|status, conn| {
        if let Err(e) = status {
            debug!(error = %e, "accept completed with error");
            return;
        }
        let peer = conn.peer_addr().ok();
        debug!(?peer, "client connected");

        conn.set_read_handler(|conn| {
            let mut data = vec![0u8; conn.input_len()];
            conn.read(&mut data);
            conn.send(&data);
        });
        conn.set_close_handler(move |_| debug!(?peer, "client disconnected"));
        conn.start();
    });
    acceptor.accept();

    info!(address = %acceptor.local_addr()?, "echo server listening");

    while !shutdown.load(Ordering::Relaxed) {
        reactor.poll_once(Some(Duration::from_millis(100)))?;
    }

    info!(pool = ?reactor.buffer_pool().stats(), "shutting down");
    acceptor.close();
    reactor.close_all();
    Ok(())
}

/// Install a SIGINT/SIGTERM handler. The returned flag is set on the first
/// signal; a second signal exits immediately.
fn install_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if shutdown_flag.swap(true, Ordering::SeqCst) {
            warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        info!("received shutdown signal");
    })?;

    Ok(shutdown)
}

fn print_default_config() {
    let config = r#"# chunkio-echo configuration

[reactor]
# Readiness events collected per poll
events_capacity = 1024
# Disable Nagle's algorithm on accepted streams
tcp_nodelay = true

[reactor.buffer]
# Capacity of each pooled chunk
chunk_size = "4KB"
# Chunks allocated at startup
preallocate = 0
# Upper bound on chunks kept for reuse (unbounded when unset)
# max_free = 1024

[listener]
address = "127.0.0.1:7878"
backlog = 32

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "info"
# Log format: "pretty", "json", or "compact"
format = "pretty"
# Include timestamps
timestamps = true
# Include module target
target = true
"#;
    print!("{}", config);
}
