//! Supervisor and workers (§4.6, §5, §9): binds the listening socket `W`
//! times with `SO_REUSEPORT` so the kernel load-balances the accept queue
//! across `W` independent event loops, installs the `SIGTERM` handler,
//! and drains in-flight connections on shutdown.
//!
//! The reference source pre-forks `W` OS processes around one listening
//! socket because its crypto library was awkward to share across threads
//! (§9). A thread-safe TLS/crypto stack lets this collapse to `W` tokio
//! tasks in one process, each running its own accept loop and owning its
//! own connection set — the acceptable alternative §4.6 and §9 call out.
//! Nothing here is OS-process supervision; "worker" means "event loop",
//! not "child process."

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keyless_shared::{Connection, KeyRegistry, VERSION_MAJOR, VERSION_MINOR};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;

/// Upper bound on how long shutdown waits for already-accepted connections
/// to close on their own before the remaining tasks are aborted. No
/// interval is normatively specified (§5); this is an implementation
/// choice bounding S6's "bounded interval".
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the server until `SIGTERM` (or, for interactive use, Ctrl-C)
/// triggers graceful shutdown. Binds `config.workers` independent
/// listening sockets over the same address via `SO_REUSEPORT` and spawns
/// one accept loop per socket.
pub async fn run(
    config: ServerConfig,
    registry: KeyRegistry,
    tls_acceptor: TlsAcceptor,
) -> anyhow::Result<()> {
    if let Some(pid_path) = &config.pid_file {
        write_pid_file(pid_path)?;
    }

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connections = Arc::new(Mutex::new(JoinSet::new()));

    let mut workers = Vec::with_capacity(config.workers as usize);
    for worker_id in 0..config.workers {
        let listener = TcpListener::from_std(bind_reuseport(addr)?)?;
        log::info!("worker {worker_id} listening on {addr}");
        workers.push(tokio::spawn(run_worker(
            worker_id,
            listener,
            tls_acceptor.clone(),
            registry.clone(),
            connections.clone(),
            shutdown_rx.clone(),
        )));
    }

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining {} worker(s)", workers.len());
    let _ = shutdown_tx.send(true);

    for worker in workers {
        let _ = worker.await;
    }

    drain_connections(connections).await;

    if let Some(pid_path) = &config.pid_file {
        let _ = std::fs::remove_file(pid_path);
    }

    log::info!("shutdown complete");
    Ok(())
}

/// One worker's event loop: accept, handshake, install a connection FSM,
/// repeat, until told to stop. Mirrors §4.5's acceptor contract exactly —
/// a failed accept or a failed handshake is logged and the loop
/// continues; it never tears down the whole worker.
async fn run_worker(
    worker_id: u32,
    listener: TcpListener,
    tls_acceptor: TlsAcceptor,
    registry: KeyRegistry,
    connections: Arc<Mutex<JoinSet<()>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                log::debug!("worker {worker_id} stopping acceptance");
                return;
            }

            accept_result = listener.accept() => {
                let (stream, peer_addr) = match accept_result {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("worker {worker_id} accept failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("failed to set TCP_NODELAY for {peer_addr}: {e}");
                }

                let tls_acceptor = tls_acceptor.clone();
                let registry = registry.clone();
                let mut connections = connections.lock().await;
                connections.spawn(async move {
                    match tls_acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            log::debug!("handshake complete with {peer_addr}");
                            let connection =
                                Connection::new(tls_stream, registry, VERSION_MAJOR, VERSION_MINOR);
                            if let Err(e) = connection.run().await {
                                log::debug!("connection with {peer_addr} ended: {e}");
                            }
                        }
                        Err(e) => {
                            log::warn!("TLS handshake with {peer_addr} failed: {e}");
                        }
                    }
                });
            }
        }
    }
}

/// Waits for `SIGTERM` on Unix, or Ctrl-C anywhere else (so the server is
/// still interactively stoppable during development on non-Unix hosts).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            log::error!("failed to install SIGTERM handler: {e}, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Waits, up to [`DRAIN_TIMEOUT`], for every already-accepted connection
/// to finish on its own. Connections still running past the deadline are
/// aborted when the `JoinSet` is dropped (§9: shutdown terminates all
/// in-flight connections deterministically, within a bounded interval).
async fn drain_connections(connections: Arc<Mutex<JoinSet<()>>>) {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        let mut connections = connections.lock().await;
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        log::warn!("drain timeout elapsed, aborting remaining connections");
    }
}

/// Binds a non-blocking listening socket at `addr` with `SO_REUSEADDR` and
/// (on Unix) `SO_REUSEPORT`, so `config.workers` independent sockets can
/// all be bound to the same address and share the kernel accept queue.
fn bind_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}
