//! Server startup and accept loop
//!
//! This module binds one listener per service, runs the admission gate in
//! the accept loop and spawns a task per admitted connection.

use std::any::Any;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnConfig, ServiceConfig};
use crate::core::hooks::CapabilityProbe;
use crate::core::{ip_filter, ConnContext, ListStore, Service};
use crate::error::{ProxyError, Result};
use crate::handler::process_connection;
use crate::logger::log;

/// TCP keepalive interval, 3 probes detect a dead peer in about 45s
const TCP_KEEPALIVE_SECS: u64 = 15;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bind a listener on every interface
///
/// Prefers a dual-stack `[::]` socket and falls back to `0.0.0.0` on hosts
/// without IPv6.
pub fn bind_listener(port: u16, backlog: i32) -> std::io::Result<TcpListener> {
    let dual_stack = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match bind_socket(dual_stack, backlog) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            log::debug!(port = port, error = %e, "IPv6 bind failed, falling back to IPv4");
            bind_socket(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), backlog)
        }
    }
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    // Allow immediate rebind after restart (skip TIME_WAIT)
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    TcpListener::from_std(socket.into())
}

/// A started listener
struct ListenerHandle {
    service: Arc<Service>,
    token: CancellationToken,
}

/// Process-wide proxy state
pub struct Proxy {
    lists: Arc<ListStore>,
    conn_config: ConnConfig,
    probe: Arc<dyn CapabilityProbe>,
    /// Append-only while starting, drained once at shutdown
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl Proxy {
    pub fn new(lists: Arc<ListStore>, conn_config: ConnConfig, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            lists,
            conn_config,
            probe,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn lists(&self) -> &Arc<ListStore> {
        &self.lists
    }

    /// Prepare, bind and start accepting for one service
    pub async fn start_service(&self, config: ServiceConfig) -> Result<SocketAddr> {
        let service = Service::prepare(
            config,
            Arc::clone(&self.lists),
            self.conn_config,
            self.probe.as_ref(),
        )
        .await?;
        let listener = bind_listener(service.config.listen, self.conn_config.tcp_backlog)?;
        let local_addr = listener.local_addr()?;

        log::info!(
            service = service.name(),
            address = %local_addr,
            target = %service.target,
            flow = %service.config.flow,
            strategy = %service.strategy,
            "Service started"
        );

        let service = Arc::new(service);
        let token = CancellationToken::new();
        self.listeners
            .lock()
            .map_err(|_| ProxyError::Other("listener table poisoned".to_string()))?
            .push(ListenerHandle {
                service: Arc::clone(&service),
                token: token.clone(),
            });
        tokio::spawn(serve(listener, service, token));
        Ok(local_addr)
    }

    /// Number of running services
    pub fn service_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Reload the access lists from the config file
    pub fn reload_lists(&self, path: &Path) -> Result<usize> {
        let services: Vec<Arc<Service>> = self
            .listeners
            .lock()
            .map_err(|_| ProxyError::Other("listener table poisoned".to_string()))?
            .iter()
            .map(|h| Arc::clone(&h.service))
            .collect();
        let required = services.iter().flat_map(|s| s.config.required_tags());
        self.lists.reload_from(path, required)
    }

    /// Stop every listener; connections already accepted keep running
    pub fn shutdown(&self) {
        let handles = match self.listeners.lock() {
            Ok(mut table) => std::mem::take(&mut *table),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            log::info!(service = handle.service.name(), "Closing listener");
            handle.token.cancel();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Accept loop for one service, until `token` is cancelled
pub async fn serve(listener: TcpListener, service: Arc<Service>, token: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!(service = service.name(), error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        let ctx = ConnContext::new(peer);

        // Admission gate: a pure read of the current list snapshot
        let admitted = ip_filter::admit(
            &service.config.ip_access,
            &service.lists.snapshot(),
            ctx.peer().ip(),
        );
        if !admitted {
            log::debug!(service = service.name(), conn = %ctx, "Rejected by IP access control");
            ip_filter::reset(stream);
            continue;
        }

        if service.conn_config.tcp_nodelay {
            let _ = stream.set_nodelay(true);
        }
        // Detect dead peers (mobile disconnect, network change, etc.)
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
            .with_interval(Duration::from_secs(TCP_KEEPALIVE_SECS));
        let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ctx = ctx;
            log::connection(service.name(), &ctx, "accepted");

            let outcome = AssertUnwindSafe(process_connection(&service, stream, &mut ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => log::connection(service.name(), &ctx, "closed"),
                Ok(Err(e)) => log::fault(service.name(), &ctx, &e),
                Err(panic) => {
                    log::error!(
                        service = service.name(),
                        conn = %ctx,
                        panic = panic_message(panic.as_ref()),
                        "Connection task panicked"
                    );
                }
            }
        });
    }

    log::info!(service = service.name(), "Listener closed");
}
