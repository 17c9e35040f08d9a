//! Server startup and accept loop
//!
//! Binds the listener and hands accepted connections to the router. Every
//! upgraded channel runs in its own task; tasks share only the read-only
//! settings and the channel counters.

use anyhow::{anyhow, Result};
use axum::serve::ListenerExt;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::acceptor::{self, AcceptorState};
use crate::config::ServerSettings;
use crate::logger::log;

/// Resolve the configured address and bind a listener with SO_REUSEADDR
pub async fn bind_listener(settings: &ServerSettings) -> Result<TcpListener> {
    let socket_addr: SocketAddr = tokio::net::lookup_host(&settings.addr)
        .await?
        .next()
        .ok_or_else(|| anyhow!("Could not resolve listen address: {}", settings.addr))?;

    let socket = socket2::Socket::new(
        match socket_addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    // Allow immediate rebind after restart (skip TIME_WAIT)
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(settings.tcp_backlog)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Per-connection socket options. Keepalive stays off unless configured.
fn tune_stream(stream: &TcpStream, tcp_nodelay: bool, tcp_keepalive: Option<Duration>) {
    if tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    if let Some(interval) = tcp_keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(interval)
            .with_interval(interval);
        let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
    }
}

/// Serve the echo endpoint until `shutdown` is cancelled.
///
/// Shutdown stops accepting and waits for in-flight HTTP requests only;
/// upgraded channels keep echoing until their peers close them.
pub async fn serve(
    listener: TcpListener,
    settings: Arc<ServerSettings>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    log::info!(
        address = %local_addr,
        ws_path = %settings.ws_path,
        max_channels = settings.max_channels,
        tcp_keepalive = ?settings.tcp_keepalive,
        "Echo server started"
    );

    let (tcp_nodelay, tcp_keepalive) = (settings.tcp_nodelay, settings.tcp_keepalive);
    let listener =
        listener.tap_io(move |stream| tune_stream(stream, tcp_nodelay, tcp_keepalive));
    let app = acceptor::build_router(Arc::new(AcceptorState::new(settings)));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        log::info!("Shutdown requested, no longer accepting connections");
    })
    .await?;

    Ok(())
}

/// Bind and serve until `shutdown` is cancelled
pub async fn run_server(settings: Arc<ServerSettings>, shutdown: CancellationToken) -> Result<()> {
    let listener = bind_listener(&settings).await?;
    serve(listener, settings, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_settings() -> ServerSettings {
        ServerSettings {
            addr: "127.0.0.1:0".to_string(),
            ..ServerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(&local_settings()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_listener_unresolvable() {
        let settings = ServerSettings {
            addr: "no-such-host.invalid:8080".to_string(),
            ..ServerSettings::default()
        };
        assert!(bind_listener(&settings).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = bind_listener(&local_settings()).await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(
            listener,
            Arc::new(local_settings()),
            shutdown.clone(),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    async fn connected_stream() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
        client.unwrap()
    }

    #[tokio::test]
    async fn test_tune_stream_leaves_keepalive_off_by_default() {
        let stream = connected_stream().await;
        tune_stream(&stream, true, None);
        assert!(stream.nodelay().unwrap());
        assert!(!SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_tune_stream_enables_configured_keepalive() {
        let stream = connected_stream().await;
        tune_stream(&stream, false, Some(Duration::from_secs(30)));
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }
}
