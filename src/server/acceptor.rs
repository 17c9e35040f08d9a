//! Connection acceptor
//!
//! HTTP routing for the echo server. Upgrade requests on the echo path become
//! channels, each driven by its own echo loop. `/` serves the informational
//! home page and every other path is a 404, upgrade or not.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::echo::run_echo_loop;
use crate::config::ServerSettings;
use crate::logger::log;
use crate::transport::UpgradedChannel;

const HOME_TEMPLATE: &str = include_str!("home.html");

/// State shared by every request: read-only settings plus the channel counters
pub struct AcceptorState {
    settings: Arc<ServerSettings>,
    // 0 = unlimited
    limiter: Option<Arc<Semaphore>>,
    next_channel_id: AtomicU64,
}

impl AcceptorState {
    pub fn new(settings: Arc<ServerSettings>) -> Self {
        let limiter = (settings.max_channels > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_channels)));
        Self {
            settings,
            limiter,
            next_channel_id: AtomicU64::new(1),
        }
    }

    /// Take a channel slot. `Ok(None)` when channels are unlimited.
    fn reserve(&self) -> Result<Option<OwnedSemaphorePermit>, TryAcquireError> {
        self.limiter
            .as_ref()
            .map(|limiter| Arc::clone(limiter).try_acquire_owned())
            .transpose()
    }
}

/// Build the router serving the home page and the echo endpoint.
///
/// `ws_path` must be a literal path other than `/` (see `ServeArgs::validate`).
pub fn build_router(state: Arc<AcceptorState>) -> Router {
    let ws_path = state.settings.ws_path.clone();
    Router::new()
        .route("/", get(home_page))
        .route(&ws_path, get(echo_upgrade))
        .fallback(not_found)
        .with_state(state)
}

/// Keep only characters that can appear in a host[:port] authority
fn sanitize_host(host: &str) -> Option<&str> {
    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    valid.then_some(host)
}

/// Render the home page for the given echo URL
pub fn render_home_page(ws_url: &str) -> String {
    HOME_TEMPLATE.replace("{{ws_url}}", ws_url)
}

async fn home_page(State(state): State<Arc<AcceptorState>>, headers: HeaderMap) -> Html<String> {
    let authority = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(sanitize_host)
        .unwrap_or(&state.settings.addr);
    let ws_url = format!("ws://{}{}", authority, state.settings.ws_path);
    Html(render_home_page(&ws_url))
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found\n")
}

/// Upgrade handler. A plain GET without upgrade headers is rejected by the
/// extractor with 400; a request beyond the channel limit gets 503.
async fn echo_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AcceptorState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let peer_addr = peer.to_string();
    log::connection(&peer_addr, "new");

    let permit = match state.reserve() {
        Ok(permit) => permit,
        Err(_) => {
            log::warn!(
                peer = %peer_addr,
                max_channels = state.settings.max_channels,
                "Channel limit reached, refusing upgrade"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many channels\n").into_response();
        }
    };
    let channel_id = state.next_channel_id.fetch_add(1, Ordering::Relaxed);

    let ws = match state.settings.max_message_size {
        Some(max) => ws.max_message_size(max).max_frame_size(max),
        None => ws,
    };

    let failed_peer = peer_addr.clone();
    ws.on_failed_upgrade(move |e| {
        log::handshake(&failed_peer, false);
        log::debug!(peer = %failed_peer, error = %e, "Upgrade failed");
    })
    .on_upgrade(move |socket| async move {
        let _permit = permit;
        let _guard = scopeguard::guard((), |_| {
            log::connection(&peer_addr, "closed");
        });
        log::handshake(&peer_addr, true);
        log::info!(peer = %peer_addr, channel = channel_id, "Channel open");

        let summary = run_echo_loop(UpgradedChannel::new(socket), channel_id).await;
        log::info!(
            peer = %peer_addr,
            channel = channel_id,
            echoed = summary.echoed,
            reason = %summary.reason,
            "Channel closed"
        );
    })
}
