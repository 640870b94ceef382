//! HTTP listener.
//!
//! [`MockServer`] binds a TCP listener, serves each connection with hyper's
//! HTTP/1 server on its own task, and answers every request from the stub
//! registry. The handle doubles as the client for registering stubs.

use crate::admin;
use crate::config::{GlobalSettings, ServerConfig};
use crate::engine;
use crate::error::{RegistrationError, ServerError};
use crate::pattern::RequestPattern;
use crate::registry::{StubDefinition, StubId, StubRegistry};
use crate::request::RequestDescriptor;
use crate::response::{RenderedResponse, Renderer, ResponseTemplate};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept`, e.g. when the process is out of descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by every connection task.
struct ServerState {
    registry: StubRegistry,
    renderer: Renderer,
    settings: GlobalSettings,
    default_response: Option<ResponseTemplate>,
    admin_enabled: bool,
    max_body_bytes: usize,
}

impl ServerState {
    async fn respond(&self, request: &RequestDescriptor) -> RenderedResponse {
        let snapshot = self.registry.snapshot();

        let Some(mapping) = engine::find_match(&snapshot, request) else {
            if self.settings.log_unmatched {
                warn!(
                    method = %request.method(),
                    url = %request.url(),
                    stubs = snapshot.len(),
                    "No matching stub found"
                );
            }
            return match &self.default_response {
                Some(template) => self.render(template, request).await,
                None => RenderedResponse::no_match(request, snapshot.len()),
            };
        };

        if self.settings.log_matches {
            info!(
                stub_id = %mapping.id(),
                stub_name = mapping.name().unwrap_or(""),
                method = %request.method(),
                url = %request.url(),
                "Request matched stub"
            );
        }
        self.render(mapping.response(), request).await
    }

    async fn render(
        &self,
        template: &ResponseTemplate,
        request: &RequestDescriptor,
    ) -> RenderedResponse {
        match self.renderer.render(template, request).await {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(url = %request.url(), error = %e, "Failed to render stub response");
                RenderedResponse::render_failure(&e)
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, state.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(
                uri = %parts.uri,
                limit = state.max_body_bytes,
                "Request body exceeds limit"
            );
            return Ok(RenderedResponse::text(413, "request body too large\n").into_response());
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return Ok(RenderedResponse::text(400, "unreadable request body\n").into_response());
        }
    };
    let request = RequestDescriptor::from_parts(&parts, body);

    let rendered = if state.admin_enabled && admin::is_admin_path(request.path()) {
        admin::handle(&state.registry, &request)
    } else {
        state.respond(&request).await
    };
    Ok(rendered.into_response())
}

/// A running stub server.
///
/// Dropping the handle stops accepting connections; [`MockServer::stop`]
/// additionally waits for in-flight connections.
pub struct MockServer {
    state: Arc<ServerState>,
    address: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Bind the listener, register configured stubs, and start serving.
    ///
    /// Returns once the socket is bound, so [`port`](Self::port) is final.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let registry = StubRegistry::new();
        for stub in config.stubs.iter().cloned() {
            registry.register(stub)?;
        }

        let port = config.port.bind_port();
        let listener = TcpListener::bind((config.bind_address.as_str(), port))
            .await
            .map_err(|e| ServerError::bind(format!("{}:{}", config.bind_address, port), e))?;
        let address = listener.local_addr().map_err(ServerError::LocalAddr)?;

        info!(
            address = %address,
            stubs = registry.len(),
            files_root = %config.stub_files_root.display(),
            "Stub server listening"
        );

        let state = Arc::new(ServerState {
            registry,
            renderer: Renderer::new(config.stub_files_root.clone()),
            settings: config.settings.clone(),
            default_response: config.default_response.clone(),
            admin_enabled: config.admin_enabled,
            max_body_bytes: config.max_body_bytes,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&state),
            shutdown_rx,
            config.shutdown_grace(),
        ));

        Ok(Self {
            state,
            address,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// Register a stub; see [`StubRegistry::register`].
    pub fn register(&self, definition: StubDefinition) -> Result<StubId, RegistrationError> {
        self.state.registry.register(definition)
    }

    /// Register `pattern` → `response` with default priority.
    pub fn stub(
        &self,
        pattern: RequestPattern,
        response: ResponseTemplate,
    ) -> Result<StubId, RegistrationError> {
        self.register(StubDefinition::new(pattern, response))
    }

    pub fn remove_stub(&self, id: StubId) -> bool {
        self.state.registry.remove(id)
    }

    pub fn reset_all_stubs(&self) {
        self.state.registry.reset();
    }

    /// Registered stubs in match order.
    pub fn stubs(&self) -> Vec<StubDefinition> {
        self.state
            .registry
            .snapshot()
            .iter()
            .map(|m| m.definition().clone())
            .collect()
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Base URL for clients; a wildcard bind address is reported as loopback.
    pub fn base_url(&self) -> String {
        let ip = match self.address.ip() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        format!("http://{}", SocketAddr::new(ip, self.address.port()))
    }

    /// `base_url()` joined with `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Stop accepting, let live connections finish within the grace period,
    /// then abort whatever remains.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop terminated abnormally");
            }
        }
        info!(address = %self.address, "Stub server stopped");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
    grace: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        let shutdown_rx = shutdown_rx.clone();
                        connections.spawn(serve_connection(stream, peer, state, shutdown_rx));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
            // Reap finished connections so the set does not grow unbounded.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }
    drop(listener);

    let live = connections.len();
    if live > 0 {
        debug!(connections = live, "Waiting for in-flight connections");
    }
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            connections = connections.len(),
            grace_ms = grace.as_millis() as u64,
            "Aborting connections still open after grace period"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| handle_request(req, Arc::clone(&state)));

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection error");
            }
        }
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!(peer = %peer, error = %e, "Connection error during shutdown");
            }
        }
    }
}
