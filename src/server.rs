//! HTTP front-end of the stub server.
//!
//! A `hyper` HTTP/1.1 server running on the tokio runtime. Each accepted
//! connection is served on its own task; all connections share one
//! [`ServerState`] holding the stub registry and the request journal.

use crate::admin;
use crate::config::{GlobalSettings, RequestMatcher, ResponseDefinition, StubDefinition, StubServerConfig};
use crate::error::{ConfigError, ServerError, VerificationError};
use crate::journal::{CountMatcher, RecordedRequest, RequestJournal};
use crate::registry::StubRegistry;
use crate::responder::{Responder, StubResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by every connection.
pub(crate) struct ServerState {
    pub(crate) registry: RwLock<StubRegistry>,
    pub(crate) journal: RwLock<RequestJournal>,
    pub(crate) settings: GlobalSettings,
    responder: Responder,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
}

impl ServerState {
    fn new(
        registry: StubRegistry,
        settings: GlobalSettings,
        default_response: Option<ResponseDefinition>,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            journal: RwLock::new(RequestJournal::new()),
            responder: Responder::new(settings.clone(), default_response),
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    /// Answer a request from the stubs and record it in the journal.
    async fn serve(&self, mut request: RecordedRequest) -> StubResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let found = self.registry.read().await.find_match(&request);
        let response = match found {
            Some(matched) => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_matches {
                    info!(
                        stub_id = %matched.stub.id,
                        method = %request.method,
                        path = %request.path,
                        "Request matched stub"
                    );
                }
                request.stub_id = Some(matched.stub.id.clone());
                self.responder.respond(&matched, &request).await
            }
            None => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        "No matching stub found"
                    );
                }
                self.responder.unmatched(&request)
            }
        };

        self.journal.write().await.record(request);
        response
    }

    pub(crate) async fn register_stub(&self, stub: StubDefinition) -> Result<(), ConfigError> {
        self.registry.write().await.register(stub)
    }

    pub(crate) async fn reset(&self) {
        self.registry.write().await.clear();
        self.journal.write().await.clear();
        debug!("Stubs and request journal cleared");
    }
}

/// A running stub server.
///
/// ```no_run
/// use stub_server::{PathMatcher, RequestMatcher, ResponseDefinition, StubDefinition, StubServer};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let server = StubServer::start_on(0).await?;
/// server
///     .register_stub(StubDefinition::new(
///         "welcome",
///         RequestMatcher::get(PathMatcher::url("/rest")),
///         ResponseDefinition::ok().with_text("Welcome!"),
///     ))
///     .await?;
///
/// // ... issue requests against server.url("/rest") ...
///
/// server.verify(&RequestMatcher::get(PathMatcher::url("/rest"))).await?;
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StubServer {
    /// Bind and start serving.
    pub async fn start(config: StubServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let registry = StubRegistry::from_stubs(&config.stubs)?;

        let bind_addr = config.server.socket_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

        info!(%addr, stubs = registry.len(), "Stub server listening");

        let state = Arc::new(ServerState::new(
            registry,
            config.settings,
            config.default_response,
        ));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state), shutdown_rx));

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Start with no stubs on `port` (0 picks a free port).
    pub async fn start_on(port: u16) -> Result<Self, ServerError> {
        Self::start(StubServerConfig::on_port(port)).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Absolute URL for `path_and_query` on this server.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    pub async fn register_stub(&self, stub: StubDefinition) -> Result<(), ConfigError> {
        self.state.register_stub(stub).await
    }

    pub async fn register_stubs(
        &self,
        stubs: impl IntoIterator<Item = StubDefinition>,
    ) -> Result<(), ConfigError> {
        let mut registry = self.state.registry.write().await;
        for stub in stubs {
            registry.register(stub)?;
        }
        Ok(())
    }

    pub async fn remove_stub(&self, id: &str) -> Option<StubDefinition> {
        self.state.registry.write().await.remove(id)
    }

    /// Registered stubs in registration order.
    pub async fn stubs(&self) -> Vec<StubDefinition> {
        self.state.registry.read().await.definitions()
    }

    /// Clear all stubs and recorded requests.
    pub async fn reset(&self) {
        self.state.reset().await;
    }

    /// Every request received since the last reset.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.journal.read().await.requests().to_vec()
    }

    pub async fn find_requests(
        &self,
        pattern: &RequestMatcher,
    ) -> Result<Vec<RecordedRequest>, VerificationError> {
        self.state.journal.read().await.find(pattern)
    }

    /// Requests that no stub answered.
    pub async fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        self.state.journal.read().await.unmatched()
    }

    /// Fail unless at least one received request satisfies `pattern`.
    pub async fn verify(&self, pattern: &RequestMatcher) -> Result<(), VerificationError> {
        self.verify_count(CountMatcher::AtLeast(1), pattern).await
    }

    pub async fn verify_count(
        &self,
        count: CountMatcher,
        pattern: &RequestMatcher,
    ) -> Result<(), VerificationError> {
        self.state.journal.read().await.verify(count, pattern)
    }

    pub fn total_requests(&self) -> u64 {
        self.state.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.state.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.state.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Stop accepting, abort open connections and release the port.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        info!(addr = %self.addr, "Stub server stopped");
        Ok(())
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    connections.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            handle_request(Arc::clone(&state), req)
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(%peer, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Errors like EMFILE persist until a connection closes
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn handle_request(
    state: Arc<ServerState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return Ok(into_http(StubResponse::new(400)));
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let request = RecordedRequest::new(parts.method.as_str(), &url, headers, body.to_vec());

    let response = if state.settings.admin_enabled && admin::is_admin_path(&request.path) {
        admin::handle(&state, &request).await
    } else {
        state.serve(request).await
    };

    Ok(into_http(response))
}

fn into_http(response: StubResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            warn!(error = %e, "Stub produced an invalid HTTP response");
            let mut fallback = Response::new(Full::new(Bytes::from(e.to_string())));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
