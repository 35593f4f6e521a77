//! Async TCP server using Tokio.
//!
//! Accepts TCP connections, reads HTTP/1.1 requests off each one in turn and
//! pushes every request through the dispatch sequence:
//!
//! ```text
//! beforeEndpoint → route ─┬─ miss → httpError(404|405) → beforeResponse → status response
//!                         └─ hit  → beforeAuthorization → authorization stage
//!                                 → beforeValidation    → validation stage
//!                                 → beforeService       → endpoint listeners → service stage
//!                                 → beforeResponse      → response
//! ```
//!
//! Every connection runs in its own task. Requests on one connection are
//! handled strictly one after another; a routing miss answers that request
//! and the loop goes on to read the next one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::{ApiInfo, ServerConfig};
use crate::context::Context;
use crate::controller::Controllers;
use crate::events::{Event, Events};
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::pipeline::{Flow, IntoStageHandler, Pipeline, Stage};
use crate::router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The dispatch server.
///
/// Built from a sealed [`Controllers`] set, then configured with lifecycle
/// listeners and stage handlers. Serving consumes the server, so nothing can
/// be subscribed once connections are being accepted.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_dispatch::controller::{ControllerTree, EndpointSpec, Registry};
/// use rttp_dispatch::events::Event;
/// use rttp_dispatch::http::Method;
/// use rttp_dispatch::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut registry = Registry::new();
///     registry.register(
///         "Dinosaur",
///         ControllerTree::new().route("/food", Method::Get, EndpointSpec::default()),
///     )?;
///
///     let mut server = Server::new(registry.seal());
///     server.on_http_error(|status| eprintln!("{status}"));
///     server.on(Event::BeforeEndpoint, || {});
///     server.listen(8080).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    controllers: Controllers,
    events: Events,
    pipeline: Pipeline,
    config: ServerConfig,
    info: ApiInfo,
}

impl Server {
    pub fn new(controllers: Controllers) -> Self {
        Self {
            controllers,
            events: Events::new(),
            pipeline: Pipeline::new(),
            config: ServerConfig::default(),
            info: ApiInfo::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: ApiInfo) -> Self {
        self.info = info;
        self
    }

    /// Subscribes to a zero-argument lifecycle event.
    pub fn on<F>(&mut self, event: Event, listener: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(event, listener);
        self
    }

    /// Subscribes to [`Event::HttpError`].
    pub fn on_http_error<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(StatusCode) + Send + Sync + 'static,
    {
        self.events.on_http_error(listener);
        self
    }

    /// Appends a handler to one pipeline stage.
    pub fn stage(&mut self, stage: Stage, handler: impl IntoStageHandler) -> &mut Self {
        self.pipeline.add(stage, handler);
        self
    }

    pub fn controllers(&self) -> &Controllers {
        &self.controllers
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn info(&self) -> &ApiInfo {
        &self.info
    }

    /// Runs one request through the full event and stage sequence.
    ///
    /// Never fails: routing misses become `404`/`405` status responses and
    /// faulty event listeners are contained.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.events.fire(Event::BeforeEndpoint);

        let route = match router::resolve(request.path(), request.method(), &self.controllers) {
            Ok(route) => route,
            Err(e) => {
                let status = e.status();
                debug!(
                    method = %request.method(),
                    path = %request.path(),
                    status = status.as_u16(),
                    "no route"
                );
                self.events.fire_http_error(status);
                return self.respond(Response::status_text(status));
            }
        };

        let mut ctx = Context::new(request, route);

        for stage in Stage::ORDER {
            self.events.fire(stage.event());

            if stage == Stage::Service {
                let route = ctx.route();
                self.controllers
                    .emit(route.controller(), route.template(), route.method());
            }

            match self.pipeline.run_stage(stage, ctx).await {
                Flow::Continue(next) => ctx = next,
                Flow::Respond(response) => {
                    debug!(%stage, status = response.status().as_u16(), "stage responded");
                    return self.respond(response);
                }
            }
        }

        self.respond(Response::new(StatusCode::Ok).body(self.config.placeholder_body.clone()))
    }

    fn respond(&self, response: Response) -> Response {
        self.events.fire(Event::BeforeResponse);
        response
    }

    /// Binds the server to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(self, addr: impl AsRef<str>) -> Result<BoundServer, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(BoundServer {
            listener,
            local_addr,
            server: Arc::new(self),
        })
    }

    /// Binds `host:port` (host from [`ServerConfig`]) and serves until the
    /// process exits.
    pub async fn listen(self, port: u16) -> Result<(), ServerError> {
        let addr = self.config.address_on(port);
        self.bind(addr).await?.run().await
    }

    /// Like [`listen`](Self::listen), calling `on_connection` with every
    /// accepted stream before its request loop starts.
    pub async fn listen_with<C>(self, port: u16, on_connection: C) -> Result<(), ServerError>
    where
        C: FnMut(&TcpStream, SocketAddr) + Send + 'static,
    {
        let addr = self.config.address_on(port);
        self.bind(addr).await?.run_with(on_connection).await
    }
}

/// A server with a bound listener, ready to accept.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Arc<Server>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the process is terminated.
    ///
    /// # Errors
    ///
    /// Only fails on errors from the listener itself; failed accepts and
    /// connection errors are logged and skipped.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with(|_: &TcpStream, _: SocketAddr| {}).await
    }

    /// Accepts connections until the process is terminated, calling
    /// `on_connection` with every accepted stream first.
    pub async fn run_with<C>(self, mut on_connection: C) -> Result<(), ServerError>
    where
        C: FnMut(&TcpStream, SocketAddr) + Send + 'static,
    {
        info!(
            address = %self.local_addr,
            title = %self.server.info.title,
            version = %self.server.info.version,
            controllers = self.server.controllers.len(),
            "rttp-dispatch listening"
        );

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            on_connection(&stream, peer_addr);

            let server = Arc::clone(&self.server);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, server).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves one connection until the peer closes it, asks for `Connection:
/// close`, or sends something that is not HTTP.
///
/// Bytes of a following request that arrive with the current one stay in the
/// buffer and are parsed before the socket is read again.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<Server>,
) -> Result<(), std::io::Error> {
    let max_request_size = server.config.max_request_size;
    let mut buf = BytesMut::with_capacity(server.config.read_buffer_size);

    loop {
        match Request::parse(&buf) {
            Ok((request, body_offset)) => {
                let total = body_offset
                    .checked_add(request.content_length().unwrap_or(0))
                    .filter(|total| *total <= max_request_size);
                let Some(total) = total else {
                    warn!(peer = %peer_addr, "request too large — sending 413");
                    reject(&mut stream, StatusCode::ContentTooLarge).await?;
                    break;
                };
                if buf.len() < total {
                    if !fill(&mut stream, &mut buf).await? {
                        break;
                    }
                    continue;
                }

                let keep_alive = request.is_keep_alive();
                let method = request.method().clone();
                let path = request.path().to_owned();
                let started = Instant::now();

                let response = server.dispatch(request).await;
                let status = response.status();
                let response = if keep_alive {
                    response
                } else {
                    response.keep_alive(false)
                };

                stream.write_all(&response.into_bytes()).await?;
                stream.flush().await?;
                let _ = buf.split_to(total);

                debug!(
                    peer = %peer_addr,
                    %method,
                    %path,
                    status = status.as_u16(),
                    elapsed = ?started.elapsed(),
                    "request handled"
                );

                if !keep_alive {
                    debug!(peer = %peer_addr, "Connection: close — shutting down");
                    break;
                }
            }
            Err(RequestError::Incomplete) => {
                if buf.len() > max_request_size {
                    warn!(peer = %peer_addr, "request headers too large — sending 413");
                    reject(&mut stream, StatusCode::ContentTooLarge).await?;
                    break;
                }
                if !fill(&mut stream, &mut buf).await? {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                reject(&mut stream, StatusCode::BadRequest).await?;
                break;
            }
        }
    }

    Ok(())
}

/// Reads more bytes into `buf`. Returns `false` once the peer has closed.
async fn fill(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<bool, std::io::Error> {
    Ok(stream.read_buf(buf).await? > 0)
}

async fn reject(stream: &mut TcpStream, status: StatusCode) -> Result<(), std::io::Error> {
    stream
        .write_all(&Response::status_text(status).into_bytes())
        .await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerTree, EndpointSpec, Registry};
    use crate::http::Method;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    fn registry() -> Registry {
        let dinosaur = ControllerTree::new()
            .route("/", Method::Get, EndpointSpec::default())
            .route("/food", Method::Get, EndpointSpec::default())
            .route("/food", Method::Post, EndpointSpec::default())
            .route("/food/{uuid}", Method::Delete, EndpointSpec::default());
        let admin = ControllerTree::new()
            .route("/", Method::Get, EndpointSpec::default())
            .route("/", Method::Post, EndpointSpec::default());

        let mut registry = Registry::new();
        registry.register("Dinosaur", dinosaur).unwrap();
        registry.register("Admin", admin).unwrap();
        registry
    }

    fn request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn push(log: &Log, entry: &str) -> impl Fn() + Send + Sync + 'static {
        let log = Arc::clone(log);
        let entry = entry.to_owned();
        move || log.lock().unwrap().push(entry.clone())
    }

    /// A server that records every lifecycle event into `log`.
    fn recording_server(registry: Registry, log: &Log) -> Server {
        let mut server = Server::new(registry.seal());
        for event in [
            Event::BeforeEndpoint,
            Event::BeforeAuthorization,
            Event::BeforeValidation,
            Event::BeforeService,
            Event::BeforeResponse,
        ] {
            server.on(event, push(log, event.as_str()));
        }
        let errors = Arc::clone(log);
        server.on_http_error(move |status| {
            errors
                .lock()
                .unwrap()
                .push(format!("httpError {}", status.as_u16()))
        });
        server
    }

    // ── dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn scenario_a_statuses() {
        let server = Server::new(registry().seal());
        assert_eq!(
            server.dispatch(request("GET", "/dinosaur/food")).await.status(),
            StatusCode::Ok
        );
        assert_eq!(
            server.dispatch(request("PUT", "/dinosaur/food")).await.status(),
            StatusCode::MethodNotAllowed
        );
        assert_eq!(
            server.dispatch(request("GET", "/dinosaur/nest")).await.status(),
            StatusCode::NotFound
        );
        assert_eq!(
            server
                .dispatch(request("DELETE", "/dinosaur/food/123e4567-e89b-12d3-a456-426614174000"))
                .await
                .status(),
            StatusCode::Ok
        );
    }

    #[tokio::test]
    async fn success_fires_events_in_order_and_sends_placeholder() {
        let log: Log = Arc::default();
        let server = recording_server(registry(), &log);

        let response = server.dispatch(request("GET", "/dinosaur/food")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_ref(), b"Hello");
        assert_eq!(
            *log.lock().unwrap(),
            [
                "beforeEndpoint",
                "beforeAuthorization",
                "beforeValidation",
                "beforeService",
                "beforeResponse"
            ]
        );
    }

    #[tokio::test]
    async fn routing_failure_fires_http_error_once() {
        let log: Log = Arc::default();
        let server = recording_server(registry(), &log);

        let response = server.dispatch(request("PATCH", "/admin")).await;
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.body_ref(), b"Method Not Allowed");
        assert!(!response.is_keep_alive());
        assert_eq!(
            *log.lock().unwrap(),
            ["beforeEndpoint", "httpError 405", "beforeResponse"]
        );
    }

    #[tokio::test]
    async fn endpoint_listeners_run_before_service_handlers() {
        let log: Log = Arc::default();
        let mut registry = registry();
        registry
            .listen("dinosaur", "/food/{uuid}", Method::Delete, push(&log, "endpoint"))
            .unwrap();
        registry
            .listen("dinosaur", "/food", Method::Get, push(&log, "other endpoint"))
            .unwrap();

        let mut server = Server::new(registry.seal());
        server.on(Event::BeforeService, push(&log, "beforeService"));
        let stage_log = Arc::clone(&log);
        server.stage(Stage::Service, move |ctx: Context| {
            let log = Arc::clone(&stage_log);
            async move {
                let uuid = ctx.params().get("uuid").unwrap_or_default().to_owned();
                log.lock().unwrap().push(format!("service {uuid}"));
                Flow::Respond(Response::new(StatusCode::NoContent))
            }
        });

        let response = server.dispatch(request("DELETE", "/dinosaur/food/Rex")).await;
        assert_eq!(response.status(), StatusCode::NoContent);
        assert_eq!(*log.lock().unwrap(), ["beforeService", "endpoint", "service rex"]);
    }

    #[tokio::test]
    async fn authorization_response_skips_later_stages() {
        let log: Log = Arc::default();
        let mut server = recording_server(registry(), &log);
        server.stage(Stage::Authorization, |ctx: Context| async move {
            if ctx.request().headers().contains("authorization") {
                Flow::Continue(ctx)
            } else {
                Flow::Respond(Response::status_text(StatusCode::Unauthorized))
            }
        });

        let response = server.dispatch(request("POST", "/admin")).await;
        assert_eq!(response.status(), StatusCode::Unauthorized);
        assert_eq!(
            *log.lock().unwrap(),
            ["beforeEndpoint", "beforeAuthorization", "beforeResponse"]
        );
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_the_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut server = Server::new(registry().seal());
        server.on(Event::BeforeEndpoint, || panic!("listener fault"));
        let counter = Arc::clone(&hits);
        server.on(Event::BeforeEndpoint, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        server.on_http_error(|_| panic!("error listener fault"));

        assert_eq!(server.dispatch(request("GET", "/dinosaur")).await.status(), StatusCode::Ok);
        assert_eq!(server.dispatch(request("GET", "/raptor")).await.status(), StatusCode::NotFound);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn placeholder_body_is_configurable() {
        let config = ServerConfig {
            placeholder_body: "roar".into(),
            ..ServerConfig::default()
        };
        let server = Server::new(registry().seal()).with_config(config);
        let response = server.dispatch(request("GET", "/admin/")).await;
        assert_eq!(response.body_ref(), b"roar");
    }

    // ── over TCP ──────────────────────────────────────────────────────────────

    async fn spawn(server: Server) -> SocketAddr {
        let bound = server.bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr();
        tokio::spawn(bound.run());
        addr
    }

    /// Reads exactly one response off `stream`, keeping any surplus in `buf`.
    async fn read_response(stream: &mut TcpStream, buf: &mut Vec<u8>) -> (u16, String, String) {
        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8(buf[..end].to_vec()).unwrap();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map_or(0, |v| v.parse::<usize>().unwrap());
                let total = end + 4 + length;
                if buf.len() >= total {
                    let body = String::from_utf8(buf[end + 4..total].to_vec()).unwrap();
                    let status = head[9..12].parse().unwrap();
                    buf.drain(..total);
                    return (status, head, body);
                }
            }
            let mut chunk = [0_u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before a full response");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn assert_closed(stream: &mut TcpStream) {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn scenario_b_error_then_next_request_on_same_connection() {
        let endpoints = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let mut server = Server::new(registry().seal());
        let counter = Arc::clone(&endpoints);
        server.on(Event::BeforeEndpoint, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let sink = Arc::clone(&errors);
        server.on_http_error(move |status| sink.lock().unwrap().push(status.as_u16()));
        let addr = spawn(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();

        stream
            .write_all(b"GET /dinosaur/nest HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let (status, head, body) = read_response(&mut stream, &mut buf).await;
        assert_eq!(status, 404);
        assert!(head.contains("Connection: close"));
        assert_eq!(body, "Not Found");
        assert_eq!(endpoints.load(Ordering::SeqCst), 1);
        assert_eq!(*errors.lock().unwrap(), [404]);

        stream
            .write_all(b"GET /dinosaur/food HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let (status, head, body) = read_response(&mut stream, &mut buf).await;
        assert_eq!(status, 200);
        assert!(head.contains("Connection: keep-alive"));
        assert_eq!(body, "Hello");
        assert_eq!(endpoints.load(Ordering::SeqCst), 2);
        assert_eq!(*errors.lock().unwrap(), [404]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scenario_c_concurrent_connections_keep_their_own_order() {
        let log = Arc::new(Mutex::new(Vec::<(String, usize, Stage)>::new()));
        let endpoints = Arc::new(AtomicUsize::new(0));

        let mut server = Server::new(registry().seal());
        let counter = Arc::clone(&endpoints);
        server.on(Event::BeforeEndpoint, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for stage in Stage::ORDER {
            let log = Arc::clone(&log);
            server.stage(stage, move |ctx: Context| {
                let log = Arc::clone(&log);
                async move {
                    let headers = ctx.request().headers();
                    let conn = headers.get("x-conn").unwrap_or_default().to_owned();
                    let seq = headers.get("x-seq").and_then(|s| s.parse().ok()).unwrap_or(0);
                    log.lock().unwrap().push((conn.clone(), seq, stage));
                    if stage == Stage::Service {
                        Flow::Respond(Response::new(StatusCode::Ok).body(format!("{conn}:{seq}")))
                    } else {
                        Flow::Continue(ctx)
                    }
                }
            });
        }
        let addr = spawn(server).await;

        let client = |conn: &'static str| async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut buf = Vec::new();
            for seq in 0..10 {
                let raw = format!(
                    "POST /dinosaur/food HTTP/1.1\r\nX-Conn: {conn}\r\nX-Seq: {seq}\r\n\r\n"
                );
                stream.write_all(raw.as_bytes()).await.unwrap();
                let (status, _, body) = read_response(&mut stream, &mut buf).await;
                assert_eq!(status, 200);
                assert_eq!(body, format!("{conn}:{seq}"));
            }
        };

        tokio::join!(client("a"), client("b"));

        assert_eq!(endpoints.load(Ordering::SeqCst), 20);
        let log = log.lock().unwrap();
        for conn in ["a", "b"] {
            let observed: Vec<_> = log
                .iter()
                .filter(|(c, _, _)| c == conn)
                .map(|(_, seq, stage)| (*seq, *stage))
                .collect();
            let expected: Vec<_> = (0..10)
                .flat_map(|seq| Stage::ORDER.map(|stage| (seq, stage)))
                .collect();
            assert_eq!(observed, expected, "connection {conn}");
        }
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let addr = spawn(Server::new(registry().seal())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET /dinosaur/food HTTP/1.1\r\n\r\nPUT /dinosaur/food HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /nowhere HTTP/1.1\r\n\r\n",
            )
            .await
            .unwrap();

        let mut buf = Vec::new();
        assert_eq!(read_response(&mut stream, &mut buf).await.0, 200);
        assert_eq!(read_response(&mut stream, &mut buf).await.0, 405);
        assert_eq!(read_response(&mut stream, &mut buf).await.0, 404);
    }

    #[tokio::test]
    async fn connection_close_request_ends_the_connection() {
        let addr = spawn(Server::new(registry().seal())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /admin HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let (status, head, _) = read_response(&mut stream, &mut buf).await;
        assert_eq!(status, 200);
        assert!(head.contains("Connection: close"));
        assert_closed(&mut stream).await;
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let log: Log = Arc::default();
        let addr = spawn(recording_server(registry(), &log)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /\x01 HTTP/1.1\r\n\r\n").await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(read_response(&mut stream, &mut buf).await.0, 400);
        assert_closed(&mut stream).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_request_gets_413() {
        let config = ServerConfig {
            max_request_size: 64,
            ..ServerConfig::default()
        };
        let addr = spawn(Server::new(registry().seal()).with_config(config)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /dinosaur/food HTTP/1.1\r\nContent-Length: 1000\r\n\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let (status, _, body) = read_response(&mut stream, &mut buf).await;
        assert_eq!(status, 413);
        assert_eq!(body, "Content Too Large");
    }

    #[tokio::test]
    async fn content_length_near_usize_max_gets_413() {
        let addr = spawn(Server::new(registry().seal())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"POST /dinosaur/food HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n",
            )
            .await
            .unwrap();

        let mut buf = Vec::new();
        let (status, _, _) = read_response(&mut stream, &mut buf).await;
        assert_eq!(status, 413);
        assert_closed(&mut stream).await;
    }

    #[tokio::test]
    async fn absolute_form_target_is_routed_by_its_path() {
        let server = Server::new(registry().seal());
        let response = server
            .dispatch(request("GET", "http://localhost/dinosaur/food"))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn on_connection_sees_every_accepted_stream() {
        let seen = Arc::new(AtomicUsize::new(0));
        let bound = Server::new(registry().seal())
            .bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = bound.local_addr();
        let counter = Arc::clone(&seen);
        tokio::spawn(bound.run_with(move |stream: &TcpStream, peer: SocketAddr| {
            assert_eq!(stream.peer_addr().unwrap(), peer);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /dinosaur HTTP/1.1\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut buf = Vec::new();
            assert_eq!(read_response(&mut stream, &mut buf).await.0, 200);
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let err = Server::new(registry().seal())
            .bind("not-an-address")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { ref addr, .. } if addr == "not-an-address"));
    }
}
