//! # rttp-dispatch
//!
//! An async HTTP/1.1 request-dispatch server: controllers declare the paths
//! and methods they serve, the router resolves each request to a
//! `(controller, template, method)` triple, and every request runs through a
//! fixed sequence of lifecycle events and pipeline stages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp_dispatch::{ControllerTree, EndpointSpec, Event, Method, Registry, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new();
//!     registry.register(
//!         "Dinosaur",
//!         ControllerTree::new()
//!             .route("/", Method::Get, EndpointSpec::default())
//!             .route("/food", Method::Get, EndpointSpec::default())
//!             .route("/food/{uuid}", Method::Delete, EndpointSpec::default()),
//!     )?;
//!
//!     let mut server = Server::new(registry.seal());
//!     server.on(Event::BeforeEndpoint, || println!("request in"));
//!     server.on_http_error(|status| println!("routing failed: {status}"));
//!
//!     // GET /dinosaur/food → 200 "Hello"
//!     // PUT /dinosaur/food → 405
//!     // GET /dinosaur/nest → 404
//!     server.listen(8080).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod events;
pub mod http;
pub mod pipeline;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ApiInfo, Config, ConfigError, ServerConfig};
pub use context::{Context, Extensions, Parameters};
pub use controller::{
    Controller, ControllerTree, Controllers, EndpointSpec, Registry, RegistrationError,
};
pub use events::{Event, Events};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use pipeline::{Flow, Pipeline, Stage};
pub use router::{Route, RouteError, resolve};
pub use server::{BoundServer, Server, ServerError};
