//! Dinosaur feeding API — two controllers, lifecycle logging and an
//! authorization stage guarding the admin controller.
//!
//! Run with:
//!   RUST_LOG=rttp_dispatch=debug,dinosaur=info cargo run --example dinosaur
//!
//! Or from a config file:
//!   cargo run --example dinosaur -- dinosaur.toml
//!
//! Try:
//!   curl -i http://localhost:8080/dinosaur/food          # 200 Hello
//!   curl -i -X PUT http://localhost:8080/dinosaur/food   # 405
//!   curl -i http://localhost:8080/dinosaur/nest          # 404
//!   curl -i -X POST http://localhost:8080/admin          # 401
//!   curl -i -X POST -H 'authorization: keeper' http://localhost:8080/admin

use rttp_dispatch::controller::{RequestShape, ResponseShape};
use rttp_dispatch::{
    ApiInfo, Config, Context, ControllerTree, EndpointSpec, Event, Flow, Method, Registry,
    Response, Server, Stage, StatusCode,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn declared() -> Result<(Config, Registry), Box<dyn std::error::Error>> {
    if let Some(path) = std::env::args().nth(1) {
        let config = Config::load(&path)?;
        let registry = config.registry()?;
        return Ok((config, registry));
    }

    let dinosaur = ControllerTree::new()
        .route("/", Method::Get, EndpointSpec::default())
        .route(
            "/food",
            Method::Get,
            EndpointSpec::default().response(ResponseShape {
                body: Some("string".into()),
                ..ResponseShape::default()
            }),
        )
        .route(
            "/food",
            Method::Post,
            EndpointSpec::default().request(RequestShape {
                body: Some("string".into()),
                ..RequestShape::default()
            }),
        )
        .route(
            "/food/{uuid}",
            Method::Delete,
            EndpointSpec::default().request(RequestShape {
                path: Some("string".into()),
                ..RequestShape::default()
            }),
        );
    let admin = ControllerTree::new()
        .route("/", Method::Get, EndpointSpec::default())
        .route("/", Method::Post, EndpointSpec::default());

    let mut registry = Registry::new();
    registry.register("Dinosaur", dinosaur)?;
    registry.register("Admin", admin)?;

    let config = Config {
        info: ApiInfo::new("Dinosaur API", "1.0.0"),
        ..Config::default()
    };
    Ok((config, registry))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rttp_dispatch=debug,dinosaur=info".into()),
        )
        .init();

    let (config, mut registry) = declared()?;
    config.validate()?;

    registry.listen("dinosaur", "/food/{uuid}", Method::Delete, || {
        info!("a meal was cleared");
    })?;

    let port = config.server.port;
    let mut server = Server::new(registry.seal())
        .with_config(config.server)
        .with_info(config.info);

    server
        .on(Event::BeforeEndpoint, || info!("request received"))
        .on(Event::BeforeResponse, || info!("responding"))
        .on_http_error(|status| info!(status = status.as_u16(), "routing failed"));

    server.stage(Stage::Authorization, |ctx: Context| async move {
        let guarded = ctx.route().controller() == "admin" && ctx.request().method() != &Method::Get;
        if guarded && !ctx.request().headers().contains("authorization") {
            Flow::Respond(Response::status_text(StatusCode::Unauthorized))
        } else {
            Flow::Continue(ctx)
        }
    });

    server.listen(port).await?;
    Ok(())
}
