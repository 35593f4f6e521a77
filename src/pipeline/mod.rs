//! Stage pipeline — ordered authorization, validation and service steps.
//!
//! A routed request passes through three named [`Stage`]s in a fixed order.
//! Each stage holds zero or more handlers registered by the host. A handler
//! receives the request [`Context`] by value and returns a [`Flow`]:
//!
//! - [`Flow::Continue`] hands the context to the next handler (or stage);
//! - [`Flow::Respond`] answers the request; no further handler or stage runs.
//!
//! With no handlers at all every stage is a pass-through, and the server
//! answers with its placeholder response.
//!
//! ```rust,no_run
//! use rttp_dispatch::context::Context;
//! use rttp_dispatch::http::{Response, StatusCode};
//! use rttp_dispatch::pipeline::{Flow, Pipeline, Stage};
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add(Stage::Authorization, |ctx: Context| async move {
//!     if ctx.request().headers().contains("authorization") {
//!         Flow::Continue(ctx)
//!     } else {
//!         Flow::Respond(Response::status_text(StatusCode::Unauthorized))
//!     }
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::events::Event;
use crate::http::Response;

/// A named step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Authorization,
    Validation,
    Service,
}

impl Stage {
    /// Execution order.
    pub const ORDER: [Stage; 3] = [Stage::Authorization, Stage::Validation, Stage::Service];

    /// The lifecycle event fired right before this stage runs.
    pub fn event(self) -> Event {
        match self {
            Self::Authorization => Event::BeforeAuthorization,
            Self::Validation => Event::BeforeValidation,
            Self::Service => Event::BeforeService,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage handler decided.
pub enum Flow {
    Continue(Context),
    Respond(Response),
}

/// Boxed future returned by a stage handler.
pub type BoxFuture = Pin<Box<dyn Future<Output = Flow> + Send + 'static>>;

/// Type-erased, shareable stage handler.
pub type StageHandler = Arc<dyn Fn(Context) -> BoxFuture + Send + Sync + 'static>;

/// Conversion trait for async stage handlers.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Flow> + Send`
/// that is `Send + Sync + 'static`.
pub trait IntoStageHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture;
}

impl<T, F> IntoStageHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Flow> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        Box::pin((self)(ctx))
    }
}

/// Handlers for every stage, each list in registration order.
#[derive(Default, Clone)]
pub struct Pipeline {
    authorization: Vec<StageHandler>,
    validation: Vec<StageHandler>,
    service: Vec<StageHandler>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to `stage`.
    pub fn add(&mut self, stage: Stage, handler: impl IntoStageHandler) {
        let handler: StageHandler = Arc::new(move |ctx| handler.call(ctx));
        self.handlers_mut(stage).push(handler);
    }

    pub fn handlers(&self, stage: Stage) -> &[StageHandler] {
        match stage {
            Stage::Authorization => &self.authorization,
            Stage::Validation => &self.validation,
            Stage::Service => &self.service,
        }
    }

    pub fn is_empty(&self) -> bool {
        Stage::ORDER.iter().all(|s| self.handlers(*s).is_empty())
    }

    /// Runs the handlers of one stage in order, stopping at the first
    /// [`Flow::Respond`].
    pub async fn run_stage(&self, stage: Stage, mut ctx: Context) -> Flow {
        for handler in self.handlers(stage) {
            match handler(ctx).await {
                Flow::Continue(next) => ctx = next,
                respond @ Flow::Respond(_) => return respond,
            }
        }
        Flow::Continue(ctx)
    }

    fn handlers_mut(&mut self, stage: Stage) -> &mut Vec<StageHandler> {
        match stage {
            Stage::Authorization => &mut self.authorization,
            Stage::Validation => &mut self.validation,
            Stage::Service => &mut self.service,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("authorization", &self.authorization.len())
            .field("validation", &self.validation.len())
            .field("service", &self.service.len())
            .finish()
    }
}
