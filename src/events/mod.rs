//! Lifecycle events fired around every request.
//!
//! Per request the server fires, in this order:
//!
//! 1. [`Event::BeforeEndpoint`] — on receipt, before routing.
//! 2. On a routing failure: [`Event::HttpError`] with `404` or `405`.
//! 3. On success: [`Event::BeforeAuthorization`], [`Event::BeforeValidation`],
//!    [`Event::BeforeService`], each ahead of its pipeline stage.
//! 4. [`Event::BeforeResponse`] — immediately before a response is written.
//!
//! Listeners run synchronously in subscription order. A listener that panics
//! is logged and skipped; it never stops the other listeners or the response.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::http::StatusCode;

/// A named lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BeforeEndpoint,
    BeforeAuthorization,
    BeforeValidation,
    BeforeService,
    BeforeResponse,
    /// Carries the status code of the failed resolution.
    HttpError,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeEndpoint => "beforeEndpoint",
            Self::BeforeAuthorization => "beforeAuthorization",
            Self::BeforeValidation => "beforeValidation",
            Self::BeforeService => "beforeService",
            Self::BeforeResponse => "beforeResponse",
            Self::HttpError => "httpError",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener for the zero-argument events.
pub type EventListener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Listener for [`Event::HttpError`].
pub type HttpErrorListener = Arc<dyn Fn(StatusCode) + Send + Sync + 'static>;

/// Subscription lists for every lifecycle event.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU16, Ordering};
/// use rttp_dispatch::events::{Event, Events};
/// use rttp_dispatch::http::StatusCode;
///
/// let last = Arc::new(AtomicU16::new(0));
/// let seen = Arc::clone(&last);
///
/// let mut events = Events::new();
/// events.on_http_error(move |status| seen.store(status.as_u16(), Ordering::SeqCst));
/// events.subscribe(Event::BeforeEndpoint, || {});
///
/// events.fire_http_error(StatusCode::NotFound);
/// assert_eq!(last.load(Ordering::SeqCst), 404);
/// ```
#[derive(Default, Clone)]
pub struct Events {
    before_endpoint: Vec<EventListener>,
    before_authorization: Vec<EventListener>,
    before_validation: Vec<EventListener>,
    before_service: Vec<EventListener>,
    before_response: Vec<EventListener>,
    http_error: Vec<HttpErrorListener>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to a zero-argument event.
    ///
    /// Subscribing to [`Event::HttpError`] here registers a listener that
    /// ignores the status code; use [`on_http_error`](Self::on_http_error)
    /// to receive it.
    pub fn subscribe<F>(&mut self, event: Event, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        match self.listeners_mut(event) {
            Some(list) => list.push(Arc::new(listener)),
            None => self.http_error.push(Arc::new(move |_| listener())),
        }
    }

    /// Appends a listener to [`Event::HttpError`].
    pub fn on_http_error<F>(&mut self, listener: F)
    where
        F: Fn(StatusCode) + Send + Sync + 'static,
    {
        self.http_error.push(Arc::new(listener));
    }

    /// Runs every listener of a zero-argument event, in order.
    ///
    /// Firing [`Event::HttpError`] through this method is a no-op, since it
    /// needs a status; see [`fire_http_error`](Self::fire_http_error).
    pub fn fire(&self, event: Event) {
        if let Some(list) = self.listeners(event) {
            for listener in list {
                call_isolated(event.as_str(), || listener());
            }
        }
    }

    pub fn fire_http_error(&self, status: StatusCode) {
        for listener in &self.http_error {
            call_isolated(Event::HttpError.as_str(), || listener(status));
        }
    }

    /// Number of listeners subscribed to `event`.
    pub fn count(&self, event: Event) -> usize {
        self.listeners(event)
            .map_or(self.http_error.len(), <[EventListener]>::len)
    }

    fn listeners(&self, event: Event) -> Option<&[EventListener]> {
        match event {
            Event::BeforeEndpoint => Some(&self.before_endpoint),
            Event::BeforeAuthorization => Some(&self.before_authorization),
            Event::BeforeValidation => Some(&self.before_validation),
            Event::BeforeService => Some(&self.before_service),
            Event::BeforeResponse => Some(&self.before_response),
            Event::HttpError => None,
        }
    }

    fn listeners_mut(&mut self, event: Event) -> Option<&mut Vec<EventListener>> {
        match event {
            Event::BeforeEndpoint => Some(&mut self.before_endpoint),
            Event::BeforeAuthorization => Some(&mut self.before_authorization),
            Event::BeforeValidation => Some(&mut self.before_validation),
            Event::BeforeService => Some(&mut self.before_service),
            Event::BeforeResponse => Some(&mut self.before_response),
            Event::HttpError => None,
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("before_endpoint", &self.before_endpoint.len())
            .field("before_authorization", &self.before_authorization.len())
            .field("before_validation", &self.before_validation.len())
            .field("before_service", &self.before_service.len())
            .field("before_response", &self.before_response.len())
            .field("http_error", &self.http_error.len())
            .finish()
    }
}

/// Runs `f`, containing any panic. Returns `false` if it panicked.
pub(crate) fn call_isolated(listener: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                listener,
                panic = panic_message(payload.as_ref()),
                "listener panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
