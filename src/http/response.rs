//! HTTP/1.1 responses.
//!
//! Stage handlers build a [`Response`] with the consuming builder methods;
//! the dispatcher produces the baseline `200` and the [`Response::status_text`]
//! wrapper for routing misses. [`Response::into_bytes`] writes the wire form.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// A response produced by the dispatcher or a stage handler.
///
/// # Examples
///
/// ```
/// use rttp_dispatch::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Created)
///     .header("Location", "/dinosaur/food/42")
///     .body(r#"{"meal":42}"#);
/// assert_eq!(response.headers().get("location"), Some("/dinosaur/food/42"));
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(text.contains("Content-Length: 11\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// An empty-bodied response that keeps the connection alive.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// The status wrapper: the canonical reason phrase as the body and
    /// `Connection: close`.
    ///
    /// The header is advisory. When the server sends this for a `404` or
    /// `405`, it still reads the next request if the client stays connected
    /// and the request asked for keep-alive; clients that honor the header
    /// will hang up instead.
    ///
    /// ```
    /// use rttp_dispatch::http::{Response, StatusCode};
    ///
    /// let text = Response::status_text(StatusCode::MethodNotAllowed).into_bytes();
    /// let text = std::str::from_utf8(&text).unwrap();
    /// assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    /// assert!(text.contains("Connection: close\r\n"));
    /// assert!(text.ends_with("\r\n\r\nMethod Not Allowed"));
    /// ```
    pub fn status_text(status: StatusCode) -> Self {
        Self::new(status)
            .body(status.canonical_reason())
            .keep_alive(false)
    }

    /// Appends a header; repeated names are kept side by side.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// `Content-Length` is derived from the body in [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Chooses between `Connection: keep-alive` and `Connection: close`.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body as set so far.
    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Writes the status line, headers and body.
    ///
    /// A non-empty body without a `Content-Type` is sent as UTF-8 plain text.
    /// `Content-Length` and `Connection` are always added.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.insert("Connection", connection);
        self.headers
            .insert("Content-Length", self.body.len().to_string());

        let head = self
            .headers
            .iter()
            .fold(format!("HTTP/1.1 {}\r\n", self.status), |mut head, (name, value)| {
                head.push_str(name);
                head.push_str(": ");
                head.push_str(value);
                head.push_str("\r\n");
                head
            });

        let mut buf = BytesMut::with_capacity(head.len() + 2 + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
