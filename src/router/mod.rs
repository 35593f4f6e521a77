//! Request routing — resolve a raw path and method to a controller endpoint.
//!
//! The first path segment selects a [`Controller`] by name; the remaining
//! segments are matched against that controller's templates:
//!
//! | Template        | Request (after the controller segment) | Captured params     |
//! |-----------------|----------------------------------------|---------------------|
//! | `/`             | *(nothing)*                            | *(none)*            |
//! | `/food`         | `/food`, `/food/`                      | *(none)*            |
//! | `/food/{uuid}`  | `/food/123e4567-e89b`                  | `uuid → 123e4567-e89b` |
//!
//! Segment counts must be equal; there are no wildcard segments. Segments are
//! percent-decoded and lower-cased before comparison.
//!
//! Templates are tried in declaration order and the first match wins, so a
//! literal `/food/new` declared *after* `/food/{uuid}` is never reached.
//! Resolution is a pure read of the sealed controller set.

use std::fmt;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::context::Parameters;
use crate::controller::{Controller, PathTemplate};
use crate::http::{Method, StatusCode};

/// The two ways a request can fail to resolve.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteError {
    /// No controller has the requested name, or none of its templates fit.
    #[error("no controller path matches the request")]
    NotFound,

    /// A template fits but declares no endpoint for the method.
    #[error("the matched path does not support this method")]
    MethodNotAllowed,
}

impl RouteError {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NotFound,
            Self::MethodNotAllowed => StatusCode::MethodNotAllowed,
        }
    }
}

/// A successfully resolved request: `(controller, template, method)` plus the
/// values captured by placeholder segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    controller: String,
    template: String,
    method: Method,
    params: Parameters,
}

impl Route {
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// The matched template key, exactly as registered (lower-cased).
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The resolved triple.
    pub fn as_triple(&self) -> (&str, &str, &str) {
        (&self.controller, &self.template, self.method.as_str())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.method, self.controller, self.template)
    }
}

/// Resolves `pathname` and `method` against `controllers`.
///
/// # Errors
///
/// - [`RouteError::NotFound`] — the first segment names no controller, or no
///   template of that controller fits the remaining segments.
/// - [`RouteError::MethodNotAllowed`] — a template fits but has no endpoint
///   for `method`.
///
/// # Examples
///
/// ```rust
/// use rttp_dispatch::controller::{Controller, ControllerTree, EndpointSpec};
/// use rttp_dispatch::http::Method;
/// use rttp_dispatch::router::{RouteError, resolve};
///
/// let tree = ControllerTree::new()
///     .route("/food", Method::Get, EndpointSpec::default())
///     .route("/food/{uuid}", Method::Delete, EndpointSpec::default());
/// let controllers = [Controller::register("Dinosaur", tree).unwrap()];
///
/// let route = resolve("/dinosaur/food/42", &Method::Delete, &controllers).unwrap();
/// assert_eq!(route.as_triple(), ("dinosaur", "/food/{uuid}", "DELETE"));
/// assert_eq!(route.params().get("uuid"), Some("42"));
///
/// assert_eq!(
///     resolve("/dinosaur/food", &Method::Put, &controllers),
///     Err(RouteError::MethodNotAllowed)
/// );
/// ```
pub fn resolve(
    pathname: &str,
    method: &Method,
    controllers: &[Controller],
) -> Result<Route, RouteError> {
    let mut segments = trim_slashes(pathname).split('/').map(decode_segment);

    // `split` always yields at least one item.
    let selector = segments.next().unwrap_or_default();
    let controller = controllers
        .iter()
        .find(|c| c.name() == selector)
        .ok_or(RouteError::NotFound)?;

    let mut rest: Vec<String> = segments.collect();
    if rest.is_empty() {
        rest.push(String::new());
    }

    let template = controller
        .templates()
        .iter()
        .find(|t| fits(t, &rest))
        .ok_or(RouteError::NotFound)?;

    if template.endpoint(method).is_none() {
        return Err(RouteError::MethodNotAllowed);
    }

    Ok(Route {
        controller: controller.name().to_owned(),
        template: template.as_str().to_owned(),
        method: method.clone(),
        params: capture(template, &rest),
    })
}

/// Removes a single leading and a single trailing `/`.
pub(crate) fn trim_slashes(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}

/// `{name}` segments match any single request segment.
pub(crate) fn is_placeholder(segment: &str) -> bool {
    segment.len() >= 2 && segment.starts_with('{') && segment.ends_with('}')
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment)
        .decode_utf8_lossy()
        .to_lowercase()
}

fn fits(template: &PathTemplate, request: &[String]) -> bool {
    let expected = template.segments();
    expected.len() == request.len()
        && expected
            .iter()
            .zip(request)
            .all(|(t, r)| is_placeholder(t) || t == r)
}

fn capture(template: &PathTemplate, request: &[String]) -> Parameters {
    let mut params = Parameters::new();
    for (t, r) in template.segments().iter().zip(request) {
        if is_placeholder(t) {
            params.insert(t[1..t.len() - 1].to_owned(), r.clone());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerTree, EndpointSpec};

    fn spec() -> EndpointSpec {
        EndpointSpec::default()
    }

    fn dinosaur() -> Controller {
        let tree = ControllerTree::new()
            .route("/", Method::Get, spec())
            .route("/food", Method::Get, spec())
            .route("/food", Method::Post, spec())
            .route("/food/{uuid}", Method::Delete, spec());
        Controller::register("Dinosaur", tree).unwrap()
    }

    fn admin() -> Controller {
        let tree = ControllerTree::new()
            .route("/", Method::Get, spec())
            .route("/", Method::Post, spec());
        Controller::register("Admin", tree).unwrap()
    }

    fn controllers() -> Vec<Controller> {
        vec![dinosaur(), admin()]
    }

    fn triple(path: &str, method: Method) -> Result<(String, String, String), RouteError> {
        resolve(path, &method, &controllers()).map(|r| {
            let (c, t, m) = r.as_triple();
            (c.to_owned(), t.to_owned(), m.to_owned())
        })
    }

    fn ok(c: &str, t: &str, m: &str) -> Result<(String, String, String), RouteError> {
        Ok((c.to_owned(), t.to_owned(), m.to_owned()))
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    #[test]
    fn trim_slashes_strips_one_each_side() {
        assert_eq!(trim_slashes("/food/"), "food");
        assert_eq!(trim_slashes("/"), "");
        assert_eq!(trim_slashes("//food//"), "/food/");
        assert_eq!(trim_slashes("food"), "food");
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder("{uuid}"));
        assert!(is_placeholder("{}"));
        assert!(!is_placeholder("{"));
        assert!(!is_placeholder("uuid}"));
        assert!(!is_placeholder("food"));
    }

    // ── scenario A ────────────────────────────────────────────────────────────

    #[test]
    fn get_food_resolves() {
        assert_eq!(triple("/dinosaur/food", Method::Get), ok("dinosaur", "/food", "GET"));
    }

    #[test]
    fn put_food_is_method_not_allowed() {
        assert_eq!(triple("/dinosaur/food", Method::Put), Err(RouteError::MethodNotAllowed));
    }

    #[test]
    fn unknown_template_is_not_found() {
        assert_eq!(triple("/dinosaur/nest", Method::Get), Err(RouteError::NotFound));
    }

    // ── controller selection ──────────────────────────────────────────────────

    #[test]
    fn unknown_controller_is_not_found() {
        assert_eq!(triple("/raptor/food", Method::Get), Err(RouteError::NotFound));
        assert_eq!(triple("/", Method::Get), Err(RouteError::NotFound));
        assert_eq!(triple("", Method::Get), Err(RouteError::NotFound));
    }

    #[test]
    fn controller_name_is_exact_not_prefix() {
        assert_eq!(triple("/dino/food", Method::Get), Err(RouteError::NotFound));
        assert_eq!(triple("/dinosaurs/food", Method::Get), Err(RouteError::NotFound));
    }

    #[test]
    fn controller_name_is_case_insensitive() {
        assert_eq!(triple("/DinoSaur/FOOD", Method::Post), ok("dinosaur", "/food", "POST"));
    }

    #[test]
    fn bare_controller_reaches_root_template() {
        assert_eq!(triple("/dinosaur", Method::Get), ok("dinosaur", "/", "GET"));
        assert_eq!(triple("/dinosaur/", Method::Get), ok("dinosaur", "/", "GET"));
        assert_eq!(triple("/admin", Method::Post), ok("admin", "/", "POST"));
        assert_eq!(triple("/admin", Method::Delete), Err(RouteError::MethodNotAllowed));
    }

    // ── template matching ─────────────────────────────────────────────────────

    #[test]
    fn segment_count_is_strict() {
        assert_eq!(triple("/dinosaur/food/a/b", Method::Delete), Err(RouteError::NotFound));
        assert_eq!(triple("/dinosaur/food", Method::Delete), Err(RouteError::MethodNotAllowed));
    }

    #[test]
    fn placeholder_matches_uuid_segment() {
        let route = resolve(
            "/dinosaur/food/123e4567-e89b-12d3-a456-426614174000",
            &Method::Delete,
            &controllers(),
        )
        .unwrap();
        assert_eq!(route.as_triple(), ("dinosaur", "/food/{uuid}", "DELETE"));
        assert_eq!(
            route.params().get("uuid"),
            Some("123e4567-e89b-12d3-a456-426614174000")
        );
    }

    #[test]
    fn placeholder_matches_percent_encoded_segment() {
        let route = resolve("/dinosaur/food/T%20Rex%2F1", &Method::Delete, &controllers()).unwrap();
        assert_eq!(route.template(), "/food/{uuid}");
        assert_eq!(route.params().get("uuid"), Some("t rex/1"));
    }

    #[test]
    fn literal_segments_compare_decoded() {
        assert_eq!(triple("/dinosaur/%66ood", Method::Get), ok("dinosaur", "/food", "GET"));
    }

    #[test]
    fn invalid_utf8_escapes_decode_to_replacement_char() {
        let route = resolve("/dinosaur/food/%FF", &Method::Delete, &controllers()).unwrap();
        assert_eq!(route.params().get("uuid"), Some("\u{FFFD}"));

        assert_eq!(triple("/dinosaur/%FFood", Method::Get), Err(RouteError::NotFound));
        assert_eq!(triple("/dinosaur/fo%FF", Method::Get), Err(RouteError::NotFound));
    }

    #[test]
    fn placeholder_method_mismatch_is_405_not_404() {
        assert_eq!(
            triple("/dinosaur/food/42", Method::Get),
            Err(RouteError::MethodNotAllowed)
        );
    }

    #[test]
    fn unregistrable_methods_are_method_not_allowed() {
        assert_eq!(triple("/dinosaur/food", Method::Head), Err(RouteError::MethodNotAllowed));
        assert_eq!(
            triple("/dinosaur/food", Method::Custom("PURGE".into())),
            Err(RouteError::MethodNotAllowed)
        );
    }

    #[test]
    fn first_declared_template_wins() {
        let placeholder_first = ControllerTree::new()
            .route("/food/{uuid}", Method::Get, spec())
            .route("/food/new", Method::Get, spec());
        let literal_first = ControllerTree::new()
            .route("/food/new", Method::Get, spec())
            .route("/food/{uuid}", Method::Get, spec());

        let a = [Controller::register("a", placeholder_first).unwrap()];
        let b = [Controller::register("b", literal_first).unwrap()];

        assert_eq!(resolve("/a/food/new", &Method::Get, &a).unwrap().template(), "/food/{uuid}");
        assert_eq!(resolve("/b/food/new", &Method::Get, &b).unwrap().template(), "/food/new");
    }

    #[test]
    fn first_match_decides_method_outcome() {
        // `/food/new` only declares POST; it shadows the GET-capable placeholder.
        let tree = ControllerTree::new()
            .route("/food/new", Method::Post, spec())
            .route("/food/{uuid}", Method::Get, spec());
        let c = [Controller::register("d", tree).unwrap()];
        assert_eq!(
            resolve("/d/food/new", &Method::Get, &c),
            Err(RouteError::MethodNotAllowed)
        );
    }

    #[test]
    fn duplicate_controller_names_pick_the_first() {
        let shadow = Controller::register(
            "dinosaur",
            ControllerTree::new().route("/nest", Method::Get, spec()),
        )
        .unwrap();
        let set = [dinosaur(), shadow];
        assert_eq!(
            resolve("/dinosaur/nest", &Method::Get, &set),
            Err(RouteError::NotFound)
        );
    }

    #[test]
    fn resolution_is_repeatable() {
        let set = controllers();
        let first = resolve("/dinosaur/food/7", &Method::Delete, &set);
        for _ in 0..10 {
            assert_eq!(resolve("/dinosaur/food/7", &Method::Delete, &set), first);
        }
        assert_eq!(resolve("/dinosaur/nest", &Method::Get, &set), Err(RouteError::NotFound));
        assert_eq!(resolve("/dinosaur/nest", &Method::Get, &set), Err(RouteError::NotFound));
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(RouteError::NotFound.status().as_u16(), 404);
        assert_eq!(RouteError::MethodNotAllowed.status().as_u16(), 405);
    }

    #[test]
    fn route_display() {
        let route = resolve("/dinosaur/food", &Method::Post, &controllers()).unwrap();
        assert_eq!(route.to_string(), "POST dinosaur/food");
    }
}
