//! Controllers — named trees of path templates and per-method endpoints.
//!
//! A [`Controller`] is built from a declarative [`ControllerTree`]. Its name
//! and every path template are lower-cased on registration, and each declared
//! `(path, method)` pair becomes an [`Endpoint`] with an empty listener list.
//!
//! Controllers are collected in a [`Registry`] while the application is being
//! assembled. [`Registry::seal`] turns the registry into an immutable,
//! cheaply-cloneable [`Controllers`] set; from that point no listener can be
//! added, which is what makes the set safe to share across connection tasks.
//!
//! ```rust
//! use rttp_dispatch::controller::{ControllerTree, EndpointSpec, Registry};
//! use rttp_dispatch::http::Method;
//!
//! let tree = ControllerTree::new()
//!     .route("/food", Method::Get, EndpointSpec::default())
//!     .route("/food/{uuid}", Method::Delete, EndpointSpec::default());
//!
//! let mut registry = Registry::new();
//! registry.register("Dinosaur", tree).unwrap();
//! registry
//!     .listen("dinosaur", "/food", Method::Get, || println!("food listed"))
//!     .unwrap();
//!
//! let controllers = registry.seal();
//! assert_eq!(controllers[0].name(), "dinosaur");
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

use crate::events::call_isolated;
use crate::http::Method;
use crate::router::trim_slashes;

/// A zero-argument callback attached to one endpoint.
pub type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Fatal problems with registration input. None of these can occur once the
/// server is accepting traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("controller name must not be empty")]
    EmptyName,

    #[error("controller `{controller}` declares no paths")]
    EmptyTree { controller: String },

    #[error("path `{path}` on controller `{controller}` must start with `/`")]
    InvalidPath { controller: String, path: String },

    #[error("path `{path}` on controller `{controller}` declares no methods")]
    NoMethods { controller: String, path: String },

    #[error(
        "method `{method}` on `{path}` of controller `{controller}` is not one of GET, POST, PUT, PATCH, DELETE"
    )]
    UnsupportedMethod {
        controller: String,
        path: String,
        method: String,
    },

    #[error("path `{path}` is declared more than once on controller `{controller}`")]
    DuplicatePath { controller: String, path: String },

    #[error(
        "method `{method}` is declared more than once on `{path}` of controller `{controller}`"
    )]
    DuplicateMethod {
        controller: String,
        path: String,
        method: Method,
    },

    #[error("controller `{controller}` has no endpoint for {method} {path}")]
    UnknownSlot {
        controller: String,
        path: String,
        method: Method,
    },

    #[error("no controller named `{name}`")]
    UnknownController { name: String },
}

// ── Declarations ──────────────────────────────────────────────────────────────

/// Descriptors of what an endpoint expects in a request. Not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestShape {
    pub path: Option<String>,
    pub query: Option<String>,
    pub header: Option<String>,
    pub body: Option<String>,
}

/// Descriptors of what an endpoint answers with. Not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseShape {
    pub header: Option<String>,
    pub body: Option<String>,
}

/// The declaration of one `(path, method)` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSpec {
    pub req: Option<RequestShape>,
    pub res: Option<ResponseShape>,
}

impl EndpointSpec {
    #[must_use]
    pub fn request(mut self, req: RequestShape) -> Self {
        self.req = Some(req);
        self
    }

    #[must_use]
    pub fn response(mut self, res: ResponseShape) -> Self {
        self.res = Some(res);
        self
    }
}

/// Declarative input for [`Controller::register`].
///
/// Paths keep their declaration order, which decides the winner when two
/// templates match the same request. Deserializing keeps document order too,
/// so a tree can come straight out of a JSON or TOML file:
///
/// ```rust
/// use rttp_dispatch::controller::ControllerTree;
///
/// let tree: ControllerTree = serde_json::from_str(r#"{
///     "/food/new":    { "GET": {} },
///     "/food/{uuid}": { "GET": {}, "DELETE": { "req": { "path": "string" } } }
/// }"#).unwrap();
///
/// let paths: Vec<_> = tree.paths().collect();
/// assert_eq!(paths, ["/food/new", "/food/{uuid}"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ControllerTree {
    paths: Vec<(String, Vec<(String, EndpointSpec)>)>,
}

impl ControllerTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `method` on `path`. Paths are kept in first-declaration order.
    #[must_use]
    pub fn route(mut self, path: &str, method: Method, spec: EndpointSpec) -> Self {
        let entry = (method.as_str().to_owned(), spec);
        match self.paths.iter_mut().find(|(p, _)| p == path) {
            Some((_, methods)) => methods.push(entry),
            None => self.paths.push((path.to_owned(), vec![entry])),
        }
        self
    }

    /// Declares `path` with no methods yet. Registration rejects it unless a
    /// method is added with [`route`](Self::route).
    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        if !self.paths.iter().any(|(p, _)| p == path) {
            self.paths.push((path.to_owned(), Vec::new()));
        }
        self
    }

    /// Declared path keys, in declaration order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(|(p, _)| p.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<'de> Deserialize<'de> for ControllerTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let OrderedEntries(paths) =
            OrderedEntries::<OrderedEntries<EndpointSpec>>::deserialize(deserializer)?;
        Ok(Self {
            paths: paths
                .into_iter()
                .map(|(path, OrderedEntries(methods))| (path, methods))
                .collect(),
        })
    }
}

// A string-keyed map that remembers the order its keys were read in.
struct OrderedEntries<V>(Vec<(String, V)>);

impl<'de, V> Deserialize<'de> for OrderedEntries<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V> Visitor<'de> for EntriesVisitor<V>
        where
            V: Deserialize<'de>,
        {
            type Value = OrderedEntries<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map with string keys")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, V>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

// ── Registered state ──────────────────────────────────────────────────────────

/// One method's slot on one path template.
pub struct Endpoint {
    spec: EndpointSpec,
    listeners: Vec<Listener>,
}

impl Endpoint {
    fn new(spec: EndpointSpec) -> Self {
        Self {
            spec,
            listeners: Vec::new(),
        }
    }

    pub fn spec(&self) -> &EndpointSpec {
        &self.spec
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&self) {
        for listener in &self.listeners {
            call_isolated("endpoint", || listener());
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("spec", &self.spec)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A lower-cased path template and the endpoints declared on it.
#[derive(Debug)]
pub struct PathTemplate {
    template: String,
    segments: Vec<String>,
    endpoints: Vec<(Method, Endpoint)>,
}

impl PathTemplate {
    /// The template key as registered, e.g. `/food/{uuid}`.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// The template split on `/`, with a single leading and trailing slash
    /// removed first. `/` yields one empty segment.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn endpoint(&self, method: &Method) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, endpoint)| endpoint)
    }

    /// Methods declared on this template, in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.endpoints.iter().map(|(m, _)| m)
    }

    fn endpoint_mut(&mut self, method: &Method) -> Option<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .find(|(m, _)| m == method)
            .map(|(_, endpoint)| endpoint)
    }
}

/// A named collection of path templates.
#[derive(Debug)]
pub struct Controller {
    name: String,
    templates: Vec<PathTemplate>,
}

impl Controller {
    /// Validates and normalizes a declaration.
    ///
    /// # Errors
    ///
    /// Any [`RegistrationError`] other than `UnknownSlot` and
    /// `UnknownController`: empty name or tree, a path without the leading
    /// `/`, a path with no methods, a method outside the registrable set, or
    /// duplicates after lower-casing.
    pub fn register(name: &str, tree: ControllerTree) -> Result<Self, RegistrationError> {
        let name = name.to_lowercase();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if tree.is_empty() {
            return Err(RegistrationError::EmptyTree { controller: name });
        }

        let mut templates: Vec<PathTemplate> = Vec::with_capacity(tree.paths.len());

        for (path, methods) in tree.paths {
            if !path.starts_with('/') {
                return Err(RegistrationError::InvalidPath {
                    controller: name,
                    path,
                });
            }

            let template = path.to_lowercase();
            if templates.iter().any(|t| t.template == template) {
                return Err(RegistrationError::DuplicatePath {
                    controller: name,
                    path: template,
                });
            }
            if methods.is_empty() {
                return Err(RegistrationError::NoMethods {
                    controller: name,
                    path: template,
                });
            }

            let mut endpoints: Vec<(Method, Endpoint)> = Vec::with_capacity(methods.len());
            for (raw_method, spec) in methods {
                let method = match raw_method.to_ascii_uppercase().parse::<Method>() {
                    Ok(method) if method.is_registrable() => method,
                    _ => {
                        return Err(RegistrationError::UnsupportedMethod {
                            controller: name,
                            path: template,
                            method: raw_method,
                        });
                    }
                };
                if endpoints.iter().any(|(m, _)| *m == method) {
                    return Err(RegistrationError::DuplicateMethod {
                        controller: name,
                        path: template,
                        method,
                    });
                }
                endpoints.push((method, Endpoint::new(spec)));
            }

            let segments = trim_slashes(&template)
                .split('/')
                .map(str::to_owned)
                .collect();

            templates.push(PathTemplate {
                template,
                segments,
                endpoints,
            });
        }

        Ok(Self { name, templates })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Templates in declaration order.
    pub fn templates(&self) -> &[PathTemplate] {
        &self.templates
    }

    /// Finds a template by its key; `path` is lower-cased before comparing.
    pub fn template(&self, path: &str) -> Option<&PathTemplate> {
        let path = path.to_lowercase();
        self.templates.iter().find(|t| t.template == path)
    }

    pub fn endpoint(&self, path: &str, method: &Method) -> Option<&Endpoint> {
        self.template(path)?.endpoint(method)
    }

    /// Appends `listener` to the `(path, method)` slot.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::UnknownSlot`] if that slot was never declared.
    /// Slots are never created on demand.
    pub fn listen<F>(
        &mut self,
        path: &str,
        method: Method,
        listener: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = path.to_lowercase();
        let endpoint = self
            .templates
            .iter_mut()
            .find(|t| t.template == key)
            .and_then(|t| t.endpoint_mut(&method));

        match endpoint {
            Some(endpoint) => {
                endpoint.listeners.push(Arc::new(listener));
                Ok(())
            }
            None => Err(RegistrationError::UnknownSlot {
                controller: self.name.clone(),
                path: key,
                method,
            }),
        }
    }

    /// Runs every listener on the `(path, method)` slot in registration order.
    ///
    /// Unknown slots and empty listener lists are no-ops. A panicking listener
    /// is logged and the rest still run.
    pub fn emit(&self, path: &str, method: &Method) {
        if let Some(endpoint) = self.endpoint(path, method) {
            endpoint.emit();
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// The mutable, pre-traffic collection of controllers.
#[derive(Debug, Default)]
pub struct Registry {
    controllers: Vec<Controller>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration under `name`. See [`Controller::register`].
    ///
    /// Names are not required to be unique; the router picks the first
    /// controller with a matching name, so later duplicates are unreachable.
    pub fn register(
        &mut self,
        name: &str,
        tree: ControllerTree,
    ) -> Result<&mut Controller, RegistrationError> {
        let controller = Controller::register(name, tree)?;
        Ok(self.add(controller))
    }

    /// Adds an already-registered controller.
    pub fn add(&mut self, controller: Controller) -> &mut Controller {
        if self.get(controller.name()).is_some() {
            warn!(
                controller = controller.name(),
                "duplicate controller name; the earlier registration shadows this one"
            );
        }
        self.controllers.push(controller);
        let last = self.controllers.len() - 1;
        &mut self.controllers[last]
    }

    pub fn get(&self, name: &str) -> Option<&Controller> {
        let name = name.to_lowercase();
        self.controllers.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Controller> {
        let name = name.to_lowercase();
        self.controllers.iter_mut().find(|c| c.name == name)
    }

    /// Attaches a listener to a slot of the named controller.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::UnknownController`] or
    /// [`RegistrationError::UnknownSlot`].
    pub fn listen<F>(
        &mut self,
        controller: &str,
        path: &str,
        method: Method,
        listener: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.get_mut(controller)
            .ok_or_else(|| RegistrationError::UnknownController {
                name: controller.to_lowercase(),
            })?
            .listen(path, method, listener)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Freezes the registry. The returned set is shared read-only by every
    /// connection; listeners can no longer be added.
    pub fn seal(self) -> Controllers {
        Controllers(self.controllers.into())
    }
}

/// A sealed, immutable set of controllers in registration order.
#[derive(Debug, Clone)]
pub struct Controllers(Arc<[Controller]>);

impl Controllers {
    pub fn get(&self, name: &str) -> Option<&Controller> {
        self.0.iter().find(|c| c.name == name)
    }

    /// Runs the listeners of a resolved slot. No-op if the controller is unknown.
    pub fn emit(&self, controller: &str, path: &str, method: &Method) {
        if let Some(controller) = self.get(controller) {
            controller.emit(path, method);
        }
    }
}

impl Deref for Controllers {
    type Target = [Controller];

    fn deref(&self) -> &[Controller] {
        &self.0
    }
}

impl From<Vec<Controller>> for Controllers {
    fn from(controllers: Vec<Controller>) -> Self {
        Self(controllers.into())
    }
}
