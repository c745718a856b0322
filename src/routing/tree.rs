//! Route tree definition and validation.
//!
//! # Responsibilities
//! - Declare routes as a nested builder (`RouteDef`)
//! - Validate the whole tree once at startup and freeze it as `RouteTree`
//!
//! # Design Decisions
//! - A child may only accept methods its parent accepts
//! - Patterns must be anchored to the start of the remaining path
//! - Once an ancestor declares a body format, descendants inherit it and may
//!   only restate the same format
//! - Nodes are shared behind `Arc` so match results can outlive the lookup
//!   without borrowing the tree

use crate::routing::body::BodyFormat;
use crate::routing::context::RequestContext;
use crate::routing::router::DispatchError;
use axum::http::Method;
use futures_util::future::BoxFuture;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// What a handler hands back: the context to continue with, or a failure
/// that aborts the request.
pub type HandlerResult = Result<RequestContext, DispatchError>;

/// A route handler. Takes the request context by value and returns it.
pub type Handler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

fn passthrough() -> Handler {
    handler(|ctx| async move { Ok(ctx) })
}

/// Errors found while validating a route tree.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route '{route}' declares no methods")]
    EmptyMethods { route: String },

    #[error("route '{route}' accepts {method} which its parent does not")]
    MethodNotInParent { route: String, method: Method },

    #[error("route '{route}' must be anchored with '^' or '\\A'")]
    Unanchored { route: String },

    #[error("route '{route}' has an invalid pattern: {source}")]
    InvalidPattern {
        route: String,
        #[source]
        source: regex::Error,
    },

    #[error("route '{route}' declares unknown body format '{format}'")]
    UnknownBodyFormat { route: String, format: String },

    #[error("route '{route}' declares body format {declared} below an ancestor declaring {inherited}")]
    BodyFormatOverride {
        route: String,
        inherited: BodyFormat,
        declared: BodyFormat,
    },
}

/// An ordered set of HTTP methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSet(Vec<Method>);

impl MethodSet {
    pub fn new<I: IntoIterator<Item = Method>>(methods: I) -> Self {
        let mut set = Vec::new();
        for method in methods {
            if !set.contains(&method) {
                set.push(method);
            }
        }
        Self(set)
    }

    /// The methods the server recognizes at all.
    pub fn standard() -> Self {
        Self::new([
            Method::GET,
            Method::HEAD,
            Method::OPTIONS,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
    }

    pub fn contains(&self, method: &Method) -> bool {
        self.0.contains(method)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Method> {
        self.0.iter()
    }
}

impl<const N: usize> From<[Method; N]> for MethodSet {
    fn from(methods: [Method; N]) -> Self {
        Self::new(methods)
    }
}

/// Per-route access flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAcl {
    /// Skip the trusted-client header check for this route.
    pub csrf_disable: bool,
    /// Entity the route guards; carried for handlers, not checked here.
    pub entity_name: Option<String>,
}

/// Builder for one route and its children.
pub struct RouteDef {
    pattern: String,
    methods: MethodSet,
    body_format: Option<Result<BodyFormat, String>>,
    acl: RouteAcl,
    handler: Option<Handler>,
    children: Vec<RouteDef>,
}

impl RouteDef {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: MethodSet::default(),
            body_format: None,
            acl: RouteAcl::default(),
            handler: None,
            children: Vec::new(),
        }
    }

    pub fn methods(mut self, methods: impl Into<MethodSet>) -> Self {
        self.methods = methods.into();
        self
    }

    pub fn body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = Some(Ok(format));
        self
    }

    /// Declare the body format by name; unknown names fail at build time.
    pub fn body_format_named(mut self, name: &str) -> Self {
        self.body_format = Some(name.parse::<BodyFormat>().map_err(|e| e.0));
        self
    }

    pub fn csrf_disable(mut self, disable: bool) -> Self {
        self.acl.csrf_disable = disable;
        self
    }

    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        self.acl.entity_name = Some(name.into());
        self
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn child(mut self, child: RouteDef) -> Self {
        self.children.push(child);
        self
    }
}

/// A validated route.
pub struct RouteNode {
    pattern: Regex,
    methods: MethodSet,
    body_format: Option<BodyFormat>,
    acl: RouteAcl,
    handler: Handler,
    children: Vec<Arc<RouteNode>>,
}

impl RouteNode {
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn methods(&self) -> &MethodSet {
        &self.methods
    }

    /// The format this node itself declared, if any.
    pub fn body_format(&self) -> Option<BodyFormat> {
        self.body_format
    }

    pub fn acl(&self) -> &RouteAcl {
        &self.acl
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn children(&self) -> &[Arc<RouteNode>] {
        &self.children
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("body_format", &self.body_format)
            .field("acl", &self.acl)
            .field("children", &self.children)
            .finish()
    }
}

/// The frozen route tree.
#[derive(Debug, Clone)]
pub struct RouteTree {
    root: Arc<RouteNode>,
}

impl RouteTree {
    /// Validate `def` and everything below it.
    pub fn build(def: RouteDef) -> Result<Self, RouteError> {
        let root = build_node(def, None, None, "")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Arc<RouteNode> {
        &self.root
    }

    /// Methods accepted by the root route.
    pub fn recognized_methods(&self) -> &MethodSet {
        self.root.methods()
    }
}

fn build_node(
    def: RouteDef,
    parent_methods: Option<&MethodSet>,
    inherited_format: Option<BodyFormat>,
    trail: &str,
) -> Result<Arc<RouteNode>, RouteError> {
    let route = if trail.is_empty() {
        def.pattern.clone()
    } else {
        format!("{trail} > {}", def.pattern)
    };

    if def.methods.is_empty() {
        return Err(RouteError::EmptyMethods { route });
    }
    if let Some(parent) = parent_methods {
        if let Some(method) = def.methods.iter().find(|m| !parent.contains(m)) {
            return Err(RouteError::MethodNotInParent {
                route,
                method: method.clone(),
            });
        }
    }
    if !(def.pattern.starts_with('^') || def.pattern.starts_with("\\A")) {
        return Err(RouteError::Unanchored { route });
    }
    let pattern = Regex::new(&def.pattern).map_err(|source| RouteError::InvalidPattern {
        route: route.clone(),
        source,
    })?;

    let body_format = match def.body_format {
        None => None,
        Some(Err(format)) => return Err(RouteError::UnknownBodyFormat { route, format }),
        Some(Ok(declared)) => {
            if let Some(inherited) = inherited_format {
                if inherited != declared {
                    return Err(RouteError::BodyFormatOverride {
                        route,
                        inherited,
                        declared,
                    });
                }
            }
            Some(declared)
        }
    };

    let children = def
        .children
        .into_iter()
        .map(|child| {
            build_node(
                child,
                Some(&def.methods),
                inherited_format.or(body_format),
                &route,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Arc::new(RouteNode {
        pattern,
        methods: def.methods,
        body_format,
        acl: def.acl,
        handler: def.handler.unwrap_or_else(passthrough),
        children,
    }))
}
