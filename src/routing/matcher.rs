//! Route matching.
//!
//! # Responsibilities
//! - Walk the route tree for a path and method
//! - Produce the chain of matched nodes, root first, with captures
//!
//! # Design Decisions
//! - Depth-first; at each level the first matching child wins and there is
//!   no backtracking into later siblings
//! - A match must begin at the start of the remaining path
//! - A node that consumes the whole remaining path passes `/` to its
//!   children, so `^/` still matches below it

use crate::routing::tree::RouteNode;
use axum::http::Method;
use std::fmt;
use std::sync::Arc;

/// One node of a matched chain.
#[derive(Clone)]
pub struct RouteMatch {
    pub node: Arc<RouteNode>,
    /// Capture groups 1..n; `None` for groups that did not participate.
    pub params: Vec<Option<String>>,
    /// The part of the path this node consumed.
    pub matched: String,
    /// What this node left for its children.
    pub remaining: String,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("pattern", &self.node.pattern().as_str())
            .field("params", &self.params)
            .field("matched", &self.matched)
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// Match `path` against the tree under `root`. An empty chain means no route.
pub fn match_route(root: &Arc<RouteNode>, path: &str, method: &Method) -> Vec<RouteMatch> {
    let mut chain = Vec::new();
    match_node(root, path, method, &mut chain);
    chain
}

fn match_node(node: &Arc<RouteNode>, suffix: &str, method: &Method, chain: &mut Vec<RouteMatch>) -> bool {
    if !node.methods().contains(method) {
        return false;
    }
    let Some(captures) = node.pattern().captures(suffix) else {
        return false;
    };
    let Some(whole) = captures.get(0) else {
        return false;
    };
    if whole.start() != 0 {
        return false;
    }

    let rest = &suffix[whole.end()..];
    let remaining = if rest.is_empty() { "/" } else { rest };
    let params = captures
        .iter()
        .skip(1)
        .map(|group| group.map(|g| g.as_str().to_string()))
        .collect();

    chain.push(RouteMatch {
        node: Arc::clone(node),
        params,
        matched: whole.as_str().to_string(),
        remaining: remaining.to_string(),
    });

    for child in node.children() {
        if match_node(child, remaining, method, chain) {
            break;
        }
    }
    true
}
