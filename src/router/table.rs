//! Route table: one segment trie per route method.
//!
//! Each trie node has literal children, regex-constrained variable
//! children, one unconstrained variable child and a wildcard slot. Lookup
//! walks the request path segment by segment and backtracks, trying at
//! every node:
//!
//! 1. the literal child equal to the segment
//! 2. regex variables (registration order), then the plain variable
//! 3. the wildcard, which takes the rest of the path
//!
//! so a literal always beats a variable and a variable beats a wildcard.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use regex::Regex;

use super::pattern::{no_trailing_slash, normalize_path, Segment};
use super::route::{Route, RouteMethod};

/// Matching options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// Compare literal segments case-insensitively.
    pub ignore_case: bool,
    /// Treat `/a/` and `/a` as the same path.
    pub ignore_trailing_slash: bool,
}

/// Path variables of a match, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathVars {
    entries: Vec<(String, String)>,
}

impl PathVars {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a PathVars {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Result of a lookup. The route is never absent: misses are bound to the
/// not-found sentinel.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    matched: bool,
    route: Arc<Route>,
    vars: PathVars,
}

impl RouteMatch {
    fn found(route: Arc<Route>, vars: PathVars) -> Self {
        Self {
            matched: true,
            route,
            vars,
        }
    }

    /// Miss bound to the not-found route.
    pub fn not_found() -> Self {
        Self {
            matched: false,
            route: Route::not_found(),
            vars: PathVars::default(),
        }
    }

    /// Miss bound to the method-not-allowed route.
    pub fn method_not_allowed() -> Self {
        Self {
            matched: false,
            route: Route::method_not_allowed(),
            vars: PathVars::default(),
        }
    }

    #[inline]
    pub fn matched(&self) -> bool {
        self.matched
    }

    #[inline]
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    #[inline]
    pub fn vars(&self) -> &PathVars {
        &self.vars
    }

    pub fn into_parts(self) -> (Arc<Route>, PathVars) {
        (self.route, self.vars)
    }
}

struct RegexEdge {
    regex: Regex,
    node: Node,
}

#[derive(Default)]
struct Node {
    statics: HashMap<String, Node>,
    regex_vars: Vec<RegexEdge>,
    var: Option<Box<Node>>,
    wildcard: Option<usize>,
    route: Option<usize>,
}

/// A request path split into `(offset, segment)` pairs.
type Segments<'p> = Vec<(usize, &'p str)>;

impl Node {
    /// Walk down `segments`, creating nodes; returns the route slot.
    fn slot(&mut self, segments: &[Segment], ignore_case: bool) -> &mut Option<usize> {
        let Some((head, rest)) = segments.split_first() else {
            return &mut self.route;
        };

        match head {
            Segment::Static(literal) => {
                let key = if ignore_case {
                    literal.to_lowercase()
                } else {
                    literal.clone()
                };
                self.statics.entry(key).or_default().slot(rest, ignore_case)
            }
            Segment::VarRegex { regex, .. } => {
                let position = self
                    .regex_vars
                    .iter()
                    .position(|edge| edge.regex.as_str() == regex.as_str());
                let index = match position {
                    Some(index) => index,
                    None => {
                        self.regex_vars.push(RegexEdge {
                            regex: regex.clone(),
                            node: Node::default(),
                        });
                        self.regex_vars.len() - 1
                    }
                };
                self.regex_vars[index].node.slot(rest, ignore_case)
            }
            Segment::Var { .. } => self
                .var
                .get_or_insert_with(Box::default)
                .slot(rest, ignore_case),
            Segment::Wildcard { .. } => &mut self.wildcard,
        }
    }

    fn find<'p>(
        &self,
        segments: &[(usize, &'p str)],
        path: &'p str,
        ignore_case: bool,
        captures: &mut Vec<&'p str>,
    ) -> Option<usize> {
        let Some((&(offset, head), rest)) = segments.split_first() else {
            if self.route.is_some() {
                return self.route;
            }
            // A wildcard also matches an empty remainder
            return self.wildcard.inspect(|_| captures.push(""));
        };

        let literal = if ignore_case {
            self.statics.get(&head.to_lowercase())
        } else {
            self.statics.get(head)
        };
        if let Some(child) = literal {
            if let Some(found) = child.find(rest, path, ignore_case, captures) {
                return Some(found);
            }
        }

        if !head.is_empty() {
            // Constraints see the decoded value, the same one that is bound
            let decoded = if self.regex_vars.is_empty() {
                Cow::Borrowed(head)
            } else {
                percent_decode_str(head).decode_utf8_lossy()
            };
            for edge in &self.regex_vars {
                if !edge.regex.is_match(&decoded) {
                    continue;
                }
                captures.push(head);
                if let Some(found) = edge.node.find(rest, path, ignore_case, captures) {
                    return Some(found);
                }
                captures.pop();
            }

            if let Some(child) = &self.var {
                captures.push(head);
                if let Some(found) = child.find(rest, path, ignore_case, captures) {
                    return Some(found);
                }
                captures.pop();
            }
        }

        self.wildcard.inspect(|_| captures.push(&path[offset..]))
    }
}

/// Routes partitioned by method, each partition a segment trie.
///
/// Read-only once the router is frozen; lookups need no locking.
#[derive(Default)]
pub struct RouteTable {
    options: RouterOptions,
    routes: Vec<Arc<Route>>,
    trees: HashMap<RouteMethod, Node>,
}

impl RouteTable {
    pub fn new(options: RouterOptions) -> Self {
        Self {
            options,
            routes: Vec::new(),
            trees: HashMap::new(),
        }
    }

    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// Add a route and return its index.
    ///
    /// A route with the same method and pattern replaces the earlier one.
    pub fn add(&mut self, route: Route) -> usize {
        let mut segments = route.pattern().segments();
        if self.options.ignore_trailing_slash {
            if let Some((Segment::Static(last), init)) = segments.split_last() {
                if last.is_empty() {
                    segments = init;
                }
            }
        }

        let tree = self.trees.entry(route.method()).or_default();
        let slot = tree.slot(segments, self.options.ignore_case);

        match *slot {
            Some(index) => {
                tracing::warn!(
                    method = %route.method(),
                    replaced = %self.routes[index].pattern(),
                    pattern = %route.pattern(),
                    "route replaced"
                );
                self.routes[index] = Arc::new(route);
                index
            }
            None => {
                let index = self.routes.len();
                *slot = Some(index);
                self.routes.push(Arc::new(route));
                index
            }
        }
    }

    /// Mutable access while building.
    pub(crate) fn route_mut(&mut self, index: usize) -> &mut Route {
        Arc::make_mut(&mut self.routes[index])
    }

    /// Resolve `path` for `method`.
    pub fn find(&self, method: RouteMethod, path: &str) -> RouteMatch {
        let Some(tree) = self.trees.get(&method) else {
            return RouteMatch::not_found();
        };

        let normalized = normalize_path(path);
        let path = if self.options.ignore_trailing_slash {
            no_trailing_slash(&normalized)
        } else {
            &normalized
        };
        let segments = split_path(path);

        let mut captures = Vec::with_capacity(4);
        match tree.find(&segments, path, self.options.ignore_case, &mut captures) {
            Some(index) => {
                let route = Arc::clone(&self.routes[index]);
                let vars = bind_vars(&route, &captures);
                RouteMatch::found(route, vars)
            }
            None => RouteMatch::not_found(),
        }
    }

    /// Cheap existence check.
    pub fn matches(&self, method: RouteMethod, path: &str) -> bool {
        self.find(method, path).matched()
    }

    /// Methods with a route matching `path`.
    pub fn allowed_methods(&self, path: &str) -> Vec<RouteMethod> {
        let mut methods: Vec<RouteMethod> = self
            .trees
            .keys()
            .copied()
            .filter(|method| self.matches(*method, path))
            .collect();
        methods.sort();
        methods
    }

    /// All routes in registration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn split_path(path: &str) -> Segments<'_> {
    let mut segments = Vec::new();
    if path == "/" {
        return segments;
    }
    let mut start = 1;
    for (i, ch) in path.char_indices().skip(1) {
        if ch == '/' {
            segments.push((start, &path[start..i]));
            start = i + 1;
        }
    }
    segments.push((start, &path[start..]));
    segments
}

/// Pair captured values with the route's variable names.
///
/// Variables are percent-decoded; a wildcard tail is kept verbatim.
fn bind_vars(route: &Route, captures: &[&str]) -> PathVars {
    let mut vars = PathVars::default();
    let keyed = route
        .pattern()
        .segments()
        .iter()
        .filter(|segment| segment.key().is_some());

    for (segment, raw) in keyed.zip(captures) {
        match segment {
            Segment::Wildcard { key } => vars.push(key.as_str(), *raw),
            Segment::Var { name } | Segment::VarRegex { name, .. } => {
                vars.push(name.as_str(), percent_decode_str(raw).decode_utf8_lossy())
            }
            Segment::Static(_) => {}
        }
    }
    vars
}
