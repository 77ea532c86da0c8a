//! Path pattern compiler and path helpers.
//!
//! Pattern syntax:
//!
//! - `{name}` matches one segment and captures it as `name`
//! - `{name:regex}` matches one segment that fully matches `regex`
//! - `*` at the end captures the remaining path under `"*"`
//! - `*tail` at the end captures the remaining path under `tail`
//!
//! Everything else is a literal, split on `/`.

use std::borrow::Cow;
use std::fmt;

use regex::Regex;

/// One `/`-delimited unit of a compiled pattern.
#[derive(Clone, Debug)]
pub enum Segment {
    /// Literal text.
    Static(String),
    /// `{name}`
    Var { name: String },
    /// `{name:regex}`; the regex is anchored to the whole segment.
    VarRegex { name: String, regex: Regex },
    /// `*` or `*name`, always the final segment.
    Wildcard { key: String },
}

impl Segment {
    /// Capture name, if the segment captures anything.
    pub fn key(&self) -> Option<&str> {
        match self {
            Segment::Static(_) => None,
            Segment::Var { name } | Segment::VarRegex { name, .. } => Some(name),
            Segment::Wildcard { key } => Some(key),
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::Static(a), Segment::Static(b)) => a == b,
            (Segment::Var { name: a }, Segment::Var { name: b }) => a == b,
            (
                Segment::VarRegex { name: a, regex: ra },
                Segment::VarRegex { name: b, regex: rb },
            ) => a == b && ra.as_str() == rb.as_str(),
            (Segment::Wildcard { key: a }, Segment::Wildcard { key: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Segment {}

/// A compiled path pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Normalized pattern text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable and wildcard names in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(Segment::key)
    }

    /// True when the pattern has no variables and no wildcard.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Static(_)))
    }

    /// `/*`, built without going through the compiler.
    pub(crate) fn catch_all() -> Self {
        Self {
            source: "/*".to_string(),
            segments: vec![Segment::Wildcard {
                key: "*".to_string(),
            }],
        }
    }

    /// True when the pattern ends with a wildcard.
    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard { .. }))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Malformed path pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternSyntaxError {
    /// Pattern as written.
    pub pattern: String,
    /// Byte offset in the normalized pattern.
    pub position: usize,
    pub message: String,
}

impl PatternSyntaxError {
    fn new(pattern: &str, position: usize, message: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_string(),
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for PatternSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid path pattern '{}' at {}: {}",
            self.pattern, self.position, self.message
        )
    }
}

impl std::error::Error for PatternSyntaxError {}

/// Compile a pattern into segments.
pub fn compile(pattern: &str) -> Result<PathPattern, PatternSyntaxError> {
    let source = normalize_path(pattern).into_owned();
    let raw = split_segments(&source).map_err(|(pos, msg)| PatternSyntaxError::new(pattern, pos, msg))?;

    let count = raw.len();
    let mut segments = Vec::with_capacity(count);
    let mut names: Vec<&str> = Vec::new();

    for (index, (offset, text)) in raw.into_iter().enumerate() {
        let err = |at: usize, msg: &str| PatternSyntaxError::new(pattern, offset + at, msg);

        let segment = if let Some(inner) = braced(text) {
            let (name, expr) = match inner.find(':') {
                Some(colon) => (&inner[..colon], Some(&inner[colon + 1..])),
                None => (inner, None),
            };
            if name.is_empty() {
                return Err(err(1, "empty variable name"));
            }
            if names.contains(&name) {
                return Err(err(1, &format!("duplicate variable '{}'", name)));
            }
            names.push(name);
            match expr {
                Some(expr) => {
                    let regex = Regex::new(&format!("^(?:{})$", expr))
                        .map_err(|e| err(name.len() + 2, &e.to_string()))?;
                    Segment::VarRegex {
                        name: name.to_string(),
                        regex,
                    }
                }
                None => Segment::Var {
                    name: name.to_string(),
                },
            }
        } else if let Some(rest) = text.strip_prefix('*') {
            if index + 1 != count {
                return Err(err(0, "wildcard must be the last segment"));
            }
            if rest.contains(['{', '}', '*']) {
                return Err(err(1, "invalid wildcard name"));
            }
            let key = if rest.is_empty() { "*" } else { rest };
            if names.contains(&key) {
                return Err(err(1, &format!("duplicate variable '{}'", key)));
            }
            names.push(key);
            Segment::Wildcard {
                key: key.to_string(),
            }
        } else {
            if let Some(at) = text.find(['{', '}']) {
                return Err(err(at, "variable must span a whole segment"));
            }
            if let Some(at) = text.find('*') {
                return Err(err(at, "wildcard must start the last segment"));
            }
            Segment::Static(text.to_string())
        };
        segments.push(segment);
    }

    Ok(PathPattern { source, segments })
}

/// Split a normalized pattern on `/` outside of braces.
///
/// Returns `(offset, text)` pairs. The root pattern has no segments; a
/// trailing slash produces a final empty segment.
fn split_segments(source: &str) -> Result<Vec<(usize, &str)>, (usize, &'static str)> {
    let mut segments = Vec::new();
    if source == "/" {
        return Ok(segments);
    }

    let mut depth = 0usize;
    let mut open_at = 0usize;
    let mut start = 1usize;
    for (i, ch) in source.char_indices().skip(1) {
        match ch {
            '{' => {
                if depth == 0 {
                    open_at = i;
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err((i, "unmatched '}'"));
                }
                depth -= 1;
            }
            '/' if depth == 0 => {
                segments.push((start, &source[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err((open_at, "unclosed '{'"));
    }
    segments.push((start, &source[start..]));
    Ok(segments)
}

/// Inner text of a segment that is exactly one `{...}` group.
fn braced(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return (i == text.len() - 1).then(|| &text[1..i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Variable and wildcard names declared by `pattern`, in declaration order.
///
/// Never fails: malformed input yields whatever names could be scanned.
pub fn path_keys(pattern: &str) -> Vec<&str> {
    let mut keys = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut end = usize::MAX;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = i + 1;
                    end = usize::MAX;
                }
                depth += 1;
            }
            ':' if depth == 1 && end == usize::MAX => end = i,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    keys.push(&pattern[start..i.min(end)]);
                }
            }
            '*' if depth == 0 => {
                if i == pattern.len() - 1 {
                    keys.push("*");
                } else {
                    keys.push(&pattern[i + 1..]);
                }
                break;
            }
            _ => {}
        }
    }
    keys
}

/// Enforce a leading slash and collapse repeated slashes.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if path.is_empty() {
        return Cow::Borrowed("/");
    }
    if path.starts_with('/') && !path.contains("//") {
        return Cow::Borrowed(path);
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for ch in path.chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    Cow::Owned(normalized)
}

/// Prepend `/` when missing.
pub fn leading_slash(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{}", path))
    }
}

/// Strip all trailing slashes except a lone root `/`.
pub fn no_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && !path.is_empty() {
        &path[..1]
    } else {
        trimmed
    }
}
