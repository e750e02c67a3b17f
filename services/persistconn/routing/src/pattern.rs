//! Path patterns with literal and named segments

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while registering a route
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteConfigError {
    /// A `:` segment without a name
    #[error("pattern {pattern:?}: named segment without a name")]
    EmptyParamName {
        /// Offending pattern
        pattern: String,
    },
    /// The same parameter name bound twice
    #[error("pattern {pattern:?}: parameter {name:?} bound more than once")]
    DuplicateParam {
        /// Offending pattern
        pattern: String,
        /// Repeated name
        name: String,
    },
    /// Route registered without any allowed method
    #[error("pattern {pattern:?}: no allowed methods")]
    NoMethods {
        /// Offending pattern
        pattern: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Compiled path pattern.
///
/// The pattern and the path are split on `/` after trimming leading and
/// trailing slashes. A segment starting with `:` binds one or more non-slash
/// characters under its name; every other segment must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `entity/:id/data`
    pub fn compile(pattern: &str) -> Result<Self, RouteConfigError> {
        let mut seen = HashSet::new();
        let mut segments = Vec::new();

        for part in split_path(pattern) {
            match part.strip_prefix(':') {
                Some("") => {
                    return Err(RouteConfigError::EmptyParamName {
                        pattern: pattern.to_string(),
                    })
                }
                Some(name) => {
                    if !seen.insert(name) {
                        return Err(RouteConfigError::DuplicateParam {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Match a path, returning the bound parameters on success
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// Names of the named segments, in pattern order
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Pattern text as registered
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for PathPattern {
    type Err = RouteConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> std::str::Split<'_, char> {
    path.trim_matches('/').split('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parameter_extraction() {
        let pattern = PathPattern::compile("entity/:id/data").unwrap();
        assert_eq!(
            pattern.matches("entity/abc123/data"),
            Some(params(&[("id", "abc123")]))
        );
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_literal_only() {
        let pattern = PathPattern::compile("hello").unwrap();
        assert_eq!(pattern.matches("hello"), Some(HashMap::new()));
        assert_eq!(pattern.matches("/hello/"), Some(HashMap::new()));
        assert_eq!(pattern.matches("hello/world"), None);
        assert_eq!(pattern.matches("hell"), None);
    }

    #[test]
    fn test_named_segment_never_spans_slashes() {
        let pattern = PathPattern::compile("users/:id").unwrap();
        assert_eq!(pattern.matches("users/42/extra"), None);
        assert_eq!(pattern.matches("users/"), None);
        assert_eq!(pattern.matches("users//"), None);
        assert_eq!(
            pattern.matches("users/with space"),
            Some(params(&[("id", "with space")]))
        );
    }

    #[test]
    fn test_multiple_params() {
        let pattern = PathPattern::compile("/apps/:app/users/:user").unwrap();
        assert_eq!(
            pattern.matches("apps/search/users/admin"),
            Some(params(&[("app", "search"), ("user", "admin")]))
        );
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            PathPattern::compile("users/:"),
            Err(RouteConfigError::EmptyParamName { .. })
        ));
        assert!(matches!(
            "a/:id/b/:id".parse::<PathPattern>(),
            Err(RouteConfigError::DuplicateParam { ref name, .. }) if name == "id"
        ));
    }
}
