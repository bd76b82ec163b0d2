use malloy_ast::Location;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A problem reported against a source location. The pass reports each
/// problem at most once, at the most specific node that can describe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Location,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Sink for diagnostics produced during one compilation pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, loc: &Location, message: impl Into<String>) {
        self.items.push(Diagnostic {
            message: message.into(),
            location: loc.clone(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.items.iter().map(|d| d.message.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    /// Whether any collected message contains `needle`. Test helper.
    pub fn any_contains(&self, needle: &str) -> bool {
        self.items.iter().any(|d| d.message.contains(needle))
    }
}
