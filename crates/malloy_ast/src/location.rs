use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based position in a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Source location attached to every AST node. Diagnostics produced by the
/// semantic layer point at these.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// URL of the document this node was parsed from.
    pub url: String,
    pub range: Range,
}

impl Location {
    /// Location for nodes synthesized by the compiler rather than parsed.
    pub fn detached() -> Self {
        Location::default()
    }

    pub fn new(url: impl Into<String>, range: Range) -> Self {
        Location {
            url: url.into(),
            range,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.url, self.range.start.line, self.range.start.character
        )
    }
}
