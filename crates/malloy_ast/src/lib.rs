//! AST for the Malloy analytics language.
//!
//! These are the node types handed to the semantic layer by a parser. Nodes
//! are plain data and immutable once built; every node carries a [`Location`]
//! pointing back into the source document.

pub mod expr;
pub mod location;
pub mod query;
pub mod source;
pub mod statement;

pub use expr::*;
pub use location::*;
pub use query::*;
pub use source::*;
pub use statement::*;
