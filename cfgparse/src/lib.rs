//! A small indentation-sensitive configuration language: `key: value`
//! mappings, `- item` lists, `[a, b]` inline lists, and `#` comments.
//! Deliberately not YAML — no anchors, no multi-document streams, no
//! flow-mapping braces — just enough structure to describe listeners,
//! routes and hooks with readable diffs and error locations that point at
//! a line and column.

pub mod lexer;
pub mod parser;
pub mod value;

pub use lexer::Loc;
pub use parser::{parse, ConfigParser};
pub use value::{ConfigError, ConfigValue};
