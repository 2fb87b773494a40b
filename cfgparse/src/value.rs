use std::fmt;

use crate::lexer::Loc;

/// The generic parse tree produced by [`crate::parse`] before it is
/// converted into a concrete resolved-configuration struct.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Map(Vec<(String, ConfigValue)>),
    List(Vec<ConfigValue>),
    Scalar(String),
}

impl ConfigValue {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        match self {
            ConfigValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>, loc: Option<Loc>) -> Self {
        Self { message: message.into(), loc, context: Vec::new() }
    }

    /// Pushes a breadcrumb onto the context trail as the error unwinds
    /// through nested `TryFrom<&ConfigValue>` conversions, so the final
    /// message reads top-down from the failing leaf to the field that
    /// requested it.
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[1;31mconfiguration error\x1b[0m: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " \x1b[2m(at {})\x1b[0m", loc)?;
        }
        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "  \x1b[1;34mwhile parsing:\x1b[0m")?;
            for (i, ctx) in self.context.iter().rev().enumerate() {
                write!(f, "\n{}↳ {}", " ".repeat(2 + i * 2), ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}
