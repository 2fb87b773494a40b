use crate::lexer::{Lexer, Loc, Token, TokenType};
use crate::value::{ConfigError, ConfigValue};

/// Recursive-descent, indentation-sensitive tree builder. Generalizes the
/// schema-bound config parser into one that produces a plain
/// [`ConfigValue`] tree, so any number of resolved-config shapes can be
/// built on top of it by walking the tree rather than re-parsing text.
pub struct ConfigParser {
    tokens: Vec<Token>,
    cursor: usize,
}

pub fn parse(source: &str) -> Result<ConfigValue, ConfigError> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|msg| ConfigError::new(msg, None))?;
    ConfigParser::new(tokens).parse_document()
}

impl ConfigParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    fn peek_kind(&self) -> Option<&TokenType> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenType> {
        self.tokens.get(self.cursor + offset).map(|t| &t.kind)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.cursor);
        if tok.is_some() {
            self.cursor += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &TokenType) -> Result<(), ConfigError> {
        match self.peek_kind() {
            Some(kind) if std::mem::discriminant(kind) == std::mem::discriminant(expected) => {
                self.cursor += 1;
                Ok(())
            }
            Some(kind) => Err(ConfigError::new(
                format!("expected '{}', found '{}'", expected, kind),
                self.peek_loc(),
            )),
            None => Err(ConfigError::new(
                format!("expected '{}', found end of input", expected),
                None,
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), Some(TokenType::Newline)) {
            self.cursor += 1;
        }
    }

    /// Consumes one scalar-shaped token (key name, or plain value) and
    /// renders it back to a string. Numbers and dash-prefixed text both
    /// round-trip through `Display` since the resolved-config layer
    /// re-parses scalars into their target types itself.
    fn take_scalar_text(&mut self) -> Result<String, ConfigError> {
        match self.bump().map(|t| t.kind.clone()) {
            Some(TokenType::Text(s)) => Ok(s),
            Some(TokenType::StringLit(s)) => Ok(s),
            Some(TokenType::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(ConfigError::new(
                format!("expected a value, found '{}'", other),
                None,
            )),
            None => Err(ConfigError::new("expected a value, found end of input", None)),
        }
    }

    pub fn parse_document(&mut self) -> Result<ConfigValue, ConfigError> {
        self.skip_newlines();
        if self.peek_kind().is_none() {
            return Ok(ConfigValue::Map(Vec::new()));
        }
        self.parse_block()
    }

    /// Expects the cursor to sit on an `Indent` token opening a new block
    /// and dispatches to a map or a list depending on what follows it.
    fn parse_block(&mut self) -> Result<ConfigValue, ConfigError> {
        let indent = match self.peek_kind() {
            Some(TokenType::Indent(n)) => *n,
            _ => {
                return Err(ConfigError::new(
                    "expected an indented block",
                    self.peek_loc(),
                ))
            }
        };
        self.cursor += 1;
        if matches!(self.peek_kind(), Some(TokenType::Dash)) {
            self.parse_list(indent)
        } else {
            self.parse_map(indent)
        }
    }

    /// Parses `key: value` pairs at a single indentation level. The cursor
    /// must already be past the leading `Indent(map_indent)` for the first
    /// key when this is called.
    fn parse_map(&mut self, map_indent: usize) -> Result<ConfigValue, ConfigError> {
        let mut entries = Vec::new();
        loop {
            let key = self.take_scalar_text()?;
            self.expect(&TokenType::Colon)?;
            let value = self.parse_value(map_indent)?;
            entries.push((key, value));

            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenType::Indent(n)) if *n == map_indent => {
                    self.cursor += 1;
                    if matches!(self.peek_kind(), Some(TokenType::Dash)) {
                        break;
                    }
                }
                Some(TokenType::Indent(n)) if *n > map_indent => {
                    return Err(ConfigError::new(
                        "unexpected indentation increase within a mapping",
                        self.peek_loc(),
                    ));
                }
                _ => break,
            }
        }
        Ok(ConfigValue::Map(entries))
    }

    /// Parses the right-hand side of a `key:`. Either an inline scalar or
    /// bracketed list on the same line, or a nested block on the following,
    /// more-indented lines.
    fn parse_value(&mut self, key_indent: usize) -> Result<ConfigValue, ConfigError> {
        match self.peek_kind() {
            Some(TokenType::Newline) | None => {
                self.skip_newlines();
                match self.peek_kind() {
                    Some(TokenType::Indent(n)) if *n > key_indent => {
                        let child_indent = *n;
                        self.cursor += 1;
                        if matches!(self.peek_kind(), Some(TokenType::Dash)) {
                            self.parse_list(child_indent)
                        } else {
                            self.parse_map(child_indent)
                        }
                    }
                    _ => Ok(ConfigValue::Scalar(String::new())),
                }
            }
            Some(TokenType::LBracket) => self.parse_inline_list(),
            Some(_) => Ok(ConfigValue::Scalar(self.take_scalar_text()?)),
        }
    }

    fn parse_inline_list(&mut self) -> Result<ConfigValue, ConfigError> {
        self.expect(&TokenType::LBracket)?;
        let mut items = Vec::new();
        if matches!(self.peek_kind(), Some(TokenType::RBracket)) {
            self.cursor += 1;
            return Ok(ConfigValue::List(items));
        }
        loop {
            items.push(ConfigValue::Scalar(self.take_scalar_text()?));
            match self.peek_kind() {
                Some(TokenType::Comma) => {
                    self.cursor += 1;
                }
                Some(TokenType::RBracket) => {
                    self.cursor += 1;
                    break;
                }
                other => {
                    return Err(ConfigError::new(
                        format!("expected ',' or ']' in inline list, found {:?}", other),
                        self.peek_loc(),
                    ))
                }
            }
        }
        Ok(ConfigValue::List(items))
    }

    /// Parses a sequence of `- ...` entries at `list_indent`. Each entry is
    /// either a bare scalar, an inline list, or a small inline mapping
    /// (`- path: /`) whose continuation keys are indented two columns past
    /// the dash and folded into the same map.
    fn parse_list(&mut self, list_indent: usize) -> Result<ConfigValue, ConfigError> {
        let mut items = Vec::new();
        loop {
            self.expect(&TokenType::Dash)?;
            items.push(self.parse_list_item(list_indent)?);

            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenType::Indent(n)) if *n == list_indent => {
                    self.cursor += 1;
                    if !matches!(self.peek_kind(), Some(TokenType::Dash)) {
                        return Err(ConfigError::new(
                            "expected '-' to continue a list",
                            self.peek_loc(),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(ConfigValue::List(items))
    }

    fn parse_list_item(&mut self, list_indent: usize) -> Result<ConfigValue, ConfigError> {
        let is_inline_map_head = matches!(
            self.peek_kind(),
            Some(TokenType::Text(_)) | Some(TokenType::StringLit(_))
        ) && matches!(self.peek_kind_at(1), Some(TokenType::Colon));

        if is_inline_map_head {
            let item_indent = list_indent + 2;
            let first_key = self.take_scalar_text()?;
            self.expect(&TokenType::Colon)?;
            let first_value = self.parse_value(item_indent)?;
            let mut entries = vec![(first_key, first_value)];

            loop {
                self.skip_newlines();
                match self.peek_kind() {
                    Some(TokenType::Indent(n)) if *n == item_indent => {
                        self.cursor += 1;
                        if matches!(self.peek_kind(), Some(TokenType::Dash)) {
                            self.cursor -= 1;
                            break;
                        }
                        let key = self.take_scalar_text()?;
                        self.expect(&TokenType::Colon)?;
                        let value = self.parse_value(item_indent)?;
                        entries.push((key, value));
                    }
                    _ => break,
                }
            }
            Ok(ConfigValue::Map(entries))
        } else {
            self.parse_value(list_indent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_flat_map() {
        let tree = parse("worker_processes: 2\nbind: 0.0.0.0\n").unwrap();
        assert_eq!(
            tree.get("worker_processes").unwrap().as_scalar(),
            Some("2")
        );
        assert_eq!(tree.get("bind").unwrap().as_scalar(), Some("0.0.0.0"));
    }

    #[test]
    fn parses_a_nested_map() {
        let tree = parse("server:\n  host: 127.0.0.1\n  port: 8080\n").unwrap();
        let server = tree.get("server").unwrap();
        assert_eq!(server.get("host").unwrap().as_scalar(), Some("127.0.0.1"));
        assert_eq!(server.get("port").unwrap().as_scalar(), Some("8080"));
    }

    #[test]
    fn parses_an_inline_bracket_list() {
        let tree = parse("methods: [GET, POST, DELETE]\n").unwrap();
        let methods = tree.get("methods").unwrap().as_list().unwrap();
        assert_eq!(methods.len(), 3);
        assert_eq!(methods[1].as_scalar(), Some("POST"));
    }

    #[test]
    fn parses_a_list_of_inline_maps() {
        let src = "routes:\n  - path: /\n    root: ./www\n    methods: [GET]\n  - path: /upload\n    root: ./uploads\n";
        let tree = parse(src).unwrap();
        let routes = tree.get("routes").unwrap().as_list().unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].get("path").unwrap().as_scalar(), Some("/"));
        assert_eq!(
            routes[0].get("methods").unwrap().as_list().unwrap()[0].as_scalar(),
            Some("GET")
        );
        assert_eq!(routes[1].get("path").unwrap().as_scalar(), Some("/upload"));
    }

    #[test]
    fn unexpected_indentation_increase_is_an_error() {
        let err = parse("a: 1\n    b: 2\n");
        assert!(err.is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let tree = parse("# top comment\n\nworker_processes: 4\n\n# trailing\n").unwrap();
        assert_eq!(tree.get("worker_processes").unwrap().as_scalar(), Some("4"));
    }
}
