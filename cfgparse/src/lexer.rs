use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    Text(String),
    StringLit(String),
    Number(u64),
    Colon,
    Dash,
    LBracket,
    RBracket,
    Comma,
    Newline,
    Indent(usize),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenType,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Text(s) => write!(f, "{s}"),
            TokenType::StringLit(s) => write!(f, "\"{s}\""),
            TokenType::Number(n) => write!(f, "{n}"),
            TokenType::Colon => write!(f, ":"),
            TokenType::Dash => write!(f, "-"),
            TokenType::LBracket => write!(f, "["),
            TokenType::RBracket => write!(f, "]"),
            TokenType::Comma => write!(f, ","),
            TokenType::Newline => write!(f, "\\n"),
            TokenType::Indent(n) => {
                for _ in 0..*n {
                    write!(f, " ")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at {}", self.kind, self.loc)
    }
}

pub struct Lexer<'a> {
    input: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input: input.chars().peekable(), line: 1, col: 1 }
    }

    fn advance(&mut self) {
        if let Some(c) = self.input.next() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn current_loc(&self) -> Loc {
        Loc { line: self.line, col: self.col }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let mut is_start_of_line = true;

        while self.peek().is_some() {
            if is_start_of_line && *self.peek().unwrap() != '\n' {
                self.handle_indentation(&mut tokens);
                is_start_of_line = false;
                continue;
            }

            let loc = self.current_loc();
            let c = *self.peek().unwrap();

            if c == '#' {
                self.skip_comment();
                continue;
            }

            match c {
                ':' => {
                    tokens.push(Token { kind: TokenType::Colon, loc });
                    self.advance();
                }
                '-' => self.handle_dash(&mut tokens, loc),
                '[' => {
                    tokens.push(Token { kind: TokenType::LBracket, loc });
                    self.advance();
                }
                ']' => {
                    tokens.push(Token { kind: TokenType::RBracket, loc });
                    self.advance();
                }
                ',' => {
                    tokens.push(Token { kind: TokenType::Comma, loc });
                    self.advance();
                }
                '\n' => {
                    tokens.push(Token { kind: TokenType::Newline, loc });
                    self.advance();
                    is_start_of_line = true;
                }
                q if q == '"' || q == '\'' => self.handle_quoted_string(&mut tokens, loc, q),
                c if c.is_whitespace() => {
                    self.advance();
                }
                _ => self.handle_text_or_number(&mut tokens, loc)?,
            }
        }

        Ok(tokens)
    }

    fn handle_indentation(&mut self, tokens: &mut Vec<Token>) {
        let loc = self.current_loc();
        let mut spaces = 0;

        while let Some(&w) = self.peek() {
            match w {
                ' ' => {
                    spaces += 1;
                    self.advance();
                }
                '\t' => {
                    spaces += 4;
                    self.advance();
                }
                _ => break,
            }
        }

        if let Some(&next) = self.peek() {
            if next != '\n' && next != '#' {
                tokens.push(Token { kind: TokenType::Indent(spaces), loc });
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn handle_dash(&mut self, tokens: &mut Vec<Token>, loc: Loc) {
        self.advance();

        let next_is_separator = match self.peek() {
            Some(n) => n.is_whitespace(),
            None => true,
        };

        if next_is_separator {
            tokens.push(Token { kind: TokenType::Dash, loc });
        } else {
            let mut val = String::from("-");
            while let Some(&n) = self.peek() {
                if n.is_alphanumeric() || "._-/:".contains(n) {
                    val.push(n);
                    self.advance();
                } else {
                    break;
                }
            }
            tokens.push(Token { kind: TokenType::Text(val), loc });
        }
    }

    fn handle_quoted_string(&mut self, tokens: &mut Vec<Token>, loc: Loc, quote_char: char) {
        self.advance();
        let mut val = String::new();

        while let Some(&c) = self.peek() {
            if c == quote_char {
                self.advance();
                break;
            }
            val.push(c);
            self.advance();
        }

        tokens.push(Token { kind: TokenType::StringLit(val), loc });
    }

    fn handle_text_or_number(&mut self, tokens: &mut Vec<Token>, loc: Loc) -> Result<(), String> {
        let mut val = String::new();

        while let Some(&n) = self.peek() {
            if n.is_alphanumeric() || "._-/:".contains(n) {
                val.push(n);
                self.advance();
            } else {
                break;
            }
        }

        if val.is_empty() {
            let c = *self.peek().unwrap();
            return Err(format!(
                "Unexpected character: '{}' at line {}, col {}",
                c, self.line, self.col
            ));
        }

        if let Ok(num) = val.parse::<u64>() {
            tokens.push(Token { kind: TokenType::Number(num), loc });
        } else {
            tokens.push(Token { kind: TokenType::Text(val), loc });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_flat_key_value_pair() {
        let tokens = Lexer::new("host: 127.0.0.1\n").tokenize().unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
            vec![
                TokenType::Text("host".into()),
                TokenType::Colon,
                TokenType::Text("127.0.0.1".into()),
                TokenType::Newline,
            ]
        );
    }

    #[test]
    fn tracks_indentation_as_leading_space_count() {
        let tokens = Lexer::new("a:\n  b: 1\n").tokenize().unwrap();
        assert!(tokens
            .iter()
            .any(|t| matches!(t.kind, TokenType::Indent(2))));
    }

    #[test]
    fn tab_indentation_counts_as_four_spaces() {
        let tokens = Lexer::new("a:\n\tb: 1\n").tokenize().unwrap();
        assert!(tokens
            .iter()
            .any(|t| matches!(t.kind, TokenType::Indent(4))));
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = Lexer::new("# comment\nhost: x\n").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenType::Text("host".into()));
    }

    #[test]
    fn dash_is_a_separate_token_before_a_list_item() {
        let tokens = Lexer::new("- a\n").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenType::Dash);
    }

    #[test]
    fn negative_looking_flag_without_separator_is_text() {
        let tokens = Lexer::new("-flag\n").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenType::Text("-flag".into()));
    }
}
