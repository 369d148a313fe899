//! BNF grammar lexer. Ported from `BNF_grammar_lexer.cpp`: a hand-rolled
//! character scanner that yields [`ProductionUnit`]s until end of file.

use tsi_types::error::{CoreError, SourceLocation, SyntaxError};

use crate::types::{ProductionUnit, UnitType};

fn syntax_err(line: usize, column: usize, message: impl Into<String>) -> CoreError {
    CoreError::Syntax(SyntaxError::Lexer {
        location: SourceLocation::new(line, column),
        message: message.into(),
    })
}

/// Scans grammar text into a stream of [`ProductionUnit`]s, one `next()`
/// call at a time.
pub struct GrammarLexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl GrammarLexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.line = 1;
        self.column = 1;
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.input[self.pos]
        }
    }

    fn peek_at(&self, offset: usize) -> char {
        self.input.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        if self.is_at_end() {
            return '\0';
        }
        let ch = self.input[self.pos];
        self.pos += 1;
        self.update_position(ch);
        ch
    }

    fn update_position(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    /// Skips whitespace and `;`-at-column-1 line comments, repeatedly,
    /// until neither applies.
    fn skip_whitespace(&mut self) {
        loop {
            while !self.is_at_end() && self.peek().is_whitespace() {
                self.advance();
            }
            if !self.is_at_end() && self.peek() == ';' && self.column == 1 {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
                if !self.is_at_end() && self.peek() == '\n' {
                    self.advance();
                }
                continue;
            }
            break;
        }
    }

    /// Returns the next unit, or `EndOfFile` once the input is exhausted.
    pub fn next_unit(&mut self) -> Result<ProductionUnit, CoreError> {
        self.skip_whitespace();

        if self.is_at_end() {
            return Ok(ProductionUnit::eof(self.line, self.column));
        }

        let next_char = self.peek();
        if next_char == '<' {
            self.parse_non_terminal()
        } else if next_char == '[' {
            self.parse_optional()
        } else if next_char == '{' {
            self.parse_repetition()
        } else if next_char == '"' || next_char == '\'' || next_char.is_alphanumeric() {
            self.parse_terminal()
        } else if next_char.is_ascii_punctuation() {
            self.parse_punctuation()
        } else {
            let (line, column) = (self.line, self.column);
            let unknown = self.advance();
            Err(syntax_err(line, column, format!("unknown character '{unknown}'")))
        }
    }

    fn parse_non_terminal(&mut self) -> Result<ProductionUnit, CoreError> {
        let mut lexeme = String::new();
        lexeme.push(self.advance()); // '<'
        while !self.is_at_end() && self.peek() != '>' {
            lexeme.push(self.advance());
        }
        if self.is_at_end() {
            return Err(syntax_err(self.line, self.column, "unterminated non-terminal"));
        }
        lexeme.push(self.advance()); // '>'
        Ok(ProductionUnit::new(UnitType::NonTerminal, lexeme, self.line, self.column))
    }

    fn parse_optional(&mut self) -> Result<ProductionUnit, CoreError> {
        let (start_line, start_col) = (self.line, self.column);
        self.advance(); // '['
        if self.peek() != '<' {
            return Err(syntax_err(
                self.line,
                self.column,
                "optionals must enclose a non-terminal, e.g. [<example>]",
            ));
        }
        let mut lexeme = String::new();
        loop {
            lexeme.push(self.advance());
            if self.is_at_end() {
                return Err(syntax_err(start_line, start_col, "unterminated optional"));
            }
            if self.peek() == '>' {
                break;
            }
        }
        lexeme.push(self.advance()); // '>'
        if self.peek() != ']' {
            return Err(syntax_err(self.line, self.column, "missing closing ']' for optional"));
        }
        self.advance(); // ']'
        Ok(ProductionUnit::new(
            UnitType::Optional,
            format!("[{lexeme}]"),
            start_line,
            start_col,
        ))
    }

    fn parse_repetition(&mut self) -> Result<ProductionUnit, CoreError> {
        let (start_line, start_col) = (self.line, self.column);
        self.advance(); // '{'
        if self.peek() != '<' {
            return Err(syntax_err(
                self.line,
                self.column,
                "repetitions must enclose a non-terminal, e.g. {<example>}",
            ));
        }
        let mut lexeme = String::new();
        loop {
            lexeme.push(self.advance());
            if self.is_at_end() {
                return Err(syntax_err(start_line, start_col, "unterminated repetition"));
            }
            if self.peek() == '>' {
                break;
            }
        }
        lexeme.push(self.advance()); // '>'
        if self.peek() != '}' {
            return Err(syntax_err(self.line, self.column, "missing closing '}' for repetition"));
        }
        self.advance(); // '}'
        Ok(ProductionUnit::new(
            UnitType::Repetition,
            format!("{{{lexeme}}}"),
            start_line,
            start_col,
        ))
    }

    fn parse_terminal(&mut self) -> Result<ProductionUnit, CoreError> {
        if self.peek() != '"' && self.peek() != '\'' {
            let mut lexeme = String::new();
            while !self.is_at_end() && (self.peek().is_alphanumeric() || self.peek() == '_' || self.peek() == '.') {
                lexeme.push(self.advance());
            }
            return Ok(ProductionUnit::new(UnitType::Terminal, lexeme, self.line, self.column));
        }

        let quote = self.advance(); // opening quote
        let (start_line, start_col) = (self.line, self.column);
        let mut lexeme = String::new();

        loop {
            if self.is_at_end() {
                return Err(syntax_err(start_line, start_col, "unterminated terminal"));
            }
            let ch = self.peek();
            if ch == quote {
                self.advance();
                return Ok(ProductionUnit::new(
                    UnitType::Terminal,
                    format!("{quote}{lexeme}{quote}"),
                    start_line,
                    start_col,
                ));
            }
            if ch == '\\' {
                // Escape interpretation happens later, at comparison time;
                // the lexer preserves the backslash and escaped char verbatim.
                lexeme.push(self.advance());
                if !self.is_at_end() {
                    lexeme.push(self.advance());
                }
                continue;
            }
            lexeme.push(self.advance());
        }
    }

    fn parse_punctuation(&mut self) -> Result<ProductionUnit, CoreError> {
        if self.peek() == ':' {
            self.advance();
            if self.peek() == ':' {
                self.advance();
                if self.peek() == '=' {
                    self.advance();
                    return Ok(ProductionUnit::new(UnitType::Punctuation, "::=", self.line, self.column));
                }
                return Err(syntax_err(self.line, self.column, "expected '::=' after '::'"));
            }
            return Err(syntax_err(self.line, self.column, "expected '::=' after ':'"));
        }

        let ch = self.advance();
        if ch == '.' && self.peek() == '.' && self.peek_at(1) == '.' {
            self.advance();
            self.advance();
            return Err(syntax_err(
                self.line,
                self.column,
                "the expression \"...\" is not supported by this grammar",
            ));
        }

        if ch == ';' || ch == '|' {
            return Ok(ProductionUnit::new(
                UnitType::Punctuation,
                ch.to_string(),
                self.line,
                self.column,
            ));
        }

        Err(syntax_err(self.line, self.column, format!("unsupported character '{ch}'")))
    }
}
