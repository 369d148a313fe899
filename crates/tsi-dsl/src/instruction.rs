//! Grammar-guided instruction lexer and parser (spec §4.3).
//!
//! The instruction lexer is the same kind of character scanner as
//! [`tsi_grammar::GrammarLexer`], but it is driven by the terminals and
//! punctuation of an already-parsed [`ProductionGrammar`] rather than BNF
//! syntax itself. The parser performs a deterministic left-to-right descent:
//! for a rule with several alternatives it commits to the first whose
//! leading terminal matches the next token, then fully consumes it.
//! Optional/Repetition nodes consume their inner rule zero-or-one /
//! zero-or-more times, greedily.

use tsi_grammar::{AlternativeContent, ProductionGrammar, ProductionRule, ProductionUnit, UnitType};
use tsi_types::error::{CoreError, SourceLocation, SyntaxError};

use crate::ast::{AstNode, IntermediaryNode, RootNode, TerminalNode};

fn syntax_err(line: usize, column: usize, message: impl Into<String>) -> CoreError {
    CoreError::Syntax(SyntaxError::Parser {
        location: SourceLocation::new(line, column),
        message: message.into(),
    })
}

/// Scans instruction text into raw characters; tokenization itself is done
/// on demand by [`InstructionParser`] against the grammar's own terminal
/// and punctuation lexemes, since what counts as a token is entirely
/// defined by the grammar being parsed against.
#[derive(Clone)]
pub struct InstructionLexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl InstructionLexer {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_str(&self, len: usize) -> String {
        self.chars[self.pos..(self.pos + len).min(self.chars.len())].iter().collect()
    }

    fn advance(&mut self) -> char {
        let ch = self.peek();
        if !self.is_at_end() {
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek().is_whitespace() {
            self.advance();
        }
    }

    /// Attempts to consume the exact literal `lexeme` (a grammar terminal or
    /// punctuation token) at the current position, after skipping leading
    /// whitespace. Returns the matched unit's location on success.
    pub fn try_consume_literal(&mut self, lexeme: &str) -> Option<(usize, usize)> {
        self.skip_whitespace();
        let literal = strip_terminal_delimiters(lexeme);
        if literal.is_empty() {
            return None;
        }
        if self.peek_str(literal.chars().count()) == literal {
            let (line, column) = (self.line, self.column);
            for _ in 0..literal.chars().count() {
                self.advance();
            }
            Some((line, column))
        } else {
            None
        }
    }

    /// Consumes a free-form non-terminal token: a run of characters up to
    /// the next whitespace or a structural delimiter (`{`, `}`, `[`, `]`,
    /// `,`, `=`). Used when a rule's leading unit is itself a NonTerminal
    /// whose content is open text (e.g. an instrument symbol or a file
    /// path), since the grammar alone does not pin its exact characters.
    pub fn consume_token(&mut self, stop_chars: &[char]) -> (String, usize, usize) {
        self.skip_whitespace();
        let (line, column) = (self.line, self.column);
        let mut out = String::new();
        while !self.is_at_end() && !self.peek().is_whitespace() && !stop_chars.contains(&self.peek()) {
            out.push(self.advance());
        }
        (out, line, column)
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.is_at_end()
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }
}

/// `"a"`/`'a'` → `a`; `a` (unquoted) → `a` unchanged.
pub(crate) fn strip_terminal_delimiters(lexeme: &str) -> String {
    let trimmed = lexeme.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        if (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
        {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Drives [`InstructionLexer`] against a [`ProductionGrammar`] to build an
/// AST rooted at the grammar's start rule.
pub struct InstructionParser<'g> {
    grammar: &'g ProductionGrammar,
}

impl<'g> InstructionParser<'g> {
    pub fn new(grammar: &'g ProductionGrammar) -> Self {
        Self { grammar }
    }

    pub fn parse(&self, text: &str) -> Result<AstNode, CoreError> {
        let start = self.grammar.start_rule().ok_or_else(|| {
            CoreError::Semantic(tsi_types::error::SemanticError("grammar has no rules".into()))
        })?;
        let mut lexer = InstructionLexer::new(text);
        let (_alt_index, children) = self.parse_rule_body(start, &mut lexer)?;
        if !lexer.at_end() {
            let loc = lexer.location();
            return Err(syntax_err(loc.line, loc.column, "trailing input after a full parse"));
        }
        Ok(AstNode::Root(RootNode {
            lhs: start.lhs.clone(),
            children,
        }))
    }

    /// Parses one occurrence of `rule`, committing to the first alternative
    /// whose leading unit matches, and returns the child nodes for that
    /// alternative (the caller wraps them in the right [`AstNode`] variant).
    fn parse_rule_body(&self, rule: &ProductionRule, lexer: &mut InstructionLexer) -> Result<(usize, Vec<AstNode>), CoreError> {
        let (alt_index, alt) = self.commit_alternative(rule, lexer)?;
        let units: Vec<ProductionUnit> = match &alt.content {
            AlternativeContent::Single(u) => vec![u.clone()],
            AlternativeContent::Sequence(units) => units.clone(),
        };

        let mut children = Vec::with_capacity(units.len());
        for unit in &units {
            children.push(self.parse_unit(unit, lexer)?);
        }
        Ok((alt_index, children))
    }

    /// Decides which alternative of `rule` to commit to by checking which
    /// one's leading unit can start at the lexer's current position,
    /// without consuming anything on failed attempts.
    fn commit_alternative<'a>(
        &self,
        rule: &'a ProductionRule,
        lexer: &mut InstructionLexer,
    ) -> Result<(usize, &'a tsi_grammar::ProductionAlternative), CoreError> {
        for (idx, alt) in rule.rhs.iter().enumerate() {
            let leading = alt.leading_unit().expect("alternatives are non-empty");
            if self.can_start_with(leading, lexer) {
                return Ok((idx, alt));
            }
        }
        let loc = lexer.location();
        Err(syntax_err(
            loc.line,
            loc.column,
            format!("no alternative of rule {} matches the input here", rule.lhs),
        ))
    }

    /// Non-destructive lookahead: can `unit` begin matching at the lexer's
    /// current position? Terminals/Punctuation are checked by literal
    /// prefix; NonTerminal/Optional/Repetition recurse into their own
    /// rule's alternatives.
    fn can_start_with(&self, unit: &ProductionUnit, lexer: &InstructionLexer) -> bool {
        match unit.unit_type {
            UnitType::Terminal | UnitType::Punctuation => {
                let mut probe = lexer.clone();
                probe.try_consume_literal(&unit.lexeme).is_some()
            }
            UnitType::NonTerminal | UnitType::Optional | UnitType::Repetition => {
                match self.grammar.get_rule_by_unit(unit) {
                    Some(rule) => {
                        let probe = lexer.clone();
                        rule.rhs
                            .iter()
                            .any(|alt| self.can_start_with(alt.leading_unit().expect("non-empty"), &probe))
                    }
                    // An unresolved non-terminal inside Optional/Repetition
                    // means "open text": anything non-empty can start it.
                    None => !lexer.is_at_end(),
                }
            }
            UnitType::EndOfFile | UnitType::Undetermined => false,
        }
    }

    fn parse_unit(&self, unit: &ProductionUnit, lexer: &mut InstructionLexer) -> Result<AstNode, CoreError> {
        match unit.unit_type {
            UnitType::Terminal | UnitType::Punctuation => {
                let (line, column) = lexer.try_consume_literal(&unit.lexeme).ok_or_else(|| {
                    let loc = lexer.location();
                    syntax_err(loc.line, loc.column, format!("expected literal '{}'", unit.lexeme))
                })?;
                Ok(AstNode::Terminal(TerminalNode {
                    unit: ProductionUnit::new(unit.unit_type, unit.lexeme.clone(), line, column),
                }))
            }
            UnitType::NonTerminal => self.parse_nonterminal(unit, lexer),
            UnitType::Optional => self.parse_optional(unit, lexer),
            UnitType::Repetition => self.parse_repetition(unit, lexer),
            UnitType::EndOfFile | UnitType::Undetermined => {
                let loc = lexer.location();
                Err(syntax_err(loc.line, loc.column, "unexpected end-of-file unit in grammar"))
            }
        }
    }

    fn parse_nonterminal(&self, unit: &ProductionUnit, lexer: &mut InstructionLexer) -> Result<AstNode, CoreError> {
        match self.grammar.get_rule_by_unit(unit) {
            Some(rule) => {
                let (alt_index, children) = self.parse_rule_body(rule, lexer)?;
                Ok(AstNode::Intermediary(IntermediaryNode {
                    lhs: rule.lhs.clone(),
                    alt_index,
                    children,
                }))
            }
            None => {
                // Open, grammar-undefined leaf (e.g. an instrument letter,
                // a file path segment): consumed as raw free text up to the
                // next structural delimiter or whitespace.
                let (text, line, column) = lexer.consume_token(&['{', '}', '[', ']', ',', '=', '<', '>']);
                Ok(AstNode::Terminal(TerminalNode {
                    unit: ProductionUnit::new(UnitType::Terminal, text, line, column),
                }))
            }
        }
    }

    fn parse_optional(&self, unit: &ProductionUnit, lexer: &mut InstructionLexer) -> Result<AstNode, CoreError> {
        let inner = self.inner_unit(unit);
        let mut children = Vec::new();
        if self.can_start_with(&inner, lexer) {
            children.push(self.parse_unit(&inner, lexer)?);
        }
        Ok(AstNode::Intermediary(IntermediaryNode {
            lhs: unit.lexeme.clone(),
            alt_index: if children.is_empty() { 0 } else { 1 },
            children,
        }))
    }

    fn parse_repetition(&self, unit: &ProductionUnit, lexer: &mut InstructionLexer) -> Result<AstNode, CoreError> {
        let inner = self.inner_unit(unit);
        let mut children = Vec::new();
        while self.can_start_with(&inner, lexer) {
            let before = lexer.pos;
            children.push(self.parse_unit(&inner, lexer)?);
            if lexer.pos == before {
                // Guard against a zero-width match looping forever.
                break;
            }
        }
        Ok(AstNode::Intermediary(IntermediaryNode {
            lhs: unit.lexeme.clone(),
            alt_index: 0,
            children,
        }))
    }

    /// Builds the synthetic NonTerminal unit an Optional/Repetition wraps,
    /// e.g. `[<item>]` → `<item>`.
    fn inner_unit(&self, unit: &ProductionUnit) -> ProductionUnit {
        ProductionUnit::new(UnitType::NonTerminal, unit.inner_nonterminal().to_string(), unit.line, unit.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsi_grammar::parse_grammar;

    #[test]
    fn parses_simple_sequence_grammar() {
        let grammar = parse_grammar(r#"<greeting> ::= "hello" <name> ;"#).unwrap();
        let parser = InstructionParser::new(&grammar);
        let ast = parser.parse("hello world").unwrap();
        match ast {
            AstNode::Root(root) => {
                assert_eq!(root.lhs, "<greeting>");
                assert_eq!(root.children.len(), 2);
            }
            _ => panic!("expected root"),
        }
    }

    #[test]
    fn optional_consumes_zero_or_one_greedily() {
        let grammar = parse_grammar(
            r#"
            <a> ::= [<b>] "end" ;
            <b> ::= "maybe" ;
            "#,
        )
        .unwrap();
        let parser = InstructionParser::new(&grammar);
        let with_opt = parser.parse("maybe end").unwrap();
        if let AstNode::Root(root) = &with_opt {
            if let AstNode::Intermediary(opt_node) = &root.children[0] {
                assert_eq!(opt_node.children.len(), 1);
            } else {
                panic!("expected intermediary for optional");
            }
        }
        let without_opt = parser.parse("end").unwrap();
        if let AstNode::Root(root) = &without_opt {
            if let AstNode::Intermediary(opt_node) = &root.children[0] {
                assert_eq!(opt_node.children.len(), 0);
            }
        }
    }

    #[test]
    fn repetition_consumes_zero_or_more_greedily() {
        let grammar = parse_grammar(
            r#"
            <list> ::= {<item>} "." ;
            <item> ::= "x" ;
            "#,
        )
        .unwrap();
        let parser = InstructionParser::new(&grammar);
        let ast = parser.parse("x x x .").unwrap();
        if let AstNode::Root(root) = &ast {
            if let AstNode::Intermediary(rep_node) = &root.children[0] {
                assert_eq!(rep_node.children.len(), 3);
            } else {
                panic!("expected intermediary for repetition");
            }
        }
    }

    #[test]
    fn decoding_same_text_twice_yields_equal_shape() {
        let grammar = parse_grammar(r#"<a> ::= "x" <b> ;"#).unwrap();
        let grammar2 = parse_grammar(r#"<b> ::= "y" ;"#).unwrap();
        let mut merged = grammar;
        merged.rules.extend(grammar2.rules);
        let parser = InstructionParser::new(&merged);
        let first = parser.parse("x y").unwrap();
        let second = parser.parse("x y").unwrap();
        assert_eq!(first.lhs(), second.lhs());
    }
}
