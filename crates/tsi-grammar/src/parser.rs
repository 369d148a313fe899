//! BNF grammar parser: turns a token stream from [`GrammarLexer`] into a
//! validated [`ProductionGrammar`].
//!
//! Grammar syntax (spec §4.2):
//! ```text
//! <rule>  ::= <nonterminal> "::=" <rhs> ";"
//! <rhs>   ::= <alt> { "|" <alt> }
//! <alt>   ::= <unit> { <unit> }
//! <unit>  ::= <terminal> | <nonterminal> | <optional> | <repetition>
//! ```

use std::collections::{HashMap, HashSet};

use tsi_types::error::{AmbiguityError, CoreError, ReferenceError, SemanticError};

use crate::lexer::GrammarLexer;
use crate::types::{
    AlternativeContent, AlternativeFlags, ProductionAlternative, ProductionGrammar, ProductionRule,
    ProductionUnit, UnitType,
};

/// One-token-of-lookahead wrapper around the raw lexer.
struct TokenStream {
    lexer: GrammarLexer,
    peeked: Option<ProductionUnit>,
}

impl TokenStream {
    fn new(text: &str) -> Self {
        Self {
            lexer: GrammarLexer::new(text),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<&ProductionUnit, CoreError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_unit()?);
        }
        Ok(self.peeked.as_ref().expect("just populated"))
    }

    fn next(&mut self) -> Result<ProductionUnit, CoreError> {
        if let Some(unit) = self.peeked.take() {
            return Ok(unit);
        }
        self.lexer.next_unit()
    }
}

fn is_unit_start(unit: &ProductionUnit) -> bool {
    matches!(
        unit.unit_type,
        UnitType::Terminal | UnitType::NonTerminal | UnitType::Optional | UnitType::Repetition
    )
}

/// Parses `text` into a fully validated [`ProductionGrammar`]: every rule
/// LHS unique, every referenced non-terminal resolved, no alternative
/// ambiguous on its leading token.
pub fn parse_grammar(text: &str) -> Result<ProductionGrammar, CoreError> {
    let mut stream = TokenStream::new(text);
    let mut rules = Vec::new();

    loop {
        if stream.peek()?.unit_type == UnitType::EndOfFile {
            break;
        }
        rules.push(parse_rule(&mut stream)?);
    }

    let grammar = ProductionGrammar::new(rules);
    check_unique_lhs(&grammar)?;
    check_references(&grammar)?;
    check_ambiguity(&grammar)?;
    Ok(grammar)
}

fn parse_rule(stream: &mut TokenStream) -> Result<ProductionRule, CoreError> {
    let lhs_unit = stream.next()?;
    if lhs_unit.unit_type != UnitType::NonTerminal {
        return Err(CoreError::Semantic(SemanticError(format!(
            "expected a non-terminal to start a rule, found {}",
            lhs_unit.to_display_string()
        ))));
    }
    let lhs = lhs_unit.lexeme.clone();

    let assign = stream.next()?;
    if assign.unit_type != UnitType::Punctuation || assign.lexeme != "::=" {
        return Err(CoreError::Semantic(SemanticError(format!(
            "expected '::=' after {lhs}, found {}",
            assign.to_display_string()
        ))));
    }

    let mut alternatives = vec![parse_alternative(stream, &lhs)?];
    while stream.peek()?.unit_type == UnitType::Punctuation && stream.peek()?.lexeme == "|" {
        stream.next()?; // consume '|'
        alternatives.push(parse_alternative(stream, &lhs)?);
    }

    let terminator = stream.next()?;
    if terminator.unit_type != UnitType::Punctuation || terminator.lexeme != ";" {
        return Err(CoreError::Semantic(SemanticError(format!(
            "expected ';' to close rule {lhs}, found {}",
            terminator.to_display_string()
        ))));
    }

    Ok(ProductionRule { lhs, rhs: alternatives })
}

fn parse_alternative(stream: &mut TokenStream, lhs: &str) -> Result<ProductionAlternative, CoreError> {
    let mut units = Vec::new();
    while is_unit_start(stream.peek()?) {
        units.push(stream.next()?);
    }

    if units.is_empty() {
        return Err(CoreError::Semantic(SemanticError(format!(
            "rule {lhs} has an empty alternative"
        ))));
    }

    let mut flags = AlternativeFlags::NONE;
    for unit in &units {
        match unit.unit_type {
            UnitType::Optional => flags |= AlternativeFlags::OPTIONAL,
            UnitType::Repetition => flags |= AlternativeFlags::REPETITION,
            UnitType::NonTerminal if unit.lexeme == lhs => flags |= AlternativeFlags::RECURSION,
            _ => {}
        }
    }

    let content = if units.len() == 1 {
        AlternativeContent::Single(units.into_iter().next().expect("len==1"))
    } else {
        AlternativeContent::Sequence(units)
    };

    Ok(ProductionAlternative {
        lhs: lhs.to_string(),
        flags,
        content,
    })
}

fn check_unique_lhs(grammar: &ProductionGrammar) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    for rule in &grammar.rules {
        if !seen.insert(rule.lhs.as_str()) {
            return Err(CoreError::Semantic(SemanticError(format!(
                "duplicate rule for {}",
                rule.lhs
            ))));
        }
    }
    Ok(())
}

fn check_references(grammar: &ProductionGrammar) -> Result<(), CoreError> {
    for rule in &grammar.rules {
        for alt in &rule.rhs {
            for unit in alt.units() {
                if matches!(
                    unit.unit_type,
                    UnitType::NonTerminal | UnitType::Optional | UnitType::Repetition
                ) && grammar.get_rule(unit.inner_nonterminal()).is_none()
                {
                    return Err(CoreError::Reference(ReferenceError(format!(
                        "unresolved non-terminal {}",
                        unit.inner_nonterminal()
                    ))));
                }
            }
        }
    }
    Ok(())
}

/// Approximate FIRST-set: the set of leading-token keys an alternative can
/// start with. Non-terminal leads are resolved recursively through their
/// own rule's alternatives; a cycle guard prevents infinite recursion on
/// left-recursive rules (the recursive branch simply contributes nothing
/// further once its own LHS is re-encountered).
fn first_set_of_lhs(grammar: &ProductionGrammar, lhs: &str, visiting: &mut HashSet<String>) -> HashSet<String> {
    let key = {
        let trimmed = lhs.trim();
        trimmed
            .trim_start_matches(['[', '{'])
            .trim_end_matches([']', '}'])
            .to_string()
    };
    if !visiting.insert(key.clone()) {
        return HashSet::new();
    }
    let mut out = HashSet::new();
    if let Some(rule) = grammar.get_rule(&key) {
        for alt in &rule.rhs {
            if let Some(leading) = alt.leading_unit() {
                out.extend(first_set_of_unit(grammar, leading, visiting));
            }
        }
    }
    out
}

fn first_set_of_unit(grammar: &ProductionGrammar, unit: &ProductionUnit, visiting: &mut HashSet<String>) -> HashSet<String> {
    match unit.unit_type {
        UnitType::Terminal | UnitType::Punctuation => {
            let mut set = HashSet::new();
            set.insert(format!("lit:{}", unit.lexeme));
            set
        }
        UnitType::NonTerminal | UnitType::Optional | UnitType::Repetition => {
            first_set_of_lhs(grammar, unit.inner_nonterminal(), visiting)
        }
        UnitType::EndOfFile | UnitType::Undetermined => HashSet::new(),
    }
}

fn check_ambiguity(grammar: &ProductionGrammar) -> Result<(), CoreError> {
    for rule in &grammar.rules {
        if rule.rhs.len() < 2 {
            continue;
        }
        let mut first_sets: Vec<HashSet<String>> = Vec::with_capacity(rule.rhs.len());
        for alt in &rule.rhs {
            let leading = alt.leading_unit().expect("alternatives are non-empty");
            let mut visiting = HashSet::new();
            first_sets.push(first_set_of_unit(grammar, leading, &mut visiting));
        }
        for i in 0..first_sets.len() {
            for j in (i + 1)..first_sets.len() {
                if !first_sets[i].is_disjoint(&first_sets[j]) {
                    return Err(CoreError::Ambiguity(AmbiguityError(format!(
                        "rule {} has alternatives {} and {} sharing a leading token",
                        rule.lhs, i, j
                    ))));
                }
            }
        }
    }
    Ok(())
}

/// Count of how many times each LHS appears across the grammar, exposed
/// for diagnostics/tests rather than the hot parsing path.
pub fn lhs_histogram(grammar: &ProductionGrammar) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for rule in &grammar.rules {
        *counts.entry(rule.lhs.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_grammar() {
        let grammar = parse_grammar(r#"<digit> ::= "0" | "1" ;"#).unwrap();
        assert_eq!(grammar.rules.len(), 1);
        assert_eq!(grammar.rules[0].rhs.len(), 2);
    }

    #[test]
    fn every_nonterminal_reference_resolves() {
        let grammar = parse_grammar(
            r#"
            <time> ::= <hour> ":" <minute> ;
            <hour> ::= "0" | "1" ;
            <minute> ::= "0" | "1" ;
            "#,
        )
        .unwrap();
        for rule in &grammar.rules {
            for alt in &rule.rhs {
                for unit in alt.units() {
                    if unit.unit_type == crate::types::UnitType::NonTerminal {
                        assert!(grammar.get_rule(unit.inner_nonterminal()).is_some());
                    }
                }
            }
        }
    }

    #[test]
    fn unresolved_reference_is_a_reference_error() {
        let err = parse_grammar(r#"<a> ::= <missing> ;"#).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "REFERENCE");
    }

    #[test]
    fn duplicate_lhs_is_semantic_error() {
        let err = parse_grammar(r#"<a> ::= "x" ; <a> ::= "y" ;"#).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "SEMANTIC");
    }

    #[test]
    fn empty_alternative_is_semantic_error() {
        let err = parse_grammar(r#"<a> ::= ;"#).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "SEMANTIC");
    }

    #[test]
    fn ambiguous_alternatives_sharing_leading_terminal_are_rejected() {
        let err = parse_grammar(r#"<a> ::= "x" "y" | "x" "z" ;"#).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "AMBIGUITY");
    }

    #[test]
    fn grammar_round_trips_through_display() {
        let grammar = parse_grammar(r#"<digit> ::= "0" | "1" ;"#).unwrap();
        let text = grammar.to_display_string();
        let reparsed = parse_grammar(&text).unwrap();
        assert_eq!(grammar.rules.len(), reparsed.rules.len());
        assert_eq!(grammar.rules[0].rhs.len(), reparsed.rules[0].rhs.len());
    }

    #[test]
    fn optional_and_repetition_flags_are_set() {
        let grammar = parse_grammar(
            r#"
            <a> ::= [<b>] {<c>} ;
            <b> ::= "x" ;
            <c> ::= "y" ;
            "#,
        )
        .unwrap();
        let flags = grammar.rules[0].rhs[0].flags;
        assert!(flags.contains(AlternativeFlags::OPTIONAL));
        assert!(flags.contains(AlternativeFlags::REPETITION));
    }
}
