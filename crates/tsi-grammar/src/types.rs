//! The BNF data model: production units, alternatives, rules, and the
//! grammar itself. Ported from `piaabo/bnf_compat/parser_types.h`.

use std::fmt;

/// Tag of a lexed unit of grammar text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitType {
    /// A terminal string, quoted or a bare `[A-Za-z0-9_.]+` run.
    Terminal,
    /// A non-terminal symbol enclosed in `<...>`.
    NonTerminal,
    /// An optional non-terminal, `[<...>]`.
    Optional,
    /// A zero-or-more repetition of a non-terminal, `{<...>}`.
    Repetition,
    /// One of `::=`, `|`, `;`.
    Punctuation,
    /// End of the input stream.
    EndOfFile,
    /// Placeholder for an empty/invalid unit; never produced by a
    /// successful lex.
    Undetermined,
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Terminal => "Terminal",
            Self::NonTerminal => "NonTerminal",
            Self::Optional => "Optional",
            Self::Repetition => "Repetition",
            Self::Punctuation => "Punctuation",
            Self::EndOfFile => "EndOfFile",
            Self::Undetermined => "Undetermined",
        };
        f.write_str(s)
    }
}

/// A single lexed unit: its type, the exact source lexeme (delimiters
/// preserved), and the (line, column) it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionUnit {
    pub unit_type: UnitType,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl ProductionUnit {
    pub fn new(unit_type: UnitType, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            unit_type,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }

    pub fn eof(line: usize, column: usize) -> Self {
        Self::new(UnitType::EndOfFile, "", line, column)
    }

    /// The inner name of a NonTerminal, Optional, or Repetition lexeme:
    /// `<x>` / `[<x>]` / `{<x>}` all yield `<x>`. Terminals and
    /// Punctuation return their lexeme unchanged.
    pub fn inner_nonterminal(&self) -> &str {
        let trimmed = self.lexeme.trim();
        match self.unit_type {
            UnitType::Optional | UnitType::Repetition => {
                trimmed.trim_start_matches(['[', '{']).trim_end_matches([']', '}'])
            }
            _ => trimmed,
        }
    }

    pub fn to_display_string(&self) -> String {
        format!("{}({})", self.lexeme, self.unit_type)
    }
}

impl fmt::Display for ProductionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

bitflags::bitflags! {
    /// Flags describing structural properties of an alternative.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlternativeFlags: u8 {
        const NONE       = 0b000;
        const RECURSION  = 0b001;
        const OPTIONAL   = 0b010;
        const REPETITION = 0b100;
    }
}

/// Whether an alternative is a single unit or an ordered sequence of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlternativeContent {
    Single(ProductionUnit),
    Sequence(Vec<ProductionUnit>),
}

/// One right-hand-side alternative of a production rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionAlternative {
    pub lhs: String,
    pub flags: AlternativeFlags,
    pub content: AlternativeContent,
}

impl ProductionAlternative {
    pub fn single(lhs: impl Into<String>, unit: ProductionUnit, flags: AlternativeFlags) -> Self {
        Self {
            lhs: lhs.into(),
            flags,
            content: AlternativeContent::Single(unit),
        }
    }

    pub fn sequence(lhs: impl Into<String>, units: Vec<ProductionUnit>, flags: AlternativeFlags) -> Self {
        Self {
            lhs: lhs.into(),
            flags,
            content: AlternativeContent::Sequence(units),
        }
    }

    /// The units of this alternative, whether single or sequence.
    pub fn units(&self) -> &[ProductionUnit] {
        match &self.content {
            AlternativeContent::Single(u) => std::slice::from_ref(u),
            AlternativeContent::Sequence(units) => units,
        }
    }

    /// The first terminal-set unit of this alternative: used to decide
    /// which alternative a parser should commit to.
    pub fn leading_unit(&self) -> Option<&ProductionUnit> {
        self.units().first()
    }

    pub fn to_display_string(&self) -> String {
        self.units()
            .iter()
            .map(ProductionUnit::to_display_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A production rule: an LHS non-terminal name and its ordered,
/// non-empty alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionRule {
    pub lhs: String,
    pub rhs: Vec<ProductionAlternative>,
}

impl ProductionRule {
    pub fn to_display_string(&self) -> String {
        let alts = self
            .rhs
            .iter()
            .map(ProductionAlternative::to_display_string)
            .collect::<Vec<_>>()
            .join(" | ");
        format!("{} ::= {} ;", self.lhs, alts)
    }
}

/// An ordered list of production rules; the first rule is the start rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionGrammar {
    pub rules: Vec<ProductionRule>,
}

impl ProductionGrammar {
    pub fn new(rules: Vec<ProductionRule>) -> Self {
        Self { rules }
    }

    /// Looks up a rule by LHS name, unwrapping a surrounding `[<x>]` or
    /// `{<x>}` to `<x>` first if needed.
    pub fn get_rule(&self, lhs: &str) -> Option<&ProductionRule> {
        let key = unwrap_nonterminal(lhs);
        self.rules.iter().find(|r| r.lhs == key)
    }

    pub fn get_rule_by_unit(&self, unit: &ProductionUnit) -> Option<&ProductionRule> {
        self.get_rule(unit.inner_nonterminal())
    }

    pub fn get_rule_at(&self, index: usize) -> Option<&ProductionRule> {
        self.rules.get(index)
    }

    pub fn start_rule(&self) -> Option<&ProductionRule> {
        self.rules.first()
    }

    /// Reconstructs grammar text from the parsed structure. Round-tripping
    /// through `parse` again yields a structurally-equal grammar (modulo
    /// comments/whitespace, which are not preserved).
    pub fn to_display_string(&self) -> String {
        self.rules
            .iter()
            .map(ProductionRule::to_display_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn unwrap_nonterminal(lhs: &str) -> &str {
    let trimmed = lhs.trim();
    if (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_nonterminal_unwraps_optional_and_repetition() {
        let opt = ProductionUnit::new(UnitType::Optional, "[<item>]", 1, 1);
        assert_eq!(opt.inner_nonterminal(), "<item>");
        let rep = ProductionUnit::new(UnitType::Repetition, "{<item>}", 1, 1);
        assert_eq!(rep.inner_nonterminal(), "<item>");
    }

    #[test]
    fn get_rule_unwraps_bracketed_lhs() {
        let rule = ProductionRule {
            lhs: "<item>".into(),
            rhs: vec![ProductionAlternative::single(
                "<item>",
                ProductionUnit::new(UnitType::Terminal, "x", 1, 1),
                AlternativeFlags::NONE,
            )],
        };
        let grammar = ProductionGrammar::new(vec![rule]);
        assert!(grammar.get_rule("[<item>]").is_some());
        assert!(grammar.get_rule("<item>").is_some());
    }
}
