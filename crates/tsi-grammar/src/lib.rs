//! BNF grammar lexer, parser, and the `ProductionGrammar` model they build.
//!
//! This crate has no notion of DSL instructions; it only knows how to turn
//! grammar *text* (the BNF describing a DSL) into a validated, queryable
//! grammar structure. Instruction lexing/parsing driven by that grammar
//! lives in `tsi-dsl`.

pub mod lexer;
pub mod parser;
pub mod types;

pub use lexer::GrammarLexer;
pub use parser::parse_grammar;
pub use types::{
    AlternativeContent, AlternativeFlags, ProductionAlternative, ProductionGrammar, ProductionRule,
    ProductionUnit, UnitType,
};
