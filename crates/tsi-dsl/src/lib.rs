//! Grammar-guided instruction parsing and the two DSL pipeline families
//! built on top of it: observation (source/channel decoding for the
//! dataset layer) and board (contract/wave/bind wiring for the scheduler).

pub mod ast;
pub mod board;
pub mod grammar_text;
pub mod instruction;
pub mod observation;

pub use ast::{AstNode, IntermediaryNode, RootNode, StackFrame, TerminalNode, Visitor, VisitorContext};
pub use board::{BindDecl, BoardInstruction, BoardPipeline, ContractDecl, WaveDecl, decode_board_from_dsl};
pub use instruction::{InstructionLexer, InstructionParser};
pub use observation::{
    ChannelForm, ObservationChannelsPipeline, ObservationInstruction, ObservationSourcesPipeline, SourceForm,
};
