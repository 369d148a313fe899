//! Board instruction pipeline (spec §4.4), ported from
//! `tsiemene_board.h`'s `tsiemene_board_instruction_t` and its three
//! declaration tables: `contracts`, `waves`, and `binds`.

use parking_lot::Mutex;
use tsi_grammar::{parse_grammar, ProductionGrammar};
use tsi_types::error::{CoreError, ReferenceError, SemanticError};

use crate::ast::{IntermediaryNode, RootNode, TerminalNode, Visitor, VisitorContext};
use crate::grammar_text::board_grammar_text;
use crate::instruction::{strip_terminal_delimiters, InstructionParser};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractDecl {
    pub id: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveDecl {
    pub id: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindDecl {
    pub id: String,
    pub contract_ref: String,
    pub wave_ref: String,
}

/// A decoded board instruction: the contract, wave, and bind tables.
#[derive(Debug, Clone, Default)]
pub struct BoardInstruction {
    pub contracts: Vec<ContractDecl>,
    pub waves: Vec<WaveDecl>,
    pub binds: Vec<BindDecl>,
}

impl BoardInstruction {
    pub fn contract(&self, id: &str) -> Option<&ContractDecl> {
        self.contracts.iter().find(|c| c.id == id)
    }

    pub fn wave(&self, id: &str) -> Option<&WaveDecl> {
        self.waves.iter().find(|w| w.id == id)
    }

    /// Validates that every bind references an existing contract and wave,
    /// and that ids are unique within each table.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = std::collections::HashSet::new();
        for c in &self.contracts {
            if !seen.insert(&c.id) {
                return Err(CoreError::Semantic(SemanticError(format!("duplicate contract id {}", c.id))));
            }
        }
        seen.clear();
        for w in &self.waves {
            if !seen.insert(&w.id) {
                return Err(CoreError::Semantic(SemanticError(format!("duplicate wave id {}", w.id))));
            }
        }
        seen.clear();
        for b in &self.binds {
            if !seen.insert(&b.id) {
                return Err(CoreError::Semantic(SemanticError(format!("duplicate bind id {}", b.id))));
            }
            if self.contract(&b.contract_ref).is_none() {
                return Err(CoreError::Reference(ReferenceError(format!(
                    "bind {} references unknown contract {}",
                    b.id, b.contract_ref
                ))));
            }
            if self.wave(&b.wave_ref).is_none() {
                return Err(CoreError::Reference(ReferenceError(format!(
                    "bind {} references unknown wave {}",
                    b.id, b.wave_ref
                ))));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ContractId,
    ContractPath,
    WaveId,
    WavePath,
    BindId,
    ContractRef,
    WaveRef,
}

fn current_field<U>(ctx: &VisitorContext<'_, U>) -> Option<Field> {
    // `id`/`path` are shared rule names across all three declaration kinds,
    // so the parent declaration's own rule name disambiguates which field
    // an `id`/`path` terminal belongs to.
    let mut saw_id = false;
    let mut saw_path = false;
    for frame in ctx.stack.iter().rev() {
        let name = frame.lhs.trim_start_matches(['<', '{', '[']).trim_end_matches(['>', '}', ']']);
        match name {
            "id" => saw_id = true,
            "path" => saw_path = true,
            "contract_decl" if saw_id => return Some(Field::ContractId),
            "contract_decl" if saw_path => return Some(Field::ContractPath),
            "wave_decl" if saw_id => return Some(Field::WaveId),
            "wave_decl" if saw_path => return Some(Field::WavePath),
            "bind_decl" if saw_id => return Some(Field::BindId),
            "contract_ref" => return Some(Field::ContractRef),
            "wave_ref" => return Some(Field::WaveRef),
            _ => {}
        }
    }
    None
}

#[derive(Debug, Default)]
struct BoardAccumulator {
    instruction: BoardInstruction,
}

struct BoardVisitor;

impl Visitor<BoardAccumulator> for BoardVisitor {
    fn visit_root(&mut self, _node: &RootNode, _ctx: &mut VisitorContext<'_, BoardAccumulator>) {}

    fn visit_intermediary(&mut self, node: &IntermediaryNode, ctx: &mut VisitorContext<'_, BoardAccumulator>) {
        match node.lhs.as_str() {
            "<contract_decl>" => ctx.user_data.instruction.contracts.push(ContractDecl::default()),
            "<wave_decl>" => ctx.user_data.instruction.waves.push(WaveDecl::default()),
            "<bind_decl>" => ctx.user_data.instruction.binds.push(BindDecl::default()),
            _ => {}
        }
    }

    fn visit_terminal(&mut self, node: &TerminalNode, ctx: &mut VisitorContext<'_, BoardAccumulator>) {
        let Some(field) = current_field(ctx) else { return };
        let text = strip_terminal_delimiters(&node.unit.lexeme);
        match field {
            Field::ContractId => {
                if let Some(c) = ctx.user_data.instruction.contracts.last_mut() {
                    c.id.push_str(&text);
                }
            }
            Field::ContractPath => {
                if let Some(c) = ctx.user_data.instruction.contracts.last_mut() {
                    c.file.push_str(&text);
                }
            }
            Field::WaveId => {
                if let Some(w) = ctx.user_data.instruction.waves.last_mut() {
                    w.id.push_str(&text);
                }
            }
            Field::WavePath => {
                if let Some(w) = ctx.user_data.instruction.waves.last_mut() {
                    w.file.push_str(&text);
                }
            }
            Field::BindId => {
                if let Some(b) = ctx.user_data.instruction.binds.last_mut() {
                    b.id.push_str(&text);
                }
            }
            Field::ContractRef => {
                if let Some(b) = ctx.user_data.instruction.binds.last_mut() {
                    b.contract_ref.push_str(&text);
                }
            }
            Field::WaveRef => {
                if let Some(b) = ctx.user_data.instruction.binds.last_mut() {
                    b.wave_ref.push_str(&text);
                }
            }
        }
    }
}

/// Decodes `board_dsl` text into a validated [`BoardInstruction`]. Keeps a
/// mutex around decode, mirroring `tsiemene_board.h`'s `current_mutex_`
/// guarding concurrent decodes of shared pipeline state (DESIGN.md Open
/// Question: kept rather than dropped).
pub struct BoardPipeline {
    grammar: ProductionGrammar,
    lock: Mutex<()>,
}

impl BoardPipeline {
    pub fn new() -> Result<Self, CoreError> {
        Self::with_grammar_text(&board_grammar_text())
    }

    pub fn with_grammar_text(text: &str) -> Result<Self, CoreError> {
        Ok(Self {
            grammar: parse_grammar(text)?,
            lock: Mutex::new(()),
        })
    }

    pub fn decode(&self, instruction_text: &str) -> Result<BoardInstruction, CoreError> {
        let _guard = self.lock.lock();
        let parser = InstructionParser::new(&self.grammar);
        let ast = parser.parse(instruction_text)?;
        let mut acc = BoardAccumulator::default();
        let mut ctx = VisitorContext::new(&mut acc);
        let mut visitor = BoardVisitor;
        ast.accept(&mut visitor, &mut ctx);
        acc.instruction.validate()?;
        Ok(acc.instruction)
    }
}

/// Free-function form matching `decode_tsiemene_board_from_dsl`: parse the
/// grammar text and decode an instruction in one call.
pub fn decode_board_from_dsl(grammar_text: &str, instruction_text: &str) -> Result<BoardInstruction, CoreError> {
    BoardPipeline::with_grammar_text(grammar_text)?.decode(instruction_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_contracts_waves_and_binds() {
        let pipeline = BoardPipeline::new().unwrap();
        let text = "contract c1 contracts/basic.json \
                     wave w1 waves/basic.json \
                     bind b1 c1 w1";
        let decoded = pipeline.decode(text).unwrap();
        assert_eq!(decoded.contracts.len(), 1);
        assert_eq!(decoded.contracts[0].id, "c1");
        assert_eq!(decoded.contracts[0].file, "contracts/basic.json");
        assert_eq!(decoded.waves[0].id, "w1");
        assert_eq!(decoded.binds[0].contract_ref, "c1");
        assert_eq!(decoded.binds[0].wave_ref, "w1");
    }

    #[test]
    fn bind_referencing_unknown_contract_is_rejected() {
        let pipeline = BoardPipeline::new().unwrap();
        let text = "wave w1 waves/basic.json bind b1 missing w1";
        let err = pipeline.decode(text).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "REFERENCE");
    }

    #[test]
    fn duplicate_contract_ids_are_rejected() {
        let pipeline = BoardPipeline::new().unwrap();
        let text = "contract c1 a.json contract c1 b.json";
        let err = pipeline.decode(text).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "SEMANTIC");
    }
}
