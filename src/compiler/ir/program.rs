//! IR program and symbol table definitions

use super::instruction::Instruction;
use crate::compiler::memory::{relocate_address, Relocation};
use crate::parser::{DeclarationKind, Statement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// First cell
    pub address: usize,
    /// Cells occupied
    pub size: usize,
    /// Declaration keyword
    pub kind: DeclarationKind,
}

/// Declared function. The body is kept unlowered; call sites refer to the
/// function by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Synthesized id, also stored in the function name's cell
    pub id: u32,
    /// Parameter names in order
    pub params: Vec<String>,
    /// Unlowered body
    pub body: Vec<Statement>,
    /// Parameter cells, allocated inside the function's own scope
    pub local_vars: BTreeMap<String, VariableInfo>,
    /// Set by the optimizer for short bodies
    pub inline_candidate: bool,
}

/// Complete IR program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrProgram {
    /// Variables by name
    pub variables: BTreeMap<String, VariableInfo>,
    /// Earlier bindings displaced from `variables` by a nested declaration
    /// of the same name, or by leaving the scope that declared them
    #[serde(default)]
    pub shadowed: Vec<(String, VariableInfo)>,
    /// Functions by name
    pub functions: BTreeMap<String, FunctionInfo>,
    /// All instructions in linear order
    pub instructions: Vec<Instruction>,
}

impl IrProgram {
    /// Create a new empty IR program
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites every instruction and symbol through one batch of relocations
    pub fn relocate(&mut self, relocations: &[Relocation]) {
        if relocations.is_empty() {
            return;
        }
        let f = |address: usize| relocate_address(relocations, address);
        for instr in &mut self.instructions {
            instr.remap_addresses(&f);
        }
        self.remap_symbols(&f);
    }

    /// Moves a variable's block to a larger one. Operands that named the
    /// whole old block now name all `size` cells of the new one; `compaction`
    /// from the same collection applies to every other cell.
    pub fn grow(&mut self, moved: &Relocation, size: usize, compaction: &[Relocation]) {
        let f = |address: usize| {
            moved
                .apply(address)
                .unwrap_or_else(|| relocate_address(compaction, address))
        };
        for instr in &mut self.instructions {
            instr.widen_operands(moved.from, moved.size, size);
            instr.remap_addresses(&f);
        }
        self.remap_symbols(&f);
    }

    fn remap_symbols(&mut self, f: &dyn Fn(usize) -> usize) {
        let shadowed = self.shadowed.iter_mut().map(|(_, info)| info);
        for info in self.variables.values_mut().chain(shadowed) {
            info.address = f(info.address);
        }
        for function in self.functions.values_mut() {
            for info in function.local_vars.values_mut() {
                info.address = f(info.address);
            }
        }
    }

    /// One past the highest cell referenced by an instruction or variable
    pub fn max_address(&self) -> usize {
        let from_instructions = self
            .instructions
            .iter()
            .map(Instruction::max_address)
            .max()
            .unwrap_or(0);
        let from_variables = self
            .variables
            .values()
            .chain(self.shadowed.iter().map(|(_, info)| info))
            .map(|v| v.address + v.size)
            .max()
            .unwrap_or(0);
        from_instructions.max(from_variables)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether there are no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
