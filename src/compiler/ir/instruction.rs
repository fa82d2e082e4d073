//! IR instruction definitions

use crate::parser::BinaryOperator;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Compile-time value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Integer
    Int(i64),
    /// String, stored one character per cell
    Str(String),
    /// Boolean, stored as 0 / 1
    Bool(bool),
    /// `null` / `undefined`, stored as 0
    Null,
}

impl Value {
    /// JavaScript truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }

    /// Numeric view used by arithmetic and comparisons. Strings that are not
    /// integers have none.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Null => Some(0),
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0)
                } else {
                    trimmed.parse().ok()
                }
            }
        }
    }

    /// Cell contents before wrapping to the cell width
    pub fn cells(&self) -> Vec<i64> {
        match self {
            Value::Int(n) => vec![*n],
            Value::Bool(b) => vec![i64::from(*b)],
            Value::Null => vec![0],
            Value::Str(s) if s.is_empty() => vec![0],
            Value::Str(s) => s.chars().map(|c| i64::from(u32::from(c))).collect(),
        }
    }

    /// Number of cells the value occupies
    pub fn size(&self) -> usize {
        self.cells().len()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Evaluates `left op right` on literals the way the source language does:
/// wrapping integer arithmetic, string concatenation when either side of `+`
/// is a string, comparisons to booleans, and `&&` / `||` yielding an operand.
/// Division or modulo by zero and non-numeric arithmetic yield `None`.
pub fn fold_binary(operator: BinaryOperator, left: &Value, right: &Value) -> Option<Value> {
    use BinaryOperator::*;

    let numbers = || Some((left.as_number()?, right.as_number()?));
    match operator {
        And => Some(if left.is_truthy() { right } else { left }.clone()),
        Or => Some(if left.is_truthy() { left } else { right }.clone()),
        Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Some(Value::Str(format!("{}{}", left, right)))
            }
            _ => numbers().map(|(a, b)| Value::Int(a.wrapping_add(b))),
        },
        Sub => numbers().map(|(a, b)| Value::Int(a.wrapping_sub(b))),
        Mul => numbers().map(|(a, b)| Value::Int(a.wrapping_mul(b))),
        Div => match numbers()? {
            (_, 0) => None,
            (a, b) => Some(Value::Int(a.wrapping_div(b))),
        },
        Mod => match numbers()? {
            (_, 0) => None,
            (a, b) => Some(Value::Int(a.wrapping_rem(b))),
        },
        Eq => Some(Value::Bool(loose_eq(left, right))),
        NotEq => Some(Value::Bool(!loose_eq(left, right))),
        Lt => compare(left, right).map(|o| Value::Bool(o == Ordering::Less)),
        Gt => compare(left, right).map(|o| Value::Bool(o == Ordering::Greater)),
        LtEq => compare(left, right).map(|o| Value::Bool(o != Ordering::Greater)),
        GtEq => compare(left, right).map(|o| Value::Bool(o != Ordering::Less)),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => matches!((left.as_number(), right.as_number()), (Some(a), Some(b)) if a == b),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => Some(left.as_number()?.cmp(&right.as_number()?)),
    }
}

/// Instruction operand: a literal or a run of cells
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Compile-time value
    Literal(Value),
    /// `len` cells starting at `address`
    Address {
        /// First cell
        address: usize,
        /// Number of cells
        len: usize,
    },
}

impl Operand {
    /// Single-cell address operand
    pub fn cell(address: usize) -> Self {
        Operand::Address { address, len: 1 }
    }

    /// Integer literal operand
    pub fn int(n: i64) -> Self {
        Operand::Literal(Value::Int(n))
    }

    /// Literal value, if this is one
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Operand::Literal(v) => Some(v),
            Operand::Address { .. } => None,
        }
    }

    /// First cell, if this is an address
    pub fn address(&self) -> Option<usize> {
        match self {
            Operand::Address { address, .. } => Some(*address),
            Operand::Literal(_) => None,
        }
    }

    /// Cells referenced
    pub fn cells(&self) -> std::ops::Range<usize> {
        match self {
            Operand::Address { address, len } => *address..*address + *len,
            Operand::Literal(_) => 0..0,
        }
    }

    fn remap(&mut self, f: &dyn Fn(usize) -> usize) {
        if let Operand::Address { address, .. } = self {
            *address = f(*address);
        }
    }

    fn widen(&mut self, block: usize, len: usize, new_len: usize) {
        if let Operand::Address { address, len: cells } = self {
            if *address == block && *cells == len {
                *cells = new_len;
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::Str(s)) => write!(f, "{:?}", s),
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Address { address, len: 1 } => write!(f, "@{}", address),
            Operand::Address { address, len } => write!(f, "@{}[{}]", address, len),
        }
    }
}

/// In-place change of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOp {
    /// `+1`
    Increment,
    /// `-1`
    Decrement,
    /// `+n`
    AddBy(i64),
    /// `-n`
    SubtractBy(i64),
}

impl UpdateOp {
    /// Signed change applied to the cell
    pub fn delta(self) -> i64 {
        match self {
            UpdateOp::Increment => 1,
            UpdateOp::Decrement => -1,
            UpdateOp::AddBy(n) => n,
            UpdateOp::SubtractBy(n) => n.wrapping_neg(),
        }
    }
}

/// IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // Data movement
    /// Write a literal into the cells starting at `address`
    SetValue {
        /// First cell written
        address: usize,
        /// Value written
        value: Value,
    },
    /// target = source (one cell)
    CopyValue {
        /// Destination cell
        target: usize,
        /// Source cell
        source: usize,
    },
    /// target = left op right
    BinaryOperation {
        /// Destination cell
        target: usize,
        /// Operator
        operator: BinaryOperator,
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
    /// Output the operands in order
    Print {
        /// Values to print
        operands: Vec<Operand>,
    },

    // Calls
    /// Call a library or user function by name
    CallFunction {
        /// Qualified callee name
        name: String,
        /// Resolved arguments
        args: Vec<Operand>,
        /// Cell receiving the result
        target: Option<usize>,
    },
    /// Call a method on a declared variable
    CallMethod {
        /// Receiver's first cell
        object: usize,
        /// Receiver's name
        object_name: String,
        /// Method name
        method: String,
        /// Resolved arguments
        args: Vec<Operand>,
        /// Cell receiving the result
        target: Option<usize>,
    },

    // Aggregates
    /// Fill consecutive cells with the elements
    CreateArray {
        /// First cell
        address: usize,
        /// Elements in order
        elements: Vec<Operand>,
    },
    /// Fill consecutive cells with field values
    CreateObject {
        /// First cell
        address: usize,
        /// Field names and values in order
        fields: Vec<(String, Operand)>,
    },

    // Control flow
    /// Jump target
    Label {
        /// Label name
        name: String,
    },
    /// Unconditional jump
    Jump {
        /// Target label
        label: String,
    },
    /// Jump to `label` when the condition is zero
    ConditionalJump {
        /// Tested value
        condition: Operand,
        /// Target label
        label: String,
    },
    /// Enter the then-branch when the condition holds, else jump to `else_label`
    IfCondition {
        /// Tested value
        condition: Operand,
        /// Label of the else branch
        else_label: String,
    },
    /// Return from the enclosing function
    Return {
        /// Returned value
        value: Option<Operand>,
    },

    // In-place update
    /// Add a constant to a cell
    UpdateVariable {
        /// Updated cell
        address: usize,
        /// Change applied
        op: UpdateOp,
    },

    // Annotations and linkage
    /// Free-form note carried into the output
    Comment {
        /// Note text
        text: String,
    },
    /// Module import
    Import {
        /// Module name
        module: String,
    },
    /// Export a variable
    Export {
        /// Exported name
        name: String,
        /// Exported cell
        address: usize,
    },
}

impl Instruction {
    /// Short kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::SetValue { .. } => "SetValue",
            Instruction::CopyValue { .. } => "CopyValue",
            Instruction::BinaryOperation { .. } => "BinaryOperation",
            Instruction::Print { .. } => "Print",
            Instruction::CallFunction { .. } => "CallFunction",
            Instruction::CallMethod { .. } => "CallMethod",
            Instruction::CreateArray { .. } => "CreateArray",
            Instruction::CreateObject { .. } => "CreateObject",
            Instruction::Label { .. } => "Label",
            Instruction::Jump { .. } => "Jump",
            Instruction::ConditionalJump { .. } => "ConditionalJump",
            Instruction::IfCondition { .. } => "IfCondition",
            Instruction::Return { .. } => "Return",
            Instruction::UpdateVariable { .. } => "UpdateVariable",
            Instruction::Comment { .. } => "Comment",
            Instruction::Import { .. } => "Import",
            Instruction::Export { .. } => "Export",
        }
    }

    /// Cells this instruction reads
    pub fn reads(&self) -> Vec<usize> {
        let mut cells = Vec::new();
        let mut add = |op: &Operand| cells.extend(op.cells());
        match self {
            Instruction::CopyValue { source, .. } => return vec![*source],
            Instruction::BinaryOperation { left, right, .. } => {
                add(left);
                add(right);
            }
            Instruction::Print { operands } => operands.iter().for_each(&mut add),
            Instruction::CallFunction { args, .. } => args.iter().for_each(&mut add),
            Instruction::CallMethod { object, args, .. } => {
                args.iter().for_each(&mut add);
                cells.push(*object);
            }
            Instruction::CreateArray { elements, .. } => elements.iter().for_each(&mut add),
            Instruction::CreateObject { fields, .. } => {
                fields.iter().for_each(|(_, op)| add(op))
            }
            Instruction::ConditionalJump { condition, .. }
            | Instruction::IfCondition { condition, .. } => add(condition),
            Instruction::Return { value: Some(op) } => add(op),
            Instruction::UpdateVariable { address, .. } | Instruction::Export { address, .. } => {
                return vec![*address]
            }
            Instruction::SetValue { .. }
            | Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::Return { value: None }
            | Instruction::Comment { .. }
            | Instruction::Import { .. } => {}
        }
        cells
    }

    /// Cells this instruction writes
    pub fn writes(&self) -> Vec<usize> {
        match self {
            Instruction::SetValue { address, value } => (*address..*address + value.size()).collect(),
            Instruction::CopyValue { target, .. } | Instruction::BinaryOperation { target, .. } => {
                vec![*target]
            }
            Instruction::CallFunction { target, .. } | Instruction::CallMethod { target, .. } => {
                target.iter().copied().collect()
            }
            Instruction::CreateArray { address, elements } => {
                (*address..*address + elements.len().max(1)).collect()
            }
            Instruction::CreateObject { address, fields } => {
                (*address..*address + fields.len().max(1)).collect()
            }
            Instruction::UpdateVariable { address, .. } => vec![*address],
            Instruction::Print { .. }
            | Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::ConditionalJump { .. }
            | Instruction::IfCondition { .. }
            | Instruction::Return { .. }
            | Instruction::Comment { .. }
            | Instruction::Import { .. }
            | Instruction::Export { .. } => Vec::new(),
        }
    }

    /// Operands in order
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Instruction::BinaryOperation { left, right, .. } => vec![left, right],
            Instruction::Print { operands } => operands.iter().collect(),
            Instruction::CallFunction { args, .. } | Instruction::CallMethod { args, .. } => {
                args.iter().collect()
            }
            Instruction::CreateArray { elements, .. } => elements.iter().collect(),
            Instruction::CreateObject { fields, .. } => fields.iter().map(|(_, op)| op).collect(),
            Instruction::ConditionalJump { condition, .. }
            | Instruction::IfCondition { condition, .. } => vec![condition],
            Instruction::Return { value } => value.iter().collect(),
            Instruction::SetValue { .. }
            | Instruction::CopyValue { .. }
            | Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::UpdateVariable { .. }
            | Instruction::Comment { .. }
            | Instruction::Import { .. }
            | Instruction::Export { .. } => Vec::new(),
        }
    }

    /// Contiguous blocks of cells referenced, multi-cell values kept whole
    pub fn blocks(&self) -> Vec<std::ops::Range<usize>> {
        let mut blocks: Vec<std::ops::Range<usize>> = self
            .operands()
            .into_iter()
            .map(Operand::cells)
            .filter(|cells| !cells.is_empty())
            .collect();
        let single = |cell: usize| cell..cell + 1;
        match self {
            Instruction::SetValue { address, value } => blocks.push(*address..*address + value.size()),
            Instruction::CreateArray { address, elements } => {
                blocks.push(*address..*address + elements.len().max(1))
            }
            Instruction::CreateObject { address, fields } => {
                blocks.push(*address..*address + fields.len().max(1))
            }
            Instruction::CopyValue { target, source } => {
                blocks.push(single(*target));
                blocks.push(single(*source));
            }
            Instruction::BinaryOperation { target, .. } => blocks.push(single(*target)),
            Instruction::CallFunction { target, .. } => blocks.extend(target.map(single)),
            Instruction::CallMethod { object, target, .. } => {
                blocks.push(single(*object));
                blocks.extend(target.map(single));
            }
            Instruction::UpdateVariable { address, .. } | Instruction::Export { address, .. } => {
                blocks.push(single(*address))
            }
            Instruction::Print { .. }
            | Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::ConditionalJump { .. }
            | Instruction::IfCondition { .. }
            | Instruction::Return { .. }
            | Instruction::Comment { .. }
            | Instruction::Import { .. } => {}
        }
        blocks
    }

    /// One past the highest cell referenced
    pub fn max_address(&self) -> usize {
        self.reads()
            .into_iter()
            .chain(self.writes())
            .map(|a| a + 1)
            .max()
            .unwrap_or(0)
    }

    /// Rewrites every address through `f`
    pub fn remap_addresses(&mut self, f: &dyn Fn(usize) -> usize) {
        match self {
            Instruction::SetValue { address, .. }
            | Instruction::UpdateVariable { address, .. }
            | Instruction::Export { address, .. } => *address = f(*address),
            Instruction::CopyValue { target, source } => {
                *target = f(*target);
                *source = f(*source);
            }
            Instruction::BinaryOperation {
                target,
                left,
                right,
                ..
            } => {
                *target = f(*target);
                left.remap(f);
                right.remap(f);
            }
            Instruction::Print { operands } => operands.iter_mut().for_each(|op| op.remap(f)),
            Instruction::CallFunction { args, target, .. } => {
                args.iter_mut().for_each(|op| op.remap(f));
                if let Some(t) = target {
                    *t = f(*t);
                }
            }
            Instruction::CallMethod {
                object,
                args,
                target,
                ..
            } => {
                *object = f(*object);
                args.iter_mut().for_each(|op| op.remap(f));
                if let Some(t) = target {
                    *t = f(*t);
                }
            }
            Instruction::CreateArray { address, elements } => {
                *address = f(*address);
                elements.iter_mut().for_each(|op| op.remap(f));
            }
            Instruction::CreateObject { address, fields } => {
                *address = f(*address);
                fields.iter_mut().for_each(|(_, op)| op.remap(f));
            }
            Instruction::ConditionalJump { condition, .. }
            | Instruction::IfCondition { condition, .. } => condition.remap(f),
            Instruction::Return { value } => {
                if let Some(op) = value {
                    op.remap(f);
                }
            }
            Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::Comment { .. }
            | Instruction::Import { .. } => {}
        }
    }

    /// Stretches whole-value operands of the `len`-cell block at `address`
    /// to `new_len` cells. Arithmetic operands keep their width.
    pub fn widen_operands(&mut self, address: usize, len: usize, new_len: usize) {
        match self {
            Instruction::Print { operands } => operands
                .iter_mut()
                .for_each(|op| op.widen(address, len, new_len)),
            Instruction::CallFunction { args, .. } | Instruction::CallMethod { args, .. } => args
                .iter_mut()
                .for_each(|op| op.widen(address, len, new_len)),
            Instruction::Return { value: Some(op) } => op.widen(address, len, new_len),
            _ => {}
        }
    }

    /// Whether control can enter or leave here other than by falling through
    pub fn is_control_boundary(&self) -> bool {
        matches!(
            self,
            Instruction::Label { .. }
                | Instruction::Jump { .. }
                | Instruction::ConditionalJump { .. }
                | Instruction::IfCondition { .. }
                | Instruction::CallFunction { .. }
                | Instruction::CallMethod { .. }
                | Instruction::Return { .. }
        )
    }
}
