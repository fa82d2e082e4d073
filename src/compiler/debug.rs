//! Debug utilities for tapescript compilation
//!
//! Human-readable dumps of IR programs and planner allocations.

use super::ir::{Instruction, IrProgram, Operand, UpdateOp};
use super::memory::MemoryPlanner;
use std::fmt::Write;

const RULE: &str = "═══════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────";

/// IR program as text, one `{:04}:` line per instruction
pub fn dump_ir(program: &IrProgram) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "                    IR DUMP");
    let _ = writeln!(out, "{}", RULE);
    for (name, info) in &program.variables {
        let _ = writeln!(
            out,
            "var {} @{} ({} cell(s), {:?})",
            name, info.address, info.size, info.kind
        );
    }
    for (name, function) in &program.functions {
        let _ = writeln!(
            out,
            "fn {}#{}({}){}",
            name,
            function.id,
            function.params.join(", "),
            if function.inline_candidate { " inline" } else { "" }
        );
    }
    let _ = writeln!(out, "{}", THIN_RULE);

    for (i, instr) in program.instructions.iter().enumerate() {
        let _ = writeln!(out, "{:04}: {}", i, format_instruction(instr));
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

/// Format a single IR instruction
pub fn format_instruction(instr: &Instruction) -> String {
    match instr {
        Instruction::SetValue { address, value } => format!("[{}] = {}", address, value),
        Instruction::CopyValue { target, source } => format!("[{}] = [{}]", target, source),
        Instruction::BinaryOperation {
            target,
            operator,
            left,
            right,
        } => format!("[{}] = {} {} {}", target, left, operator, right),
        Instruction::Print { operands } => format!("print {}", join(operands)),

        Instruction::CallFunction { name, args, target } => {
            format!("{}call {}({})", assign(*target), name, join(args))
        }
        Instruction::CallMethod {
            object,
            object_name,
            method,
            args,
            target,
        } => format!(
            "{}call {}@{}.{}({})",
            assign(*target),
            object_name,
            object,
            method,
            join(args)
        ),

        Instruction::CreateArray { address, elements } => {
            format!("[{}..] = array [{}]", address, join(elements))
        }
        Instruction::CreateObject { address, fields } => {
            let fields: Vec<String> = fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            format!("[{}..] = object {{{}}}", address, fields.join(", "))
        }

        Instruction::Label { name } => format!("{}:", name),
        Instruction::Jump { label } => format!("jump {}", label),
        Instruction::ConditionalJump { condition, label } => {
            format!("jump {} if !{}", label, condition)
        }
        Instruction::IfCondition {
            condition,
            else_label,
        } => format!("if {} else {}", condition, else_label),
        Instruction::Return { value: Some(value) } => format!("return {}", value),
        Instruction::Return { value: None } => "return".to_string(),

        Instruction::UpdateVariable { address, op } => match op {
            UpdateOp::Increment => format!("[{}]++", address),
            UpdateOp::Decrement => format!("[{}]--", address),
            UpdateOp::AddBy(n) => format!("[{}] += {}", address, n),
            UpdateOp::SubtractBy(n) => format!("[{}] -= {}", address, n),
        },

        Instruction::Comment { text } => format!("; {}", text),
        Instruction::Import { module } => format!("import {}", module),
        Instruction::Export { name, address } => format!("export {} = [{}]", name, address),
    }
}

/// Planner allocations, lowest address first
pub fn dump_allocations(planner: &MemoryPlanner) -> String {
    let mut allocations: Vec<_> = planner.allocations().collect();
    allocations.sort_by_key(|a| a.address);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:?} planner, {} cell(s), high water {}",
        planner.model(),
        planner.memory_size(),
        planner.high_water_mark()
    );
    for a in allocations {
        let _ = writeln!(
            out,
            "{:>6}..{:<6} {:<16} refs={} {}{}",
            a.address,
            a.end(),
            a.identifier,
            a.reference_count,
            a.scope,
            if a.is_active { "" } else { " (inactive)" }
        );
    }
    out
}

fn join(operands: &[Operand]) -> String {
    operands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn assign(target: Option<usize>) -> String {
    target.map(|t| format!("[{}] = ", t)).unwrap_or_default()
}
