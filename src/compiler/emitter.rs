//! Tape code emission
//!
//! Turns an optimized [`IrProgram`] into extended tape text, one line per
//! instruction. Control flow produced by the lowerer is recognized and
//! rewritten into bracket loops over flag cells, so it still runs after
//! [`strip`]. Anything else that jumps is emitted as a marker sigil.
//!
//! Tape layout:
//!
//! ```text
//! [0 .. scratch)                 program variables
//! [scratch .. scratch + 12)      scratch cells, zero between instructions
//! [flags ..)                     two flag cells per control-flow nesting level
//! ```

use super::context::CompilationContext;
use super::ir::{Instruction, IrProgram, Operand, PRINT_CALLEE};
use super::memory::MemoryPlanner;
use super::stdlib::{ResolvedOperand, StdlibTable, TemplateContext};
use super::tape::{self, Scratch, TapeWriter, NEGATE_EXPANSION, SCRATCH_CELLS};
use crate::error::{Error, Result};
use crate::runtime::CellWidth;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Converts extended tape text to the eight base symbols. Negation is
/// expanded; every other sigil and all other text is dropped.
pub fn strip(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for c in code.chars() {
        if tape::BASE_SYMBOLS.contains(&c) {
            out.push(c);
        } else if c == tape::NEGATE {
            out.push_str(NEGATE_EXPANSION);
        }
    }
    out
}

/// Lowerer-shaped `for` loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoopShape {
    /// `Label(test)`
    head: usize,
    /// `ConditionalJump(c, end)`
    cond: usize,
    /// `Jump(test)`
    jump: usize,
    /// `Label(end)`
    end: usize,
}

/// Lowerer-shaped `if`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IfShape {
    /// `IfCondition(c, else)`
    cond: usize,
    /// `Jump(end)` closing the then-branch
    jump: usize,
    /// `Label(else)`
    else_label: usize,
    /// `Label(end)`
    end: usize,
}

/// Recognized control flow, keyed by instruction index
#[derive(Debug, Default)]
struct ControlPlan {
    loops_by_cond: HashMap<usize, LoopShape>,
    loops_by_jump: HashMap<usize, LoopShape>,
    ifs_by_cond: HashMap<usize, IfShape>,
    ifs_by_jump: HashMap<usize, IfShape>,
    ifs_by_end: HashMap<usize, IfShape>,
    quiet_labels: HashSet<usize>,
    max_depth: usize,
}

impl ControlPlan {
    fn analyze(instructions: &[Instruction]) -> Self {
        let mut labels = HashMap::new();
        for (index, instr) in instructions.iter().enumerate() {
            if let Instruction::Label { name } = instr {
                labels.entry(name.as_str()).or_insert(index);
            }
        }

        let mut loops = Vec::new();
        let mut ifs = Vec::new();
        for (index, instr) in instructions.iter().enumerate() {
            match instr {
                Instruction::Jump { label } => {
                    if let Some(shape) = loop_shape(instructions, &labels, index, label) {
                        loops.push(shape);
                    }
                }
                Instruction::IfCondition { else_label, .. } => {
                    if let Some(shape) = if_shape(instructions, &labels, index, else_label) {
                        ifs.push(shape);
                    }
                }
                _ => {}
            }
        }

        // Bracket structure needs proper nesting; drop shapes that cross
        let mut spans: Vec<(usize, usize, usize)> = Vec::new(); // (open, close, owner)
        for (i, shape) in loops.iter().enumerate() {
            spans.push((shape.cond, shape.jump, i));
        }
        for (i, shape) in ifs.iter().enumerate() {
            spans.push((shape.cond, shape.jump, loops.len() + i));
            spans.push((shape.jump, shape.end, loops.len() + i));
        }
        let mut dropped = HashSet::new();
        for (i, &(o1, c1, owner1)) in spans.iter().enumerate() {
            for &(o2, c2, owner2) in &spans[i + 1..] {
                if owner1 == owner2 || dropped.contains(&owner1) || dropped.contains(&owner2) {
                    continue;
                }
                let crosses = (o1 < o2 && o2 < c1 && c1 < c2) || (o2 < o1 && o1 < c2 && c2 < c1);
                if crosses {
                    dropped.insert(if o1 > o2 { owner1 } else { owner2 });
                }
            }
        }

        let mut plan = ControlPlan::default();
        let loop_count = loops.len();
        for (i, shape) in loops.into_iter().enumerate() {
            if dropped.contains(&i) {
                continue;
            }
            plan.loops_by_cond.insert(shape.cond, shape);
            plan.loops_by_jump.insert(shape.jump, shape);
            plan.quiet_labels.insert(shape.head);
            plan.quiet_labels.insert(shape.end);
        }
        for (i, shape) in ifs.into_iter().enumerate() {
            if dropped.contains(&(loop_count + i)) {
                continue;
            }
            plan.ifs_by_cond.insert(shape.cond, shape);
            plan.ifs_by_jump.insert(shape.jump, shape);
            plan.ifs_by_end.insert(shape.end, shape);
            plan.quiet_labels.insert(shape.else_label);
        }

        let mut depth = 0usize;
        for index in 0..instructions.len() {
            if plan.loops_by_cond.contains_key(&index) || plan.ifs_by_cond.contains_key(&index) {
                depth += 1;
                plan.max_depth = plan.max_depth.max(depth);
            }
            if plan.loops_by_jump.contains_key(&index) || plan.ifs_by_end.contains_key(&index) {
                depth = depth.saturating_sub(1);
            }
        }
        plan
    }
}

fn is_flow(instr: &Instruction) -> bool {
    matches!(
        instr,
        Instruction::Label { .. }
            | Instruction::Jump { .. }
            | Instruction::ConditionalJump { .. }
            | Instruction::IfCondition { .. }
    )
}

/// `Label(test)` straight-line test `ConditionalJump(c, end)` .. `Jump(test)` `Label(end)`
fn loop_shape(
    instructions: &[Instruction],
    labels: &HashMap<&str, usize>,
    jump: usize,
    label: &str,
) -> Option<LoopShape> {
    let head = *labels.get(label)?;
    if head >= jump {
        return None;
    }
    let cond = (head + 1..jump).find(|&i| is_flow(&instructions[i]))?;
    let Instruction::ConditionalJump { label: end_label, .. } = &instructions[cond] else {
        return None;
    };
    let end = *labels.get(end_label.as_str())?;
    if end != jump + 1 {
        return None;
    }
    Some(LoopShape {
        head,
        cond,
        jump,
        end,
    })
}

/// `IfCondition(c, else)` .. `Jump(end)` `Label(else)` .. `Label(end)`
fn if_shape(
    instructions: &[Instruction],
    labels: &HashMap<&str, usize>,
    cond: usize,
    else_label: &str,
) -> Option<IfShape> {
    let else_index = *labels.get(else_label)?;
    if else_index < cond + 2 {
        return None;
    }
    let jump = else_index - 1;
    let Instruction::Jump { label: end_label } = &instructions[jump] else {
        return None;
    };
    let end = *labels.get(end_label.as_str())?;
    if end < else_index {
        return None;
    }
    Some(IfShape {
        cond,
        jump,
        else_label: else_index,
        end,
    })
}

#[derive(Debug)]
enum Frame {
    Loop {
        flag: usize,
        shape: LoopShape,
        condition: Operand,
    },
    If {
        then_flag: usize,
        else_flag: usize,
    },
}

struct EmitState<'p> {
    w: TapeWriter,
    s: Scratch,
    flag_base: usize,
    frames: Vec<Frame>,
    names: BTreeMap<usize, &'p str>,
    functions: HashSet<&'p str>,
}

impl EmitState<'_> {
    fn next_flag(&self) -> usize {
        self.flag_base + 2 * self.frames.len()
    }

    fn resolve(&self, operand: &Operand) -> ResolvedOperand {
        match operand {
            Operand::Literal(value) => ResolvedOperand::Literal(value.clone()),
            Operand::Address { address, len } => ResolvedOperand::Variable {
                identifier: self
                    .names
                    .get(address)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("cell{}", address)),
                address: *address,
                size: *len,
            },
        }
    }
}

/// Turns IR into extended tape text
#[derive(Debug, Clone, Copy)]
pub struct Emitter<'a> {
    stdlib: &'a StdlibTable,
    cell_width: CellWidth,
    memory_size: usize,
}

impl<'a> Emitter<'a> {
    /// Emitter for a tape of `memory_size` cells
    pub fn new(stdlib: &'a StdlibTable, cell_width: CellWidth, memory_size: usize) -> Self {
        Emitter {
            stdlib,
            cell_width,
            memory_size,
        }
    }

    /// Emits `program`, one line per instruction. Scratch and flag cells are
    /// placed above every cell the program or the planner used.
    pub fn emit(
        &self,
        program: &IrProgram,
        planner: &MemoryPlanner,
        ctx: &mut CompilationContext,
    ) -> Result<String> {
        let instructions = &program.instructions;
        let plan = ControlPlan::analyze(instructions);

        let scratch_base = program.max_address().max(planner.high_water_mark());
        let flag_base = scratch_base + SCRATCH_CELLS;
        let cells_needed = flag_base + 2 * plan.max_depth;
        if cells_needed > self.memory_size {
            return Err(Error::ResourceLimit {
                what: format!("emitted code needs {} tape cells", cells_needed),
                limit: self.memory_size,
            });
        }

        let mut names = BTreeMap::new();
        for (name, info) in &program.variables {
            names.entry(info.address).or_insert(name.as_str());
        }
        let mut state = EmitState {
            w: TapeWriter::new(self.cell_width),
            s: Scratch::at(scratch_base),
            flag_base,
            frames: Vec::new(),
            names,
            functions: program.functions.keys().map(String::as_str).collect(),
        };

        for (index, instr) in instructions.iter().enumerate() {
            self.emit_at(index, instr, program, &plan, &mut state, ctx)?;
            state.w.raw("\n");
        }

        if !state.frames.is_empty() {
            return Err(Error::Internal(format!(
                "{} control-flow block(s) left open",
                state.frames.len()
            )));
        }

        tracing::debug!(
            "emitted {} instruction(s): {} loop(s), {} if(s), scratch at {}, {} byte(s)",
            instructions.len(),
            plan.loops_by_cond.len(),
            plan.ifs_by_cond.len(),
            scratch_base,
            state.w.code().len()
        );

        Ok(state.w.into_code())
    }

    fn emit_at(
        &self,
        index: usize,
        instr: &Instruction,
        program: &IrProgram,
        plan: &ControlPlan,
        state: &mut EmitState<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let s = state.s;
        match instr {
            Instruction::ConditionalJump { condition, .. } if plan.loops_by_cond.contains_key(&index) => {
                let shape = plan.loops_by_cond[&index];
                let flag = state.next_flag();
                state.w.set_bool(flag, condition, &s);
                state.w.move_to(flag);
                state.w.raw("[");
                state.frames.push(Frame::Loop {
                    flag,
                    shape,
                    condition: condition.clone(),
                });
            }

            Instruction::Jump { .. } if plan.loops_by_jump.contains_key(&index) => {
                let Some(Frame::Loop {
                    flag,
                    shape,
                    condition,
                }) = state.frames.pop()
                else {
                    return Err(Error::Internal(format!(
                        "loop closed at instruction {} without an open loop",
                        index
                    )));
                };
                // Re-run the test, then loop while it holds
                for test in &program.instructions[shape.head + 1..shape.cond] {
                    self.emit_simple(test, state, ctx);
                }
                state.w.clear(flag);
                state.w.set_bool(flag, &condition, &s);
                state.w.move_to(flag);
                state.w.raw("]");
            }

            Instruction::IfCondition { condition, .. } if plan.ifs_by_cond.contains_key(&index) => {
                let then_flag = state.next_flag();
                let else_flag = then_flag + 1;
                state.w.inc(else_flag, 1);
                state.w.set_bool(then_flag, condition, &s);
                state.w.move_to(then_flag);
                state.w.raw("[");
                state.w.dec(else_flag, 1);
                state.frames.push(Frame::If {
                    then_flag,
                    else_flag,
                });
            }

            Instruction::Jump { .. } if plan.ifs_by_jump.contains_key(&index) => {
                let Some(&Frame::If {
                    then_flag,
                    else_flag,
                }) = state.frames.last()
                else {
                    return Err(Error::Internal(format!(
                        "else branch at instruction {} without an open if",
                        index
                    )));
                };
                state.w.clear(then_flag);
                state.w.move_to(then_flag);
                state.w.raw("]");
                state.w.move_to(else_flag);
                state.w.raw("[");
                state.w.dec(else_flag, 1);
            }

            Instruction::Label { .. } if plan.ifs_by_end.contains_key(&index) => {
                let Some(Frame::If { else_flag, .. }) = state.frames.pop() else {
                    return Err(Error::Internal(format!(
                        "if closed at instruction {} without an open if",
                        index
                    )));
                };
                state.w.move_to(else_flag);
                state.w.raw("]");
            }

            Instruction::Label { .. } if plan.quiet_labels.contains(&index) => {}

            _ => self.emit_simple(instr, state, ctx),
        }
        Ok(())
    }

    fn emit_simple(&self, instr: &Instruction, state: &mut EmitState<'_>, ctx: &mut CompilationContext) {
        let s = state.s;
        match instr {
            Instruction::SetValue { address, value } => state.w.write_value(*address, value, &s),

            Instruction::CopyValue { target, source } => {
                if target != source {
                    state.w.clear(*target);
                    state.w.copy_add(*source, *target, s.a);
                }
            }

            Instruction::BinaryOperation {
                target,
                operator,
                left,
                right,
            } => state.w.binary(*operator, left, right, *target, &s),

            Instruction::Print { operands } => {
                if !self.render_template(PRINT_CALLEE, operands, None, state, ctx) {
                    for operand in operands {
                        state.w.print_operand(operand, &s);
                    }
                }
            }

            Instruction::CallFunction { name, args, target } => {
                if self.render_template(name, args, *target, state, ctx) {
                    return;
                }
                if state.functions.contains(name.as_str()) {
                    ctx.warn(format!(
                        "call to user function '{}' emitted as a call marker",
                        name
                    ));
                    state.w.sigil(tape::CALL, name);
                } else {
                    ctx.warn(format!("unresolved call to '{}'", name));
                    state.w.sigil(tape::UNRESOLVED_CALL, name);
                }
            }

            Instruction::CallMethod {
                object_name,
                method,
                args,
                target,
                ..
            } => {
                let qualified = format!("{}.{}", object_name, method);
                if !self.render_template(&qualified, args, *target, state, ctx) {
                    ctx.warn(format!("unresolved call to '{}'", qualified));
                    state.w.sigil(tape::UNRESOLVED_CALL, &qualified);
                }
            }

            Instruction::CreateArray { address, elements } => {
                for (offset, element) in elements.iter().enumerate() {
                    write_element(&mut state.w, address + offset, element, &s);
                }
            }

            Instruction::CreateObject { address, fields } => {
                let keys: Vec<&str> = fields.iter().map(|(key, _)| key.as_str()).collect();
                state.w.sigil(tape::OBJECT, &keys.join(" "));
                for (offset, (_, value)) in fields.iter().enumerate() {
                    write_element(&mut state.w, address + offset, value, &s);
                }
            }

            Instruction::UpdateVariable { address, op } => state.w.add_const(*address, op.delta(), &s),

            Instruction::Label { name } => state.w.sigil(tape::LABEL, name),
            Instruction::Jump { label } => {
                ctx.warn(format!("jump to '{}' emitted as a marker", label));
                state.w.sigil(tape::JUMP, label);
            }
            Instruction::ConditionalJump { label, .. } => {
                ctx.warn(format!("conditional jump to '{}' emitted as a marker", label));
                state.w.sigil(tape::CONDITIONAL_JUMP, label);
            }
            Instruction::IfCondition { else_label, .. } => {
                ctx.warn(format!("branch to '{}' emitted as a marker", else_label));
                state.w.sigil(tape::CONDITIONAL_JUMP, else_label);
            }
            Instruction::Return { .. } => state.w.sigil(tape::RETURN, ""),

            Instruction::Comment { text } => state.w.sigil(tape::COMMENT, text),
            Instruction::Import { module } => state.w.sigil(tape::IMPORT, module),
            Instruction::Export { name, .. } => state.w.sigil(tape::EXPORT, name),
        }
    }

    /// Expands a library call in place. False when no template applies.
    fn render_template(
        &self,
        name: &str,
        args: &[Operand],
        target: Option<usize>,
        state: &mut EmitState<'_>,
        ctx: &mut CompilationContext,
    ) -> bool {
        if !self.stdlib.has(name) {
            return false;
        }
        let resolved: Vec<ResolvedOperand> = args.iter().map(|arg| state.resolve(arg)).collect();
        let template_ctx = TemplateContext {
            pointer: state.w.pointer(),
            scratch: state.s.base,
            target,
            cell_width: self.cell_width,
        };
        match self.stdlib.render(name, &template_ctx, &resolved) {
            Some(Ok(fragment)) => {
                state.w.raw(&fragment);
                true
            }
            Some(Err(e)) => {
                ctx.warn(format!("template '{}' not applied: {}", name, e));
                false
            }
            None => false,
        }
    }
}

fn write_element(w: &mut TapeWriter, cell: usize, value: &Operand, s: &Scratch) {
    if value.address() == Some(cell) {
        return;
    }
    w.clear(cell);
    w.load(value, cell, s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrLowerer, Value};
    use crate::compiler::memory::MemoryModel;
    use crate::parser::parse;
    use crate::runtime::{Interpreter, InterpreterConfig};

    fn emit_source(source: &str) -> (String, CompilationContext) {
        let ast = parse(source).unwrap();
        let mut planner = MemoryPlanner::with_model(MemoryModel::Dynamic, 30_000).unwrap();
        let mut ctx = CompilationContext::new();
        let ir = IrLowerer::new(&mut planner, &mut ctx).lower(&ast).unwrap();
        let stdlib = StdlibTable::new();
        let code = Emitter::new(&stdlib, CellWidth::Bits8, 30_000)
            .emit(&ir, &planner, &mut ctx)
            .unwrap();
        (code, ctx)
    }

    fn run(code: &str) -> String {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        interp.run(code, b"").unwrap().output
    }

    #[test]
    fn test_strip_keeps_base_symbols() {
        assert_eq!(strip("+#note+~@f\n>"), "++[->-<]>[-<+>]<>");
        assert_eq!(strip("?unknown :label |jump"), "");
    }

    #[test]
    fn test_prints_string() {
        let (code, _) = emit_source("let s = \"Hi\"\nconsole.log(s)");
        assert_eq!(run(&code), "Hi");
        assert_eq!(run(&strip(&code)), "Hi");
    }

    #[test]
    fn test_for_loop_runs_body() {
        let (code, _) = emit_source("for (let i = 0; i < 3; i++) {\nconsole.log(\"a\")\n}");
        assert_eq!(run(&code), "aaa");
        assert_eq!(run(&strip(&code)), "aaa");
    }

    #[test]
    fn test_if_else_picks_branch() {
        let source = "let x = 5\nif (x > 3) {\nconsole.log(\"y\")\n} else {\nconsole.log(\"n\")\n}\nif (x < 3) {\nconsole.log(\"a\")\n} else {\nconsole.log(\"b\")\n}";
        let (code, _) = emit_source(source);
        assert_eq!(run(&code), "yb");
        assert_eq!(run(&strip(&code)), "yb");
    }

    #[test]
    fn test_nested_loops() {
        let source = "for (let i = 0; i < 2; i++) {\nfor (let j = 0; j < 3; j++) {\nconsole.log(\"x\")\n}\n}";
        let (code, _) = emit_source(source);
        assert_eq!(run(&code), "xxxxxx");
    }

    #[test]
    fn test_unresolved_call_is_marked() {
        let (code, ctx) = emit_source("foo(1)");
        assert!(code.contains("?foo"));
        assert!(ctx.warnings().iter().any(|w| w.contains("foo")));
    }

    #[test]
    fn test_stray_jump_becomes_marker() {
        let mut program = IrProgram::new();
        program.instructions.push(Instruction::Jump {
            label: "nowhere".into(),
        });
        program.instructions.push(Instruction::Comment {
            text: "a+b".into(),
        });
        let planner = MemoryPlanner::with_model(MemoryModel::Dynamic, 100).unwrap();
        let mut ctx = CompilationContext::new();
        let stdlib = StdlibTable::empty();
        let code = Emitter::new(&stdlib, CellWidth::Bits8, 100)
            .emit(&program, &planner, &mut ctx)
            .unwrap();
        assert_eq!(code, "|nowhere\n#a_b\n");
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_builtin_printer_without_stdlib() {
        let mut program = IrProgram::new();
        program.instructions.push(Instruction::Print {
            operands: vec![Operand::Literal(Value::Str("ok".into()))],
        });
        let planner = MemoryPlanner::with_model(MemoryModel::Dynamic, 100).unwrap();
        let mut ctx = CompilationContext::new();
        let stdlib = StdlibTable::empty();
        let code = Emitter::new(&stdlib, CellWidth::Bits8, 100)
            .emit(&program, &planner, &mut ctx)
            .unwrap();
        assert_eq!(run(&code), "ok");
    }

    #[test]
    fn test_tape_bound_is_enforced() {
        let mut program = IrProgram::new();
        program.instructions.push(Instruction::SetValue {
            address: 5,
            value: Value::Int(1),
        });
        let planner = MemoryPlanner::with_model(MemoryModel::Dynamic, 10).unwrap();
        let mut ctx = CompilationContext::new();
        let stdlib = StdlibTable::new();
        let err = Emitter::new(&stdlib, CellWidth::Bits8, 10)
            .emit(&program, &planner, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceLimit { .. }));
    }
}
