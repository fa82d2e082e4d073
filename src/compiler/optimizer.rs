//! # IR Optimizer for tapescript Compilation
//!
//! Level-gated pass pipeline; each level includes every pass below it:
//! - 1: constant folding, dead value-assignment elimination
//! - 2: paired update combining, fixed-bound loop annotation
//! - 3: memory reordering by access frequency, inline-candidate flagging,
//!   common subexpression elimination
//! - 4: register allocation, parallelization, specialization (no-ops)
//!
//! Passes never fail: instruction shapes a pass does not recognize are left
//! as they are.

use super::context::CompilationContext;
use super::ir::{fold_binary, Instruction, IrProgram, Operand, UpdateOp};
use crate::parser::BinaryOperator;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Highest optimization level with passes of its own
pub const MAX_OPT_LEVEL: u8 = 4;

/// Bodies shorter than this are inline candidates
pub const INLINE_THRESHOLD: usize = 5;

/// Optimizer with configurable optimization level
pub struct Optimizer {
    level: u8,
}

impl Optimizer {
    /// Create a new optimizer with the specified optimization level (0-4)
    pub fn new(level: u8) -> Self {
        Self { level }
    }

    /// Run all optimization passes, returning how many rewrites and
    /// annotations were applied
    pub fn optimize(&mut self, program: &mut IrProgram, ctx: &mut CompilationContext) -> usize {
        let mut applied = 0;

        if self.level >= 1 {
            applied += self.constant_folding(program);
            applied += self.dead_code_elimination(program);
        }

        if self.level >= 2 {
            applied += self.combine_updates(program);
            applied += self.annotate_loops(program);
        }

        if self.level >= 3 {
            applied += self.reorder_memory(program);
            applied += self.flag_inline_candidates(program);
            applied += self.common_subexpression_elimination(program);
        }

        if self.level >= 4 {
            // Reserved extension points
            self.register_allocation(program);
            self.parallelization(program);
            self.specialization(program);
        }

        ctx.record_optimizations(applied);
        tracing::debug!(
            "optimizer level {} applied {} optimization(s)",
            self.level,
            applied
        );
        applied
    }

    /// Constant folding - replace binary operations on two literals with the
    /// value they evaluate to
    fn constant_folding(&mut self, program: &mut IrProgram) -> usize {
        let mut folded = 0;

        for instr in program.instructions.iter_mut() {
            if let Instruction::BinaryOperation {
                target,
                operator,
                left: Operand::Literal(l),
                right: Operand::Literal(r),
            } = instr
            {
                if let Some(value) = fold_binary(*operator, l, r) {
                    let address = *target;
                    *instr = Instruction::SetValue { address, value };
                    folded += 1;
                }
            }
        }

        folded
    }

    /// Dead code elimination - remove value assignments none of whose cells
    /// are read anywhere in the program
    fn dead_code_elimination(&mut self, program: &mut IrProgram) -> usize {
        // Find all cells that are read
        let read: HashSet<usize> = program
            .instructions
            .iter()
            .flat_map(Instruction::reads)
            .collect();

        let before = program.instructions.len();
        program.instructions.retain(|instr| match instr {
            Instruction::SetValue { .. } => instr.writes().iter().any(|cell| read.contains(cell)),
            _ => true,
        });
        before - program.instructions.len()
    }

    /// Combine exactly two consecutive increments (decrements) of one cell
    fn combine_updates(&mut self, program: &mut IrProgram) -> usize {
        let instructions = &mut program.instructions;
        let mut combined = 0;
        let mut i = 0;

        while i + 1 < instructions.len() {
            let merged = match (&instructions[i], &instructions[i + 1]) {
                (
                    Instruction::UpdateVariable {
                        address: a,
                        op: UpdateOp::Increment,
                    },
                    Instruction::UpdateVariable {
                        address: b,
                        op: UpdateOp::Increment,
                    },
                ) if a == b => Some((*a, UpdateOp::AddBy(2))),
                (
                    Instruction::UpdateVariable {
                        address: a,
                        op: UpdateOp::Decrement,
                    },
                    Instruction::UpdateVariable {
                        address: b,
                        op: UpdateOp::Decrement,
                    },
                ) if a == b => Some((*a, UpdateOp::SubtractBy(2))),
                _ => None,
            };

            if let Some((address, op)) = merged {
                instructions[i] = Instruction::UpdateVariable { address, op };
                instructions.remove(i + 1);
                combined += 1;
            }
            i += 1;
        }

        combined
    }

    /// Annotate loops whose test compares a cell against an integer literal
    fn annotate_loops(&mut self, program: &mut IrProgram) -> usize {
        let mut notes = Vec::new();

        for (i, window) in program.instructions.windows(2).enumerate() {
            if let [Instruction::Label { name }, Instruction::BinaryOperation {
                operator,
                left: Operand::Address { address, .. },
                right: Operand::Literal(bound),
                ..
            }] = window
            {
                let counting = matches!(
                    operator,
                    BinaryOperator::Lt
                        | BinaryOperator::LtEq
                        | BinaryOperator::Gt
                        | BinaryOperator::GtEq
                        | BinaryOperator::NotEq
                );
                if name.starts_with("for_test_") && counting && bound.as_number().is_some() {
                    notes.push((
                        i,
                        format!(
                            "fixed-bound loop {}: @{} {} {}",
                            name, address, operator, bound
                        ),
                    ));
                }
            }
        }

        let count = notes.len();
        for (i, text) in notes.into_iter().rev() {
            program.instructions.insert(i, Instruction::Comment { text });
        }
        count
    }

    /// Memory reordering - move the most accessed cells to the lowest
    /// addresses and pack everything densely from zero
    fn reorder_memory(&mut self, program: &mut IrProgram) -> usize {
        // Collect every block of cells the program mentions
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let shadowed = program.shadowed.iter().map(|(_, info)| info);
        for info in program.variables.values().chain(shadowed) {
            ranges.push((info.address, info.address + info.size));
        }
        for function in program.functions.values() {
            for info in function.local_vars.values() {
                ranges.push((info.address, info.address + info.size));
            }
        }
        for instr in &program.instructions {
            ranges.extend(instr.blocks().into_iter().map(|block| (block.start, block.end)));
        }
        if ranges.is_empty() {
            return 0;
        }

        // Merge overlapping blocks into slots
        ranges.sort_unstable();
        let mut slots: Vec<(usize, usize)> = Vec::new();
        for (start, end) in ranges {
            match slots.last_mut() {
                Some(last) if start < last.1 => last.1 = last.1.max(end),
                _ => slots.push((start, end)),
            }
        }

        // Access frequency across copy, print and binary instructions
        let slot_of = |cell: usize| slots.partition_point(|&(start, _)| start <= cell) - 1;
        let mut frequency = vec![0usize; slots.len()];
        for instr in &program.instructions {
            let touched: Vec<usize> = match instr {
                Instruction::CopyValue { target, source } => vec![*target, *source],
                Instruction::Print { operands } => {
                    operands.iter().filter_map(Operand::address).collect()
                }
                Instruction::BinaryOperation {
                    target,
                    left,
                    right,
                    ..
                } => std::iter::once(*target)
                    .chain(left.address())
                    .chain(right.address())
                    .collect(),
                _ => Vec::new(),
            };
            for cell in touched {
                frequency[slot_of(cell)] += 1;
            }
        }

        // Descending frequency, ties by original address
        let mut order: Vec<usize> = (0..slots.len()).collect();
        order.sort_by(|&a, &b| {
            frequency[b]
                .cmp(&frequency[a])
                .then(slots[a].0.cmp(&slots[b].0))
        });

        let mut new_start = vec![0usize; slots.len()];
        let mut next = 0;
        for &slot in &order {
            new_start[slot] = next;
            next += slots[slot].1 - slots[slot].0;
        }

        let changed = slots
            .iter()
            .zip(&new_start)
            .any(|(&(start, _), &moved)| start != moved);
        if !changed {
            return 0;
        }

        let remap = |cell: usize| {
            if slots.first().map_or(true, |&(start, _)| cell < start) {
                return cell;
            }
            let slot = slot_of(cell);
            let (start, end) = slots[slot];
            if cell < end {
                new_start[slot] + (cell - start)
            } else {
                cell
            }
        };

        for instr in program.instructions.iter_mut() {
            instr.remap_addresses(&remap);
        }
        let shadowed = program.shadowed.iter_mut().map(|(_, info)| info);
        for info in program.variables.values_mut().chain(shadowed) {
            info.address = remap(info.address);
        }
        for function in program.functions.values_mut() {
            for info in function.local_vars.values_mut() {
                info.address = remap(info.address);
            }
        }

        tracing::debug!("reordered {} memory slot(s)", slots.len());
        1
    }

    /// Flag short functions and annotate their call sites. Bodies are not
    /// substituted.
    fn flag_inline_candidates(&mut self, program: &mut IrProgram) -> usize {
        let mut applied = 0;
        let mut candidates = HashSet::new();
        for (name, function) in program.functions.iter_mut() {
            if function.body.len() < INLINE_THRESHOLD {
                function.inline_candidate = true;
                candidates.insert(name.clone());
                applied += 1;
            }
        }
        if candidates.is_empty() {
            return applied;
        }

        let mut annotated = Vec::with_capacity(program.instructions.len());
        for instr in program.instructions.drain(..) {
            if let Instruction::CallFunction { name, .. } = &instr {
                if candidates.contains(name) {
                    annotated.push(Instruction::Comment {
                        text: format!("inline candidate: {}", name),
                    });
                    applied += 1;
                }
            }
            annotated.push(instr);
        }
        program.instructions = annotated;
        applied
    }

    /// Common subexpression elimination
    fn common_subexpression_elimination(&mut self, program: &mut IrProgram) -> usize {
        // Track computed expressions: (op, left, right) -> result cell
        let mut computed: HashMap<(BinaryOperator, Operand, Operand), usize> = HashMap::new();
        let mut replaced = 0;

        for instr in program.instructions.iter_mut() {
            // Labels, jumps and calls invalidate computed expressions
            if instr.is_control_boundary() {
                computed.clear();
                continue;
            }

            if let Instruction::BinaryOperation {
                target,
                operator,
                left,
                right,
            } = instr
            {
                let key = (*operator, left.clone(), right.clone());
                let target = *target;
                if let Some(&existing) = computed.get(&key) {
                    if existing != target {
                        *instr = Instruction::CopyValue {
                            target,
                            source: existing,
                        };
                        replaced += 1;
                    }
                }
                invalidate(&mut computed, target);
                let reads_target = key.1.cells().contains(&target) || key.2.cells().contains(&target);
                if !reads_target && matches!(instr, Instruction::BinaryOperation { .. }) {
                    computed.insert(key, target);
                }
                continue;
            }

            for cell in instr.writes() {
                invalidate(&mut computed, cell);
            }
        }

        replaced
    }

    /// Register allocation (reserved)
    fn register_allocation(&mut self, program: &mut IrProgram) {
        tracing::debug!(
            "register allocation: no-op over {} instruction(s)",
            program.instructions.len()
        );
    }

    /// Parallelization (reserved)
    fn parallelization(&mut self, program: &mut IrProgram) {
        tracing::debug!(
            "parallelization: no-op over {} instruction(s)",
            program.instructions.len()
        );
    }

    /// Specialization (reserved)
    fn specialization(&mut self, program: &mut IrProgram) {
        let functions: BTreeMap<_, _> = program
            .functions
            .iter()
            .map(|(name, f)| (name.as_str(), f.params.len()))
            .collect();
        tracing::debug!("specialization: no-op over {} function(s)", functions.len());
    }
}

/// Drops memo entries that read or produced `cell`
fn invalidate(computed: &mut HashMap<(BinaryOperator, Operand, Operand), usize>, cell: usize) {
    computed.retain(|(_, left, right), result| {
        *result != cell && !left.cells().contains(&cell) && !right.cells().contains(&cell)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{FunctionInfo, Value, VariableInfo};
    use crate::parser::DeclarationKind;

    fn run(level: u8, instructions: Vec<Instruction>) -> (IrProgram, usize) {
        let mut program = IrProgram::new();
        program.instructions = instructions;
        let mut ctx = CompilationContext::new();
        let applied = Optimizer::new(level).optimize(&mut program, &mut ctx);
        assert_eq!(ctx.optimizations(), applied);
        (program, applied)
    }

    #[test]
    fn test_optimizer_creation() {
        let optimizer = Optimizer::new(2);
        assert_eq!(optimizer.level, 2);
    }

    #[test]
    fn test_constant_folding() {
        let mut program = IrProgram::new();
        program.instructions = vec![Instruction::BinaryOperation {
            target: 0,
            operator: BinaryOperator::Add,
            left: Operand::int(2),
            right: Operand::int(3),
        }];

        let mut optimizer = Optimizer::new(1);
        assert_eq!(optimizer.constant_folding(&mut program), 1);

        // The BinaryOperation should be replaced with SetValue(0, 5)
        if let Instruction::SetValue { address, value } = &program.instructions[0] {
            assert_eq!(*address, 0);
            assert_eq!(*value, Value::Int(5));
        } else {
            panic!("Expected constant folding to work");
        }
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let (program, _) = run(
            1,
            vec![
                Instruction::BinaryOperation {
                    target: 0,
                    operator: BinaryOperator::Div,
                    left: Operand::int(1),
                    right: Operand::int(0),
                },
                Instruction::Print {
                    operands: vec![Operand::cell(0)],
                },
            ],
        );
        assert!(matches!(
            program.instructions[0],
            Instruction::BinaryOperation { .. }
        ));
    }

    #[test]
    fn test_dead_code_elimination() {
        let (program, applied) = run(
            1,
            vec![
                Instruction::SetValue {
                    address: 0,
                    value: Value::Int(1),
                },
                Instruction::SetValue {
                    address: 1,
                    value: Value::Int(2),
                },
                Instruction::Print {
                    operands: vec![Operand::cell(1)],
                },
            ],
        );
        assert_eq!(applied, 1);
        assert_eq!(program.instructions.len(), 2);
        assert!(matches!(
            program.instructions[0],
            Instruction::SetValue { address: 1, .. }
        ));
    }

    #[test]
    fn test_level_zero_is_identity() {
        let instructions = vec![
            Instruction::BinaryOperation {
                target: 0,
                operator: BinaryOperator::Add,
                left: Operand::int(2),
                right: Operand::int(3),
            },
            Instruction::UpdateVariable {
                address: 0,
                op: UpdateOp::Increment,
            },
        ];
        let (program, applied) = run(0, instructions.clone());
        assert_eq!(applied, 0);
        assert_eq!(program.instructions, instructions);
    }

    #[test]
    fn test_combine_only_pairs() {
        let inc = Instruction::UpdateVariable {
            address: 3,
            op: UpdateOp::Increment,
        };
        let (program, _) = run(2, vec![inc.clone(), inc.clone(), inc.clone()]);
        assert_eq!(
            program.instructions,
            vec![
                Instruction::UpdateVariable {
                    address: 3,
                    op: UpdateOp::AddBy(2)
                },
                inc
            ]
        );

        let dec = Instruction::UpdateVariable {
            address: 1,
            op: UpdateOp::Decrement,
        };
        let (program, _) = run(2, vec![dec.clone(), dec]);
        assert_eq!(
            program.instructions,
            vec![Instruction::UpdateVariable {
                address: 1,
                op: UpdateOp::SubtractBy(2)
            }]
        );
    }

    #[test]
    fn test_loop_annotation_does_not_transform() {
        let body = vec![
            Instruction::Label {
                name: "for_test_0".into(),
            },
            Instruction::BinaryOperation {
                target: 1,
                operator: BinaryOperator::Lt,
                left: Operand::cell(0),
                right: Operand::int(3),
            },
            Instruction::ConditionalJump {
                condition: Operand::cell(1),
                label: "for_end_0".into(),
            },
        ];
        let (program, _) = run(2, body.clone());
        assert!(matches!(&program.instructions[0], Instruction::Comment { text } if text.contains("for_test_0")));
        assert_eq!(&program.instructions[1..], &body[..]);
    }

    #[test]
    fn test_reorder_by_access_frequency() {
        let mut program = IrProgram::new();
        program.variables.insert(
            "rare".into(),
            VariableInfo {
                address: 0,
                size: 1,
                kind: DeclarationKind::Let,
            },
        );
        program.variables.insert(
            "hot".into(),
            VariableInfo {
                address: 1,
                size: 1,
                kind: DeclarationKind::Let,
            },
        );
        program.instructions = vec![
            Instruction::Print {
                operands: vec![Operand::cell(0)],
            },
            Instruction::Print {
                operands: vec![Operand::cell(1)],
            },
            Instruction::CopyValue {
                target: 1,
                source: 1,
            },
        ];

        let mut optimizer = Optimizer::new(3);
        assert_eq!(optimizer.reorder_memory(&mut program), 1);
        assert_eq!(program.variables["hot"].address, 0);
        assert_eq!(program.variables["rare"].address, 1);
        assert_eq!(
            program.instructions[0],
            Instruction::Print {
                operands: vec![Operand::cell(1)]
            }
        );
    }

    #[test]
    fn test_reorder_keeps_ties_in_address_order() {
        let mut program = IrProgram::new();
        program.instructions = vec![
            Instruction::Print {
                operands: vec![Operand::cell(4)],
            },
            Instruction::Print {
                operands: vec![Operand::cell(9)],
            },
        ];
        let mut optimizer = Optimizer::new(3);
        optimizer.reorder_memory(&mut program);
        assert_eq!(
            program.instructions,
            vec![
                Instruction::Print {
                    operands: vec![Operand::cell(0)]
                },
                Instruction::Print {
                    operands: vec![Operand::cell(1)]
                },
            ]
        );
    }

    #[test]
    fn test_inline_candidates_annotated() {
        let mut program = IrProgram::new();
        program.functions.insert(
            "tiny".into(),
            FunctionInfo {
                id: 1,
                params: vec![],
                body: vec![],
                local_vars: BTreeMap::new(),
                inline_candidate: false,
            },
        );
        program.instructions = vec![Instruction::CallFunction {
            name: "tiny".into(),
            args: vec![],
            target: None,
        }];
        let mut optimizer = Optimizer::new(3);
        assert_eq!(optimizer.flag_inline_candidates(&mut program), 2);
        assert!(program.functions["tiny"].inline_candidate);
        assert!(matches!(program.instructions[0], Instruction::Comment { .. }));
        assert!(matches!(
            program.instructions[1],
            Instruction::CallFunction { .. }
        ));
    }

    #[test]
    fn test_cse_replaces_repeat_with_copy() {
        let add = |target| Instruction::BinaryOperation {
            target,
            operator: BinaryOperator::Add,
            left: Operand::cell(0),
            right: Operand::cell(1),
        };
        let mut program = IrProgram::new();
        program.instructions = vec![add(2), add(3)];
        let mut optimizer = Optimizer::new(3);
        assert_eq!(optimizer.common_subexpression_elimination(&mut program), 1);
        assert_eq!(
            program.instructions[1],
            Instruction::CopyValue {
                target: 3,
                source: 2
            }
        );
    }

    #[test]
    fn test_cse_invalidated_by_operand_write() {
        let add = |target| Instruction::BinaryOperation {
            target,
            operator: BinaryOperator::Add,
            left: Operand::cell(0),
            right: Operand::cell(1),
        };
        let mut program = IrProgram::new();
        program.instructions = vec![
            add(2),
            Instruction::UpdateVariable {
                address: 0,
                op: UpdateOp::Increment,
            },
            add(3),
        ];
        let mut optimizer = Optimizer::new(3);
        assert_eq!(optimizer.common_subexpression_elimination(&mut program), 0);

        program.instructions = vec![
            add(2),
            Instruction::Label {
                name: "for_test_0".into(),
            },
            add(3),
        ];
        assert_eq!(optimizer.common_subexpression_elimination(&mut program), 0);
    }

    #[test]
    fn test_level_four_passes_are_noops() {
        let instructions = vec![Instruction::Print {
            operands: vec![Operand::cell(0)],
        }];
        let mut program = IrProgram::new();
        program.instructions = instructions.clone();
        let mut optimizer = Optimizer::new(4);
        optimizer.register_allocation(&mut program);
        optimizer.parallelization(&mut program);
        optimizer.specialization(&mut program);
        assert_eq!(program.instructions, instructions);
    }
}
