//! Syntax tree to IR lowering
//!
//! Walks the tree depth-first, asking the [`MemoryPlanner`] for an address per
//! declaration and temporary. Operands are carried by name until the
//! instruction that uses them is pushed, so a compaction triggered by a
//! nested allocation never leaves a stale address behind.

use super::instruction::{fold_binary, Instruction, Operand, UpdateOp, Value};
use super::program::{FunctionInfo, IrProgram, VariableInfo};
use crate::compiler::context::CompilationContext;
use crate::compiler::memory::MemoryPlanner;
use crate::error::{Error, Result};
use crate::parser::{
    AssignmentOperator, BinaryOperator, DeclarationKind, Expression, Literal, Program, Statement,
    UpdateOperator,
};
use std::collections::{BTreeMap, HashMap};

/// Callee lowered to a `Print` instruction
pub const PRINT_CALLEE: &str = "console.log";

/// Operand before address resolution
#[derive(Debug, Clone)]
enum Slot {
    Literal(Value),
    Named { name: String, len: usize },
}

/// Lowers a parsed program into an [`IrProgram`]
pub struct IrLowerer<'a> {
    planner: &'a mut MemoryPlanner,
    ctx: &'a mut CompilationContext,
    program: IrProgram,
    /// Declaration keyword per (name, owning scope)
    kinds: HashMap<(String, String), DeclarationKind>,
}

impl<'a> IrLowerer<'a> {
    /// Creates a lowerer allocating from `planner` and counting in `ctx`
    pub fn new(planner: &'a mut MemoryPlanner, ctx: &'a mut CompilationContext) -> Self {
        IrLowerer {
            planner,
            ctx,
            program: IrProgram::new(),
            kinds: HashMap::new(),
        }
    }

    /// Lowers every top-level statement
    pub fn lower(mut self, ast: &Program) -> Result<IrProgram> {
        for stmt in &ast.body {
            self.lower_statement(stmt)?;
        }
        tracing::debug!(
            "lowered {} statement(s) to {} instruction(s)",
            ast.body.len(),
            self.program.instructions.len()
        );
        Ok(self.program)
    }

    fn lower_statement(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::VariableDeclaration { kind, name, init } => {
                self.declare(*kind, name, init.as_ref())
            }

            Statement::FunctionDeclaration { name, params, body } => {
                self.lower_function(name, params, body)
            }

            Statement::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                let id = self.ctx.next_label_id();
                let else_label = format!("if_else_{}", id);
                let end_label = format!("if_end_{}", id);

                let condition = self.operand_of(test)?;
                let condition = self.resolve(&condition)?;
                self.push(Instruction::IfCondition {
                    condition,
                    else_label: else_label.clone(),
                });
                self.lower_block("if", consequent)?;
                self.push(Instruction::Jump {
                    label: end_label.clone(),
                });
                self.push(Instruction::Label { name: else_label });
                if let Some(alternate) = alternate {
                    self.lower_block("else", alternate)?;
                }
                self.push(Instruction::Label { name: end_label });
                Ok(())
            }

            Statement::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                self.planner.enter_scope("for");
                if let Some(init) = init {
                    self.lower_statement(init)?;
                }

                let id = self.ctx.next_label_id();
                let test_label = format!("for_test_{}", id);
                let update_label = format!("for_update_{}", id);
                let end_label = format!("for_end_{}", id);

                self.push(Instruction::Label {
                    name: test_label.clone(),
                });
                let flag = self.temp(1)?;
                match test {
                    Some(expr) => self.lower_into(expr, &flag)?,
                    None => {
                        let address = self.address(&flag)?;
                        self.push(Instruction::SetValue {
                            address,
                            value: Value::Int(1),
                        });
                    }
                }
                let condition = Operand::cell(self.address(&flag)?);
                self.push(Instruction::ConditionalJump {
                    condition,
                    label: end_label.clone(),
                });

                self.lower_block("loop", body)?;

                self.push(Instruction::Label { name: update_label });
                if let Some(update) = update {
                    self.lower_effect(update)?;
                }
                self.push(Instruction::Jump { label: test_label });
                self.push(Instruction::Label { name: end_label });
                self.close_scope();
                Ok(())
            }

            Statement::ReturnStatement { argument } => {
                let value = match argument {
                    Some(expr) => {
                        let slot = self.operand_of(expr)?;
                        Some(self.resolve(&slot)?)
                    }
                    None => None,
                };
                self.push(Instruction::Return { value });
                Ok(())
            }

            Statement::ExpressionStatement(expr) => self.lower_effect(expr),
        }
    }

    fn lower_block(&mut self, scope: &str, body: &[Statement]) -> Result<()> {
        self.planner.enter_scope(scope);
        for stmt in body {
            self.lower_statement(stmt)?;
        }
        self.close_scope();
        Ok(())
    }

    /// Leaves the innermost scope. Names it shadowed see their outer
    /// binding again.
    fn close_scope(&mut self) {
        self.planner.exit_scope();
        for (name, info) in self.program.variables.iter_mut() {
            let Some(alloc) = self.planner.allocation(name) else {
                continue;
            };
            if alloc.address == info.address {
                continue;
            }
            let kind = self
                .kinds
                .get(&(name.clone(), alloc.scope.clone()))
                .copied()
                .unwrap_or(info.kind);
            let outer = VariableInfo {
                address: alloc.address,
                size: alloc.size,
                kind,
            };
            let inner = std::mem::replace(info, outer);
            self.program.shadowed.push((name.clone(), inner));
        }
    }

    fn lower_function(&mut self, name: &str, params: &[String], body: &[Statement]) -> Result<()> {
        let id = self.ctx.next_function_id();
        let address = self.allocate(name, 1)?;
        let scope = self.planner.current_scope().to_string();
        self.kinds
            .insert((name.to_string(), scope), DeclarationKind::Function);
        self.bind(
            name,
            VariableInfo {
                address,
                size: 1,
                kind: DeclarationKind::Function,
            },
        );
        self.push(Instruction::SetValue {
            address,
            value: Value::Int(i64::from(id)),
        });

        self.program.functions.insert(
            name.to_string(),
            FunctionInfo {
                id,
                params: params.to_vec(),
                body: body.to_vec(),
                local_vars: BTreeMap::new(),
                inline_candidate: false,
            },
        );

        let scope = self.planner.enter_scope(name);
        for param in params {
            let address = self.allocate(param, 1)?;
            self.kinds
                .insert((param.clone(), scope.clone()), DeclarationKind::Let);
            if let Some(function) = self.program.functions.get_mut(name) {
                function.local_vars.insert(
                    param.clone(),
                    VariableInfo {
                        address,
                        size: 1,
                        kind: DeclarationKind::Let,
                    },
                );
            }
        }
        self.close_scope();
        Ok(())
    }

    /// Declares `name` in the current scope. A binding from an enclosing
    /// scope is shadowed, not reused.
    fn declare(&mut self, kind: DeclarationKind, name: &str, init: Option<&Expression>) -> Result<()> {
        let scope = self.planner.current_scope().to_string();
        let redeclared = self
            .planner
            .allocation(name)
            .is_some_and(|alloc| alloc.scope == scope);
        if redeclared && self.live_kind(name) == Some(DeclarationKind::Const) {
            return Err(Error::ConstantReassignment {
                name: name.to_string(),
            });
        }

        let written = init.map_or(1, |expr| self.static_size(expr));
        let address = if redeclared {
            self.ensure_capacity(name, written)?
        } else {
            self.allocate(name, written)?
        };
        let size = self.planner.allocation(name).map_or(written, |a| a.size);
        self.kinds.insert((name.to_string(), scope), kind);
        self.bind(
            name,
            VariableInfo {
                address,
                size,
                kind,
            },
        );

        match init {
            Some(expr) => self.lower_into(expr, name)?,
            None => self.push(Instruction::SetValue {
                address,
                value: Value::Null,
            }),
        }
        self.clear_tail(name, written);
        Ok(())
    }

    /// Records `info` as the visible binding of `name`
    fn bind(&mut self, name: &str, info: VariableInfo) {
        let address = info.address;
        if let Some(previous) = self.program.variables.insert(name.to_string(), info) {
            if previous.address != address {
                self.program.shadowed.push((name.to_string(), previous));
            }
        }
    }

    /// Address of `name` with room for `size` cells. A block that is too
    /// small moves, and everything lowered so far follows it.
    fn ensure_capacity(&mut self, name: &str, size: usize) -> Result<usize> {
        if self.planner.allocation(name).is_none() {
            return self.allocate(name, size);
        }
        if let Some(moved) = self.planner.resize(name, size)? {
            let compaction = self.planner.take_relocations();
            tracing::debug!(
                "'{}' grew to {} cell(s), moving {} -> {}",
                name,
                size,
                moved.from,
                moved.to
            );
            self.program.grow(&moved, size, &compaction);
        }
        self.address(name)
    }

    /// Zeroes the cells of `name` past the first `from`, left over from a
    /// longer earlier value
    fn clear_tail(&mut self, name: &str, from: usize) {
        let Some((address, size)) = self.planner.allocation(name).map(|a| (a.address, a.size))
        else {
            return;
        };
        for offset in from.max(1)..size {
            self.push(Instruction::SetValue {
                address: address + offset,
                value: Value::Int(0),
            });
        }
    }

    /// Lowers an expression for its side effects only
    fn lower_effect(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Call { callee, arguments } => self.lower_call(callee, arguments, None),
            Expression::Assignment {
                operator,
                target,
                value,
            } => self.lower_assignment(*operator, target, value),
            Expression::Update {
                operator, target, ..
            } => self.lower_update(*operator, target),
            other => {
                self.operand_of(other)?;
                Ok(())
            }
        }
    }

    /// Lowers `expr` so that its value lands in `target`'s cells
    fn lower_into(&mut self, expr: &Expression, target: &str) -> Result<()> {
        match expr {
            Expression::Literal(lit) => {
                let value = self.literal_value(lit);
                let address = self.address(target)?;
                self.push(Instruction::SetValue { address, value });
                Ok(())
            }

            Expression::Identifier(name) => {
                self.read_variable(name)?;
                self.copy_variable(name, target)
            }

            Expression::Binary {
                operator,
                left,
                right,
            }
            | Expression::Logical {
                operator,
                left,
                right,
            } => self.lower_binary(*operator, left, right, target),

            Expression::Array(elements) => {
                let mut slots = Vec::with_capacity(elements.len());
                for element in elements {
                    slots.push(self.operand_of(element)?);
                }
                let elements = slots
                    .iter()
                    .map(|slot| self.resolve(slot))
                    .collect::<Result<Vec<_>>>()?;
                let address = self.address(target)?;
                self.push(Instruction::CreateArray { address, elements });
                Ok(())
            }

            Expression::Call { callee, arguments } => {
                self.lower_call(callee, arguments, Some(target))
            }

            Expression::Member { .. } => {
                let value = self.member_value(expr);
                let address = self.address(target)?;
                self.push(Instruction::SetValue { address, value });
                Ok(())
            }

            Expression::Assignment {
                operator,
                target: assigned,
                value,
            } => {
                self.lower_assignment(*operator, assigned, value)?;
                self.copy_variable(assigned, target)
            }

            Expression::Update {
                operator,
                target: updated,
                prefix,
            } => {
                self.read_variable(updated)?;
                if *prefix {
                    self.lower_update(*operator, updated)?;
                    self.copy_variable(updated, target)
                } else {
                    self.copy_variable(updated, target)?;
                    self.lower_update(*operator, updated)
                }
            }
        }
    }

    fn lower_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
        target: &str,
    ) -> Result<()> {
        let left = self.operand_of(left)?;
        let right = self.operand_of(right)?;
        let left = self.resolve(&left)?;
        let right = self.resolve(&right)?;
        let target = self.address(target)?;
        self.push(Instruction::BinaryOperation {
            target,
            operator,
            left,
            right,
        });
        Ok(())
    }

    fn lower_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        target: Option<&str>,
    ) -> Result<()> {
        let Some(name) = callee.qualified_name() else {
            self.ctx.warn("call on a computed callee is not supported; skipped");
            return Ok(());
        };

        let mut slots = Vec::with_capacity(arguments.len());
        for arg in arguments {
            slots.push(self.operand_of(arg)?);
        }
        let args = slots
            .iter()
            .map(|slot| self.resolve(slot))
            .collect::<Result<Vec<_>>>()?;

        if name == PRINT_CALLEE {
            self.push(Instruction::Print { operands: args });
            if let Some(target) = target {
                let address = self.address(target)?;
                self.push(Instruction::SetValue {
                    address,
                    value: Value::Null,
                });
            }
            return Ok(());
        }

        let target = match target {
            Some(name) => Some(self.address(name)?),
            None => None,
        };

        let receiver = match callee {
            Expression::Member { object, property } => match object.as_ref() {
                Expression::Identifier(obj) if self.planner.address_of(obj).is_some() => {
                    Some((obj.clone(), property.clone()))
                }
                _ => None,
            },
            _ => None,
        };

        match receiver {
            Some((object_name, method)) => {
                let object = self.address(&object_name)?;
                self.push(Instruction::CallMethod {
                    object,
                    object_name,
                    method,
                    args,
                    target,
                });
            }
            None => self.push(Instruction::CallFunction { name, args, target }),
        }
        Ok(())
    }

    fn lower_assignment(
        &mut self,
        operator: AssignmentOperator,
        target: &str,
        value: &Expression,
    ) -> Result<()> {
        let Some(kind) = self.live_kind(target) else {
            if operator != AssignmentOperator::Assign {
                return Err(Error::UndefinedVariable {
                    name: target.to_string(),
                });
            }
            self.ctx.warn(format!(
                "assignment to undeclared variable '{}' declares it",
                target
            ));
            return self.declare(DeclarationKind::Var, target, Some(value));
        };
        if kind == DeclarationKind::Const {
            return Err(Error::ConstantReassignment {
                name: target.to_string(),
            });
        }

        let Some(operator) = operator.binary_operator() else {
            let written = self.static_size(value);
            let address = self.ensure_capacity(target, written)?;
            let size = self.planner.allocation(target).map_or(written, |a| a.size);
            if let Some(info) = self.program.variables.get_mut(target) {
                info.address = address;
                info.size = size;
            }
            self.lower_into(value, target)?;
            self.clear_tail(target, written);
            return Ok(());
        };

        let address = self.address(target)?;
        match (operator, value) {
            (BinaryOperator::Add, Expression::Literal(Literal::Int(n))) => {
                self.push(Instruction::UpdateVariable {
                    address,
                    op: UpdateOp::AddBy(*n),
                });
                Ok(())
            }
            (BinaryOperator::Sub, Expression::Literal(Literal::Int(n))) => {
                self.push(Instruction::UpdateVariable {
                    address,
                    op: UpdateOp::SubtractBy(*n),
                });
                Ok(())
            }
            _ => {
                let left = Slot::Named {
                    name: target.to_string(),
                    len: 1,
                };
                let right = self.operand_of(value)?;
                let left = self.resolve(&left)?;
                let right = self.resolve(&right)?;
                let target = self.address(target)?;
                self.push(Instruction::BinaryOperation {
                    target,
                    operator,
                    left,
                    right,
                });
                Ok(())
            }
        }
    }

    fn lower_update(&mut self, operator: UpdateOperator, target: &str) -> Result<()> {
        let Some(kind) = self.live_kind(target) else {
            return Err(Error::UndefinedVariable {
                name: target.to_string(),
            });
        };
        if kind == DeclarationKind::Const {
            return Err(Error::ConstantReassignment {
                name: target.to_string(),
            });
        }
        let address = self.address(target)?;
        let op = match operator {
            UpdateOperator::Increment => UpdateOp::Increment,
            UpdateOperator::Decrement => UpdateOp::Decrement,
        };
        self.push(Instruction::UpdateVariable { address, op });
        Ok(())
    }

    /// Resolves an expression to a literal or a named run of cells,
    /// lowering it into a temporary when needed
    fn operand_of(&mut self, expr: &Expression) -> Result<Slot> {
        match expr {
            Expression::Literal(lit) => Ok(Slot::Literal(self.literal_value(lit))),
            Expression::Identifier(name) => {
                let len = self.read_variable(name)?;
                Ok(Slot::Named {
                    name: name.clone(),
                    len,
                })
            }
            Expression::Member { .. } => Ok(Slot::Literal(self.member_value(expr))),
            _ => {
                let len = self.static_size(expr);
                let temp = self.temp(len)?;
                self.lower_into(expr, &temp)?;
                Ok(Slot::Named { name: temp, len })
            }
        }
    }

    fn resolve(&self, slot: &Slot) -> Result<Operand> {
        match slot {
            Slot::Literal(value) => Ok(Operand::Literal(value.clone())),
            Slot::Named { name, len } => Ok(Operand::Address {
                address: self.address(name)?,
                len: *len,
            }),
        }
    }

    fn copy_variable(&mut self, source: &str, target: &str) -> Result<()> {
        let (Some(src), Some(dst)) = (
            self.planner.allocation(source).map(|a| (a.address, a.size)),
            self.planner.allocation(target).map(|a| (a.address, a.size)),
        ) else {
            return Err(Error::UndefinedVariable {
                name: source.to_string(),
            });
        };
        for offset in 0..src.1.min(dst.1) {
            self.push(Instruction::CopyValue {
                target: dst.0 + offset,
                source: src.0 + offset,
            });
        }
        Ok(())
    }

    /// `name.length` of a declared variable is its size; other member reads
    /// have no compile-time value
    fn member_value(&mut self, expr: &Expression) -> Value {
        if let Expression::Member { object, property } = expr {
            if let Expression::Identifier(obj) = object.as_ref() {
                if property == "length" {
                    if let Some(alloc) = self.planner.allocation(obj) {
                        return Value::Int(alloc.size as i64);
                    }
                }
            }
        }
        let name = expr.qualified_name().unwrap_or_else(|| "<member>".to_string());
        self.ctx
            .warn(format!("member expression '{}' has no value; using null", name));
        Value::Null
    }

    fn literal_value(&mut self, lit: &Literal) -> Value {
        match lit {
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(f) => {
                self.ctx
                    .warn(format!("float literal {} truncated to {}", f, *f as i64));
                Value::Int(*f as i64)
            }
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }

    /// Cells needed to hold the value of `expr`
    fn static_size(&self, expr: &Expression) -> usize {
        match expr {
            Expression::Literal(Literal::Str(s)) => s.chars().count().max(1),
            Expression::Array(elements) => elements.len().max(1),
            Expression::Identifier(name) => self.planner.allocation(name).map_or(1, |a| a.size),
            Expression::Binary { .. } | Expression::Logical { .. } => {
                constant_value(expr).map_or(1, |v| v.size())
            }
            _ => 1,
        }
    }

    /// Marks a read and returns the variable's size
    fn read_variable(&mut self, name: &str) -> Result<usize> {
        let Some(size) = self.planner.allocation(name).map(|a| a.size) else {
            return Err(Error::UndefinedVariable {
                name: name.to_string(),
            });
        };
        self.planner.add_reference(name);
        Ok(size)
    }

    /// Declaration kind of the visible binding. Temporaries have none.
    fn live_kind(&self, name: &str) -> Option<DeclarationKind> {
        let alloc = self.planner.allocation(name)?;
        self.kinds
            .get(&(name.to_string(), alloc.scope.clone()))
            .copied()
    }

    fn temp(&mut self, size: usize) -> Result<String> {
        let name = self.ctx.next_temp();
        self.allocate(&name, size)?;
        Ok(name)
    }

    fn allocate(&mut self, name: &str, size: usize) -> Result<usize> {
        let address = self.planner.allocate(name, size)?;
        let relocations = self.planner.take_relocations();
        if !relocations.is_empty() {
            tracing::debug!("applying {} relocation(s) to lowered IR", relocations.len());
            self.program.relocate(&relocations);
        }
        Ok(address)
    }

    fn address(&self, name: &str) -> Result<usize> {
        self.planner
            .address_of(name)
            .ok_or_else(|| Error::Internal(format!("'{}' has no live allocation", name)))
    }

    fn push(&mut self, instr: Instruction) {
        self.program.instructions.push(instr);
    }
}

/// Value of a literal-only expression tree, used to size folded results
fn constant_value(expr: &Expression) -> Option<Value> {
    match expr {
        Expression::Literal(Literal::Int(n)) => Some(Value::Int(*n)),
        Expression::Literal(Literal::Float(f)) => Some(Value::Int(*f as i64)),
        Expression::Literal(Literal::Str(s)) => Some(Value::Str(s.clone())),
        Expression::Literal(Literal::Bool(b)) => Some(Value::Bool(*b)),
        Expression::Literal(Literal::Null) => Some(Value::Null),
        Expression::Binary {
            operator,
            left,
            right,
        }
        | Expression::Logical {
            operator,
            left,
            right,
        } => fold_binary(*operator, &constant_value(left)?, &constant_value(right)?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::memory::MemoryModel;
    use crate::parser::parse;

    fn lower_source(source: &str) -> Result<(IrProgram, CompilationContext)> {
        let ast = parse(source)?;
        let mut planner = MemoryPlanner::with_model(MemoryModel::Dynamic, 30_000)?;
        let mut ctx = CompilationContext::new();
        let ir = IrLowerer::new(&mut planner, &mut ctx).lower(&ast)?;
        Ok((ir, ctx))
    }

    #[test]
    fn test_declaration_with_binary_init() {
        let (ir, _) = lower_source("let x = 2 + 3\nconsole.log(x)").unwrap();
        assert_eq!(
            ir.instructions,
            vec![
                Instruction::BinaryOperation {
                    target: 0,
                    operator: BinaryOperator::Add,
                    left: Operand::int(2),
                    right: Operand::int(3),
                },
                Instruction::Print {
                    operands: vec![Operand::cell(0)],
                },
            ]
        );
        assert_eq!(ir.variables["x"].address, 0);
    }

    #[test]
    fn test_identifier_initializer_copies_each_cell() {
        let (ir, _) = lower_source("let a = \"hi\"\nlet b = a").unwrap();
        assert_eq!(ir.variables["b"].size, 2);
        assert_eq!(
            &ir.instructions[1..],
            &[
                Instruction::CopyValue {
                    target: 2,
                    source: 0
                },
                Instruction::CopyValue {
                    target: 3,
                    source: 1
                },
            ]
        );
    }

    #[test]
    fn test_for_loop_layout() {
        let (ir, _) =
            lower_source("for (let i = 0; i < 3; i++) {\nconsole.log(i)\n}").unwrap();
        let kinds: Vec<&str> = ir.instructions.iter().map(Instruction::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "SetValue",
                "Label",
                "BinaryOperation",
                "ConditionalJump",
                "Print",
                "Label",
                "UpdateVariable",
                "Jump",
                "Label",
            ]
        );
        assert_eq!(
            ir.instructions[1],
            Instruction::Label {
                name: "for_test_0".into()
            }
        );
        assert_eq!(
            ir.instructions[7],
            Instruction::Jump {
                label: "for_test_0".into()
            }
        );
    }

    #[test]
    fn test_for_loop_without_clauses_tests_constant() {
        let (ir, _) = lower_source("for (;;) {\n}").unwrap();
        assert!(matches!(
            ir.instructions[1],
            Instruction::SetValue {
                value: Value::Int(1),
                ..
            }
        ));
    }

    #[test]
    fn test_if_else_layout() {
        let (ir, _) =
            lower_source("let x = 1\nif (x) {\nconsole.log(1)\n} else {\nconsole.log(2)\n}")
                .unwrap();
        let kinds: Vec<&str> = ir.instructions.iter().map(Instruction::kind).collect();
        assert_eq!(
            kinds,
            vec!["SetValue", "IfCondition", "Print", "Jump", "Label", "Print", "Label"]
        );
        assert_eq!(
            ir.instructions[1],
            Instruction::IfCondition {
                condition: Operand::cell(0),
                else_label: "if_else_0".into(),
            }
        );
    }

    #[test]
    fn test_undefined_variable_read_fails() {
        let err = lower_source("console.log(y)").unwrap_err();
        assert_eq!(err, Error::UndefinedVariable { name: "y".into() });
    }

    #[test]
    fn test_const_reassignment_fails() {
        let err = lower_source("const k = 1\nk = 2").unwrap_err();
        assert_eq!(err, Error::ConstantReassignment { name: "k".into() });
        let err = lower_source("const k = 1\nk++").unwrap_err();
        assert_eq!(err, Error::ConstantReassignment { name: "k".into() });
    }

    #[test]
    fn test_implicit_declaration_warns() {
        let (ir, ctx) = lower_source("z = 4").unwrap();
        assert!(ir.variables.contains_key("z"));
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_compound_literal_assignment_is_update() {
        let (ir, _) = lower_source("let n = 1\nn += 5\nn -= 2\nn *= 3").unwrap();
        assert_eq!(
            ir.instructions[1],
            Instruction::UpdateVariable {
                address: 0,
                op: UpdateOp::AddBy(5)
            }
        );
        assert_eq!(
            ir.instructions[2],
            Instruction::UpdateVariable {
                address: 0,
                op: UpdateOp::SubtractBy(2)
            }
        );
        assert!(matches!(
            ir.instructions[3],
            Instruction::BinaryOperation {
                operator: BinaryOperator::Mul,
                target: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_function_declaration_stores_id() {
        let (ir, _) = lower_source("function add(a, b) {\nreturn a + b\n}").unwrap();
        let info = &ir.functions["add"];
        assert_eq!(info.id, 1);
        assert_eq!(info.params, vec!["a", "b"]);
        assert_eq!(info.local_vars.len(), 2);
        assert_eq!(
            ir.instructions,
            vec![Instruction::SetValue {
                address: 0,
                value: Value::Int(1)
            }]
        );
    }

    #[test]
    fn test_method_call_and_length() {
        let (ir, _) = lower_source("let list = [1, 2, 3]\nlist.push(4)\nlet n = list.length")
            .unwrap();
        assert!(matches!(
            &ir.instructions[1],
            Instruction::CallMethod { method, object: 0, .. } if method == "push"
        ));
        assert_eq!(
            ir.instructions[2],
            Instruction::SetValue {
                address: 3,
                value: Value::Int(3)
            }
        );
    }

    #[test]
    fn test_library_call_with_target() {
        let (ir, _) = lower_source("let m = Math.min(4, 9)").unwrap();
        assert_eq!(
            ir.instructions[0],
            Instruction::CallFunction {
                name: "Math.min".into(),
                args: vec![Operand::int(4), Operand::int(9)],
                target: Some(0),
            }
        );
    }

    #[test]
    fn test_string_reassignment_grows_variable() {
        let (ir, _) = lower_source("let s = \"a\"\ns = \"hello\"").unwrap();
        assert_eq!(ir.variables["s"].size, 5);
        assert_eq!(
            ir.instructions[1],
            Instruction::SetValue {
                address: 1,
                value: Value::Str("hello".into())
            }
        );
    }

    #[test]
    fn test_nested_declaration_shadows_outer() {
        let (ir, _) =
            lower_source("let x = 1\nif (x) {\nlet x = 2\nconsole.log(x)\n}\nconsole.log(x)")
                .unwrap();
        assert_eq!(
            ir.instructions[2],
            Instruction::SetValue {
                address: 1,
                value: Value::Int(2)
            }
        );
        assert_eq!(
            ir.instructions[3],
            Instruction::Print {
                operands: vec![Operand::cell(1)],
            }
        );
        assert_eq!(
            ir.instructions.last(),
            Some(&Instruction::Print {
                operands: vec![Operand::cell(0)],
            })
        );
        assert_eq!(ir.variables["x"].address, 0);
        assert_eq!(ir.shadowed.len(), 2);
        assert!(ir.shadowed.iter().any(|(name, info)| name == "x" && info.address == 1));
    }

    #[test]
    fn test_const_may_be_shadowed_but_not_redeclared() {
        let (ir, _) = lower_source("const k = 1\nif (k) {\nconst k = 2\n}\nlet j = k").unwrap();
        assert_eq!(ir.variables["k"].kind, DeclarationKind::Const);
        assert_eq!(ir.variables["k"].address, 0);

        let err = lower_source("const k = 1\nconst k = 2").unwrap_err();
        assert_eq!(err, Error::ConstantReassignment { name: "k".into() });
        // the inner binding is gone once its block closes
        assert!(lower_source("let k = 1\nif (k) {\nconst k = 2\n}\nk = 3").is_ok());
    }

    #[test]
    fn test_growth_inside_loop_moves_earlier_reads() {
        let (ir, _) = lower_source(
            "let s = \"a\"\nfor (let i = 0; i < 2; i++) {\nconsole.log(s)\ns = \"bc\"\n}",
        )
        .unwrap();
        assert_eq!(ir.variables["s"].address, 3);
        assert_eq!(ir.variables["s"].size, 2);
        assert_eq!(
            ir.instructions[0],
            Instruction::SetValue {
                address: 3,
                value: Value::Str("a".into())
            }
        );
        let print = ir
            .instructions
            .iter()
            .find(|instr| matches!(instr, Instruction::Print { .. }));
        assert_eq!(
            print,
            Some(&Instruction::Print {
                operands: vec![Operand::Address { address: 3, len: 2 }],
            })
        );
        assert!(ir.instructions.contains(&Instruction::SetValue {
            address: 3,
            value: Value::Str("bc".into())
        }));
    }

    #[test]
    fn test_shorter_value_clears_leftover_cells() {
        let (ir, _) = lower_source("let s = \"abc\"\ns = 7").unwrap();
        assert_eq!(
            &ir.instructions[1..],
            &[
                Instruction::SetValue {
                    address: 0,
                    value: Value::Int(7)
                },
                Instruction::SetValue {
                    address: 1,
                    value: Value::Int(0)
                },
                Instruction::SetValue {
                    address: 2,
                    value: Value::Int(0)
                },
            ]
        );
    }
}
