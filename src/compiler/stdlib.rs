//! Standard library templates
//!
//! Calls to well-known JavaScript functions are expanded inline from a
//! [`StdlibTable`]. A template renders a pointer-neutral code fragment: it
//! starts and ends on the cell the emitter's pointer is on.

use super::ir::{Operand, Value};
use super::tape::{Scratch, TapeWriter};
use crate::error::{Error, Result};
use crate::parser::BinaryOperator;
use crate::runtime::CellWidth;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a template renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateContext {
    /// Pointer position on entry and exit
    pub pointer: usize,
    /// First of the zeroed scratch cells the template may use
    pub scratch: usize,
    /// Cell receiving the call's result
    pub target: Option<usize>,
    /// Cell width literals are encoded for
    pub cell_width: CellWidth,
}

impl TemplateContext {
    fn writer(&self) -> (TapeWriter, Scratch) {
        (
            TapeWriter::at(self.pointer, self.cell_width),
            Scratch::at(self.scratch),
        )
    }
}

/// Call argument after name resolution
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOperand {
    /// Compile-time value
    Literal(Value),
    /// Declared variable
    Variable {
        /// Variable name
        identifier: String,
        /// First cell
        address: usize,
        /// Cells occupied
        size: usize,
    },
}

impl ResolvedOperand {
    /// Operand form used by the tape writer
    pub fn to_operand(&self) -> Operand {
        match self {
            ResolvedOperand::Literal(value) => Operand::Literal(value.clone()),
            ResolvedOperand::Variable { address, size, .. } => Operand::Address {
                address: *address,
                len: *size,
            },
        }
    }
}

/// Inline expansion of a library call
pub trait StdlibTemplate: Send + Sync {
    /// Qualified callee name, e.g. `Math.max`
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Render the call. The fragment must end on `ctx.pointer`.
    fn render(&self, ctx: &TemplateContext, args: &[ResolvedOperand]) -> Result<String>;

    /// Required argument count
    fn arity(&self) -> Option<usize> {
        None // variadic
    }
}

/// Template registry keyed by qualified callee name
#[derive(Clone)]
pub struct StdlibTable {
    templates: HashMap<String, Arc<dyn StdlibTemplate>>,
}

impl StdlibTable {
    /// Registry with the default templates
    pub fn new() -> Self {
        let mut table = StdlibTable::empty();

        table.register(PrintTemplate {
            name: "console.log",
        });
        table.register(PrintTemplate {
            name: "process.stdout.write",
        });
        table.register(MinMaxTemplate {
            name: "Math.min",
            max: false,
        });
        table.register(MinMaxTemplate {
            name: "Math.max",
            max: true,
        });
        table.register(PromptTemplate);

        table
    }

    /// Registry with no templates
    pub fn empty() -> Self {
        StdlibTable {
            templates: HashMap::new(),
        }
    }

    /// Adds or replaces a template
    pub fn register<T: StdlibTemplate + 'static>(&mut self, template: T) {
        let name = template.name().to_string();
        self.templates.insert(name, Arc::new(template));
    }

    /// Template for `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn StdlibTemplate>> {
        self.templates.get(name).cloned()
    }

    /// Whether `name` has a template
    pub fn has(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Sorted template names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Renders `name`, checking its arity. `None` when there is no template.
    pub fn render(
        &self,
        name: &str,
        ctx: &TemplateContext,
        args: &[ResolvedOperand],
    ) -> Option<Result<String>> {
        let template = self.templates.get(name)?;
        if let Some(arity) = template.arity() {
            if args.len() != arity {
                return Some(Err(Error::compiler(format!(
                    "{} expects {} argument(s), got {}",
                    name,
                    arity,
                    args.len()
                ))));
            }
        }
        Some(template.render(ctx, args))
    }
}

impl Default for StdlibTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StdlibTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdlibTable")
            .field("templates", &self.names())
            .finish()
    }
}

/// Writes each argument's cells to output
struct PrintTemplate {
    name: &'static str,
}

impl StdlibTemplate for PrintTemplate {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Write each argument's cells to output"
    }

    fn render(&self, ctx: &TemplateContext, args: &[ResolvedOperand]) -> Result<String> {
        let (mut w, s) = ctx.writer();
        for arg in args {
            w.print_operand(&arg.to_operand(), &s);
        }
        w.move_to(ctx.pointer);
        Ok(w.into_code())
    }
}

/// `Math.min` / `Math.max` of two values
struct MinMaxTemplate {
    name: &'static str,
    max: bool,
}

impl StdlibTemplate for MinMaxTemplate {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        if self.max {
            "Larger of two values"
        } else {
            "Smaller of two values"
        }
    }

    fn arity(&self) -> Option<usize> {
        Some(2)
    }

    fn render(&self, ctx: &TemplateContext, args: &[ResolvedOperand]) -> Result<String> {
        let (mut w, s) = ctx.writer();
        let Some(target) = ctx.target else {
            return Ok(String::new());
        };
        let first = args[0].to_operand();
        let second = args[1].to_operand();

        // f = first wins; e = f ? first : second
        let operator = if self.max {
            BinaryOperator::Gt
        } else {
            BinaryOperator::Lt
        };
        w.binary(operator, &first, &second, s.f, &s);
        w.load(&second, s.e, &s);
        w.loop_at(s.f, |w| {
            w.clear(s.f);
            w.clear(s.e);
            w.load(&first, s.e, &s);
        });
        w.clear(target);
        w.move_add(s.e, target);

        w.move_to(ctx.pointer);
        Ok(w.into_code())
    }
}

/// Reads one input cell
struct PromptTemplate;

impl StdlibTemplate for PromptTemplate {
    fn name(&self) -> &str {
        "prompt"
    }

    fn description(&self) -> &str {
        "Read one input cell"
    }

    fn render(&self, ctx: &TemplateContext, _args: &[ResolvedOperand]) -> Result<String> {
        let (mut w, s) = ctx.writer();
        match ctx.target {
            Some(target) => w.input(target),
            None => {
                w.input(s.a);
                w.clear(s.a);
            }
        }
        w.move_to(ctx.pointer);
        Ok(w.into_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Interpreter, InterpreterConfig};

    fn context(target: Option<usize>) -> TemplateContext {
        TemplateContext {
            pointer: 0,
            scratch: 10,
            target,
            cell_width: CellWidth::Bits8,
        }
    }

    fn run(code: &str, input: &[u8]) -> String {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        interp.run(code, input).unwrap().output
    }

    #[test]
    fn test_default_templates() {
        let table = StdlibTable::new();
        assert_eq!(
            table.names(),
            vec![
                "Math.max",
                "Math.min",
                "console.log",
                "process.stdout.write",
                "prompt"
            ]
        );
        assert!(StdlibTable::empty().is_empty());
    }

    #[test]
    fn test_print_template() {
        let table = StdlibTable::new();
        let code = table
            .render(
                "console.log",
                &context(None),
                &[ResolvedOperand::Literal(Value::Str("Hi".into()))],
            )
            .unwrap()
            .unwrap();
        assert_eq!(run(&code, b""), "Hi");
    }

    #[test]
    fn test_min_max_templates() {
        let table = StdlibTable::new();
        let args = [
            ResolvedOperand::Literal(Value::Int(70)),
            ResolvedOperand::Literal(Value::Int(66)),
        ];
        let min = table.render("Math.min", &context(Some(1)), &args).unwrap().unwrap();
        let max = table.render("Math.max", &context(Some(2)), &args).unwrap().unwrap();
        let code = format!("{}{}>.>.", min, max);
        assert_eq!(run(&code, b""), "BF");
    }

    #[test]
    fn test_arity_is_checked() {
        let table = StdlibTable::new();
        let result = table
            .render("Math.max", &context(Some(1)), &[ResolvedOperand::Literal(Value::Int(1))])
            .unwrap();
        assert!(result.is_err());
        assert!(table.render("Math.floor", &context(None), &[]).is_none());
    }

    #[test]
    fn test_prompt_reads_input() {
        let table = StdlibTable::new();
        let code = table.render("prompt", &context(Some(1)), &[]).unwrap().unwrap();
        assert_eq!(run(&format!("{}>.", code), b"Z"), "Z");
    }
}
