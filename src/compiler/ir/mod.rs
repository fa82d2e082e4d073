//! # Intermediate Representation (IR) for tapescript Compilation
//!
//! The syntax tree is lowered to a flat list of cell-addressed instructions,
//! which the optimizer rewrites in place and the emitter turns into tape text.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── instruction.rs  # Value, Operand, UpdateOp, Instruction enum, literal folding
//! ├── program.rs      # VariableInfo, FunctionInfo, IrProgram
//! └── lowering.rs     # IrLowerer (syntax tree + MemoryPlanner -> IrProgram)
//! ```
//!
//! ## Key Types
//!
//! - [`Instruction`] - One case per instruction kind, each with only its own fields
//! - [`Operand`] - Literal value or a run of cells
//! - [`IrProgram`] - Instructions plus variable and function symbol tables
//! - [`IrLowerer`] - Depth-first tree walker that allocates through the planner
//!
//! ## Control-flow shapes
//!
//! | Construct | Lowered form |
//! |-----------|--------------|
//! | `if` | `IfCondition(c, else)` then `Jump(end)` `Label(else)` else `Label(end)` |
//! | `for` | init `Label(test)` test `ConditionalJump(c, end)` body `Label(update)` update `Jump(test)` `Label(end)` |

mod instruction;
mod lowering;
mod program;

pub use instruction::{fold_binary, Instruction, Operand, UpdateOp, Value};
pub use lowering::{IrLowerer, PRINT_CALLEE};
pub use program::{FunctionInfo, IrProgram, VariableInfo};
