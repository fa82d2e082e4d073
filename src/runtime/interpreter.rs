//! Tape machine interpreter
//!
//! Runs base or extended tape text on a fixed-size tape. `~` negates the
//! current cell; every character that is neither a base symbol nor `~` is
//! ignored. Execution is bounded by an operation ceiling.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of tape cells
pub const DEFAULT_TAPE_SIZE: usize = 30_000;

/// Default operation ceiling
pub const DEFAULT_MAX_OPERATIONS: u64 = 100_000_000;

/// Width of one tape cell. Cell arithmetic wraps modulo `2^bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CellWidth {
    /// 8-bit cells
    #[default]
    Bits8,
    /// 16-bit cells
    Bits16,
    /// 32-bit cells
    Bits32,
}

impl CellWidth {
    /// Bits per cell
    pub fn bits(self) -> u32 {
        match self {
            CellWidth::Bits8 => 8,
            CellWidth::Bits16 => 16,
            CellWidth::Bits32 => 32,
        }
    }

    /// Number of distinct cell values
    pub fn modulus(self) -> u64 {
        1u64 << self.bits()
    }

    /// `n` reduced into `0..modulus`
    pub fn wrap(self, n: i64) -> u64 {
        n.rem_euclid(self.modulus() as i64) as u64
    }
}

impl TryFrom<u32> for CellWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(CellWidth::Bits8),
            16 => Ok(CellWidth::Bits16),
            32 => Ok(CellWidth::Bits32),
            other => Err(Error::InvalidConfiguration(format!(
                "cell width must be 8, 16 or 32 bits, got {}",
                other
            ))),
        }
    }
}

impl From<CellWidth> for u32 {
    fn from(width: CellWidth) -> u32 {
        width.bits()
    }
}

/// What happens when the pointer leaves the tape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerMode {
    /// Wrap to the other end
    #[default]
    Wrap,
    /// Fail with [`Error::PointerOutOfBounds`]
    Strict,
}

/// Interpreter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Number of cells
    pub tape_size: usize,
    /// Cell width
    pub cell_width: CellWidth,
    /// Executed operations before the run is halted
    pub max_operations: u64,
    /// Out-of-range pointer behaviour
    pub pointer_mode: PointerMode,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            tape_size: DEFAULT_TAPE_SIZE,
            cell_width: CellWidth::default(),
            max_operations: DEFAULT_MAX_OPERATIONS,
            pointer_mode: PointerMode::default(),
        }
    }
}

impl InterpreterConfig {
    /// Rejects empty tapes and a zero ceiling
    pub fn validate(&self) -> Result<()> {
        if self.tape_size == 0 {
            return Err(Error::InvalidConfiguration(
                "tape size must be at least 1".to_string(),
            ));
        }
        if self.max_operations == 0 {
            return Err(Error::InvalidConfiguration(
                "operation limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Output as text, with the halt marker appended when the ceiling was hit
    pub output: String,
    /// Raw output cell values
    pub output_cells: Vec<u64>,
    /// Operations executed
    pub operations: u64,
    /// Whether the operation ceiling stopped the run
    pub halted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    symbol: char,
    position: usize,
}

/// Tape machine
#[derive(Debug, Clone)]
pub struct Interpreter {
    config: InterpreterConfig,
    tape: Vec<u64>,
    pointer: usize,
}

impl Interpreter {
    /// Interpreter with a zeroed tape
    pub fn new(config: InterpreterConfig) -> Self {
        let tape = vec![0; config.tape_size.max(1)];
        Interpreter {
            config,
            tape,
            pointer: 0,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Tape contents after the last run
    pub fn tape(&self) -> &[u64] {
        &self.tape
    }

    /// Pointer position after the last run
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Runs `code` from a zeroed tape. Bracket mismatches are reported before
    /// anything executes.
    pub fn run(&mut self, code: &str, input: &[u8]) -> Result<Execution> {
        self.config.validate()?;

        let ops: Vec<Op> = code
            .chars()
            .enumerate()
            .filter(|(_, c)| matches!(c, '+' | '-' | '<' | '>' | '[' | ']' | '.' | ',' | '~'))
            .map(|(position, symbol)| Op { symbol, position })
            .collect();
        let jumps = bracket_table(&ops)?;

        self.tape.iter_mut().for_each(|cell| *cell = 0);
        self.pointer = 0;

        let width = self.config.cell_width;
        let modulus = width.modulus();
        let size = self.tape.len();
        let mut input = input.iter();
        let mut output_cells = Vec::new();
        let mut operations = 0u64;
        let mut halted = false;
        let mut pc = 0;

        while pc < ops.len() {
            if operations >= self.config.max_operations {
                halted = true;
                break;
            }
            operations += 1;

            let op = ops[pc];
            match op.symbol {
                '+' => {
                    let cell = &mut self.tape[self.pointer];
                    *cell = (*cell + 1) % modulus;
                }
                '-' => {
                    let cell = &mut self.tape[self.pointer];
                    *cell = (*cell + modulus - 1) % modulus;
                }
                '~' => {
                    let cell = &mut self.tape[self.pointer];
                    *cell = (modulus - *cell) % modulus;
                }
                '>' => {
                    self.pointer = if self.pointer + 1 < size {
                        self.pointer + 1
                    } else {
                        self.out_of_bounds(op.position, 0)?
                    };
                }
                '<' => {
                    self.pointer = if self.pointer > 0 {
                        self.pointer - 1
                    } else {
                        self.out_of_bounds(op.position, size - 1)?
                    };
                }
                '.' => output_cells.push(self.tape[self.pointer]),
                ',' => {
                    self.tape[self.pointer] = input
                        .next()
                        .map(|&byte| u64::from(byte) % modulus)
                        .unwrap_or(0);
                }
                '[' => {
                    if self.tape[self.pointer] == 0 {
                        pc = jumps[pc];
                    }
                }
                ']' => {
                    if self.tape[self.pointer] != 0 {
                        pc = jumps[pc];
                    }
                }
                _ => {}
            }
            pc += 1;
        }

        let mut output: String = output_cells.iter().map(|&v| cell_char(v)).collect();
        if halted {
            tracing::warn!(
                "halted after {} operation(s) at op {} of {}",
                operations,
                pc,
                ops.len()
            );
            output.push_str(&format!(
                "[halted: operation limit {} reached]",
                self.config.max_operations
            ));
        }
        tracing::debug!(
            "executed {} operation(s), {} output cell(s)",
            operations,
            output_cells.len()
        );

        Ok(Execution {
            output,
            output_cells,
            operations,
            halted,
        })
    }

    /// Runs `code` and returns its output, or `Error: ...` when the run faults
    pub fn run_to_string(&mut self, code: &str, input: &[u8]) -> String {
        match self.run(code, input) {
            Ok(execution) => execution.output,
            Err(e) => format!("Error: {}", e),
        }
    }

    fn out_of_bounds(&self, position: usize, wrapped: usize) -> Result<usize> {
        match self.config.pointer_mode {
            PointerMode::Wrap => Ok(wrapped),
            PointerMode::Strict => Err(Error::PointerOutOfBounds {
                position,
                tape_size: self.tape.len(),
            }),
        }
    }
}

/// Matching bracket index for every bracket, built with an explicit stack
fn bracket_table(ops: &[Op]) -> Result<Vec<usize>> {
    let mut jumps = vec![0; ops.len()];
    let mut open = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        match op.symbol {
            '[' => open.push(i),
            ']' => {
                let start = open.pop().ok_or(Error::UnmatchedBracket {
                    bracket: ']',
                    position: op.position,
                })?;
                jumps[start] = i;
                jumps[i] = start;
            }
            _ => {}
        }
    }
    if let Some(&start) = open.last() {
        return Err(Error::UnmatchedBracket {
            bracket: '[',
            position: ops[start].position,
        });
    }
    Ok(jumps)
}

fn cell_char(value: u64) -> char {
    u32::try_from(value)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}
