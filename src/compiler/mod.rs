//! # tapescript Compiler - JavaScript subset to tape code
//!
//! This module compiles line-oriented JavaScript programs to extended tape
//! code, and optionally strips that code down to the eight base symbols.
//!
//! ## Architecture
//!
//! ```text
//! Source → Syntax tree → IR (MemoryPlanner) → Optimize → Extended tape code → Base tape code
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use tapescript::compiler::{Compiler, CompileOptions};
//!
//! let compiler = Compiler::new(CompileOptions::default());
//! let result = compiler.compile("console.log(\"A\")")?;
//! println!("{}", result.code);
//! ```

mod context;
pub mod debug;
mod emitter;
pub mod ir;
mod memory;
mod optimizer;
mod stdlib;
mod tape;

pub use context::CompilationContext;
pub use debug::{dump_allocations, dump_ir, format_instruction};
pub use emitter::{strip, Emitter};
pub use ir::{Instruction, IrLowerer, IrProgram, Operand, Value};
pub use memory::{
    relocate_address, GcReport, MemoryAllocation, MemoryModel, MemoryPlanner, PlannerConfig,
    PlannerStats, Relocation, GC_INTERVAL_SECS, GLOBALS_BASE, HEAP_BASE, ROOT_SCOPE,
};
pub use optimizer::{Optimizer, INLINE_THRESHOLD, MAX_OPT_LEVEL};
pub use stdlib::{ResolvedOperand, StdlibTable, StdlibTemplate, TemplateContext};
pub use tape::{
    sanitize, Scratch, TapeWriter, BASE_SYMBOLS, NEGATE_EXPANSION, SCRATCH_CELLS, SIGILS,
};

use crate::error::{Error, Result};
use crate::parser;
use crate::runtime::{CellWidth, Execution, Interpreter, InterpreterConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Level of the per-stage summary event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `trace!`
    Trace,
    /// `debug!`
    Debug,
    /// `info!`
    #[default]
    Info,
    /// `warn!`
    Warn,
    /// `error!`
    Error,
}

/// Compilation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Optimization level (0-4)
    pub opt_level: u8,
    /// Allocation policy
    pub memory_model: MemoryModel,
    /// Tape cells available to the program, scratch and flags
    pub memory_size: usize,
    /// Cell width literals are encoded for
    pub cell_width: CellWidth,
    /// Expand known library calls from the template table
    pub include_stdlib: bool,
    /// Keep extension sigils; when false the stripped code is also returned
    pub allow_extensions: bool,
    /// Run the garbage collector during allocation
    pub gc_enabled: bool,
    /// Utilization above which a collection runs
    pub gc_threshold: f64,
    /// Level of the per-stage summary event
    pub log_level: LogLevel,
}

impl Default for CompileOptions {
    fn default() -> Self {
        let planner = PlannerConfig::default();
        Self {
            opt_level: 2,
            memory_model: planner.model,
            memory_size: planner.memory_size,
            cell_width: CellWidth::default(),
            include_stdlib: true,
            allow_extensions: true,
            gc_enabled: planner.gc_enabled,
            gc_threshold: planner.gc_threshold,
            log_level: LogLevel::default(),
        }
    }
}

impl CompileOptions {
    /// Options from a JSON object; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: CompileOptions = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfiguration(format!("compile options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Rejects out-of-range levels and invalid planner settings
    pub fn validate(&self) -> Result<()> {
        if self.opt_level > MAX_OPT_LEVEL {
            return Err(Error::InvalidConfiguration(format!(
                "optimization level must be 0-{}, got {}",
                MAX_OPT_LEVEL, self.opt_level
            )));
        }
        self.planner_config().validate()
    }

    /// Planner settings taken from these options
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            model: self.memory_model,
            memory_size: self.memory_size,
            gc_enabled: self.gc_enabled,
            gc_threshold: self.gc_threshold,
        }
    }

    /// Interpreter settings matching the emitted code
    pub fn interpreter_config(&self) -> InterpreterConfig {
        InterpreterConfig {
            tape_size: self.memory_size,
            cell_width: self.cell_width,
            ..InterpreterConfig::default()
        }
    }
}

/// Per-run measurements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileStats {
    /// Parse time in microseconds
    pub parse_us: u64,
    /// Lowering time in microseconds
    pub lower_us: u64,
    /// Optimization time in microseconds
    pub optimize_us: u64,
    /// Emission time in microseconds
    pub emit_us: u64,
    /// Syntax tree nodes
    pub node_count: usize,
    /// IR instructions after lowering
    pub instructions_before: usize,
    /// IR instructions after optimization
    pub instructions_after: usize,
    /// Rewrites and annotations applied by the optimizer
    pub optimizations: usize,
    /// Extended code length in characters
    pub extended_size: usize,
    /// Stripped code length in characters
    pub base_size: usize,
    /// `extended_size / base_size`
    pub compression_ratio: f64,
    /// Garbage collections during lowering
    pub gc_runs: usize,
}

impl CompileStats {
    /// Stats as a JSON object
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Run id shared by every log event of the run
    pub run_id: Uuid,
    /// Extended tape code
    pub code: String,
    /// Base tape code, when extensions are disallowed
    pub stripped: Option<String>,
    /// Optimized IR
    pub ir: IrProgram,
    /// Warnings from every stage
    pub warnings: Vec<String>,
    /// Measurements
    pub stats: CompileStats,
}

impl CompileResult {
    /// The code to execute: stripped when extensions are disallowed
    pub fn output_code(&self) -> &str {
        self.stripped.as_deref().unwrap_or(&self.code)
    }
}

/// JavaScript subset to tape code compiler
#[derive(Debug, Clone)]
pub struct Compiler {
    options: CompileOptions,
    stdlib: StdlibTable,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        let stdlib = if options.include_stdlib && cfg!(feature = "stdlib") {
            StdlibTable::new()
        } else {
            StdlibTable::empty()
        };
        Self { options, stdlib }
    }

    /// Compiler with a caller-supplied template table
    pub fn with_stdlib(options: CompileOptions, stdlib: StdlibTable) -> Self {
        Self { options, stdlib }
    }

    /// Active options
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Active template table
    pub fn stdlib(&self) -> &StdlibTable {
        &self.stdlib
    }

    /// Compile source text to tape code
    pub fn compile(&self, source: &str) -> Result<CompileResult> {
        self.options.validate()?;

        let mut ctx = CompilationContext::new();
        let run_id = ctx.run_id();
        let span = tracing::info_span!("compile", run_id = %run_id);
        let _enter = span.enter();
        let mut stats = CompileStats::default();

        // Phase 1: Parse
        let started = Instant::now();
        let ast = parser::parse(source)?;
        stats.parse_us = elapsed_us(started);
        stats.node_count = ast.node_count();
        for warning in &ast.warnings {
            ctx.warn(format!("line {}: {}", warning.line, warning.message));
        }

        // Phase 2: Lower, allocating through a fresh planner
        let started = Instant::now();
        let mut planner = MemoryPlanner::new(self.options.planner_config())?;
        let mut ir = IrLowerer::new(&mut planner, &mut ctx).lower(&ast)?;
        for warning in planner.warnings() {
            ctx.warn(warning.clone());
        }
        stats.lower_us = elapsed_us(started);
        stats.instructions_before = ir.len();
        stats.gc_runs = planner.stats().gc_runs;

        // Phase 3: Optimize
        let started = Instant::now();
        if self.options.opt_level > 0 {
            let mut optimizer = Optimizer::new(self.options.opt_level);
            optimizer.optimize(&mut ir, &mut ctx);
        }
        stats.optimize_us = elapsed_us(started);
        stats.instructions_after = ir.len();
        stats.optimizations = ctx.optimizations();

        // Phase 4: Emit
        let started = Instant::now();
        let emitter = Emitter::new(&self.stdlib, self.options.cell_width, self.options.memory_size);
        let code = emitter.emit(&ir, &planner, &mut ctx)?;
        let base = strip(&code);
        stats.emit_us = elapsed_us(started);
        stats.extended_size = code.chars().count();
        stats.base_size = base.len();
        stats.compression_ratio = if stats.base_size == 0 {
            0.0
        } else {
            stats.extended_size as f64 / stats.base_size as f64
        };

        log_summary(self.options.log_level, &stats);

        Ok(CompileResult {
            run_id,
            code,
            stripped: (!self.options.allow_extensions).then_some(base),
            ir,
            warnings: ctx.take_warnings(),
            stats,
        })
    }

    /// Compile independent sources in parallel, one context per run
    pub fn compile_many(&self, sources: &[&str]) -> Vec<Result<CompileResult>> {
        sources.par_iter().map(|source| self.compile(source)).collect()
    }

    /// Compile `source` and execute it with `input`
    pub fn run(&self, source: &str, input: &[u8]) -> Result<Execution> {
        let result = self.compile(source)?;
        let mut interpreter = Interpreter::new(self.options.interpreter_config());
        interpreter.run(result.output_code(), input)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn log_summary(level: LogLevel, stats: &CompileStats) {
    macro_rules! summary {
        ($mac:ident) => {
            tracing::$mac!(
                nodes = stats.node_count,
                before = stats.instructions_before,
                after = stats.instructions_after,
                optimizations = stats.optimizations,
                extended = stats.extended_size,
                base = stats.base_size,
                "compiled in {}us (parse {}us, lower {}us, optimize {}us, emit {}us)",
                stats.parse_us + stats.lower_us + stats.optimize_us + stats.emit_us,
                stats.parse_us,
                stats.lower_us,
                stats.optimize_us,
                stats.emit_us
            )
        };
    }
    match level {
        LogLevel::Trace => summary!(trace),
        LogLevel::Debug => summary!(debug),
        LogLevel::Info => summary!(info),
        LogLevel::Warn => summary!(warn),
        LogLevel::Error => summary!(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json() {
        let options = CompileOptions::from_json(
            r#"{"opt_level": 3, "memory_model": "HYBRID", "cell_width": 16}"#,
        )
        .unwrap();
        assert_eq!(options.opt_level, 3);
        assert_eq!(options.memory_model, MemoryModel::Hybrid);
        assert_eq!(options.cell_width, CellWidth::Bits16);
        assert_eq!(options.memory_size, 30_000);
        assert!(options.include_stdlib);

        assert!(CompileOptions::from_json(r#"{"opt_level": 9}"#).is_err());
        assert!(CompileOptions::from_json(r#"{"gc_threshold": 2.0}"#).is_err());
    }

    #[test]
    fn test_compile_prints_char() {
        let compiler = Compiler::default();
        let result = compiler.compile("console.log(\"A\")").unwrap();
        let execution = compiler.run("console.log(\"A\")", b"").unwrap();
        assert_eq!(execution.output, "A");
        assert!(result.stripped.is_none());
        assert!(result.stats.extended_size >= result.stats.base_size);
    }

    #[test]
    fn test_disallowed_extensions_strip_output() {
        let compiler = Compiler::new(CompileOptions {
            allow_extensions: false,
            ..Default::default()
        });
        let result = compiler.compile("let x = -3\nconsole.log(x)").unwrap();
        let stripped = result.stripped.as_deref().unwrap();
        assert!(stripped.chars().all(|c| BASE_SYMBOLS.contains(&c)));
        assert_eq!(
            compiler.run("let x = -3\nconsole.log(x)", b"").unwrap().output_cells,
            vec![253]
        );
    }

    #[test]
    fn test_stats_serialize() {
        let result = Compiler::default().compile("let x = 1 + 2").unwrap();
        let json = result.stats.to_json().unwrap();
        assert!(json.contains("\"node_count\""));
        assert!(json.contains("\"compression_ratio\""));
    }

    #[test]
    fn test_compile_many_uses_separate_runs() {
        let compiler = Compiler::default();
        let results = compiler.compile_many(&["console.log(\"a\")", "let = ", "console.log(\"b\")"]);
        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().unwrap();
        let third = results[2].as_ref().unwrap();
        assert_ne!(first.run_id, third.run_id);
    }

    #[test]
    fn test_without_stdlib_uses_builtin_printer() {
        let compiler = Compiler::new(CompileOptions {
            include_stdlib: false,
            ..Default::default()
        });
        assert!(compiler.stdlib().is_empty());
        assert_eq!(compiler.run("console.log(\"ok\")", b"").unwrap().output, "ok");
    }
}
