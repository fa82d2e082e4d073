//! Per-run compilation state
//!
//! Every counter a compilation needs lives here so that independent runs
//! share nothing mutable.

use uuid::Uuid;

/// Counters and diagnostics for one compilation run
#[derive(Debug, Clone)]
pub struct CompilationContext {
    run_id: Uuid,
    label_counter: usize,
    function_counter: u32,
    temp_counter: usize,
    optimizations: usize,
    warnings: Vec<String>,
}

impl CompilationContext {
    /// Fresh context with a random run id
    pub fn new() -> Self {
        CompilationContext {
            run_id: Uuid::new_v4(),
            label_counter: 0,
            function_counter: 0,
            temp_counter: 0,
            optimizations: 0,
            warnings: Vec::new(),
        }
    }

    /// Identifier attached to this run's log span
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next label suffix; one suffix is shared by all labels of a construct
    pub fn next_label_id(&mut self) -> usize {
        let id = self.label_counter;
        self.label_counter += 1;
        id
    }

    /// Next function id, starting at 1
    pub fn next_function_id(&mut self) -> u32 {
        self.function_counter += 1;
        self.function_counter
    }

    /// Next temporary name (`__tmp_N`)
    pub fn next_temp(&mut self) -> String {
        let name = format!("__tmp_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Counts applied optimizations
    pub fn record_optimizations(&mut self, count: usize) {
        self.optimizations += count;
    }

    /// Optimizations applied so far
    pub fn optimizations(&self) -> usize {
        self.optimizations
    }

    /// Records a non-fatal diagnostic
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(run_id = %self.run_id, "{}", message);
        self.warnings.push(message);
    }

    /// Diagnostics recorded so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Moves the diagnostics out
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

impl Default for CompilationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_context() {
        let mut a = CompilationContext::new();
        let mut b = CompilationContext::new();
        assert_eq!(a.next_label_id(), 0);
        assert_eq!(a.next_label_id(), 1);
        assert_eq!(b.next_label_id(), 0);
        assert_eq!(a.next_function_id(), 1);
        assert_eq!(a.next_temp(), "__tmp_0");
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut ctx = CompilationContext::new();
        ctx.warn("first");
        ctx.warn(String::from("second"));
        assert_eq!(ctx.warnings().len(), 2);
        assert_eq!(ctx.take_warnings(), vec!["first", "second"]);
        assert!(ctx.warnings().is_empty());
    }
}
