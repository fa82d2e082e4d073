//! Symbolic-address memory planner
//!
//! Hands out tape addresses to identifiers under one of four allocation
//! policies, tracks liveness by scope, and reclaims space with a
//! mark/sweep collector that compacts the bump regions of the DYNAMIC and
//! HYBRID policies.
//!
//! # Address layout
//!
//! ```text
//! STATIC / DYNAMIC   [0 ............................................ size)
//!                     bump →
//! HYBRID             [0 ..... 1024)[1024 ........................... size)
//!                     ≤2 cells →    larger requests →
//! SEGMENTED          [0 .. 512)[512 .. 1024)[1024 ..................... size)
//!                     stack     globals      heap
//! ```
//!
//! Allocations in the root scope of a SEGMENTED planner live in the globals
//! region and nested scopes use the stack; when either region is full the
//! request is redirected to the heap.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// First heap cell of the HYBRID and SEGMENTED policies
pub const HEAP_BASE: usize = 1024;
/// First globals cell of the SEGMENTED policy (end of the stack region)
pub const GLOBALS_BASE: usize = 512;
/// Tag of the scope every planner starts in
pub const ROOT_SCOPE: &str = "global";
/// A collection is due once this many seconds pass without one
pub const GC_INTERVAL_SECS: i64 = 10;

/// Allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryModel {
    /// Single bump pointer, never compacted
    Static,
    /// Single bump pointer, compacted after each sweep
    #[default]
    Dynamic,
    /// Small requests bump from 0, larger ones from the heap base
    Hybrid,
    /// Fixed stack, globals and heap regions
    Segmented,
}

impl MemoryModel {
    /// Whether sweeps are followed by compaction
    pub fn compacts(self) -> bool {
        matches!(self, MemoryModel::Dynamic | MemoryModel::Hybrid)
    }
}

/// Planner construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Allocation policy
    pub model: MemoryModel,
    /// Tape cells available
    pub memory_size: usize,
    /// Whether threshold/interval collections run
    pub gc_enabled: bool,
    /// Active-bytes fraction above which a collection runs
    pub gc_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            model: MemoryModel::Dynamic,
            memory_size: 30_000,
            gc_enabled: true,
            gc_threshold: 0.75,
        }
    }
}

impl PlannerConfig {
    /// Rejects sizes and thresholds the policies cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.memory_size == 0 {
            return Err(Error::InvalidConfiguration(
                "memory size must be at least one cell".to_string(),
            ));
        }
        if matches!(self.model, MemoryModel::Hybrid | MemoryModel::Segmented)
            && self.memory_size <= HEAP_BASE
        {
            return Err(Error::InvalidConfiguration(format!(
                "{:?} memory model needs more than {} cells, got {}",
                self.model, HEAP_BASE, self.memory_size
            )));
        }
        if !(self.gc_threshold > 0.0 && self.gc_threshold <= 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "gc threshold must be in (0, 1], got {}",
                self.gc_threshold
            )));
        }
        Ok(())
    }
}

/// One identifier's block of cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAllocation {
    /// Identifier the block belongs to
    pub identifier: String,
    /// First cell
    pub address: usize,
    /// Number of cells
    pub size: usize,
    /// Cleared by scope exit and deallocation
    pub is_active: bool,
    /// Last allocation request or reference change
    pub last_accessed: DateTime<Utc>,
    /// Tag of the scope that owns the block
    pub scope: String,
    /// Outstanding references
    pub reference_count: usize,
}

impl MemoryAllocation {
    /// One past the last cell
    pub fn end(&self) -> usize {
        self.address + self.size
    }

    /// Whether two blocks share a cell
    pub fn overlaps(&self, other: &MemoryAllocation) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

/// A block moved by compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Old first cell
    pub from: usize,
    /// New first cell
    pub to: usize,
    /// Cells moved
    pub size: usize,
}

impl Relocation {
    /// New address of `address` if it lies inside the moved block
    pub fn apply(&self, address: usize) -> Option<usize> {
        if address >= self.from && address < self.from + self.size {
            Some(self.to + (address - self.from))
        } else {
            None
        }
    }
}

/// Rewrites an address through a batch of relocations recorded by one sweep
pub fn relocate_address(relocations: &[Relocation], address: usize) -> usize {
    relocations
        .iter()
        .find_map(|r| r.apply(address))
        .unwrap_or(address)
}

/// Outcome of one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Allocations removed
    pub collected: usize,
    /// Cells those allocations held
    pub freed_cells: usize,
    /// Blocks moved by compaction
    pub relocated: usize,
    /// Whether the pass was forced by an overflowing request
    pub forced: bool,
}

/// Planner counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerStats {
    /// Allocations currently active
    pub active_count: usize,
    /// Cells held by allocations not yet swept
    pub active_bytes: usize,
    /// Allocations ever created
    pub total_allocations: usize,
    /// Collections run
    pub gc_runs: usize,
    /// One past the highest cell ever handed out
    pub high_water_mark: usize,
    /// `active_bytes / memory_size`
    pub utilization: f64,
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    tag: String,
    stack_mark: usize,
}

/// Symbolic-address allocator with scope liveness and mark/sweep collection
#[derive(Debug)]
pub struct MemoryPlanner {
    config: PlannerConfig,
    allocations: BTreeMap<u64, MemoryAllocation>,
    /// Live bindings per identifier, innermost last
    index: HashMap<String, Vec<u64>>,
    next_id: u64,
    scopes: Vec<ScopeFrame>,
    scope_counter: usize,
    /// STATIC/DYNAMIC bump pointer, HYBRID small region
    pointer: usize,
    heap_pointer: usize,
    globals_pointer: usize,
    stack_pointer: usize,
    active_count: usize,
    active_bytes: usize,
    total_allocations: usize,
    high_water: usize,
    last_gc: DateTime<Utc>,
    gc_runs: usize,
    pending_relocations: Vec<Relocation>,
    warnings: Vec<String>,
}

impl MemoryPlanner {
    /// Creates a planner, rejecting invalid configurations
    pub fn new(config: PlannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(MemoryPlanner {
            config,
            allocations: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 0,
            scopes: vec![ScopeFrame {
                tag: ROOT_SCOPE.to_string(),
                stack_mark: 0,
            }],
            scope_counter: 0,
            pointer: 0,
            heap_pointer: HEAP_BASE,
            globals_pointer: GLOBALS_BASE,
            stack_pointer: 0,
            active_count: 0,
            active_bytes: 0,
            total_allocations: 0,
            high_water: 0,
            last_gc: Utc::now(),
            gc_runs: 0,
            pending_relocations: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Planner with the given policy and size and default collector settings
    pub fn with_model(model: MemoryModel, memory_size: usize) -> Result<Self> {
        MemoryPlanner::new(PlannerConfig {
            model,
            memory_size,
            ..PlannerConfig::default()
        })
    }

    /// Returns the address of `identifier`, allocating `size` cells on first use
    pub fn allocate(&mut self, identifier: &str, size: usize) -> Result<usize> {
        let size = size.max(1);

        let scope = self.current_scope().to_string();
        if let Some(alloc) = self.active_mut(identifier).filter(|a| a.scope == scope) {
            alloc.last_accessed = Utc::now();
            return Ok(alloc.address);
        }

        let address = self.reserve(identifier, size)?;
        let id = self.record(identifier, address, size, scope);
        self.index.entry(identifier.to_string()).or_default().push(id);

        tracing::trace!(
            "allocated '{}' at {} ({} cell(s), scope {})",
            identifier,
            address,
            size,
            self.current_scope()
        );
        Ok(address)
    }

    /// Moves `identifier`'s visible allocation to a block of `size` cells
    /// owned by the same scope. The old block is released first, so a
    /// collection forced by the request may reclaim it. Returns the move;
    /// `None` when there is no active allocation or it is already big enough.
    pub fn resize(&mut self, identifier: &str, size: usize) -> Result<Option<Relocation>> {
        let Some(old) = self.allocation(identifier).cloned() else {
            return Ok(None);
        };
        if old.size >= size {
            return Ok(None);
        }
        let Some(old_id) = self.visible_id(identifier) else {
            return Ok(None);
        };
        let position = self.unbind(identifier, old_id);
        if let Some(alloc) = self.allocations.get_mut(&old_id) {
            alloc.is_active = false;
            alloc.reference_count = 0;
            self.active_count -= 1;
        }

        // Segmented stack blocks rewind with the innermost scope
        let address = if self.config.model == MemoryModel::Segmented
            && old.scope != self.current_scope()
        {
            bump(&mut self.heap_pointer, size, self.config.memory_size).ok_or_else(|| {
                Error::OutOfMemory {
                    identifier: identifier.to_string(),
                    requested: size,
                    memory_size: self.config.memory_size,
                }
            })?
        } else {
            self.reserve(identifier, size)?
        };
        let id = self.record(identifier, address, size, old.scope.clone());
        if let Some(alloc) = self.allocations.get_mut(&id) {
            alloc.reference_count = old.reference_count.max(1);
        }
        let stack = self.index.entry(identifier.to_string()).or_default();
        let position = position.map_or(stack.len(), |p| p.min(stack.len()));
        stack.insert(position, id);

        tracing::debug!(
            "resized '{}' from {} cell(s) at {} to {} cell(s) at {}",
            identifier,
            old.size,
            old.address,
            size,
            address
        );
        Ok(Some(Relocation {
            from: old.address,
            to: address,
            size: old.size,
        }))
    }

    /// Finds room for `size` cells, collecting first when due and once more,
    /// forced, when the request does not fit
    fn reserve(&mut self, identifier: &str, size: usize) -> Result<usize> {
        if self.gc_due(Utc::now()) {
            self.run_collection(false);
        }

        match self.place(size) {
            Some(address) => Ok(address),
            None => {
                tracing::debug!(
                    "allocation of {} cell(s) for '{}' overflows, forcing collection",
                    size,
                    identifier
                );
                self.run_collection(true);
                self.place(size).ok_or_else(|| Error::OutOfMemory {
                    identifier: identifier.to_string(),
                    requested: size,
                    memory_size: self.config.memory_size,
                })
            }
        }
    }

    fn record(&mut self, identifier: &str, address: usize, size: usize, scope: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(
            id,
            MemoryAllocation {
                identifier: identifier.to_string(),
                address,
                size,
                is_active: true,
                last_accessed: Utc::now(),
                scope,
                reference_count: 1,
            },
        );
        self.active_count += 1;
        self.active_bytes += size;
        self.total_allocations += 1;
        self.high_water = self.high_water.max(address + size);
        id
    }

    /// Deactivates `identifier`'s visible allocation, uncovering any binding
    /// it shadows. Returns whether one was active.
    pub fn deallocate(&mut self, identifier: &str) -> bool {
        let Some(id) = self.visible_id(identifier) else {
            return false;
        };
        self.unbind(identifier, id);
        match self.allocations.get_mut(&id) {
            Some(alloc) if alloc.is_active => {
                alloc.is_active = false;
                alloc.reference_count = 0;
                self.active_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Adds a reference to an active allocation
    pub fn add_reference(&mut self, identifier: &str) -> bool {
        match self.active_mut(identifier) {
            Some(alloc) => {
                alloc.reference_count += 1;
                alloc.last_accessed = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Drops a reference from an active allocation, saturating at zero
    pub fn remove_reference(&mut self, identifier: &str) -> bool {
        match self.active_mut(identifier) {
            Some(alloc) => {
                alloc.reference_count = alloc.reference_count.saturating_sub(1);
                alloc.last_accessed = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Opens a nested scope and returns its unique tag
    pub fn enter_scope(&mut self, name: &str) -> String {
        self.scope_counter += 1;
        let tag = format!("{}#{}", name, self.scope_counter);
        self.scopes.push(ScopeFrame {
            tag: tag.clone(),
            stack_mark: self.stack_pointer,
        });
        tracing::trace!("entered scope {}", tag);
        tag
    }

    /// Closes the innermost scope, deactivating exactly the allocations tagged
    /// with it. Returns how many were deactivated. Exiting the root scope
    /// changes nothing and records a warning.
    pub fn exit_scope(&mut self) -> usize {
        if self.scopes.len() <= 1 {
            let warning = "exit_scope called on the root scope; ignored".to_string();
            tracing::warn!("{}", warning);
            self.warnings.push(warning);
            return 0;
        }
        let Some(frame) = self.scopes.pop() else {
            return 0;
        };

        let mut closed = Vec::new();
        for (id, alloc) in self.allocations.iter_mut() {
            if alloc.is_active && alloc.scope == frame.tag {
                alloc.is_active = false;
                closed.push((alloc.identifier.clone(), *id));
            }
        }
        let deactivated = closed.len();
        for (identifier, id) in closed {
            self.unbind(&identifier, id);
        }
        self.active_count -= deactivated;

        if self.config.model == MemoryModel::Segmented {
            self.stack_pointer = frame.stack_mark;
        }

        tracing::debug!(
            "exited scope {} ({} allocation(s) deactivated)",
            frame.tag,
            deactivated
        );
        deactivated
    }

    /// Tag of the innermost scope
    pub fn current_scope(&self) -> &str {
        self.scopes
            .last()
            .map(|frame| frame.tag.as_str())
            .unwrap_or(ROOT_SCOPE)
    }

    /// Number of open scopes, the root included
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Runs one collection unconditionally
    pub fn collect_garbage(&mut self) -> GcReport {
        self.run_collection(false)
    }

    /// Whether a threshold or interval collection is due at `now`
    pub fn gc_due(&self, now: DateTime<Utc>) -> bool {
        if !self.config.gc_enabled {
            return false;
        }
        let ratio = self.active_bytes as f64 / self.config.memory_size as f64;
        ratio > self.config.gc_threshold
            || (now - self.last_gc).num_seconds() > GC_INTERVAL_SECS
    }

    fn run_collection(&mut self, forced: bool) -> GcReport {
        let mut report = GcReport {
            forced,
            ..GcReport::default()
        };

        // Mark: inactive or unreferenced
        let marked: Vec<u64> = self
            .allocations
            .iter()
            .filter(|(_, a)| !a.is_active || a.reference_count == 0)
            .map(|(id, _)| *id)
            .collect();

        // Sweep
        for id in marked {
            if let Some(alloc) = self.allocations.remove(&id) {
                if alloc.is_active {
                    self.active_count -= 1;
                }
                self.unbind(&alloc.identifier, id);
                self.active_bytes -= alloc.size;
                report.collected += 1;
                report.freed_cells += alloc.size;
            }
        }

        if self.config.model.compacts() {
            report.relocated = self.compact();
        }

        self.gc_runs += 1;
        self.last_gc = Utc::now();
        tracing::info!(
            "gc run {}: collected {} allocation(s), freed {} cell(s), relocated {}{}",
            self.gc_runs,
            report.collected,
            report.freed_cells,
            report.relocated,
            if forced { " (forced)" } else { "" }
        );
        report
    }

    fn compact(&mut self) -> usize {
        let mut live: Vec<(u64, usize)> = self
            .allocations
            .iter()
            .map(|(id, a)| (*id, a.address))
            .collect();
        live.sort_by_key(|&(id, address)| (address, id));

        let mut small_next = 0;
        let mut heap_next = HEAP_BASE;
        let mut moved = 0;
        for (id, _) in live {
            let Some(alloc) = self.allocations.get_mut(&id) else {
                continue;
            };
            let in_heap = self.config.model == MemoryModel::Hybrid && alloc.address >= HEAP_BASE;
            let next = if in_heap { &mut heap_next } else { &mut small_next };
            if alloc.address != *next {
                self.pending_relocations.push(Relocation {
                    from: alloc.address,
                    to: *next,
                    size: alloc.size,
                });
                alloc.address = *next;
                moved += 1;
            }
            *next += alloc.size;
        }

        self.pointer = small_next;
        if self.config.model == MemoryModel::Hybrid {
            self.heap_pointer = heap_next;
        }
        moved
    }

    fn place(&mut self, size: usize) -> Option<usize> {
        let memory_size = self.config.memory_size;
        match self.config.model {
            MemoryModel::Static | MemoryModel::Dynamic => {
                bump(&mut self.pointer, size, memory_size)
            }
            MemoryModel::Hybrid => {
                let small = if size <= 2 {
                    bump(&mut self.pointer, size, HEAP_BASE)
                } else {
                    None
                };
                small.or_else(|| bump(&mut self.heap_pointer, size, memory_size))
            }
            MemoryModel::Segmented => {
                let regional = if self.scopes.len() <= 1 {
                    bump(&mut self.globals_pointer, size, HEAP_BASE)
                } else {
                    bump(&mut self.stack_pointer, size, GLOBALS_BASE)
                };
                regional.or_else(|| bump(&mut self.heap_pointer, size, memory_size))
            }
        }
    }

    fn visible_id(&self, identifier: &str) -> Option<u64> {
        self.index.get(identifier)?.last().copied()
    }

    /// Removes one binding of `identifier`, returning its stack position
    fn unbind(&mut self, identifier: &str, id: u64) -> Option<usize> {
        let stack = self.index.get_mut(identifier)?;
        let position = stack.iter().rposition(|&bound| bound == id)?;
        stack.remove(position);
        if stack.is_empty() {
            self.index.remove(identifier);
        }
        Some(position)
    }

    fn active_mut(&mut self, identifier: &str) -> Option<&mut MemoryAllocation> {
        let id = self.visible_id(identifier)?;
        self.allocations.get_mut(&id).filter(|a| a.is_active)
    }

    /// Address of `identifier`'s active allocation
    pub fn address_of(&self, identifier: &str) -> Option<usize> {
        self.allocation(identifier).map(|a| a.address)
    }

    /// `identifier`'s active allocation
    pub fn allocation(&self, identifier: &str) -> Option<&MemoryAllocation> {
        let id = self.visible_id(identifier)?;
        self.allocations.get(&id).filter(|a| a.is_active)
    }

    /// Every allocation not yet swept, in creation order
    pub fn allocations(&self) -> impl Iterator<Item = &MemoryAllocation> {
        self.allocations.values()
    }

    /// Drains the relocations recorded by compaction since the last call
    pub fn take_relocations(&mut self) -> Vec<Relocation> {
        std::mem::take(&mut self.pending_relocations)
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Allocations currently active
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Cells held by allocations not yet swept
    pub fn active_bytes(&self) -> usize {
        self.active_bytes
    }

    /// One past the highest cell ever handed out
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Configured tape size
    pub fn memory_size(&self) -> usize {
        self.config.memory_size
    }

    /// Allocation policy
    pub fn model(&self) -> MemoryModel {
        self.config.model
    }

    /// Counter snapshot
    pub fn stats(&self) -> PlannerStats {
        PlannerStats {
            active_count: self.active_count,
            active_bytes: self.active_bytes,
            total_allocations: self.total_allocations,
            gc_runs: self.gc_runs,
            high_water_mark: self.high_water,
            utilization: self.active_bytes as f64 / self.config.memory_size as f64,
        }
    }
}

fn bump(pointer: &mut usize, size: usize, limit: usize) -> Option<usize> {
    let end = pointer.checked_add(size)?;
    if end > limit {
        return None;
    }
    let address = *pointer;
    *pointer = end;
    Some(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(model: MemoryModel) -> MemoryPlanner {
        MemoryPlanner::with_model(model, 30_000).unwrap()
    }

    #[test]
    fn test_bump_addresses_increase() {
        let mut mem = planner(MemoryModel::Static);
        assert_eq!(mem.allocate("a", 1).unwrap(), 0);
        assert_eq!(mem.allocate("b", 3).unwrap(), 1);
        assert_eq!(mem.allocate("c", 1).unwrap(), 4);
        assert_eq!(mem.allocate("b", 3).unwrap(), 1);
        assert_eq!(mem.active_count(), 3);
        assert_eq!(mem.active_bytes(), 5);
    }

    #[test]
    fn test_hybrid_regions() {
        let mut mem = planner(MemoryModel::Hybrid);
        assert_eq!(mem.allocate("flag", 1).unwrap(), 0);
        assert_eq!(mem.allocate("pair", 2).unwrap(), 1);
        assert_eq!(mem.allocate("text", 5).unwrap(), HEAP_BASE);
        assert_eq!(mem.allocate("next", 1).unwrap(), 3);
    }

    #[test]
    fn test_segmented_regions() {
        let mut mem = planner(MemoryModel::Segmented);
        assert_eq!(mem.allocate("g", 1).unwrap(), GLOBALS_BASE);
        mem.enter_scope("block");
        assert_eq!(mem.allocate("local", 2).unwrap(), 0);
        mem.exit_scope();
        mem.enter_scope("block");
        // stack pointer rewinds on exit
        assert_eq!(mem.allocate("other", 1).unwrap(), 0);
        mem.exit_scope();
        assert_eq!(mem.allocate("big", 600).unwrap(), HEAP_BASE);
    }

    #[test]
    fn test_exit_scope_deactivates_only_its_allocations() {
        let mut mem = planner(MemoryModel::Dynamic);
        mem.allocate("outer", 1).unwrap();
        mem.enter_scope("f");
        mem.allocate("x", 1).unwrap();
        mem.allocate("y", 1).unwrap();
        assert_eq!(mem.active_count(), 3);

        assert_eq!(mem.exit_scope(), 2);
        assert_eq!(mem.active_count(), 1);
        assert!(mem.address_of("x").is_none());
        assert_eq!(mem.address_of("outer"), Some(0));
    }

    #[test]
    fn test_nested_same_name_shadows_outer() {
        let mut mem = planner(MemoryModel::Dynamic);
        assert_eq!(mem.allocate("x", 1).unwrap(), 0);
        mem.enter_scope("if");
        let inner = mem.allocate("x", 1).unwrap();
        assert_eq!(inner, 1);
        // same scope reuses the shadowing binding
        assert_eq!(mem.allocate("x", 1).unwrap(), inner);
        assert_eq!(mem.address_of("x"), Some(inner));
        assert_eq!(mem.active_count(), 2);

        assert_eq!(mem.exit_scope(), 1);
        assert_eq!(mem.address_of("x"), Some(0));
        assert_eq!(mem.allocate("x", 1).unwrap(), 0);
    }

    #[test]
    fn test_deallocate_uncovers_shadowed_binding() {
        let mut mem = planner(MemoryModel::Static);
        mem.allocate("x", 1).unwrap();
        mem.enter_scope("f");
        mem.allocate("x", 1).unwrap();
        assert!(mem.deallocate("x"));
        assert_eq!(mem.address_of("x"), Some(0));
        assert!(mem.deallocate("x"));
        assert!(!mem.deallocate("x"));
    }

    #[test]
    fn test_resize_keeps_owning_scope() {
        let mut mem = planner(MemoryModel::Static);
        mem.allocate("s", 1).unwrap();
        mem.allocate("t", 1).unwrap();
        mem.enter_scope("for");

        let moved = mem.resize("s", 2).unwrap();
        assert_eq!(
            moved,
            Some(Relocation {
                from: 0,
                to: 2,
                size: 1
            })
        );
        assert_eq!(mem.allocation("s").map(|a| a.size), Some(2));
        assert_eq!(mem.resize("s", 2).unwrap(), None);
        assert_eq!(mem.resize("missing", 4).unwrap(), None);

        // still alive once the loop scope closes
        assert_eq!(mem.exit_scope(), 0);
        assert_eq!(mem.address_of("s"), Some(2));
        assert_eq!(mem.active_count(), 2);
    }

    #[test]
    fn test_resize_of_shadowed_binding_keeps_stack_order() {
        let mut mem = planner(MemoryModel::Static);
        mem.allocate("x", 1).unwrap();
        mem.enter_scope("if");
        let inner = mem.allocate("x", 1).unwrap();
        mem.resize("x", 3).unwrap();
        assert_ne!(mem.address_of("x"), Some(inner));
        assert_eq!(mem.exit_scope(), 1);
        assert_eq!(mem.address_of("x"), Some(0));
    }

    #[test]
    fn test_segmented_resize_of_outer_binding_leaves_stack() {
        let mut mem = planner(MemoryModel::Segmented);
        mem.enter_scope("f");
        mem.allocate("acc", 1).unwrap();
        mem.enter_scope("for");
        mem.resize("acc", 4).unwrap();
        assert_eq!(mem.address_of("acc"), Some(HEAP_BASE));
    }

    #[test]
    fn test_exit_root_scope_is_noop_with_warning() {
        let mut mem = planner(MemoryModel::Dynamic);
        mem.allocate("a", 1).unwrap();
        assert_eq!(mem.exit_scope(), 0);
        assert_eq!(mem.active_count(), 1);
        assert_eq!(mem.scope_depth(), 1);
        assert_eq!(mem.warnings().len(), 1);
    }

    #[test]
    fn test_gc_sweeps_and_compacts() {
        let mut mem = planner(MemoryModel::Dynamic);
        mem.allocate("keep1", 1).unwrap();
        mem.allocate("drop", 4).unwrap();
        mem.allocate("keep2", 2).unwrap();
        assert!(mem.deallocate("drop"));

        let report = mem.collect_garbage();
        assert_eq!(report.collected, 1);
        assert_eq!(report.freed_cells, 4);
        assert_eq!(report.relocated, 1);
        assert_eq!(mem.address_of("keep2"), Some(1));
        assert_eq!(mem.active_bytes(), 3);

        let relocations = mem.take_relocations();
        assert_eq!(
            relocations,
            vec![Relocation {
                from: 5,
                to: 1,
                size: 2
            }]
        );
        assert_eq!(relocate_address(&relocations, 6), 2);
        assert!(mem.take_relocations().is_empty());

        // bump pointer continues after the compacted block
        assert_eq!(mem.allocate("fresh", 1).unwrap(), 3);
    }

    #[test]
    fn test_unreferenced_allocations_are_collected() {
        let mut mem = planner(MemoryModel::Static);
        mem.allocate("a", 1).unwrap();
        mem.remove_reference("a");
        mem.remove_reference("a");
        mem.collect_garbage();
        assert!(mem.address_of("a").is_none());
        assert_eq!(mem.active_count(), 0);
        assert_eq!(mem.allocations().count(), 0);
    }

    #[test]
    fn test_forced_gc_then_out_of_memory() {
        let mut mem = MemoryPlanner::new(PlannerConfig {
            model: MemoryModel::Dynamic,
            memory_size: 8,
            gc_enabled: false,
            gc_threshold: 0.75,
        })
        .unwrap();
        mem.allocate("a", 6).unwrap();
        mem.deallocate("a");
        // forced pass reclaims the dead block
        assert_eq!(mem.allocate("b", 6).unwrap(), 0);

        let err = mem.allocate("c", 6).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 6,
                memory_size: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_gc_due_by_threshold_and_interval() {
        let mut mem = MemoryPlanner::new(PlannerConfig {
            model: MemoryModel::Static,
            memory_size: 10,
            gc_enabled: true,
            gc_threshold: 0.5,
        })
        .unwrap();
        let now = Utc::now();
        assert!(!mem.gc_due(now));
        assert!(mem.gc_due(now + chrono::Duration::seconds(GC_INTERVAL_SECS + 1)));
        mem.allocate("a", 6).unwrap();
        assert!(mem.gc_due(now));
    }

    #[test]
    fn test_allocation_serializes_with_timestamp() {
        let mut mem = planner(MemoryModel::Dynamic);
        mem.allocate("s", 2).unwrap();
        let alloc = mem.allocation("s").cloned().unwrap();
        let json = serde_json::to_string(&alloc).unwrap();
        assert!(json.contains("\"last_accessed\""));
        let back: MemoryAllocation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alloc);
    }

    #[test]
    fn test_invalid_configurations_rejected() {
        assert!(MemoryPlanner::with_model(MemoryModel::Hybrid, 1024).is_err());
        assert!(MemoryPlanner::with_model(MemoryModel::Segmented, 512).is_err());
        assert!(MemoryPlanner::with_model(MemoryModel::Static, 0).is_err());
        assert!(MemoryPlanner::new(PlannerConfig {
            gc_threshold: 1.5,
            ..PlannerConfig::default()
        })
        .is_err());
    }
}
