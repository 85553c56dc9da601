//! The engine contract.
//!
//! [`Vm`] is the single trait through which the binding layer talks to the
//! scripting engine: the evaluation stack, tables, foreign cells, the
//! type-table registry, the global reference table, and protected calls.
//! The engine provides the concrete implementation; native bindings
//! program against `&mut dyn Vm` and never see engine internals.
//!
//! The calling convention for native entry points is the one the stack
//! layer enforces everywhere: a callee finds its arguments in slots
//! `1..=top`, owns the whole stack for the duration of the call, and
//! reports how many results it left behind (zero or one).

use crate::cell::{ForeignCell, ForeignRef, TypeToken};
use crate::fault::FaultResult;
use crate::value::{ForeignId, RefId, TableId, Value};

/// Engine-reserved table keys.
pub mod hooks {
    /// Index-lookup fallback: where the engine resolves keys missing from
    /// a table. A bound type's table points this at itself so field and
    /// method access share one resolution path.
    pub const INDEX: &str = "__index";
}

/// A uniform native entry point: the engine invokes it with the stack
/// prepared, and it reports how many results it left on the stack.
pub trait NativeCall {
    /// Exported name, for diagnostics.
    fn name(&self) -> &str;

    /// Run the call against the current stack.
    fn call(&self, vm: &mut dyn Vm) -> FaultResult<u32>;
}

/// Abstract engine context.
///
/// All operations are single-threaded; re-entrancy happens only when a
/// native call drives a script function through [`Vm::call`] on the same
/// context.
pub trait Vm {
    // ------------------------------------------------------------------
    // Evaluation stack
    // ------------------------------------------------------------------

    /// Number of occupied slots.
    fn top(&self) -> u32;

    /// Truncate or nil-extend the stack to exactly `new_top` slots.
    fn set_top(&mut self, new_top: u32);

    /// Push one value.
    fn push(&mut self, value: Value);

    /// Read slot `pos` (1-based). Out-of-range reads yield nil.
    fn slot(&self, pos: u32) -> Value;

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Create an empty table.
    fn table_new(&mut self) -> TableId;

    /// Read `table[key]`; nil when absent.
    fn table_get(&self, table: TableId, key: &Value) -> Value;

    /// Write `table[key] = value`, replacing any previous entry.
    fn table_set(&mut self, table: TableId, key: Value, value: Value);

    /// Snapshot the table's entries in its iteration order.
    fn table_entries(&self, table: TableId) -> Vec<(Value, Value)>;

    // ------------------------------------------------------------------
    // Foreign cells
    // ------------------------------------------------------------------

    /// Allocate an instance cell. The allocation-failure channel: on
    /// error the engine discards `cell` (running its finalization) and
    /// the caller degrades to a nil result.
    fn cell_new(&mut self, cell: ForeignCell) -> FaultResult<ForeignId>;

    /// Shared handle to a live cell.
    fn cell(&self, id: ForeignId) -> Option<ForeignRef>;

    // ------------------------------------------------------------------
    // Type-table registry
    // ------------------------------------------------------------------

    /// Declare the type table for `token` under `name`, creating it on
    /// first use. Single-shot per token: redeclaring with the identical
    /// name returns the existing table, a different name is a conflict
    /// fault.
    fn bind_type_table(&mut self, token: TypeToken, name: &str) -> FaultResult<TableId>;

    /// Type table previously bound for `token`, if any.
    fn type_table(&self, token: TypeToken) -> Option<TableId>;

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    /// The table of script globals.
    fn globals(&self) -> TableId;

    // ------------------------------------------------------------------
    // Reference table
    // ------------------------------------------------------------------

    /// Pin `value` so it outlives its stack position; returns a stable id.
    fn pin(&mut self, value: Value) -> RefId;

    /// Release a pinned value. Unknown ids are ignored.
    fn unpin(&mut self, id: RefId);

    /// Look up a pinned value.
    fn pinned(&self, id: RefId) -> Option<Value>;

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Protected call: invoke `callee` with `args`, returning its single
    /// result or the fault that aborted it. Faults do not unwind the
    /// native frames driving the call.
    fn call(&mut self, callee: &Value, args: &[Value]) -> FaultResult<Value>;
}
