//! Namespace export: free functions and constants merged into a named
//! global table.
//!
//! Exports are additive and repeat-safe: binding the same namespace twice
//! targets the same table, so registration can be spread across call
//! sites. Individual names written twice are overwritten; the namespace
//! itself is never replaced.

use osier_abi::{FaultResult, TableId, Value, Vm};

use crate::call::{BindableFn, FnBinding, RawFn};
use crate::convert::ToScript;

/// Look up `globals[name]` as a table, creating and installing an empty
/// one when absent. An existing table is reused so repeated exports
/// accumulate; a non-table binding under the name is shadowed by a fresh
/// table.
pub(crate) fn namespace_table(vm: &mut dyn Vm, name: &str) -> TableId {
    let globals = vm.globals();
    let key = Value::string(name);
    if let Some(existing) = vm.table_get(globals, &key).as_table() {
        return existing;
    }
    let table = vm.table_new();
    vm.table_set(globals, key, Value::Table(table));
    table
}

/// Builder merging free functions and constants into one namespace.
pub struct ModuleDef<'vm> {
    vm: &'vm mut dyn Vm,
    table: TableId,
}

impl<'vm> ModuleDef<'vm> {
    /// Target `globals[name]`, creating the namespace on first use.
    pub fn bind(vm: &'vm mut dyn Vm, name: &str) -> Self {
        let table = namespace_table(vm, name);
        ModuleDef { vm, table }
    }

    /// Target the globals table itself: exports become top-level names.
    pub fn global(vm: &'vm mut dyn Vm) -> Self {
        let table = vm.globals();
        ModuleDef { vm, table }
    }

    /// Merge a free function into the namespace.
    pub fn function<M, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: BindableFn<M> + 'static,
    {
        let binding = FnBinding::function(name, f);
        self.vm
            .table_set(self.table, Value::string(name), binding.into_value());
        self
    }

    /// Merge a hand-written entry point into the namespace.
    pub fn function_raw(&mut self, name: &str, f: RawFn) -> &mut Self {
        let binding = FnBinding::raw(name, f);
        self.vm
            .table_set(self.table, Value::string(name), binding.into_value());
        self
    }

    /// Merge a constant into the namespace.
    pub fn constant(&mut self, name: &str, value: impl ToScript) -> FaultResult<&mut Self> {
        let value = value.to_value(self.vm)?;
        self.vm.table_set(self.table, Value::string(name), value);
        Ok(self)
    }

    /// The table exports land in.
    pub fn table(&self) -> TableId {
        self.table
    }
}
