//! In-memory reference implementation of the engine contract.
//!
//! [`StackVm`] implements [`Vm`] with plain data structures: a `Vec`
//! operand stack, insertion-ordered tables, slab-allocated foreign cells
//! and a counter-keyed reference table. It exists so bindings can be
//! exercised without a scripting engine: "script functions" are host
//! closures, and [`StackVm::collect`] stands in for the collector by
//! releasing every cell no engine-side root can reach.
//!
//! Values held only by native test code are not roots — exactly as an
//! address squirrelled away by a host program is invisible to a real
//! collector.

use std::rc::Rc;

use osier_abi::{
    Fault, FaultResult, ForeignCell, ForeignId, ForeignRef, FuncId, RefId, TableId, TypeToken,
    Value, Vm,
};
use rustc_hash::{FxHashMap, FxHashSet};

type HostFn = Rc<dyn Fn(&mut StackVm, &[Value]) -> FaultResult<Value>>;

/// A self-contained engine context backed by host memory.
pub struct StackVm {
    stack: Vec<Value>,
    tables: Vec<Vec<(Value, Value)>>,
    cells: Vec<Option<ForeignRef>>,
    funcs: Vec<HostFn>,
    pins: FxHashMap<u32, Value>,
    next_pin: u32,
    types: FxHashMap<TypeToken, (String, TableId)>,
    globals: TableId,
    fail_next_alloc: bool,
}

impl StackVm {
    /// Fresh context with an empty globals table.
    pub fn new() -> Self {
        StackVm {
            stack: Vec::new(),
            tables: vec![Vec::new()],
            cells: Vec::new(),
            funcs: Vec::new(),
            pins: FxHashMap::default(),
            next_pin: 1,
            types: FxHashMap::default(),
            globals: TableId(0),
            fail_next_alloc: false,
        }
    }

    /// Register a host closure as a script function value.
    pub fn script_fn(
        &mut self,
        f: impl Fn(&mut StackVm, &[Value]) -> FaultResult<Value> + 'static,
    ) -> Value {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(Rc::new(f));
        Value::Func(id)
    }

    /// Read a global by name.
    pub fn get_global(&self, name: &str) -> Value {
        self.table_get(self.globals, &Value::string(name))
    }

    /// Write a global by name.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.table_set(self.globals, Value::string(name), value);
    }

    /// Read a member of a table by string key.
    pub fn get_member(&self, table: TableId, name: &str) -> Value {
        self.table_get(table, &Value::string(name))
    }

    /// Make the next [`Vm::cell_new`] report an allocation failure.
    pub fn fail_next_alloc(&mut self) {
        self.fail_next_alloc = true;
    }

    /// Number of cells the engine still holds.
    pub fn live_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Number of values in the reference table.
    pub fn pinned_count(&self) -> usize {
        self.pins.len()
    }

    /// Release every cell unreachable from the stack, the reference table
    /// and any table. Finalization runs when the last handle to a cell
    /// goes away.
    pub fn collect(&mut self) {
        let mut live: FxHashSet<u32> = FxHashSet::default();
        let mut mark = |v: &Value, live: &mut FxHashSet<u32>| {
            if let Value::Foreign(id) = v {
                live.insert(id.0);
            }
        };
        for v in &self.stack {
            mark(v, &mut live);
        }
        for v in self.pins.values() {
            mark(v, &mut live);
        }
        for table in &self.tables {
            for (k, v) in table {
                mark(k, &mut live);
                mark(v, &mut live);
            }
        }
        for (index, slot) in self.cells.iter_mut().enumerate() {
            if !live.contains(&(index as u32)) {
                slot.take();
            }
        }
    }

    fn table(&self, id: TableId) -> &Vec<(Value, Value)> {
        &self.tables[id.0 as usize]
    }
}

impl Default for StackVm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm for StackVm {
    fn top(&self) -> u32 {
        self.stack.len() as u32
    }

    fn set_top(&mut self, new_top: u32) {
        self.stack.resize(new_top as usize, Value::Nil);
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn slot(&self, pos: u32) -> Value {
        if pos == 0 {
            return Value::Nil;
        }
        self.stack.get(pos as usize - 1).cloned().unwrap_or(Value::Nil)
    }

    fn table_new(&mut self) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(Vec::new());
        id
    }

    fn table_get(&self, table: TableId, key: &Value) -> Value {
        self.table(table)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Nil)
    }

    fn table_set(&mut self, table: TableId, key: Value, value: Value) {
        let entries = &mut self.tables[table.0 as usize];
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    fn table_entries(&self, table: TableId) -> Vec<(Value, Value)> {
        self.table(table).clone()
    }

    fn cell_new(&mut self, cell: ForeignCell) -> FaultResult<ForeignId> {
        if self.fail_next_alloc {
            self.fail_next_alloc = false;
            // Dropping `cell` here finalizes the payload, as a real
            // engine would on a failed allocation.
            return Err(Fault::AllocFailed("instance buffer".into()));
        }
        let id = ForeignId(self.cells.len() as u32);
        self.cells.push(Some(Rc::new(cell)));
        Ok(id)
    }

    fn cell(&self, id: ForeignId) -> Option<ForeignRef> {
        self.cells.get(id.0 as usize).and_then(|c| c.clone())
    }

    fn bind_type_table(&mut self, token: TypeToken, name: &str) -> FaultResult<TableId> {
        if let Some((existing, table)) = self.types.get(&token) {
            if existing == name {
                return Ok(*table);
            }
            return Err(Fault::NameConflict {
                type_name: token.name(),
                existing: existing.clone(),
                requested: name.to_string(),
            });
        }
        let table = self.table_new();
        self.types.insert(token, (name.to_string(), table));
        Ok(table)
    }

    fn type_table(&self, token: TypeToken) -> Option<TableId> {
        self.types.get(&token).map(|(_, table)| *table)
    }

    fn globals(&self) -> TableId {
        self.globals
    }

    fn pin(&mut self, value: Value) -> RefId {
        let id = self.next_pin;
        self.next_pin += 1;
        self.pins.insert(id, value);
        RefId(id)
    }

    fn unpin(&mut self, id: RefId) {
        self.pins.remove(&id.0);
    }

    fn pinned(&self, id: RefId) -> Option<Value> {
        self.pins.get(&id.0).cloned()
    }

    fn call(&mut self, callee: &Value, args: &[Value]) -> FaultResult<Value> {
        match callee {
            Value::Native(native) => {
                let entry = native.0.clone();
                self.stack.clear();
                self.stack.extend(args.iter().cloned());
                let result = entry.call(self).map(|nresults| {
                    if nresults == 0 {
                        Value::Nil
                    } else {
                        self.slot(self.top())
                    }
                });
                self.stack.clear();
                result
            }
            Value::Func(id) => {
                let f = self
                    .funcs
                    .get(id.0 as usize)
                    .cloned()
                    .ok_or_else(|| Fault::MissingCallee(format!("script function #{}", id.0)))?;
                f(self, args)
            }
            other => Err(Fault::MissingCallee(other.type_name().to_string())),
        }
    }
}
