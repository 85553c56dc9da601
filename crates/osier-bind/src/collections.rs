//! Container codecs over script tables.
//!
//! Sequences consume a table's entries in the table's own iteration
//! order, ignoring keys; maps and pairs are keyed. Writers always emit
//! sequence tables with 1-based integer keys, which is also what the pair
//! codec expects back.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::Hash;

use osier_abi::{Fault, FaultResult, TableId, Value, Vm};

use crate::convert::{FromScript, ToScript};

fn expect_table(value: &Value, expected: &'static str) -> FaultResult<TableId> {
    value.as_table().ok_or(Fault::TypeMismatch {
        expected,
        found: value.type_name(),
    })
}

fn read_sequence<T: FromScript>(vm: &mut dyn Vm, table: TableId) -> FaultResult<Vec<T>> {
    let mut out = Vec::new();
    for (_, entry) in vm.table_entries(table) {
        out.push(T::from_value(vm, entry)?);
    }
    Ok(out)
}

fn write_sequence<T: ToScript>(
    vm: &mut dyn Vm,
    items: impl IntoIterator<Item = T>,
) -> FaultResult<Value> {
    let table = vm.table_new();
    for (index, item) in items.into_iter().enumerate() {
        let value = item.to_value(vm)?;
        vm.table_set(table, Value::Int(index as i64 + 1), value);
    }
    Ok(Value::Table(table))
}

// ----------------------------------------------------------------------
// Ordered sequences
// ----------------------------------------------------------------------

impl<T: FromScript> FromScript for Vec<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        let table = expect_table(&value, "sequence table")?;
        read_sequence(vm, table)
    }
}

impl<T: ToScript> ToScript for Vec<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

impl<T: FromScript> FromScript for VecDeque<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        Ok(Vec::from_value(vm, value)?.into())
    }
}

impl<T: ToScript> ToScript for VecDeque<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

impl<T: FromScript> FromScript for LinkedList<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        Ok(Vec::from_value(vm, value)?.into_iter().collect())
    }
}

impl<T: ToScript> ToScript for LinkedList<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

/// Fixed-capacity array: takes the first `N` entries in iteration order
/// and silently discards the rest; missing entries fall back to the
/// element default.
impl<T: FromScript + Default, const N: usize> FromScript for [T; N] {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        let table = expect_table(&value, "sequence table")?;
        let mut out = std::array::from_fn(|_| T::default());
        for (index, (_, entry)) in vm.table_entries(table).into_iter().take(N).enumerate() {
            out[index] = T::from_value(vm, entry)?;
        }
        Ok(out)
    }
}

impl<T: ToScript, const N: usize> ToScript for [T; N] {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

// ----------------------------------------------------------------------
// Sets: duplicates resolved by the destination set's own semantics
// ----------------------------------------------------------------------

impl<T: FromScript + Eq + Hash> FromScript for HashSet<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        Ok(Vec::from_value(vm, value)?.into_iter().collect())
    }
}

impl<T: ToScript> ToScript for HashSet<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

impl<T: FromScript + Ord> FromScript for BTreeSet<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        Ok(Vec::from_value(vm, value)?.into_iter().collect())
    }
}

impl<T: ToScript> ToScript for BTreeSet<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_sequence(vm, self)
    }
}

// ----------------------------------------------------------------------
// Maps: duplicate keys resolve last-write-wins
// ----------------------------------------------------------------------

fn read_map<K: FromScript, V: FromScript>(
    vm: &mut dyn Vm,
    value: Value,
    mut insert: impl FnMut(K, V),
) -> FaultResult<()> {
    let table = expect_table(&value, "map table")?;
    for (key, entry) in vm.table_entries(table) {
        let key = K::from_value(vm, key)?;
        let entry = V::from_value(vm, entry)?;
        insert(key, entry);
    }
    Ok(())
}

fn write_map<K: ToScript, V: ToScript>(
    vm: &mut dyn Vm,
    entries: impl IntoIterator<Item = (K, V)>,
) -> FaultResult<Value> {
    let table = vm.table_new();
    for (key, entry) in entries {
        let key = key.to_value(vm)?;
        let entry = entry.to_value(vm)?;
        vm.table_set(table, key, entry);
    }
    Ok(Value::Table(table))
}

impl<K: FromScript + Eq + Hash, V: FromScript> FromScript for HashMap<K, V> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        let mut out = HashMap::new();
        read_map(vm, value, |k, v| {
            out.insert(k, v);
        })?;
        Ok(out)
    }
}

impl<K: ToScript, V: ToScript> ToScript for HashMap<K, V> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_map(vm, self)
    }
}

impl<K: FromScript + Ord, V: FromScript> FromScript for BTreeMap<K, V> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        let mut out = BTreeMap::new();
        read_map(vm, value, |k, v| {
            out.insert(k, v);
        })?;
        Ok(out)
    }
}

impl<K: ToScript, V: ToScript> ToScript for BTreeMap<K, V> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        write_map(vm, self)
    }
}

// ----------------------------------------------------------------------
// Pairs: a 2-element table keyed 1 and 2
// ----------------------------------------------------------------------

impl<A: FromScript, B: FromScript> FromScript for (A, B) {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        let table = expect_table(&value, "pair table")?;
        let first = vm.table_get(table, &Value::Int(1));
        let second = vm.table_get(table, &Value::Int(2));
        Ok((A::from_value(vm, first)?, B::from_value(vm, second)?))
    }
}

impl<A: ToScript, B: ToScript> ToScript for (A, B) {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        let table = vm.table_new();
        let first = self.0.to_value(vm)?;
        vm.table_set(table, Value::Int(1), first);
        let second = self.1.to_value(vm)?;
        vm.table_set(table, Value::Int(2), second);
        Ok(Value::Table(table))
    }
}
