//! Class export: native types bound into the engine's type-table registry.
//!
//! [`ClassDef`] declares a type once (single-shot per type: the first
//! bound name wins), points the type table's index-lookup fallback at
//! itself so field and method access share one resolution path, and
//! exports constructors, methods and constants. Constructors land in the
//! class namespace table under the bound name; methods and constants land
//! in the type table and are shared across instances.
//!
//! Instance lifetime is carried by the cell's explicit ownership tag:
//!
//! - [`ClassDef::ctor`] and the auto-registered default constructor
//!   produce `Owned` cells, destroyed when the engine releases them;
//! - [`ClassDef::ctor_with_deleter`] produces `Custom` cells whose payload
//!   is handed back to the deleter;
//! - [`ClassDef::ctor_unmanaged`] produces `Borrowed` cells that are never
//!   destroyed by this layer.

use std::any::{self, Any};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;

use osier_abi::{
    hooks, Fault, FaultResult, ForeignCell, ForeignId, ForeignRef, TableId, TypeToken, Value, Vm,
};

use crate::call::{BindableMethod, BindableProducer, FnBinding, RawFn};
use crate::convert::{FromScript, ToScript};
use crate::module::namespace_table;

/// Marker for native types exported to scripts as classes.
///
/// Declared through [`script_class!`](crate::script_class), which also
/// derives the [`ToScript`] impl wrapping an owned instance into an
/// engine-managed cell.
pub trait ScriptClass: Any + Sized {}

/// Wrap an owned instance into an engine-managed cell, attaching the type
/// table when the type is bound so scripts can dispatch methods on it.
/// Allocation failure degrades to nil.
pub fn wrap_owned<T: Any>(vm: &mut dyn Vm, value: T) -> FaultResult<Value> {
    let table = vm.type_table(TypeToken::of::<T>());
    match vm.cell_new(ForeignCell::owned(value, table)) {
        Ok(id) => Ok(Value::Foreign(id)),
        Err(Fault::AllocFailed(_)) => Ok(Value::Nil),
        Err(fault) => Err(fault),
    }
}

/// Declare one or more types as script classes.
///
/// ```ignore
/// struct Widget { width: u32 }
/// osier_bind::script_class!(Widget);
/// ```
#[macro_export]
macro_rules! script_class {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::ScriptClass for $ty {}

        impl $crate::ToScript for $ty {
            fn to_value(
                self,
                vm: &mut dyn $crate::Vm,
            ) -> $crate::FaultResult<$crate::Value> {
                $crate::wrap_owned(vm, self)
            }
        }
    )+};
}

/// Typed handle to a live managed instance, recovered from an argument
/// slot. Keeps the cell reachable independent of the engine; reads and
/// writes go through [`ObjRef::with`].
pub struct ObjRef<T: Any> {
    id: ForeignId,
    cell: ForeignRef,
    _marker: PhantomData<fn(T)>,
}

impl<T: Any> ObjRef<T> {
    /// Run `f` against the instance.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> FaultResult<R> {
        self.cell.with(f)
    }

    /// Engine handle for this instance.
    pub fn id(&self) -> ForeignId {
        self.id
    }
}

impl<T: Any> Clone for ObjRef<T> {
    fn clone(&self) -> Self {
        ObjRef {
            id: self.id,
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Any> std::fmt::Debug for ObjRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef<{}>(#{})", any::type_name::<T>(), self.id.0)
    }
}

/// Only a managed cell holding exactly a `T` satisfies an `ObjRef<T>`
/// argument; raw addresses do not.
impl<T: Any> FromScript for ObjRef<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        match value {
            Value::Foreign(id) => {
                let cell = vm.cell(id).ok_or_else(|| {
                    Fault::MissingCallee(format!(
                        "instance of `{}` was released",
                        any::type_name::<T>()
                    ))
                })?;
                if cell.token() != TypeToken::of::<T>() {
                    return Err(Fault::TypeMismatch {
                        expected: any::type_name::<T>(),
                        found: cell.token().name(),
                    });
                }
                Ok(ObjRef {
                    id,
                    cell,
                    _marker: PhantomData,
                })
            }
            other => Err(Fault::TypeMismatch {
                expected: any::type_name::<T>(),
                found: other.type_name(),
            }),
        }
    }
}

impl<T: Any> ToScript for ObjRef<T> {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::Foreign(self.id))
    }
}

/// Knobs for [`ClassDef::bind_with`].
#[derive(Clone, Debug)]
pub struct BindOptions {
    /// Member name the primary constructor is exported under.
    pub constructor_name: String,
}

impl Default for BindOptions {
    fn default() -> Self {
        BindOptions {
            constructor_name: "new".into(),
        }
    }
}

/// Builder exporting one native type to scripts.
pub struct ClassDef<'vm, T: ScriptClass> {
    vm: &'vm mut dyn Vm,
    type_table: TableId,
    namespace: TableId,
    _marker: PhantomData<fn(T)>,
}

impl<'vm, T: ScriptClass> std::fmt::Debug for ClassDef<'vm, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDef")
            .field("type", &any::type_name::<T>())
            .field("type_table", &self.type_table)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<'vm, T: ScriptClass + Default> ClassDef<'vm, T> {
    /// Bind `T` under `name` with a default zero-argument constructor
    /// exported as `new`.
    ///
    /// Rebinding under the identical name succeeds and returns a builder
    /// for the existing tables; a different name for an already-bound type
    /// is a conflict fault.
    pub fn bind(vm: &'vm mut dyn Vm, name: &str) -> FaultResult<Self> {
        Self::bind_with(vm, name, BindOptions::default())
    }

    /// Bind `T` under `name`, naming the primary constructor per
    /// `options`.
    pub fn bind_with(vm: &'vm mut dyn Vm, name: &str, options: BindOptions) -> FaultResult<Self> {
        let mut def = Self::declare(vm, name)?;
        def.ctor(&options.constructor_name, T::default);
        Ok(def)
    }
}

impl<'vm, T: ScriptClass> ClassDef<'vm, T> {
    /// Bind `T` under `name` without any auto-registered constructor, for
    /// types only ever produced by spawners.
    pub fn bind_opaque(vm: &'vm mut dyn Vm, name: &str) -> FaultResult<Self> {
        Self::declare(vm, name)
    }

    fn declare(vm: &'vm mut dyn Vm, name: &str) -> FaultResult<Self> {
        let type_table = vm.bind_type_table(TypeToken::of::<T>(), name)?;
        // Field and method lookups on instances fall back to the type's
        // own table.
        vm.table_set(
            type_table,
            Value::string(hooks::INDEX),
            Value::Table(type_table),
        );
        let namespace = namespace_table(vm, name);
        Ok(ClassDef {
            vm,
            type_table,
            namespace,
            _marker: PhantomData,
        })
    }

    /// Export a constructor: `spawner` produces the instance from script
    /// arguments, and the cell owns it until the engine releases it.
    pub fn ctor<M, F>(&mut self, name: &str, spawner: F) -> &mut Self
    where
        F: BindableProducer<T, M> + 'static,
    {
        let entry = spawn_entry(TypeToken::of::<T>(), spawner, ForeignCell::owned);
        self.install_ctor(name, F::ARITY, entry)
    }

    /// Export a constructor whose instances are reclaimed by `deleter`
    /// instead of an ordinary drop, for pooled or foreign-allocated
    /// objects. The deleter receives each payload back by value.
    pub fn ctor_with_deleter<M, F>(
        &mut self,
        name: &str,
        spawner: F,
        deleter: impl FnMut(T) + 'static,
    ) -> &mut Self
    where
        F: BindableProducer<T, M> + 'static,
    {
        let shared = Rc::new(RefCell::new(deleter));
        let entry = spawn_entry(TypeToken::of::<T>(), spawner, move |value, table| {
            let sink = shared.clone();
            ForeignCell::reclaimed(value, move |v| (*sink.borrow_mut())(v), table)
        });
        self.install_ctor(name, F::ARITY, entry)
    }

    /// Export a constructor producing externally-owned instances. The cell
    /// is a borrowed view: this layer never destroys the payload, even
    /// after the engine releases its last reference.
    ///
    /// # Safety
    ///
    /// Every pointer `spawner` returns must point at a live `T` and stay
    /// valid for as long as script or native code can reach the instance
    /// through the engine.
    pub unsafe fn ctor_unmanaged<M, F>(&mut self, name: &str, spawner: F) -> &mut Self
    where
        F: BindableProducer<NonNull<T>, M> + 'static,
    {
        let entry = spawn_entry(TypeToken::of::<T>(), spawner, |ptr, table| unsafe {
            ForeignCell::external(ptr, table)
        });
        self.install_ctor(name, F::ARITY, entry)
    }

    /// Export a method; scripts call it on an instance, which arrives as
    /// the implicit receiver in slot 1.
    pub fn method<M, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: BindableMethod<T, M> + 'static,
    {
        let binding = FnBinding::method(name, f);
        self.vm
            .table_set(self.type_table, Value::string(name), binding.into_value());
        self
    }

    /// Install a hand-written entry point as a method, bypassing argument
    /// extraction. The receiver still arrives in slot 1.
    pub fn method_raw(&mut self, name: &str, f: RawFn) -> &mut Self {
        let binding = FnBinding::raw(name, f);
        self.vm
            .table_set(self.type_table, Value::string(name), binding.into_value());
        self
    }

    /// Write a constant into the type table at registration time. Shared
    /// across instances, reachable through the index fallback.
    pub fn constant(&mut self, name: &str, value: impl ToScript) -> FaultResult<&mut Self> {
        let value = value.to_value(self.vm)?;
        self.vm.table_set(self.type_table, Value::string(name), value);
        Ok(self)
    }

    /// The table serving method and constant lookups for instances.
    pub fn type_table(&self) -> TableId {
        self.type_table
    }

    /// The class namespace table constructors are exported into.
    pub fn namespace(&self) -> TableId {
        self.namespace
    }

    fn install_ctor(
        &mut self,
        name: &str,
        arity: u32,
        entry: impl Fn(&mut dyn Vm) -> FaultResult<u32> + 'static,
    ) -> &mut Self {
        let binding = FnBinding::erased(name.to_string(), arity, 0, entry);
        self.vm
            .table_set(self.namespace, Value::string(name), binding.into_value());
        self
    }
}

/// Constructor entry point: run the spawner, wrap the produced value into
/// a cell and hand it to the engine. Allocation failure finalizes the
/// fresh payload with the rejected cell and leaves nil on the stack
/// instead of faulting.
fn spawn_entry<P, M, F>(
    token: TypeToken,
    spawner: F,
    wrap: impl Fn(P, Option<TableId>) -> ForeignCell + 'static,
) -> impl Fn(&mut dyn Vm) -> FaultResult<u32> + 'static
where
    P: 'static,
    F: BindableProducer<P, M> + 'static,
{
    move |vm| {
        let value = spawner.produce(vm, 0)?;
        let table = vm.type_table(token);
        let result = match vm.cell_new(wrap(value, table)) {
            Ok(id) => Value::Foreign(id),
            Err(Fault::AllocFailed(_)) => Value::Nil,
            Err(fault) => return Err(fault),
        };
        vm.set_top(0);
        vm.push(result);
        Ok(1)
    }
}
