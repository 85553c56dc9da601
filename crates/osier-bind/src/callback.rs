//! The callback bridge: script functions handed to native code.
//!
//! A [`ScriptCallback`] is produced when a live script function crosses
//! into a native argument position. Extraction pins the function in the
//! engine's reference table, and the handle owns that pin — one relay per
//! registration, nothing shared per signature. The handle serves exactly
//! one invocation: the pin is released immediately after the call returns,
//! success or fault, and a second invocation is a missing-callee fault. A
//! handle that never fires leaks its pin.

use std::cell::Cell;
use std::marker::PhantomData;

use osier_abi::{Fault, FaultResult, RefId, Value, Vm};

use crate::convert::{FromScript, ToScript};

/// A native argument bundle re-marshalled into engine values for a script
/// call. Implemented for tuples of [`ToScript`] values up to eight wide.
pub trait CallbackArgs {
    /// Convert every argument, in order.
    fn into_values(self, vm: &mut dyn Vm) -> FaultResult<Vec<Value>>;
}

macro_rules! callback_args {
    ($($A:ident),*) => {
        impl<$($A: ToScript),*> CallbackArgs for ($($A,)*) {
            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn into_values(self, vm: &mut dyn Vm) -> FaultResult<Vec<Value>> {
                let ($($A,)*) = self;
                let mut out = Vec::new();
                $(out.push($A.to_value(vm)?);)*
                Ok(out)
            }
        }
    };
}

callback_args!();
callback_args!(A1);
callback_args!(A1, A2);
callback_args!(A1, A2, A3);
callback_args!(A1, A2, A3, A4);
callback_args!(A1, A2, A3, A4, A5);
callback_args!(A1, A2, A3, A4, A5, A6);
callback_args!(A1, A2, A3, A4, A5, A6, A7);
callback_args!(A1, A2, A3, A4, A5, A6, A7, A8);

/// A pinned script function invocable from native code, at most once.
///
/// `A` is the native argument tuple, `R` the native return type; both go
/// through the codec layer at invocation time.
pub struct ScriptCallback<A, R> {
    pin: Cell<Option<RefId>>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> ScriptCallback<A, R> {
    /// Whether the single shot is still available.
    pub fn is_armed(&self) -> bool {
        self.pin.get().is_some()
    }
}

impl<A, R> std::fmt::Debug for ScriptCallback<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pin.get() {
            Some(id) => write!(f, "ScriptCallback(#{})", id.0),
            None => write!(f, "ScriptCallback(fired)"),
        }
    }
}

/// Only a live script function converts; the value is pinned so it
/// outlives its stack position.
impl<A, R> FromScript for ScriptCallback<A, R> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        match value {
            Value::Func(_) => Ok(ScriptCallback {
                pin: Cell::new(Some(vm.pin(value))),
                _marker: PhantomData,
            }),
            other => Err(Fault::TypeMismatch {
                expected: "function",
                found: other.type_name(),
            }),
        }
    }
}

impl<A: CallbackArgs, R: FromScript> ScriptCallback<A, R> {
    /// Fire the callback: marshal `args`, protected-call the pinned
    /// function, release the pin, convert the result.
    ///
    /// Script-level faults come back as [`Fault::Script`]; invoking a
    /// handle that already fired is a missing-callee fault.
    pub fn invoke(&self, vm: &mut dyn Vm, args: A) -> FaultResult<R> {
        let id = self
            .pin
            .take()
            .ok_or_else(|| Fault::MissingCallee("script callback already fired".into()))?;
        let outcome = Self::fire(vm, id, args);
        // One shot per registration: the pin is released whether the call
        // succeeded or faulted.
        vm.unpin(id);
        let value = outcome?;
        R::from_value(vm, value)
    }

    fn fire(vm: &mut dyn Vm, id: RefId, args: A) -> FaultResult<Value> {
        let callee = vm
            .pinned(id)
            .ok_or_else(|| Fault::MissingCallee(format!("pinned callback #{}", id.0)))?;
        let args = args.into_values(vm)?;
        vm.call(&callee, &args).map_err(|fault| match fault {
            Fault::Script(_) => fault,
            other => Fault::Script(other.to_string()),
        })
    }
}
