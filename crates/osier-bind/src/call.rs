//! The calling-convention eraser.
//!
//! [`FnBinding`] turns an arbitrary native signature into a uniform entry
//! point: the engine only ever sees [`NativeCall`], and every
//! signature-specific detail lives in a closure the binding owns. Adapter
//! traits, implemented by macro for arities up to eight, recover
//! positional arguments from the untyped stack and route the return value
//! back through the codec layer.
//!
//! Stack protocol: a free function's arguments sit in slots `1..=N`; a
//! method's receiver sits in slot 1 with arguments in `2..=N+1`. Argument
//! positions are fixed by `skip + index` before anything is extracted, and
//! extraction never changes the stack shape, so reads in any order bind in
//! declaration order. A `()`-returning call reports zero results; a
//! value-returning call resets the stack, pushes exactly one converted
//! result and reports one.

use std::any::Any;
use std::marker::PhantomData;

use osier_abi::{Fault, FaultResult, ForeignRef, NativeCall, NativeFn, Value, Vm};

use crate::convert::{FromScript, ToScript};

/// Plain entry-point signature for hand-written bindings that bypass
/// argument extraction entirely.
pub type RawFn = fn(&mut dyn Vm) -> FaultResult<u32>;

/// Inference marker for a callable with no result.
///
/// Marker types tie each adapter impl to one signature shape so the
/// compiler can pick it from the callable alone; callers never name them.
pub struct NoResult<Args>(PhantomData<Args>);

/// Inference marker for a callable whose result crosses back into the
/// engine.
pub struct WithResult<Args, R>(PhantomData<(Args, R)>);

/// A free native function whose calling convention can be erased.
pub trait BindableFn<Marker> {
    /// Declared argument count.
    const ARITY: u32;

    /// Extract arguments from slots `base + 1 ..= base + ARITY` and run.
    fn invoke(&self, vm: &mut dyn Vm, base: u32) -> FaultResult<u32>;
}

/// A method on a bound native type: consumes an implicit receiver from
/// slot 1, with declared arguments in slots `2..=N+1`.
pub trait BindableMethod<T, Marker> {
    /// Declared argument count, not counting the receiver.
    const ARITY: u32;

    /// Extract arguments and run against the receiver's payload.
    fn invoke(&self, vm: &mut dyn Vm, receiver: &ForeignRef) -> FaultResult<u32>;
}

/// A callable whose native result is handed back to the caller instead of
/// pushed. Constructors erase their spawners through this so they can wrap
/// the produced instance in a cell with the right ownership tag.
pub trait BindableProducer<T, Marker> {
    /// Declared argument count.
    const ARITY: u32;

    /// Extract arguments from slots `base + 1 ..= base + ARITY` and
    /// produce the value.
    fn produce(&self, vm: &mut dyn Vm, base: u32) -> FaultResult<T>;
}

macro_rules! erase_signatures {
    ($count:literal $(, $A:ident : $pos:literal)*) => {
        impl<F, $($A,)*> BindableFn<NoResult<($($A,)*)>> for F
        where
            F: Fn($($A),*),
            $($A: FromScript,)*
        {
            const ARITY: u32 = $count;

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, vm: &mut dyn Vm, base: u32) -> FaultResult<u32> {
                $(let $A = $A::from_slot(vm, base + $pos)?;)*
                self($($A),*);
                Ok(0)
            }
        }

        impl<F, R, $($A,)*> BindableFn<WithResult<($($A,)*), R>> for F
        where
            F: Fn($($A),*) -> R,
            R: ToScript,
            $($A: FromScript,)*
        {
            const ARITY: u32 = $count;

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, vm: &mut dyn Vm, base: u32) -> FaultResult<u32> {
                $(let $A = $A::from_slot(vm, base + $pos)?;)*
                let result = self($($A),*).to_value(vm)?;
                vm.set_top(0);
                vm.push(result);
                Ok(1)
            }
        }

        impl<F, T, $($A,)*> BindableMethod<T, NoResult<($($A,)*)>> for F
        where
            F: Fn(&mut T, $($A),*),
            T: Any,
            $($A: FromScript,)*
        {
            const ARITY: u32 = $count;

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, vm: &mut dyn Vm, receiver: &ForeignRef) -> FaultResult<u32> {
                $(let $A = $A::from_slot(vm, 1 + $pos)?;)*
                receiver.with(|this: &mut T| self(this, $($A),*))?;
                Ok(0)
            }
        }

        impl<F, T, R, $($A,)*> BindableMethod<T, WithResult<($($A,)*), R>> for F
        where
            F: Fn(&mut T, $($A),*) -> R,
            T: Any,
            R: ToScript,
            $($A: FromScript,)*
        {
            const ARITY: u32 = $count;

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, vm: &mut dyn Vm, receiver: &ForeignRef) -> FaultResult<u32> {
                $(let $A = $A::from_slot(vm, 1 + $pos)?;)*
                let result = receiver.with(|this: &mut T| self(this, $($A),*))?;
                let result = result.to_value(vm)?;
                vm.set_top(0);
                vm.push(result);
                Ok(1)
            }
        }

        impl<F, T, $($A,)*> BindableProducer<T, ($($A,)*)> for F
        where
            F: Fn($($A),*) -> T,
            $($A: FromScript,)*
        {
            const ARITY: u32 = $count;

            #[allow(non_snake_case, unused_variables)]
            fn produce(&self, vm: &mut dyn Vm, base: u32) -> FaultResult<T> {
                $(let $A = $A::from_slot(vm, base + $pos)?;)*
                Ok(self($($A),*))
            }
        }
    };
}

erase_signatures!(0);
erase_signatures!(1, A1: 1);
erase_signatures!(2, A1: 1, A2: 2);
erase_signatures!(3, A1: 1, A2: 2, A3: 3);
erase_signatures!(4, A1: 1, A2: 2, A3: 3, A4: 4);
erase_signatures!(5, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
erase_signatures!(6, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
erase_signatures!(7, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);
erase_signatures!(8, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7, A8: 8);

/// A uniform native entry point with its calling convention erased.
///
/// Carries the captured callable, the declared arity and the receiver
/// skip-count; [`NativeCall::call`] is the entire surface the engine uses.
pub struct FnBinding {
    name: String,
    arity: u32,
    skip: u32,
    entry: Box<dyn Fn(&mut dyn Vm) -> FaultResult<u32>>,
}

impl FnBinding {
    /// Erase a free function; arguments are read from slots `1..=N`.
    pub fn function<M, F>(name: impl Into<String>, f: F) -> Self
    where
        F: BindableFn<M> + 'static,
    {
        FnBinding {
            name: name.into(),
            arity: F::ARITY,
            skip: 0,
            entry: Box::new(move |vm| f.invoke(vm, 0)),
        }
    }

    /// Erase a method; the receiver occupies slot 1, arguments `2..=N+1`.
    ///
    /// A receiver whose cell the engine no longer holds is a
    /// missing-callee fault; a non-object receiver is a type mismatch.
    pub fn method<T, M, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Any,
        F: BindableMethod<T, M> + 'static,
    {
        let name = name.into();
        let diag = name.clone();
        FnBinding {
            name,
            arity: F::ARITY,
            skip: 1,
            entry: Box::new(move |vm| {
                let receiver = match vm.slot(1) {
                    Value::Foreign(id) => vm.cell(id).ok_or_else(|| {
                        Fault::MissingCallee(format!("receiver for `{diag}` was released"))
                    })?,
                    other => {
                        return Err(Fault::TypeMismatch {
                            expected: "object receiver",
                            found: other.type_name(),
                        })
                    }
                };
                f.invoke(vm, &receiver)
            }),
        }
    }

    /// Install a hand-written entry point. The raw function owns the whole
    /// stack protocol itself; declared arity is recorded as zero.
    pub fn raw(name: impl Into<String>, f: RawFn) -> Self {
        FnBinding {
            name: name.into(),
            arity: 0,
            skip: 0,
            entry: Box::new(move |vm| f(vm)),
        }
    }

    pub(crate) fn erased(
        name: String,
        arity: u32,
        skip: u32,
        entry: impl Fn(&mut dyn Vm) -> FaultResult<u32> + 'static,
    ) -> Self {
        FnBinding {
            name,
            arity,
            skip,
            entry: Box::new(entry),
        }
    }

    /// Declared argument count, not counting any receiver.
    pub fn arity(&self) -> u32 {
        self.arity
    }

    /// Implicit leading stack slots: 0 for free functions, 1 for methods.
    pub fn skip(&self) -> u32 {
        self.skip
    }

    /// Wrap into a script-callable value.
    pub fn into_value(self) -> Value {
        Value::Native(NativeFn::new(self))
    }
}

impl NativeCall for FnBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, vm: &mut dyn Vm) -> FaultResult<u32> {
        (self.entry)(vm)
    }
}

impl std::fmt::Debug for FnBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnBinding")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("skip", &self.skip)
            .finish()
    }
}
