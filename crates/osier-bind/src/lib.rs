//! Osier bind — the native binding layer for the Osier scripting engine.
//!
//! Exposes native Rust functions, methods, types and constants to scripts
//! without hand-written glue. Values cross the boundary through the
//! engine's evaluation stack; conversion is type-directed through the
//! codec traits, and every native signature is erased behind a uniform
//! entry point the engine can call.
//!
//! The pieces, bottom up:
//!
//! - [`FromScript`] / [`ToScript`] — per-shape codecs: scalars, strings,
//!   pointers, sequences, sets, maps, pairs, optionals, callbacks.
//! - [`FnBinding`] — the calling-convention eraser behind free functions,
//!   methods and constructors.
//! - [`ClassDef`] — exports a native type: constructors with four
//!   ownership flavors, methods, raw entry points, constants.
//! - [`ModuleDef`] — merges free functions and constants into a named
//!   global namespace, additively.
//! - [`ScriptCallback`] — a pinned script function invocable from native
//!   code, at most once.
//!
//! Registration runs single-threaded, once per type or function, during
//! native startup. The engine side of the contract is the `Vm` trait of
//! `osier-abi`.
//!
//! ```ignore
//! struct Counter { count: i64 }
//! osier_bind::script_class!(Counter);
//!
//! ClassDef::<Counter>::bind_opaque(vm, "Counter")?
//!     .ctor("new", |start: i64| Counter { count: start })
//!     .method("add", |c: &mut Counter, by: i64| { c.count += by; c.count });
//!
//! ModuleDef::bind(vm, "math")
//!     .function("clamp", |v: f64, lo: f64, hi: f64| v.max(lo).min(hi))
//!     .constant("PI", std::f64::consts::PI)?;
//! ```

#![warn(missing_docs)]

mod call;
mod callback;
mod class;
mod collections;
mod convert;
mod module;

pub use call::{
    BindableFn, BindableMethod, BindableProducer, FnBinding, NoResult, RawFn, WithResult,
};
pub use callback::{CallbackArgs, ScriptCallback};
pub use class::{wrap_owned, BindOptions, ClassDef, ObjRef, ScriptClass};
pub use convert::{FromScript, ToScript};
pub use module::ModuleDef;

// The pieces of the engine contract that appear in this crate's own API,
// re-exported so binding code and the `script_class!` expansion need only
// one import.
pub use osier_abi::{Fault, FaultResult, Value, Vm};
