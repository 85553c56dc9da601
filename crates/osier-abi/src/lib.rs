//! Osier ABI — boundary contract with the scripting engine.
//!
//! This crate defines the types and the one trait native bindings need to
//! talk to the Osier engine, without depending on engine internals: the
//! dynamic [`Value`] representation, the [`Vm`] engine contract, foreign
//! instance cells with explicit ownership tags, and the single [`Fault`]
//! error channel.
//!
//! The binding layer proper (conversion, class and module export,
//! callbacks) lives in `osier-bind`; engines implement [`Vm`].

#![warn(missing_docs)]

mod cell;
mod fault;
mod value;
mod vm;

pub use cell::{ForeignCell, ForeignRef, Ownership, TypeToken};
pub use fault::{Fault, FaultResult};
pub use value::{ForeignId, FuncId, NativeFn, RawAddr, RefId, TableId, Value};
pub use vm::{hooks, NativeCall, Vm};
