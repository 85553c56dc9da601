//! The single fault channel shared with the engine.
//!
//! Every failure this layer can produce travels through [`Fault`]; there is
//! no second error path. Faults are synchronous and terminal for the call
//! that raised them. The one deliberate exception is allocation failure
//! during instance construction, which the binding layer degrades to a nil
//! result instead of surfacing (see the class binder).

/// Result alias used across the boundary.
pub type FaultResult<T> = Result<T, Fault>;

/// A fault raised through the engine's error channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// A stack value's dynamic type cannot satisfy the requested native
    /// type and no coercion rule applies.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Name of the native type the caller asked for.
        expected: &'static str,
        /// Dynamic type name of the value actually present.
        found: &'static str,
    },

    /// A native type was declared under a second, different name.
    #[error("type `{type_name}` is already bound as `{existing}`, cannot rebind as `{requested}`")]
    NameConflict {
        /// Static name of the native type.
        type_name: &'static str,
        /// The name the type is already exported under.
        existing: String,
        /// The conflicting name of the rejected declaration.
        requested: String,
    },

    /// The engine could not supply an instance buffer.
    #[error("allocation failed: {0}")]
    AllocFailed(String),

    /// A call's native target is gone: the receiver cell no longer holds
    /// its payload, a callback already fired, or a non-callable value was
    /// invoked. Fatal for the current call.
    #[error("native callee missing for `{0}`")]
    MissingCallee(String),

    /// A script function faulted while being driven from native code.
    #[error("script fault: {0}")]
    Script(String),
}
