//! Foreign instance cells.
//!
//! A [`ForeignCell`] is the engine-managed box around one native object
//! exposed to scripts. The cell records which native type it holds (a
//! [`TypeToken`]), which type table serves its method lookups, and — as an
//! explicit tag, never inferred from installed hooks — who owns the
//! payload's lifetime.
//!
//! Finalization runs in `Drop`, so it runs at most once no matter how the
//! engine's collector orders releases:
//!
//! - [`Ownership::Owned`] — the payload is dropped with the cell.
//! - [`Ownership::Borrowed`] — the cell holds a bare address; nothing is
//!   destroyed. The payload's lifetime is managed entirely outside this
//!   layer.
//! - [`Ownership::Custom`] — the payload is handed back to a registered
//!   deleter instead of being dropped in place.

use std::any::{self, Any, TypeId};
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::fault::{Fault, FaultResult};
use crate::value::TableId;

/// Process-unique identity of a native type, used to key the engine's
/// type-table registry. Two tokens compare equal exactly when they name
/// the same Rust type.
#[derive(Clone, Copy, Debug)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Token for the native type `T`.
    pub fn of<T: Any>() -> Self {
        TypeToken {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    /// Static name of the tokened type, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl std::hash::Hash for TypeToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Who destroys a cell's payload when the cell goes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The cell owns the payload; it is dropped with the cell.
    Owned,
    /// The payload is externally owned; the cell never destroys it.
    Borrowed,
    /// A registered deleter reclaims the payload instead of a plain drop.
    Custom,
}

type ErasedDeleter = Box<dyn FnMut(Box<dyn Any>)>;

enum Payload {
    Boxed(Box<dyn Any>),
    External(NonNull<()>),
    Reclaimed {
        value: Option<Box<dyn Any>>,
        deleter: ErasedDeleter,
    },
}

/// Shared handle to a cell. The engine keeps one; managed-object handles
/// held by native code keep others. The payload is finalized when the last
/// handle goes away.
pub type ForeignRef = Rc<ForeignCell>;

/// An engine-managed cell holding one native instance.
pub struct ForeignCell {
    token: TypeToken,
    type_table: Option<TableId>,
    ownership: Ownership,
    payload: RefCell<Payload>,
}

impl ForeignCell {
    /// Cell owning `value`; the payload drops with the cell.
    pub fn owned<T: Any>(value: T, type_table: Option<TableId>) -> Self {
        ForeignCell {
            token: TypeToken::of::<T>(),
            type_table,
            ownership: Ownership::Owned,
            payload: RefCell::new(Payload::Boxed(Box::new(value))),
        }
    }

    /// Cell owning `value`, reclaimed through `deleter` rather than a
    /// plain drop. The deleter receives the payload back by value.
    pub fn reclaimed<T: Any>(
        value: T,
        mut deleter: impl FnMut(T) + 'static,
        type_table: Option<TableId>,
    ) -> Self {
        let erased: ErasedDeleter = Box::new(move |boxed| {
            if let Ok(value) = boxed.downcast::<T>() {
                deleter(*value);
            }
        });
        ForeignCell {
            token: TypeToken::of::<T>(),
            type_table,
            ownership: Ownership::Custom,
            payload: RefCell::new(Payload::Reclaimed {
                value: Some(Box::new(value)),
                deleter: erased,
            }),
        }
    }

    /// Cell around an externally-owned instance. The cell never destroys
    /// the payload.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live `T` and stay valid for as long as any
    /// handle to this cell can be used to reach it.
    pub unsafe fn external<T: Any>(ptr: NonNull<T>, type_table: Option<TableId>) -> Self {
        ForeignCell {
            token: TypeToken::of::<T>(),
            type_table,
            ownership: Ownership::Borrowed,
            payload: RefCell::new(Payload::External(ptr.cast())),
        }
    }

    /// Identity of the native type held by this cell.
    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// The explicit lifetime tag.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Type table serving this cell's method lookups, if any.
    pub fn type_table(&self) -> Option<TableId> {
        self.type_table
    }

    /// Run `f` against the payload as a `T`.
    ///
    /// Fails with a type mismatch when the cell holds a different type,
    /// and with a missing-callee fault when the payload is unreachable:
    /// already reclaimed, or borrowed by an active call higher up the
    /// stack.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> FaultResult<R> {
        if self.token != TypeToken::of::<T>() {
            return Err(Fault::TypeMismatch {
                expected: any::type_name::<T>(),
                found: self.token.name,
            });
        }
        let mut guard = self.payload.try_borrow_mut().map_err(|_| {
            Fault::MissingCallee(format!(
                "instance of `{}` is borrowed by an active call",
                self.token.name
            ))
        })?;
        match &mut *guard {
            Payload::Boxed(boxed) => match boxed.downcast_mut::<T>() {
                Some(value) => Ok(f(value)),
                None => Err(Fault::MissingCallee(self.token.name.to_string())),
            },
            Payload::External(ptr) => {
                // Validity promised at registration; see `external`.
                let value = unsafe { ptr.cast::<T>().as_mut() };
                Ok(f(value))
            }
            Payload::Reclaimed { value, .. } => match value.as_mut().and_then(|b| b.downcast_mut()) {
                Some(value) => Ok(f(value)),
                None => Err(Fault::MissingCallee(self.token.name.to_string())),
            },
        }
    }
}

impl Drop for ForeignCell {
    fn drop(&mut self) {
        if let Payload::Reclaimed { value, deleter } = self.payload.get_mut() {
            if let Some(value) = value.take() {
                deleter(value);
            }
        }
    }
}

impl std::fmt::Debug for ForeignCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignCell")
            .field("token", &self.token.name)
            .field("ownership", &self.ownership)
            .field("type_table", &self.type_table)
            .finish()
    }
}
