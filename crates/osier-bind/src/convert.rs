//! Scalar and pointer codecs between native values and engine values.
//!
//! [`FromScript`] and [`ToScript`] are the two halves of every codec.
//! Conversion is type-directed: the native signature picks the impl, the
//! impl performs the narrowest safe conversion and faults when no
//! coercion rule applies.
//!
//! Coercion rules, in brief:
//!
//! - numeric targets accept either engine number shape and numeric-looking
//!   strings; floats narrow to integers by truncating toward zero;
//! - `bool` accepts only booleans;
//! - string targets additionally render booleans and numbers;
//! - `NonNull<T>` accepts a managed cell holding a `T`, or a raw address;
//! - everything else is a type mismatch.

use std::any::{self, Any};
use std::ptr::NonNull;
use std::rc::Rc;

use osier_abi::{Fault, FaultResult, ForeignCell, RawAddr, TypeToken, Value, Vm};

/// Decode a native value from an engine value or stack slot.
pub trait FromScript: Sized {
    /// Convert from an engine value.
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self>;

    /// Convert from stack slot `pos` (1-based).
    fn from_slot(vm: &mut dyn Vm, pos: u32) -> FaultResult<Self> {
        let value = vm.slot(pos);
        Self::from_value(vm, value)
    }
}

/// Encode a native value as exactly one engine value.
pub trait ToScript {
    /// Convert into an engine value.
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value>;
}

fn mismatch(expected: &'static str, found: &Value) -> Fault {
    Fault::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}

// ----------------------------------------------------------------------
// Integers
// ----------------------------------------------------------------------

macro_rules! integer_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl FromScript for $ty {
            fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
                match value {
                    Value::Int(i) => {
                        <$ty>::try_from(i).map_err(|_| mismatch(stringify!($ty), &value))
                    }
                    // Narrowing from a float truncates toward zero.
                    Value::Float(f) => Ok(f as $ty),
                    Value::Str(ref s) => parse_int(s)
                        .and_then(|i| <$ty>::try_from(i).ok())
                        .ok_or_else(|| mismatch(stringify!($ty), &value)),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }

        impl ToScript for $ty {
            fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
                Ok(Value::Int(self as i64))
            }
        }
    )*};
}

integer_codec!(i8, i16, i32, i64, u8, u16, u32);

/// Numeric-looking strings: plain integers first, then anything the float
/// grammar accepts, truncated.
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

// ----------------------------------------------------------------------
// Floats
// ----------------------------------------------------------------------

macro_rules! float_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl FromScript for $ty {
            fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
                match value {
                    Value::Float(f) => Ok(f as $ty),
                    Value::Int(i) => Ok(i as $ty),
                    Value::Str(ref s) => s.trim().parse::<f64>().map(|f| f as $ty).map_err(|_| {
                        mismatch(stringify!($ty), &value)
                    }),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }

        impl ToScript for $ty {
            fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
                Ok(Value::Float(self as f64))
            }
        }
    )*};
}

float_codec!(f32, f64);

// ----------------------------------------------------------------------
// Booleans: no coercion in either direction
// ----------------------------------------------------------------------

impl FromScript for bool {
    fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl ToScript for bool {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::Bool(self))
    }
}

// ----------------------------------------------------------------------
// Strings
// ----------------------------------------------------------------------

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.to_string()),
        Value::Bool(true) => Some("true".into()),
        Value::Bool(false) => Some("false".into()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

impl FromScript for String {
    fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        stringify(&value).ok_or_else(|| mismatch("string", &value))
    }
}

impl ToScript for String {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::Str(Rc::from(self)))
    }
}

impl FromScript for Rc<str> {
    fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => stringify(&other)
                .map(Rc::from)
                .ok_or_else(|| mismatch("string", &other)),
        }
    }
}

impl ToScript for Rc<str> {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::Str(self))
    }
}

impl ToScript for &str {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::string(self))
    }
}

// ----------------------------------------------------------------------
// Optionals: script nil <-> None
// ----------------------------------------------------------------------

impl<T: FromScript> FromScript for Option<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        if value.is_nil() {
            Ok(None)
        } else {
            T::from_value(vm, value).map(Some)
        }
    }
}

impl<T: ToScript> ToScript for Option<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        match self {
            Some(inner) => inner.to_value(vm),
            None => Ok(Value::Nil),
        }
    }
}

// ----------------------------------------------------------------------
// Engine values pass through untouched
// ----------------------------------------------------------------------

impl FromScript for Value {
    fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        Ok(value)
    }
}

impl ToScript for Value {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(self)
    }
}

/// Unit decodes from anything and carries no information; callbacks with
/// no interesting result use it.
impl FromScript for () {
    fn from_value(_vm: &mut dyn Vm, _value: Value) -> FaultResult<Self> {
        Ok(())
    }
}

/// Fallible natives: `Ok` converts, `Err` raises through the fault
/// channel and aborts the current call.
impl<T: ToScript> ToScript for FaultResult<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        self?.to_value(vm)
    }
}

// ----------------------------------------------------------------------
// Raw addresses and typed pointers
// ----------------------------------------------------------------------

impl FromScript for RawAddr {
    fn from_value(_vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        value.as_addr().ok_or_else(|| mismatch("address", &value))
    }
}

impl ToScript for RawAddr {
    fn to_value(self, _vm: &mut dyn Vm) -> FaultResult<Value> {
        Ok(Value::Addr(self))
    }
}

/// A typed pointer argument: either a managed cell holding a `T` (the
/// payload's address is produced) or a bare address assumed to point at a
/// `T`, exactly as the caller promised.
impl<T: Any> FromScript for NonNull<T> {
    fn from_value(vm: &mut dyn Vm, value: Value) -> FaultResult<Self> {
        match value {
            Value::Foreign(id) => {
                let cell = vm
                    .cell(id)
                    .ok_or_else(|| Fault::MissingCallee(any::type_name::<T>().to_string()))?;
                cell.with(|t: &mut T| NonNull::from(t))
            }
            Value::Addr(addr) => NonNull::new(addr.0 as *mut T)
                .ok_or_else(|| mismatch(any::type_name::<T>(), &Value::Addr(addr))),
            other => Err(mismatch(any::type_name::<T>(), &other)),
        }
    }
}

/// A typed pointer result: wrapped into a managed, externally-owned cell
/// when the engine knows the pointee's type table (so scripts can call
/// methods on it), otherwise passed along as a bare address.
impl<T: Any> ToScript for NonNull<T> {
    fn to_value(self, vm: &mut dyn Vm) -> FaultResult<Value> {
        match vm.type_table(TypeToken::of::<T>()) {
            Some(table) => {
                // The producer of the pointer vouches for its lifetime,
                // the same contract as handing out the bare address.
                let cell = unsafe { ForeignCell::external(self, Some(table)) };
                match vm.cell_new(cell) {
                    Ok(id) => Ok(Value::Foreign(id)),
                    Err(Fault::AllocFailed(_)) => Ok(Value::Nil),
                    Err(fault) => Err(fault),
                }
            }
            None => Ok(Value::Addr(RawAddr(self.as_ptr() as *mut ()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osier_testvm::StackVm;

    #[test]
    fn test_integer_accepts_numbers_and_numeric_strings() {
        let vm = &mut StackVm::new();
        assert_eq!(i32::from_value(vm, Value::Int(7)).unwrap(), 7);
        assert_eq!(i32::from_value(vm, Value::Float(3.9)).unwrap(), 3);
        assert_eq!(i32::from_value(vm, Value::Float(-3.9)).unwrap(), -3);
        assert_eq!(i32::from_value(vm, Value::string("41")).unwrap(), 41);
        assert_eq!(i32::from_value(vm, Value::string(" 2.5 ")).unwrap(), 2);
        assert!(i32::from_value(vm, Value::string("nope")).is_err());
        assert!(i32::from_value(vm, Value::Bool(true)).is_err());
        assert!(u8::from_value(vm, Value::Int(300)).is_err());
    }

    #[test]
    fn test_float_accepts_numbers_and_numeric_strings() {
        let vm = &mut StackVm::new();
        assert_eq!(f64::from_value(vm, Value::Float(1.5)).unwrap(), 1.5);
        assert_eq!(f64::from_value(vm, Value::Int(4)).unwrap(), 4.0);
        assert_eq!(f64::from_value(vm, Value::string("2.25")).unwrap(), 2.25);
        assert!(f64::from_value(vm, Value::Nil).is_err());
    }

    #[test]
    fn test_bool_is_strict() {
        let vm = &mut StackVm::new();
        assert!(bool::from_value(vm, Value::Bool(true)).unwrap());
        assert!(bool::from_value(vm, Value::Int(1)).is_err());
        assert!(bool::from_value(vm, Value::string("true")).is_err());
    }

    #[test]
    fn test_string_renders_scalars() {
        let vm = &mut StackVm::new();
        assert_eq!(String::from_value(vm, Value::string("hi")).unwrap(), "hi");
        assert_eq!(String::from_value(vm, Value::Bool(false)).unwrap(), "false");
        assert_eq!(String::from_value(vm, Value::Int(12)).unwrap(), "12");
        assert!(String::from_value(vm, Value::Nil).is_err());
    }

    #[test]
    fn test_scalar_round_trips() {
        let vm = &mut StackVm::new();
        let v = 123_i64.to_value(vm).unwrap();
        assert_eq!(i64::from_value(vm, v).unwrap(), 123);

        let v = true.to_value(vm).unwrap();
        assert!(bool::from_value(vm, v).unwrap());

        let v = "text".to_value(vm).unwrap();
        assert_eq!(String::from_value(vm, v).unwrap(), "text");

        let v = 0.5_f64.to_value(vm).unwrap();
        assert_eq!(f64::from_value(vm, v).unwrap(), 0.5);
    }

    #[test]
    fn test_option_maps_nil() {
        let vm = &mut StackVm::new();
        assert_eq!(Option::<i32>::from_value(vm, Value::Nil).unwrap(), None);
        assert_eq!(
            Option::<i32>::from_value(vm, Value::Int(2)).unwrap(),
            Some(2)
        );
        assert_eq!(None::<i32>.to_value(vm).unwrap(), Value::Nil);
        assert_eq!(Some(2_i32).to_value(vm).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_fallible_results_raise_or_convert() {
        let vm = &mut StackVm::new();
        let ok: FaultResult<i64> = Ok(3);
        assert_eq!(ok.to_value(vm).unwrap(), Value::Int(3));
        let err: FaultResult<i64> = Err(Fault::Script("bad input".into()));
        assert_eq!(err.to_value(vm).unwrap_err(), Fault::Script("bad input".into()));
    }

    #[test]
    fn test_pointer_without_type_table_is_a_bare_address() {
        let vm = &mut StackVm::new();
        let mut payload = 9_u64;
        let ptr = NonNull::from(&mut payload);
        let v = ptr.to_value(vm).unwrap();
        assert!(matches!(v, Value::Addr(_)));
        let back = NonNull::<u64>::from_value(vm, v).unwrap();
        assert_eq!(back, ptr);
    }

    #[test]
    fn test_pointer_with_type_table_becomes_managed() {
        let vm = &mut StackVm::new();
        let table = vm
            .bind_type_table(TypeToken::of::<u64>(), "Counter")
            .unwrap();
        let mut payload = 10_u64;
        let v = NonNull::from(&mut payload).to_value(vm).unwrap();
        let id = v.as_foreign().expect("managed handle");
        let cell = vm.cell(id).unwrap();
        assert_eq!(cell.ownership(), osier_abi::Ownership::Borrowed);
        assert_eq!(cell.type_table(), Some(table));
        // The same payload is reachable through the handle.
        let back = NonNull::<u64>::from_value(vm, Value::Foreign(id)).unwrap();
        assert_eq!(back, NonNull::from(&mut payload));
    }

    #[test]
    fn test_from_slot_reads_one_based_positions() {
        let vm = &mut StackVm::new();
        vm.push(Value::Int(10));
        vm.push(Value::Int(20));
        assert_eq!(i64::from_slot(vm, 2).unwrap(), 20);
        assert_eq!(i64::from_slot(vm, 1).unwrap(), 10);
        assert!(i64::from_slot(vm, 5).is_err()); // nil slot
    }
}
