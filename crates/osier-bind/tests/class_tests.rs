//! Class binding integration tests.
//!
//! Exercises the full object lifecycle against the reference engine:
//! declaration, the four constructor ownership flavors, method dispatch
//! with an implicit receiver, constants, and finalization driven by
//! `StackVm::collect`.

use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use osier_abi::{hooks, Ownership, TypeToken};
use osier_bind::{
    script_class, ClassDef, Fault, FaultResult, ModuleDef, ObjRef, Value, Vm,
};
use osier_testvm::StackVm;

#[derive(Default)]
struct Widget {
    width: i64,
    height: i64,
}

script_class!(Widget);

/// Payload with an observable drop, for ownership tests.
struct Tracked {
    drops: Rc<Cell<u32>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

script_class!(Tracked);

fn constructor(vm: &StackVm, class: &str, name: &str) -> Value {
    let ns = vm.get_global(class).as_table().expect("class namespace");
    vm.get_member(ns, name)
}

// ===== Declaration =====

#[test]
fn test_bind_installs_namespace_and_self_referencing_table() {
    let mut vm = StackVm::new();
    let type_table = ClassDef::<Widget>::bind(&mut vm, "Widget").unwrap().type_table();

    // Index lookups on instances fall back to the type's own table.
    assert_eq!(
        vm.table_get(type_table, &Value::string(hooks::INDEX)),
        Value::Table(type_table)
    );
    assert!(vm.get_global("Widget").as_table().is_some());
    assert!(matches!(constructor(&vm, "Widget", "new"), Value::Native(_)));
}

#[test]
fn test_second_name_for_a_bound_type_conflicts() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget").unwrap();

    // Identical name: fine, returns the same tables.
    ClassDef::<Widget>::bind(&mut vm, "Widget").unwrap();

    let err = ClassDef::<Widget>::bind(&mut vm, "Gadget").unwrap_err();
    assert!(matches!(err, Fault::NameConflict { .. }));
}

// ===== Constructors =====

#[test]
fn test_default_constructor_produces_owned_instances() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget").unwrap();

    let new = constructor(&vm, "Widget", "new");
    let out = vm.call(&new, &[]).unwrap();
    let id = out.as_foreign().expect("managed instance");
    let cell = vm.cell(id).unwrap();
    assert_eq!(cell.ownership(), Ownership::Owned);
    assert_eq!(cell.type_table(), vm.type_table(TypeToken::of::<Widget>()));
}

#[test]
fn test_spawner_constructor_takes_script_arguments() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget")
        .unwrap()
        .ctor("make", |w: i64, h: i64| Widget { width: w, height: h })
        .method("area", |w: &mut Widget| w.width * w.height);

    let make = constructor(&vm, "Widget", "make");
    let instance = vm.call(&make, &[Value::Int(3), Value::Int(4)]).unwrap();

    let tt = vm.type_table(TypeToken::of::<Widget>()).unwrap();
    let area = vm.get_member(tt, "area");
    assert_eq!(vm.call(&area, &[instance]).unwrap(), Value::Int(12));
}

#[test]
fn test_renamed_primary_constructor() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind_with(
        &mut vm,
        "Widget",
        osier_bind::BindOptions {
            constructor_name: "create".into(),
        },
    )
    .unwrap();

    assert!(matches!(constructor(&vm, "Widget", "create"), Value::Native(_)));
    assert!(constructor(&vm, "Widget", "new").is_nil());
}

#[test]
fn test_opaque_bind_registers_no_constructor() {
    let mut vm = StackVm::new();
    ClassDef::<Tracked>::bind_opaque(&mut vm, "Tracked").unwrap();
    assert!(constructor(&vm, "Tracked", "new").is_nil());
}

// ===== Ownership and finalization =====

#[test]
fn test_owned_instances_are_destroyed_exactly_once_after_collection() {
    let mut vm = StackVm::new();
    let drops = Rc::new(Cell::new(0));
    let counter = drops.clone();
    ClassDef::<Tracked>::bind_opaque(&mut vm, "Tracked")
        .unwrap()
        .ctor("new", move || Tracked {
            drops: counter.clone(),
        });

    let new = constructor(&vm, "Tracked", "new");
    vm.call(&new, &[]).unwrap();
    assert_eq!(drops.get(), 0);

    // Nothing engine-side roots the instance any more.
    vm.collect();
    assert_eq!(drops.get(), 1);
    vm.collect();
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_deleter_reclaims_instances_instead_of_dropping() {
    let mut vm = StackVm::new();
    let drops = Rc::new(Cell::new(0));
    let counter = drops.clone();
    let pool: Rc<std::cell::RefCell<Vec<Tracked>>> = Rc::default();
    let sink = pool.clone();

    ClassDef::<Tracked>::bind_opaque(&mut vm, "Tracked")
        .unwrap()
        .ctor_with_deleter(
            "acquire",
            move || Tracked {
                drops: counter.clone(),
            },
            move |t| sink.borrow_mut().push(t),
        );

    let acquire = constructor(&vm, "Tracked", "acquire");
    vm.call(&acquire, &[]).unwrap();
    vm.collect();

    // Parked in the pool, not destroyed.
    assert_eq!(drops.get(), 0);
    assert_eq!(pool.borrow().len(), 1);
}

#[test]
fn test_unmanaged_instances_are_never_destroyed_by_this_layer() {
    let mut vm = StackVm::new();
    let drops = Rc::new(Cell::new(0));
    let counter = drops.clone();

    let mut def = ClassDef::<Tracked>::bind_opaque(&mut vm, "Tracked").unwrap();
    unsafe {
        def.ctor_unmanaged("attach", move || {
            NonNull::from(Box::leak(Box::new(Tracked {
                drops: counter.clone(),
            })))
        });
    }

    let attach = constructor(&vm, "Tracked", "attach");
    let out = vm.call(&attach, &[]).unwrap();
    let id = out.as_foreign().expect("managed instance");
    assert_eq!(vm.cell(id).unwrap().ownership(), Ownership::Borrowed);

    vm.collect();
    assert!(vm.cell(id).is_none());
    assert_eq!(drops.get(), 0);
}

#[test]
fn test_allocation_failure_degrades_to_nil_and_destroys_the_payload() {
    let mut vm = StackVm::new();
    let drops = Rc::new(Cell::new(0));
    let counter = drops.clone();
    ClassDef::<Tracked>::bind_opaque(&mut vm, "Tracked")
        .unwrap()
        .ctor("new", move || Tracked {
            drops: counter.clone(),
        });

    let new = constructor(&vm, "Tracked", "new");
    vm.fail_next_alloc();
    let out = vm.call(&new, &[]).unwrap();
    assert!(out.is_nil());
    // The rejected cell finalized the freshly spawned payload.
    assert_eq!(drops.get(), 1);
}

// ===== Methods and constants =====

#[test]
fn test_methods_mutate_the_receiver_in_place() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget")
        .unwrap()
        .method("grow", |w: &mut Widget, by: i64| {
            w.width += by;
            w.height += by;
        })
        .method("area", |w: &mut Widget| w.width * w.height);

    let new = constructor(&vm, "Widget", "new");
    let instance = vm.call(&new, &[]).unwrap();

    let tt = vm.type_table(TypeToken::of::<Widget>()).unwrap();
    let grow = vm.get_member(tt, "grow");
    let area = vm.get_member(tt, "area");

    assert_eq!(
        vm.call(&grow, &[instance.clone(), Value::Int(5)]).unwrap(),
        Value::Nil
    );
    assert_eq!(vm.call(&area, &[instance]).unwrap(), Value::Int(25));
}

#[test]
fn test_instances_cross_between_methods_as_typed_handles() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget")
        .unwrap()
        .ctor("make", |w: i64| Widget { width: w, height: 1 })
        .method(
            "absorb",
            |w: &mut Widget, other: ObjRef<Widget>| -> FaultResult<i64> {
                let gained = other.with(|o| o.width)?;
                w.width += gained;
                Ok(w.width)
            },
        );

    let make = constructor(&vm, "Widget", "make");
    let left = vm.call(&make, &[Value::Int(10)]).unwrap();
    let right = vm.call(&make, &[Value::Int(4)]).unwrap();

    let tt = vm.type_table(TypeToken::of::<Widget>()).unwrap();
    let absorb = vm.get_member(tt, "absorb");
    assert_eq!(
        vm.call(&absorb, &[left.clone(), right]).unwrap(),
        Value::Int(14)
    );

    // Absorbing an instance into itself hits the re-entrant borrow guard.
    let err = vm.call(&absorb, &[left.clone(), left]).unwrap_err();
    assert!(matches!(err, Fault::MissingCallee(_)));
}

fn raw_width(vm: &mut dyn Vm) -> FaultResult<u32> {
    let id = vm
        .slot(1)
        .as_foreign()
        .ok_or_else(|| Fault::MissingCallee("raw_width receiver".into()))?;
    let cell = vm
        .cell(id)
        .ok_or_else(|| Fault::MissingCallee("raw_width receiver".into()))?;
    let width = cell.with(|w: &mut Widget| w.width)?;
    vm.set_top(0);
    vm.push(Value::Int(width));
    Ok(1)
}

#[test]
fn test_raw_method_bypasses_argument_extraction() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget")
        .unwrap()
        .ctor("make", |w: i64| Widget { width: w, height: 0 })
        .method_raw("raw_width", raw_width);

    let make = constructor(&vm, "Widget", "make");
    let instance = vm.call(&make, &[Value::Int(77)]).unwrap();

    let tt = vm.type_table(TypeToken::of::<Widget>()).unwrap();
    let width = vm.get_member(tt, "raw_width");
    assert_eq!(vm.call(&width, &[instance]).unwrap(), Value::Int(77));
}

#[test]
fn test_class_constants_live_in_the_type_table() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget")
        .unwrap()
        .constant("MAX_WIDTH", 4096_i64)
        .unwrap()
        .constant("KIND", "widget")
        .unwrap();

    let tt = vm.type_table(TypeToken::of::<Widget>()).unwrap();
    assert_eq!(vm.get_member(tt, "MAX_WIDTH"), Value::Int(4096));
    assert_eq!(vm.get_member(tt, "KIND"), Value::string("widget"));
}

// ===== Class types as module function results =====

#[test]
fn test_module_functions_return_owned_instances_of_bound_classes() {
    let mut vm = StackVm::new();
    ClassDef::<Widget>::bind(&mut vm, "Widget").unwrap();
    ModuleDef::bind(&mut vm, "factory")
        .function("square", |side: i64| Widget {
            width: side,
            height: side,
        });

    let ns = vm.get_global("factory").as_table().unwrap();
    let square = vm.get_member(ns, "square");
    let out = vm.call(&square, &[Value::Int(6)]).unwrap();

    let id = out.as_foreign().expect("managed instance");
    let cell = vm.cell(id).unwrap();
    assert_eq!(cell.ownership(), Ownership::Owned);
    assert_eq!(cell.with(|w: &mut Widget| w.width * w.height).unwrap(), 36);
}
