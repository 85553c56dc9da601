use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use osier_bind::{FnBinding, FromScript, ModuleDef, ToScript, Value, Vm};
use osier_testvm::StackVm;

fn bench_scalars(c: &mut Criterion) {
    let mut vm = StackVm::new();

    c.bench_function("scalar_round_trip", |b| {
        b.iter(|| {
            let v = black_box(123_456_i64).to_value(&mut vm).unwrap();
            i64::from_value(&mut vm, v).unwrap()
        });
    });

    c.bench_function("string_coercion", |b| {
        b.iter(|| i64::from_value(&mut vm, black_box(Value::string("98765"))).unwrap());
    });
}

fn bench_sequences(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequences");
    group.throughput(Throughput::Elements(64));

    group.bench_function("vec_write_read_64", |b| {
        b.iter_batched(
            StackVm::new,
            |mut vm| {
                let v = (0..64_i64).collect::<Vec<_>>().to_value(&mut vm).unwrap();
                Vec::<i64>::from_value(&mut vm, v).unwrap()
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_erased_calls(c: &mut Criterion) {
    let mut vm = StackVm::new();
    let add = FnBinding::function("add", |a: i64, b: i64| a + b).into_value();

    c.bench_function("erased_two_arg_call", |b| {
        b.iter(|| {
            vm.call(black_box(&add), &[Value::Int(2), Value::Int(40)])
                .unwrap()
        });
    });

    let mut lookup_vm = StackVm::new();
    ModuleDef::bind(&mut lookup_vm, "math").function("mul", |a: i64, b: i64| a * b);
    let ns = lookup_vm.get_global("math").as_table().unwrap();
    let mul = lookup_vm.get_member(ns, "mul");

    c.bench_function("module_function_call", |b| {
        b.iter(|| {
            lookup_vm
                .call(black_box(&mul), &[Value::Int(6), Value::Int(7)])
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_scalars, bench_sequences, bench_erased_calls);
criterion_main!(benches);
