use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_core::native::{FunctionFlags, FunctionInfo, ParamFlags, PropertyInfo, TypeTag};
use tether_core::{Direction, NativePtr, ToggleQueue};
use tether_sim::Harness;

fn ptrs(count: u64) -> Vec<NativePtr> {
    (1..=count).filter_map(|i| NativePtr::from_raw(i * 0x40)).collect()
}

fn bench_toggle_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("toggle_queue");

    for count in [16u64, 256, 4096] {
        let objects = ptrs(count);
        group.throughput(Throughput::Elements(count * 2));
        group.bench_with_input(BenchmarkId::new("enqueue_drain", count), &objects, |b, objects| {
            let queue = ToggleQueue::new();
            b.iter(|| {
                for ptr in objects {
                    queue.enqueue(*ptr, Direction::Down);
                    queue.enqueue(*ptr, Direction::Up);
                }
                queue.drain(|event| {
                    black_box(event);
                })
            });
        });
    }

    let objects = ptrs(256);
    group.bench_function("cancel_balanced", |b| {
        let queue = ToggleQueue::new();
        b.iter(|| {
            for ptr in &objects {
                queue.enqueue(*ptr, Direction::Up);
                queue.enqueue(*ptr, Direction::Down);
            }
            for ptr in &objects {
                black_box(queue.cancel(*ptr));
            }
        });
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let h = Harness::new().unwrap();
    let widget = h
        .native
        .class("Widget")
        .info(|info| {
            let mut info = info;
            for i in 0..64 {
                info = info
                    .with_property(PropertyInfo::new(
                        format!("prop-{i}"),
                        ParamFlags::READABLE | ParamFlags::WRITABLE,
                        TypeTag::Int32,
                    ))
                    .with_method(FunctionInfo::new(format!("method_{i}"), FunctionFlags::IS_METHOD, 0));
            }
            info
        })
        .build();
    let ptr = h.native.instantiate(widget);
    let wrapper = h.ctx.wrapper_for(ptr).unwrap();

    let mut group = c.benchmark_group("resolution");

    group.bench_function("cached_property", |b| {
        h.ctx.resolve(widget, "prop_63").unwrap();
        b.iter(|| h.ctx.resolve(widget, black_box("prop_63")).unwrap());
    });

    group.bench_function("cached_absent", |b| {
        h.ctx.resolve(widget, "missing").unwrap();
        b.iter(|| h.ctx.resolve(widget, black_box("missing")).unwrap());
    });

    group.bench_function("wrapper_lookup", |b| {
        b.iter(|| h.ctx.lookup(wrapper, black_box("method_32")).unwrap());
    });

    group.bench_function("wrapper_for_known", |b| {
        b.iter(|| h.ctx.wrapper_for(black_box(ptr)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_toggle_queue, bench_resolution);
criterion_main!(benches);
