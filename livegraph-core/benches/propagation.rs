//! Benchmarks for propagation and teardown
//!
//! Run with: cargo bench

use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livegraph_core::{Cleanup, Cx, DerivedValue, LiveValue, Runtime, Sender, Subscription};

fn source(runtime: &Runtime, stash: &Rc<RefCell<Option<Sender<u64>>>>) -> LiveValue<(), u64> {
    let stash = stash.clone();
    LiveValue::new(runtime, move |_: &(), send: Sender<u64>| {
        send.send(0).expect("no dependents yet");
        *stash.borrow_mut() = Some(send);
        Cleanup::none()
    })
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for width in [10u64, 100, 1000].iter() {
        let runtime = Runtime::new();
        let stash = Rc::new(RefCell::new(None));
        let numbers = source(&runtime, &stash);
        let scaled = DerivedValue::new(&runtime, move |factor: &u64| {
            let numbers = numbers.clone();
            let factor = *factor;
            move |cx: &mut Cx| Ok(numbers.get(cx, ())? * factor)
        });
        let subscriptions: Vec<Subscription> = (0..*width)
            .map(|factor| scaled.subscribe(factor, |v| {
                black_box(v);
            }))
            .collect::<Result<_, _>>()
            .expect("subscribe failed");
        let send = stash.borrow().clone().expect("connected");

        group.throughput(Throughput::Elements(*width));
        group.bench_with_input(BenchmarkId::new("send", width), width, |b, _| {
            let mut n = 0;
            b.iter(|| {
                n += 1;
                send.send(black_box(n)).expect("propagation failed");
            });
        });
        drop(subscriptions);
    }

    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [10usize, 100].iter() {
        let runtime = Runtime::new();
        let stash = Rc::new(RefCell::new(None));
        let numbers = source(&runtime, &stash);

        let mut tail = DerivedValue::new(&runtime, move |_: &()| {
            let numbers = numbers.clone();
            move |cx: &mut Cx| numbers.get(cx, ())
        });
        for _ in 1..*depth {
            let previous = tail.clone();
            tail = DerivedValue::new(&runtime, move |_: &()| {
                let previous = previous.clone();
                move |cx: &mut Cx| Ok(previous.get(cx, ())? + 1)
            });
        }
        let _subscription = tail
            .subscribe((), |v| {
                black_box(v);
            })
            .expect("subscribe failed");
        let send = stash.borrow().clone().expect("connected");

        group.bench_with_input(BenchmarkId::new("send", depth), depth, |b, _| {
            let mut n = 0;
            b.iter(|| {
                n += 1;
                send.send(black_box(n)).expect("propagation failed");
            });
        });
    }

    group.finish();
}

fn bench_subscribe_close(c: &mut Criterion) {
    let runtime = Runtime::new();
    let stash = Rc::new(RefCell::new(None));
    let numbers = source(&runtime, &stash);
    let doubled = DerivedValue::new(&runtime, move |_: &()| {
        let numbers = numbers.clone();
        move |cx: &mut Cx| Ok(numbers.get(cx, ())? * 2)
    });

    c.bench_function("subscribe_close", |b| {
        b.iter(|| {
            let subscription = doubled.subscribe((), |v| {
                black_box(v);
            });
            drop(black_box(subscription));
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_subscribe_close);
criterion_main!(benches);
