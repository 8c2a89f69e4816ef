//! Notification fan-out benchmarks.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use statemgmt_core::state::{
    ObservedProperty, ObservedPropertySimple, PropertySubscriber, SinglePropertySubscriber, SubscriberId,
    SubscriberManager, Subscription,
};
use statemgmt_core::view::{RenderScheduler, View};

struct Sink {
    id: SubscriberId,
    calls: Cell<u64>,
}

impl PropertySubscriber for Sink {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn about_to_be_deleted(&self, _owning_view: Option<SubscriberId>) {
        SubscriberManager::delete(self.id);
    }
}

impl SinglePropertySubscriber<u64> for Sink {
    fn has_changed(&self, new_value: &u64) {
        self.calls.set(self.calls.get() + *new_value % 2);
    }
}

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for subscribers in [1usize, 16, 256] {
        SubscriberManager::reset();
        let property = ObservedPropertySimple::new(0u64, None, Some("value"));
        let sinks: Vec<_> = (0..subscribers)
            .map(|_| {
                let sink = Rc::new(Sink {
                    id: SubscriberId::new(),
                    calls: Cell::new(0),
                });
                SubscriberManager::add(&sink).unwrap();
                property.subscribe(Subscription::single(&sink));
                sink
            })
            .collect();

        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &subscribers, |b, _| {
            b.iter(|| {
                next += 1;
                property.set(black_box(next));
            })
        });
        black_box(&sinks);
    }
    group.finish();
}

fn link_chain(c: &mut Criterion) {
    SubscriberManager::reset();
    let source = ObservedPropertySimple::new(0u64, None, None);
    let first = source.clone().create_link(None, None).unwrap();
    let second = first.clone().create_link(None, None).unwrap();

    let mut next = 0u64;
    c.bench_function("link_chain_write", |b| {
        b.iter(|| {
            next += 1;
            second.set(black_box(next));
        })
    });
}

fn batched_render(c: &mut Criterion) {
    SubscriberManager::reset();
    let scheduler = Rc::new(RenderScheduler::new());
    let view = View::new("Bench", Rc::clone(&scheduler));
    let count = view.declare_state("count", 0u64);
    view.set_render({
        let count = count.clone();
        move |_| {
            black_box(count.get());
        }
    });
    scheduler.tick();

    let mut next = 0u64;
    c.bench_function("write_100_then_tick", |b| {
        b.iter(|| {
            for _ in 0..100 {
                next += 1;
                count.set(next);
            }
            scheduler.tick()
        })
    });
}

criterion_group!(benches, fan_out, link_chain, batched_render);
criterion_main!(benches);
