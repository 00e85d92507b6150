//! Registry benchmark: Measure link churn and participant lifecycle.
//!
//! Target: < 100ns per listen/stop pair

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay::Hub;

fn listen_stop_pair(c: &mut Criterion) {
    let hub = Hub::new();
    let sender = hub.endpoint("sender");
    let recipient = hub.endpoint("recipient");

    c.bench_function("listen_stop_pair", |b| {
        b.iter(|| {
            recipient.listen_to(black_box(sender.id())).unwrap();
            recipient.stop_listening(black_box(sender.id()))
        })
    });
}

fn attach_and_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("attach_and_destroy");

    for links in [0usize, 16, 128] {
        let hub = Hub::new();
        let listeners: Vec<_> = (0..links).map(|_| hub.endpoint("listener")).collect();

        group.bench_with_input(BenchmarkId::new("listeners", links), &links, |b, _| {
            b.iter(|| {
                let sender = hub.endpoint("sender");
                for listener in &listeners {
                    listener.listen_to(sender.id()).unwrap();
                }
                drop(black_box(sender));
            })
        });
    }
    group.finish();
}

criterion_group!(benches, listen_stop_pair, attach_and_destroy);
criterion_main!(benches);
