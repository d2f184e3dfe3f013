use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use runscope::runs::{EventKind, EventTime, MetricEvent};
use runscope::telemetry::{DedupKey, DedupKeyedLog};

const EVENT_COUNT: usize = 20_000;

fn telemetry_events() -> Vec<MetricEvent> {
    (0..EVENT_COUNT)
        .map(|i| {
            let step = i as f64;
            let mut event = MetricEvent {
                kind: Some(EventKind::Telemetry),
                ts: Some(EventTime::Epoch(1_700_000_000.0 + step)),
                step: Some(step),
                loss: Some(1.0 / (1.0 + step)),
                lr: Some(1e-4),
                ..MetricEvent::default()
            };
            event.metrics.insert("accuracy".into(), step / EVENT_COUNT as f64);
            event
        })
        .collect()
}

fn bench_key(c: &mut Criterion) {
    let events = telemetry_events();
    c.bench_function("dedup_key", |b| {
        b.iter(|| {
            for event in &events[..1_000] {
                black_box(DedupKey::of(black_box(event)));
            }
        });
    });
}

fn bench_append(c: &mut Criterion) {
    let events = telemetry_events();
    for capacity in [1_000, 5_000] {
        c.bench_with_input(
            BenchmarkId::new("append_with_eviction", capacity),
            &events,
            |b, events| {
                b.iter(|| {
                    let mut log = DedupKeyedLog::with_capacity(capacity);
                    for event in events {
                        log.append(black_box(event.clone()));
                    }
                    black_box(log.len())
                });
            },
        );
    }
}

fn bench_overlap(c: &mut Criterion) {
    let events = telemetry_events();
    let (history, live) = events.split_at(EVENT_COUNT / 2);
    let mut seeded = DedupKeyedLog::with_capacity(EVENT_COUNT);
    for event in history {
        seeded.append(event.clone());
    }
    let replay: Vec<MetricEvent> = history[history.len() - 500..]
        .iter()
        .chain(&live[..500])
        .cloned()
        .collect();
    c.bench_function("history_overlap", |b| {
        b.iter(|| {
            let mut log = seeded.clone();
            for event in &replay {
                log.append(black_box(event.clone()));
            }
            black_box(log.len())
        });
    });
}

criterion_group!(benches, bench_key, bench_append, bench_overlap);
criterion_main!(benches);
