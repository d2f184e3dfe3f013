use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use runscope::virtual_window::VirtualWindow;

const ITEM_COUNT: usize = 50_000;
const VIEWPORT: f32 = 720.0;

fn bench_fixed(c: &mut Criterion) {
    let mut window = VirtualWindow::fixed(24.0);
    c.bench_function("fixed_compute", |b| {
        let mut offset = 0.0;
        b.iter(|| {
            offset = (offset + 97.0) % (ITEM_COUNT as f32 * 24.0);
            black_box(window.compute(black_box(offset), VIEWPORT, ITEM_COUNT))
        });
    });
}

fn bench_estimated(c: &mut Criterion) {
    for measured in [0usize, 1_000] {
        c.bench_with_input(
            BenchmarkId::new("estimated_compute", measured),
            &measured,
            |b, &measured| {
                let mut window = VirtualWindow::estimated(20.0);
                window.compute(0.0, VIEWPORT, ITEM_COUNT);
                for index in 0..measured {
                    window.set_extent(index * 37 % ITEM_COUNT, 18.0 + (index % 5) as f32 * 6.0);
                }
                let mut offset = 0.0;
                b.iter(|| {
                    offset = (offset + 131.0) % (ITEM_COUNT as f32 * 20.0);
                    black_box(window.compute(black_box(offset), VIEWPORT, ITEM_COUNT))
                });
            },
        );
    }
}

fn bench_drop_front(c: &mut Criterion) {
    c.bench_function("estimated_drop_front", |b| {
        b.iter(|| {
            let mut window = VirtualWindow::estimated(20.0);
            window.compute(0.0, VIEWPORT, ITEM_COUNT);
            window.drop_front(black_box(1_000));
            black_box(window.compute(0.0, VIEWPORT, ITEM_COUNT - 1_000))
        });
    });
}

criterion_group!(benches, bench_fixed, bench_estimated, bench_drop_front);
criterion_main!(benches);
