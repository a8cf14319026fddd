//! Benchmarks for price history and payload parsing

use chrono::NaiveTime;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orderbook_stream::history::PriceHistory;
use orderbook_stream::parser::{PriceSample, SseDecoder};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn create_history(len: usize) -> PriceHistory {
    let mut rng = StdRng::seed_from_u64(1);
    let mut history = PriceHistory::new(20);
    let at = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    for i in 0..len {
        history.apply(100.0 + (i % 7) as f64 * 0.25, at, &mut rng);
    }
    history
}

fn benchmark_apply(c: &mut Criterion) {
    let mut history = create_history(20);
    let mut rng = StdRng::seed_from_u64(2);
    let at = NaiveTime::from_hms_opt(9, 30, 1).unwrap();
    let mut price = 100.0;

    c.bench_function("history_apply_full", |b| {
        b.iter(|| {
            price += 0.01;
            history.apply(black_box(price), at, &mut rng);
        })
    });
}

fn benchmark_update(c: &mut Criterion) {
    let history = create_history(20);
    let mut rng = StdRng::seed_from_u64(3);
    let at = NaiveTime::from_hms_opt(9, 30, 2).unwrap();

    c.bench_function("history_update_pure", |b| {
        b.iter(|| {
            black_box(history.update(black_box(101.0), at, &mut rng));
        })
    });
}

fn benchmark_parse(c: &mut Criterion) {
    let chunk = b"data: {\"price\": 100.4821}\n\n".repeat(16);

    c.bench_function("decode_and_parse_16_events", |b| {
        b.iter(|| {
            let mut decoder = SseDecoder::new();
            for data in decoder.push(black_box(&chunk)).unwrap_or_default() {
                black_box(PriceSample::parse(&data).ok());
            }
        })
    });
}

criterion_group!(benches, benchmark_apply, benchmark_update, benchmark_parse);
criterion_main!(benches);
