use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use playpulse_core::RawEvent;
use playpulse_sessions::{CostTable, Transformer};
use serde_json::json;

/// Synthetic export: `players` users each playing `levels` levels, with a
/// start, a booster purchase and a terminal event per session.
fn synthetic_batch(players: usize, levels: usize) -> Vec<RawEvent> {
    let mut events = Vec::with_capacity(players * levels * 3);
    for p in 0..players {
        for l in 0..levels {
            let t = (p * levels + l) as i64 * 60;
            let base = json!({"userID": format!("u{p}"), "levelID": l});
            events.push(RawEvent::new("missionStart", t, base.clone()));
            events.push(RawEvent::new(
                "booster_used",
                t + 10,
                json!({"userID": format!("u{p}"), "levelID": l, "booster_hammer": 1}),
            ));
            let terminal = if l % 3 == 0 { "missionFail" } else { "missionComplete" };
            events.push(RawEvent::new(terminal, t + 45, base));
        }
    }
    events
}

fn bench_transform(c: &mut Criterion) {
    let transformer = Transformer::new(CostTable::new().with_unit_cost("booster_hammer", 120));
    let mut group = c.benchmark_group("transform");

    for players in [10usize, 100, 1_000] {
        let batch = synthetic_batch(players, 20);
        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(players), &batch, |b, batch| {
            b.iter(|| transformer.transform(black_box(batch)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transform);
criterion_main!(benches);
