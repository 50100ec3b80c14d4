//! Criterion benchmarks for the proctor message codec.
//!
//! The largest message the server sends is the overview payload, so the
//! benchmark covers a small control message and an overview for a long test.
//!
//! Run with:
//! ```bash
//! cargo bench --package proctor-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use proctor_core::protocol::codec::{decode_message, encode_message};
use proctor_core::{Message, MessageType, Task, Test};

fn make_next_task() -> Message {
    Message::new("Client12", MessageType::NextTask, "731904")
}

fn make_overview(task_count: i64) -> Message {
    let test = Test {
        id: 1,
        name: "Bench".to_string(),
        tasks: (0..task_count)
            .map(|id| Task {
                id,
                question: format!("Explain concept number {id} in your own words."),
                answers: Vec::new(),
                kind: "text".to_string(),
            })
            .collect(),
    };
    Message::from_server(MessageType::SendOverview, "731904")
        .with_arg("overview", test.overview())
        .with_arg("countOfTasks", test.task_count())
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, msg) in [
        ("next_task", make_next_task()),
        ("overview_50", make_overview(50)),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, msg) in [
        ("next_task", make_next_task()),
        ("overview_50", make_overview(50)),
    ] {
        let bytes = encode_message(&msg).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
