//! Criterion benchmarks for the serial line pipeline.
//!
//! The sensor emits two lines every 800 ms, so throughput is never a concern
//! on real hardware; these benches guard against accidental quadratic
//! behaviour when a misbehaving device floods the port.
//!
//! Run with:
//! ```bash
//! cargo bench --package pulse-core --bench parser_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse_core::{parse_bpm, LineAssembler};

fn bench_parse_bpm(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_bpm");

    group.bench_function("labelled_line", |b| {
        b.iter(|| parse_bpm(black_box("BPM: 87")))
    });
    group.bench_function("signal_then_bpm", |b| {
        b.iter(|| parse_bpm(black_box("Signal: 512\nBPM: 87\n")))
    });
    group.bench_function("no_label", |b| {
        b.iter(|| parse_bpm(black_box("Signal: 512 Signal: 498 Signal: 505")))
    });

    group.finish();
}

fn bench_line_assembler(c: &mut Criterion) {
    // Ten sensor bursts split at awkward offsets.
    let stream: String = (60..70)
        .map(|bpm| format!("Signal: {}\r\nBPM: {bpm}\r\n", bpm * 7))
        .collect();
    let chunks: Vec<&str> = stream
        .as_bytes()
        .chunks(7)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect();

    c.bench_function("line_assembler_split_stream", |b| {
        b.iter(|| {
            let mut asm = LineAssembler::new();
            let mut readings = 0usize;
            for chunk in &chunks {
                for line in asm.push(black_box(chunk)) {
                    if parse_bpm(&line).is_some() {
                        readings += 1;
                    }
                }
            }
            readings
        })
    });
}

criterion_group!(benches, bench_parse_bpm, bench_line_assembler);
criterion_main!(benches);
