//! Benchmarks for the logging pipeline
//!
//! Run with: cargo bench -p logbus-core
//!
//! These benchmarks establish baselines for:
//! - Producer emit cost (the caller-visible latency)
//! - Record rendering
//! - Rotating file writes with and without rotation

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logbus_core::{
    Diagnostics, Event, Level, LogBusConfig, Message, Pipeline, RecordFormat, RotatingFileSink,
    RotationInterval, RotationPolicy,
};
use tempfile::TempDir;

// ============================================================================
// Emit Benchmarks
// ============================================================================

fn bench_emit(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::with_diagnostics(Arc::new(Diagnostics::with_writer(Box::new(
        std::io::sink(),
    ))));
    pipeline
        .start(
            LogBusConfig::new(temp.path())
                .no_console()
                .with_max_file_bytes(64 * 1024 * 1024),
        )
        .unwrap();
    let log = pipeline.producer("bench").unwrap();

    let mut group = c.benchmark_group("emit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("text", |b| {
        b.iter(|| log.info(black_box("request handled in 12ms")))
    });

    group.bench_function("template", |b| {
        b.iter(|| {
            log.emit_template(
                Level::Info,
                black_box("request {} handled in {}ms"),
                &[&42, &12],
            )
        })
    });

    group.bench_function("filtered_out", |b| {
        let quiet = logbus_core::Producer::new(
            "quiet",
            Level::Error,
            Arc::new(logbus_core::Backlog::unbounded(Arc::new(Diagnostics::default()))),
        );
        b.iter(|| quiet.debug(black_box("never queued")))
    });

    group.finish();
    pipeline.shutdown();
}

// ============================================================================
// Rendering Benchmarks
// ============================================================================

fn bench_render(c: &mut Criterion) {
    let format = RecordFormat::default();
    c.bench_function("render_record", |b| {
        b.iter_batched(
            || {
                Event::new(
                    Level::Warn,
                    Arc::from("bench"),
                    Message::Template {
                        template: "{} of {} slots used".into(),
                        args: vec!["7".into(), "8".into()],
                    },
                )
            },
            |event| black_box(event.render(&format).len()),
            criterion::BatchSize::SmallInput,
        )
    });
}

// ============================================================================
// Sink Benchmarks
// ============================================================================

fn bench_sink_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sink_write");
    let line = "[2026-01-01 00:00:00] [1 main] [INFO] bench: a fairly ordinary record";

    for max_bytes in [0u64, 16 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_bytes),
            &max_bytes,
            |b, &max_bytes| {
                let temp = TempDir::new().unwrap();
                let policy = RotationPolicy::new(RotationInterval::Never, max_bytes);
                let mut sink = RotatingFileSink::open(temp.path(), "bench", policy, 5).unwrap();
                b.iter(|| sink.write(black_box(line)).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_emit, bench_render, bench_sink_write);
criterion_main!(benches);
