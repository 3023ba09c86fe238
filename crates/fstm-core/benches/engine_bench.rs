//! Criterion micro-benchmarks for the reference engine.
//!
//! Benchmarks:
//! - Region create/destroy cycle
//! - Read-only and read-write begin/end latency (uncontended)
//! - Word read/write inside a held transaction
//! - Dynamic segment alloc/free cycle

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use fstm_core::{INVALID_SHARED, ReferenceTm, SharedHandle, TmLibrary};

fn criterion_config() -> Criterion {
    Criterion::default().configure_from_args()
}

fn make_region(size: usize, align: usize) -> (ReferenceTm, SharedHandle) {
    let tm = ReferenceTm;
    let shared = tm.create(size, align);
    assert_ne!(shared, INVALID_SHARED);
    (tm, shared)
}

fn bench_create_destroy(c: &mut Criterion) {
    c.bench_function("region_create_destroy_4k", |b| {
        b.iter(|| {
            let tm = ReferenceTm;
            let shared = tm.create(black_box(4096), black_box(8));
            unsafe { tm.destroy(shared) };
        });
    });
}

fn bench_begin_end(c: &mut Criterion) {
    let (tm, shared) = make_region(64, 8);
    c.bench_function("begin_end_read_only", |b| {
        b.iter(|| unsafe {
            let tx = tm.begin(shared, true);
            black_box(tm.end(shared, tx));
        });
    });
    c.bench_function("begin_end_read_write", |b| {
        b.iter(|| unsafe {
            let tx = tm.begin(shared, false);
            black_box(tm.end(shared, tx));
        });
    });
    unsafe { tm.destroy(shared) };
}

fn bench_word_ops(c: &mut Criterion) {
    let (tm, shared) = make_region(64, 8);
    let tx = unsafe { tm.begin(shared, false) };
    let start = unsafe { tm.start(shared) };
    c.bench_function("word_write_read", |b| {
        b.iter(|| unsafe {
            let v = black_box(42u64);
            tm.write(shared, tx, std::ptr::from_ref(&v).cast(), 8, start);
            let mut back = 0u64;
            tm.read(shared, tx, start, 8, std::ptr::from_mut(&mut back).cast());
            black_box(back);
        });
    });
    unsafe {
        tm.end(shared, tx);
        tm.destroy(shared);
    }
}

fn bench_alloc_free(c: &mut Criterion) {
    let (tm, shared) = make_region(64, 8);
    let tx = unsafe { tm.begin(shared, false) };
    c.bench_function("segment_alloc_free_256", |b| {
        b.iter(|| unsafe {
            let mut payload = std::ptr::null_mut();
            tm.alloc(shared, tx, black_box(256), &mut payload);
            tm.free(shared, tx, payload);
        });
    });
    unsafe {
        tm.end(shared, tx);
        tm.destroy(shared);
    }
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_create_destroy, bench_begin_end, bench_word_ops, bench_alloc_free
}
criterion_main!(benches);
