mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use common::{compile_at, medium_source, parse_only};

fn bench_compile(c: &mut Criterion) {
    let medium_src = medium_source();

    let mut group = c.benchmark_group("compile_pipeline");
    group.bench_function("parse_only", |b| {
        b.iter(|| parse_only(black_box(&medium_src)))
    });
    group.bench_function("compile_o0", |b| {
        b.iter(|| {
            let _ = compile_at(black_box(&medium_src), 0);
        })
    });
    group.bench_function("compile_o1", |b| {
        b.iter(|| {
            let _ = compile_at(black_box(&medium_src), 1);
        })
    });
    group.finish();

    let compiled = compile_at(&medium_src, 1);
    let mut group = c.benchmark_group("object");
    group.bench_function("to_bytes", |b| b.iter(|| black_box(&compiled.object).to_bytes()));
    let bytes = compiled.object.to_bytes();
    group.bench_function("from_bytes", |b| {
        b.iter(|| etherlib::bytecode::ObjectFile::from_bytes(black_box(&bytes)))
    });
    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
