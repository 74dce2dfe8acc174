//! Benchmarks for the three conversion pipelines.
//! Run with: cargo bench -p wikimark-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wikimark_core::{markdown_to_storage, markdown_to_tree, storage_to_markdown, StorageOptions};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

fn release_notes() -> String {
    std::fs::read_to_string(fixture_path("release_notes.md")).unwrap()
}

/// Large synthetic document (~100 KB): prose with nested macros every few paragraphs.
fn large_markdown() -> String {
    let paragraph = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Sed do eiusmod tempor incididunt ut labore.\n\n";
    let block = format!(
        "{}[INFO title=\"Note\"]\n**Nested** content here. [TOC]\n[/INFO]\n\n[CODE language=rust]\nfn main() {{}}\n[/CODE]\n\n",
        paragraph.repeat(8)
    );
    block.repeat(100)
}

fn bench_to_storage_small(c: &mut Criterion) {
    let input = release_notes();
    c.bench_function("to_storage_small", |b| {
        b.iter(|| black_box(markdown_to_storage(black_box(&input)).unwrap()))
    });
}

fn bench_to_storage_large(c: &mut Criterion) {
    let input = large_markdown();
    c.bench_function("to_storage_large", |b| {
        b.iter(|| black_box(markdown_to_storage(black_box(&input)).unwrap()))
    });
}

fn bench_to_markdown_large(c: &mut Criterion) {
    let storage = markdown_to_storage(&large_markdown()).unwrap();
    let options = StorageOptions::default();
    c.bench_function("to_markdown_large", |b| {
        b.iter(|| black_box(storage_to_markdown(black_box(&storage), &options).unwrap()))
    });
}

fn bench_to_tree_large(c: &mut Criterion) {
    let input = large_markdown();
    c.bench_function("to_tree_large", |b| {
        b.iter(|| black_box(markdown_to_tree(black_box(&input)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_to_storage_small,
    bench_to_storage_large,
    bench_to_markdown_large,
    bench_to_tree_large
);
criterion_main!(benches);
