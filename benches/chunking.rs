//! Benchmarks for text chunking strategies.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokenslabs::{
    CharacterTokenizer, Chunk, Chunker, OverlapRefinery, RecursiveChunker, Refinery,
    SentenceChunker, TokenChunker, Tokenizer, WordTokenizer,
};

fn sample_text(size: usize) -> String {
    // Generate realistic text with sentence and paragraph structure
    let sentences = [
        "The quick brown fox jumps over the lazy dog. ",
        "Pack my box with five dozen liquor jugs. ",
        "How vexingly quick daft zebras jump! ",
        "The five boxing wizards jump quickly.\n\n",
        "Sphinx of black quartz, judge my vow. ",
    ];
    let mut text = String::with_capacity(size);
    let mut i = 0;
    while text.len() < size {
        text.push_str(sentences[i % sentences.len()]);
        i += 1;
    }
    text.truncate(size);
    text
}

fn words() -> Arc<dyn Tokenizer> {
    Arc::new(WordTokenizer::new())
}

fn bench_token_chunker(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_chunker");

    for size in [1_000, 10_000, 100_000] {
        let text = sample_text(size);
        let chunker = TokenChunker::new(words(), 128, 16_usize).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("token", size), &text, |b, text| {
            b.iter(|| chunker.chunk(black_box(text)))
        });
    }

    group.finish();
}

fn bench_sentence_chunker(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_chunker");

    for size in [1_000, 10_000, 100_000] {
        let text = sample_text(size);
        let chunker = SentenceChunker::new(words(), 128, 16_usize).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("sentence", size), &text, |b, text| {
            b.iter(|| chunker.chunk(black_box(text)))
        });
    }

    group.finish();
}

fn bench_recursive_chunker(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_chunker");

    for size in [1_000, 10_000, 100_000] {
        let text = sample_text(size);
        let chunker = RecursiveChunker::prose(words(), 128).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("recursive", size), &text, |b, text| {
            b.iter(|| chunker.chunk(black_box(text)))
        });
    }

    group.finish();
}

fn bench_overlap_refinery(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlap_refinery");

    let tok: Arc<dyn Tokenizer> = Arc::new(CharacterTokenizer);
    for size in [1_000, 10_000] {
        let text = sample_text(size);
        let chunks: Vec<Chunk> = RecursiveChunker::prose(tok.clone(), 200)
            .unwrap()
            .chunk(&text)
            .unwrap();
        let refinery = OverlapRefinery::new(tok.clone(), 40).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("refine", size), &chunks, |b, chunks| {
            b.iter(|| refinery.refine(black_box(chunks.clone())))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_token_chunker,
    bench_sentence_chunker,
    bench_recursive_chunker,
    bench_overlap_refinery
);
criterion_main!(benches);
