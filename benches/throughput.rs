//! Throughput Benchmark for btd
//!
//! This benchmark measures the protocol tokenizer, the BibTeX entry parser
//! and a full command session over an in-memory stream.

use btd::bibtex::parse_entry;
use btd::commands::{CommandHandler, CommandOptions, Outcome};
use btd::protocol::ProtocolReader;
use btd::storage::BibStore;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

const ENTRY: &str = "@article{knuth1984, author = {Donald E. Knuth}, \
    title = {Literate {P}rogramming}, journal = {The Computer Journal}, \
    volume = 27, number = 2, pages = {97--111}, year = 1984, month = may}\n";

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark token splitting with and without escapes
fn bench_tokenizer(c: &mut Criterion) {
    let rt = runtime();
    let plain = "NUM SHOW 12 LIST HELP ".repeat(1000);
    let escaped = "ATT\\ ACH na\\\\me\\ with\\ spaces 1 ".repeat(1000);

    let mut group = c.benchmark_group("tokenizer");

    group.throughput(Throughput::Bytes(plain.len() as u64));
    group.bench_function("plain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = ProtocolReader::new(plain.as_bytes());
                let mut count = 0usize;
                while let Some(token) = reader.next_token().await.unwrap() {
                    count += token.len();
                }
                black_box(count)
            })
        });
    });

    group.throughput(Throughput::Bytes(escaped.len() as u64));
    group.bench_function("escaped", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = ProtocolReader::new(escaped.as_bytes());
                let mut count = 0usize;
                while let Some(token) = reader.next_token().await.unwrap() {
                    count += token.len();
                }
                black_box(count)
            })
        });
    });

    group.finish();
}

/// Benchmark entry parsing
fn bench_bibtex(c: &mut Criterion) {
    let rt = runtime();
    let input = ENTRY.repeat(100);

    let mut group = c.benchmark_group("bibtex");
    group.throughput(Throughput::Elements(100));

    for check_fields in [false, true] {
        let name = if check_fields { "checked" } else { "unchecked" };
        group.bench_function(name, |b| {
            b.iter(|| {
                rt.block_on(async {
                    let mut reader = ProtocolReader::new(input.as_bytes());
                    for _ in 0..100 {
                        black_box(parse_entry(&mut reader, check_fields).await.unwrap());
                    }
                })
            });
        });
    }

    group.finish();
}

/// Benchmark a command stream against a real store
fn bench_session(c: &mut Criterion) {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BibStore::open(dir.path()).unwrap());
    let handler = CommandHandler::new(Arc::clone(&store), CommandOptions::default());

    rt.block_on(async {
        let input = format!("BIBTEX /bench {}", ENTRY).repeat(50);
        let mut reader = ProtocolReader::new(input.as_bytes());
        while let Some(verb) = reader.next_string().await.unwrap() {
            handler.execute(&verb, &mut reader).await.unwrap();
        }
    });

    let input = "NUM SHOW 7 LIST SHOW 42 ".repeat(100);
    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Elements(400));
    group.bench_function("read_commands", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = ProtocolReader::new(input.as_bytes());
                while let Some(verb) = reader.next_string().await.unwrap() {
                    match handler.execute(&verb, &mut reader).await.unwrap() {
                        Outcome::Reply(reply) => {
                            black_box(reply.serialize());
                        }
                        other => {
                            black_box(other);
                        }
                    }
                }
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_tokenizer, bench_bibtex, bench_session);

criterion_main!(benches);
