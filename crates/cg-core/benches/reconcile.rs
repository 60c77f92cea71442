//! Criterion benchmarks for reconciliation passes.
//!
//! Builds a comment list in the arena DOM, indexes every author through a
//! synthetic comment feed, blocks a tenth of them and measures:
//! - The first pass, which injects every control group.
//! - A steady-state pass over an unchanged page.

use std::cell::RefCell;
use std::hint::black_box;
use std::rc::Rc;

use cg_core::{Config, Dom, Engine, ManualClock, MemDom, MemoryDelivery, MemoryStorage};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use serde_json::json;

fn build_engine(n: usize) -> Engine<MemDom> {
    let mut dom = MemDom::new();
    dom.set_location("https://chzzk.naver.com/video/1");
    let root = dom.document();
    let list = dom.element("div", &["comment_list"]);
    dom.append(root, list);

    let mut comments = Vec::with_capacity(n);
    for i in 0..n {
        dom.comment(list, &format!("c{}", i), &format!("nick {}", i), &format!("comment body {}", i));
        comments.push(json!({
            "comment": {"commentId": format!("c{}", i)},
            "user": {"userIdHash": format!("u{}", i % (n / 4).max(1))},
        }));
    }

    let storage = Rc::new(RefCell::new(MemoryStorage::default()));
    let delivery = Rc::new(RefCell::new(MemoryDelivery::default()));
    let mut engine = Engine::new(
        dom,
        Box::new(storage),
        Config::default(),
        Box::new(ManualClock::new(1_700_000_000_000)),
        Box::new(delivery),
    );
    let _ = engine.load_store();
    engine.handle_message(&json!({
        "type": "CHZZK_XHR_DATA",
        "payload": {"content": {"comments": {"data": comments}}},
    }));
    for i in (0..n / 4).step_by(10) {
        engine.toggle_block(&format!("u{}", i), None);
    }
    engine
}

fn bench_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    for &n in &[100usize, 1_000usize] {
        group.bench_with_input(BenchmarkId::new("first_pass", n), &n, |b, &n| {
            b.iter_batched(
                || build_engine(n),
                |mut engine| black_box(engine.reconcile_now()),
                BatchSize::LargeInput,
            )
        });

        let mut engine = build_engine(n);
        engine.reconcile_now();
        group.bench_with_input(BenchmarkId::new("steady_pass", n), &n, |b, &_n| {
            b.iter(|| black_box(engine.reconcile_now()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_passes);
criterion_main!(benches);
