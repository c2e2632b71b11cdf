//! Criterion benchmarks for permission rule evaluation.
//!
//! Every client `send`/`publish` and every message delivered to a subscriber
//! runs one rule-list evaluation, so this is the hottest path in the bridge.
//!
//! Run with:
//! ```bash
//! cargo bench --package busbridge-core --bench matcher_bench
//! ```

use std::sync::Arc;

use busbridge_core::{structure_matches, PatternCache, PermissionMatcher, PermissionRule};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn template(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// A rule list of `n` exact-address rules followed by one regex rule, so the
/// regex address is found only after scanning everything.
fn make_rules(n: usize) -> Vec<PermissionRule> {
    let mut rules: Vec<PermissionRule> = (0..n)
        .map(|i| PermissionRule::address(format!("service.{i}")))
        .collect();
    rules.push(
        PermissionRule::address_regex(r"news\.[a-z]+")
            .with_structure(template(json!({"meta": {"lang": "en"}}))),
    );
    rules
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_exact_first_rule(c: &mut Criterion) {
    let matcher = PermissionMatcher::new(make_rules(16), Arc::new(PatternCache::new()));
    c.bench_function("evaluate_exact_first_rule", |b| {
        b.iter(|| matcher.evaluate(black_box("service.0"), None))
    });
}

fn bench_regex_last_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_regex_last_rule");
    let body = json!({"meta": {"lang": "en", "ts": 1}, "text": "hello"});
    for n in [1usize, 16, 128] {
        let matcher = PermissionMatcher::new(make_rules(n), Arc::new(PatternCache::new()));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| matcher.evaluate(black_box("news.sports"), Some(black_box(&body))))
        });
    }
    group.finish();
}

fn bench_structure_match(c: &mut Criterion) {
    let t = template(json!({"a": {"b": {"c": 1}}, "d": "x"}));
    let body = json!({"a": {"b": {"c": 1, "z": 0}, "y": [1, 2, 3]}, "d": "x", "e": null});
    c.bench_function("structure_matches_nested", |b| {
        b.iter(|| structure_matches(Some(black_box(&t)), Some(black_box(&body))))
    });
}

criterion_group!(
    benches,
    bench_exact_first_rule,
    bench_regex_last_rule,
    bench_structure_match
);
criterion_main!(benches);
