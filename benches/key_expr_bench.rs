use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keysub::KeyExpr;

const MULTI_WILDCARD: &str = "**";
const DEMO: &str = "mqtt/demo/**";
const MULTIPLE_SINGLE_WILDCARDS: &str = "fleet/*/sensors/*";
const SHORT_KEY: &str = "mqtt/demo/sensor/temp";
const LONG_KEY_EXPR: &str = "id/00112233445566778899aabbccddeeff/info/token1/*/tokenabzdd/toke/**/kjadslfha/iiiiiäöü/--__--/*/jjkkll/**";
const STACKED_MULTI_WILDCARDS: &str = "**/a/**/a/**/a/**/a/**/a/**/a/**/b";
const LONG_TOPIC: &str = "id/00112233445566778899aabbccddeeff/info/token1/x/tokenabzdd/toke/a/b/c/d/kjadslfha/iiiiiäöü/--__--/y/jjkkll/end";

fn validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    group.bench_function("multi wildcard", |b| b.iter(|| KeyExpr::new(black_box(MULTI_WILDCARD)).is_ok()));
    group.bench_function("demo", |b| b.iter(|| KeyExpr::new(black_box(DEMO)).is_ok()));
    group.bench_function("short mixed", |b| b.iter(|| KeyExpr::new(black_box(MULTIPLE_SINGLE_WILDCARDS)).is_ok()));
    group.bench_function("short", |b| b.iter(|| KeyExpr::new(black_box(SHORT_KEY)).is_ok()));
    group.bench_function("long", |b| b.iter(|| KeyExpr::new(black_box(LONG_KEY_EXPR)).is_ok()));
}

fn matches(c: &mut Criterion) {
    let demo = KeyExpr::new(DEMO).unwrap();
    let mixed = KeyExpr::new(MULTIPLE_SINGLE_WILDCARDS).unwrap();
    let long = KeyExpr::new(LONG_KEY_EXPR).unwrap();

    let mut group = c.benchmark_group("matches");
    group.bench_function("demo", |b| b.iter(|| demo.matches(black_box(SHORT_KEY))));
    group.bench_function("short mixed miss", |b| b.iter(|| mixed.matches(black_box(SHORT_KEY))));
    group.bench_function("long", |b| b.iter(|| long.matches(black_box(LONG_TOPIC))));

    let stacked = KeyExpr::new(STACKED_MULTI_WILDCARDS).unwrap();
    let repeated = vec!["a"; 80].join("/");
    group.bench_function("stacked multi wildcards miss", |b| {
        b.iter(|| stacked.matches(black_box(&repeated)))
    });
}

criterion_group!(benches, validate, matches);
criterion_main!(benches);
