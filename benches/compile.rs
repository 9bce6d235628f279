//! Benchmark suite for the query compiler.
//!
//! Covers literal escaping, filter compilation, and full intent → SQL
//! compilation with and without a warm fragment cache.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pglayer::query::{
    compile, escape, CompareOp, FilterNode, FragmentCache, QueryBuilder, SearchAnchor, SqlValue,
};

fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape");

    group.bench_function("plain_string", |b| {
        let value = SqlValue::from("an ordinary description with no quoting");
        b.iter(|| escape(black_box(&value)))
    });

    group.bench_function("quoted_string", |b| {
        let value = SqlValue::from(r"O'Brien's \ favourite 'path'");
        b.iter(|| escape(black_box(&value)))
    });

    group.bench_function("array", |b| {
        let value = SqlValue::Array((0..32).map(SqlValue::Int).collect());
        b.iter(|| escape(black_box(&value)))
    });

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    group.bench_function("simple_find", |b| {
        let cache = FragmentCache::new();
        b.iter(|| {
            let q = QueryBuilder::table("users").find();
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.bench_function("filtered_find", |b| {
        let cache = FragmentCache::new();
        b.iter(|| {
            let q = QueryBuilder::table("users")
                .fields(["id", "name", "email"])
                .where_(
                    "age",
                    CompareOp::Gt,
                    SqlValue::Int(18),
                )
                .where_eq("status", "active")
                .search("name", "ann", SearchAnchor::Contains)
                .or_where(vec![
                    FilterNode::Compare {
                        field: "role".into(),
                        op: CompareOp::Eq,
                        value: SqlValue::from("admin"),
                    },
                    FilterNode::In {
                        field: "team".into(),
                        values: vec![SqlValue::Int(1), SqlValue::Int(2)],
                    },
                ])
                .sort("name_asc")
                .sort("created_desc")
                .take(50)
                .skip(100)
                .find();
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.bench_function("insert_payload", |b| {
        let cache = FragmentCache::new();
        b.iter(|| {
            let q = QueryBuilder::table("scores")
                .set("player", "ann")
                .set("+score", 5i64)
                .set(">best", 100i64)
                .set("!active", SqlValue::Null)
                .set("=created", "NOW()")
                .primary_key("id")
                .insert();
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.bench_function("update_counting_cte", |b| {
        let cache = FragmentCache::new();
        b.iter(|| {
            let q = QueryBuilder::table("scores")
                .set("+score", 5i64)
                .where_eq("player", "ann")
                .update();
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.bench_function("grouped_scalar", |b| {
        let cache = FragmentCache::new();
        b.iter(|| {
            let q = QueryBuilder::table("orders")
                .where_(
                    "created",
                    CompareOp::Gt,
                    SqlValue::from("2024-01-01"),
                )
                .scalar_group("region", Some("amount".into()));
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.finish();
}

fn bench_fragment_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_cache");

    group.bench_function("cold", |b| {
        b.iter(|| {
            let cache = FragmentCache::new();
            let q = QueryBuilder::table("articles")
                .fields(["id", "title§", "body§"])
                .language("_en")
                .sort("title§_asc")
                .find();
            compile(black_box(&q), &cache).unwrap()
        })
    });

    group.bench_function("warm", |b| {
        let cache = FragmentCache::new();
        let q = QueryBuilder::table("articles")
            .fields(["id", "title§", "body§"])
            .language("_en")
            .sort("title§_asc")
            .find();
        compile(&q, &cache).unwrap();
        b.iter(|| compile(black_box(&q), &cache).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_escape, bench_compile, bench_fragment_cache);
criterion_main!(benches);
