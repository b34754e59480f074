//! Criterion benchmarks for marksync-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: local store DDL init + migration overhead.
//! 2. **diff**: line diffs of growing files with scattered edits.
//! 3. **relocation**: moving many marker locations through one diff.
//! 4. **matcher**: best-matching-line fallback.
//! 5. **cache**: decision table, directive application and index upkeep.
//! 6. **resolve**: a full real-time batch through the users manager.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/marksync-core/Cargo.toml
//! # Run only the diff group:
//! cargo bench --manifest-path crates/marksync-core/Cargo.toml -- diff
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use rusqlite::Connection;
use serde_json::{json, Value};

use marksync_core::api::{EntitySource, MarkerLocationSource, MarkerSource};
use marksync_core::cache::{apply_directive, decide, EntityCache};
use marksync_core::documents::OpenDocuments;
use marksync_core::location::{best_matching_line, diff_text, relocate_all};
use marksync_core::models::{
    Codemark, Directive, Entity, FileStream, Incoming, LocationArray, Marker, MarkerLocation,
    RawMessage, User,
};
use marksync_core::store::schema::init_schema;
use marksync_core::telemetry::LogErrorReporter;
use marksync_core::vcs::GitVersionControl;
use marksync_core::{Managers, SessionContext, Sources, SyncConfig, SyncResult};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `n` lines of plausible source text.
fn source_text(n: usize) -> String {
    (0..n)
        .map(|i| format!("    let value_{i} = compute(input_{i}, {i});\n"))
        .collect()
}

/// Copy of `text` with every `stride`-th line replaced and a block inserted
/// every `4 * stride` lines.
fn edited(text: &str, stride: usize) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for (i, line) in text.lines().enumerate() {
        if i % (4 * stride) == 0 {
            out.push_str("    // inserted block\n    trace();\n");
        }
        if i % stride == 0 {
            out.push_str(&format!("    let changed_{i} = 0;\n"));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn user(id: &str, version: u64) -> User {
    serde_json::from_value(json!({
        "id": id,
        "version": version,
        "username": format!("user_{id}"),
        "email": format!("{id}@example.com"),
        "teamIds": ["t1", "t2"]
    }))
    .unwrap()
}

/// Source with nothing on the server side.
struct EmptySource;

impl<T: Entity> EntitySource<T> for EmptySource {
    fn fetch_by_id(&self, _id: &str) -> SyncResult<Option<T>> {
        Ok(None)
    }
}

impl MarkerSource for EmptySource {
    fn fetch_by_stream(&self, _stream_id: &str) -> SyncResult<Vec<Marker>> {
        Ok(Vec::new())
    }

    fn update_commit_hash_when_created(
        &self,
        _marker_id: &str,
        _commit_hash: &str,
    ) -> SyncResult<Option<Marker>> {
        Ok(None)
    }
}

impl MarkerLocationSource for EmptySource {
    fn create_marker_locations(
        &self,
        _stream_id: &str,
        _commit_hash: &str,
        _locations: &IndexMap<String, LocationArray>,
    ) -> SyncResult<()> {
        Ok(())
    }
}

fn bench_managers(data_dir: &std::path::Path) -> Managers {
    let source = Arc::new(EmptySource);
    let sources = Sources {
        codemarks: source.clone() as Arc<dyn EntitySource<Codemark>>,
        users: source.clone() as Arc<dyn EntitySource<User>>,
        streams: source.clone() as Arc<dyn EntitySource<FileStream>>,
        markers: source.clone() as Arc<dyn MarkerSource>,
        marker_locations: source as Arc<dyn MarkerLocationSource>,
    };
    let context = SessionContext::new(
        SyncConfig::default().with_data_dir(data_dir),
        sources,
        Arc::new(GitVersionControl::new()),
        Arc::new(OpenDocuments::new()),
        Arc::new(LogErrorReporter),
    );
    Managers::new(Arc::new(context))
}

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            init_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

// ---------------------------------------------------------------------------
// 2. Diff
// ---------------------------------------------------------------------------

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for size in [200usize, 2_000, 10_000] {
        let old = source_text(size);
        let new = edited(&old, 50);
        group.bench_with_input(BenchmarkId::new("scattered_edits", size), &size, |b, _| {
            b.iter(|| diff_text(black_box(&old), black_box(&new)));
        });
    }
    let old = source_text(5_000);
    group.bench_function("identical_5000", |b| {
        b.iter(|| diff_text(black_box(&old), black_box(&old)));
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Relocation
// ---------------------------------------------------------------------------

fn bench_relocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("relocation");
    let old = source_text(5_000);
    let new = edited(&old, 40);
    let hunks = diff_text(&old, &new);

    for count in [10usize, 500] {
        let locations: IndexMap<String, MarkerLocation> = (0..count)
            .map(|i| {
                let line = (i * 9 % 4_990 + 1) as u32;
                let id = format!("m{i}");
                (id.clone(), MarkerLocation::new(id, line, 5, line + 3, 20))
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("relocate_all", count), &count, |b, _| {
            b.iter(|| relocate_all(black_box(&locations), black_box(&hunks)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 4. Matcher
// ---------------------------------------------------------------------------

fn bench_matcher(c: &mut Criterion) {
    let text = source_text(3_000);
    c.bench_function("best_matching_line_3000", |b| {
        b.iter(|| {
            best_matching_line(
                black_box(&text),
                black_box("let value_2750 = compute(input_2750, 2750);"),
            )
        });
    });
}

// ---------------------------------------------------------------------------
// 5. Cache
// ---------------------------------------------------------------------------

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let cached = user("u1", 7);
    let directive_value = json!({
        "id": "u1",
        "$set": {"fullName": "Ada Lovelace"},
        "$addToSet": {"teamIds": {"$each": ["t3", "t4"]}},
        "$version": {"before": 7, "after": 8}
    });
    let directive = Directive::parse(&directive_value).unwrap();
    let incoming: Incoming<User> = Incoming::Directive(directive.clone());

    group.bench_function("decide_directive", |b| {
        b.iter(|| decide(black_box(&incoming), Some(black_box(&cached))).unwrap());
    });

    group.bench_function("apply_directive", |b| {
        b.iter(|| apply_directive(black_box(&cached), black_box(&directive)).unwrap());
    });

    group.bench_function("set_1000_indexed", |b| {
        let users: Vec<User> = (0..1_000).map(|i| user(&format!("u{i}"), 1)).collect();
        b.iter(|| {
            let cache: EntityCache<User> = EntityCache::default();
            for u in &users {
                cache.set(u.clone(), None);
            }
            black_box(cache.len());
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 6. Resolve
// ---------------------------------------------------------------------------

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let data_dir = std::env::temp_dir().join("marksync-bench");

    let entities: Vec<Value> = (0..1_000)
        .map(|i| serde_json::to_value(user(&format!("u{i}"), 2)).unwrap())
        .collect();
    let entity_batch = RawMessage::new("users", entities);
    group.bench_function("fresh_entities_1000", |b| {
        b.iter(|| {
            let managers = bench_managers(&data_dir);
            black_box(managers.users.resolve_current(&entity_batch).unwrap());
        });
    });

    let directives: Vec<Value> = (0..1_000)
        .map(|i| {
            json!({
                "id": format!("u{i}"),
                "$set": {"fullName": format!("User {i}")},
                "$version": {"before": 2, "after": 3}
            })
        })
        .collect();
    let directive_batch = RawMessage::new("users", directives);
    group.bench_function("directives_over_cached_1000", |b| {
        b.iter(|| {
            let managers = bench_managers(&data_dir);
            managers.users.resolve_current(&entity_batch).unwrap();
            black_box(managers.users.resolve_changes(&directive_batch).unwrap());
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_schema_init,
    bench_diff,
    bench_relocation,
    bench_matcher,
    bench_cache,
    bench_resolve,
);
criterion_main!(benches);
