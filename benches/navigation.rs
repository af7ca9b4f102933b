use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use stagegate::identity::{Role, SessionRole};
use stagegate::routing::{Navigator, RouteTable};

fn concrete_paths(table: &RouteTable) -> Vec<String> {
    table.routes.iter().map(|r| r.path.replace(":id", "42")).collect()
}

fn bench_navigation(c: &mut Criterion) {
    let table = RouteTable::builtin();
    let nav = Navigator::new(Arc::new(table.clone()));
    let paths = concrete_paths(&table);

    let mut group = c.benchmark_group("navigation");
    group.throughput(Throughput::Elements(paths.len() as u64));

    for role in [
        SessionRole::None,
        SessionRole::Unknown,
        SessionRole::Known(Role::Student),
        SessionRole::Known(Role::SuperAdmin),
    ] {
        group.bench_with_input(BenchmarkId::new("navigate_all", role.as_str()), &role, |b, &role| {
            b.iter(|| {
                for p in &paths {
                    criterion::black_box(nav.navigate_as(p, role, false));
                }
            });
        });
    }

    // Route matching alone, with query strings and trailing slashes
    let noisy: Vec<String> = paths.iter().map(|p| format!("{}/?tab=1", p)).collect();
    group.bench_function("match_path_noisy", |b| {
        b.iter(|| {
            for p in &noisy {
                criterion::black_box(table.match_path(p));
            }
        });
    });

    group.bench_function("validate_table", |b| {
        b.iter(|| criterion::black_box(table.validate().is_ok()));
    });

    group.finish();
}

criterion_group!(benches, bench_navigation);
criterion_main!(benches);
