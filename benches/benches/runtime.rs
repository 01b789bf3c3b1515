use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use once_cell::sync::Lazy;

use montage_plugin_host::PluginCatalog;
use montage_plugin_sdk::{ClassRegistry, PluginObject};

struct Unit;

impl PluginObject for Unit {}

fn make_unit() -> Box<dyn PluginObject> {
    Box::new(Unit)
}

static REGISTRY: Lazy<ClassRegistry> = Lazy::new(|| {
    let registry = ClassRegistry::new();
    registry.register("bench.unit", make_unit).expect("register");
    registry
});

static CATALOG: Lazy<PluginCatalog> = Lazy::new(|| {
    let catalog = PluginCatalog::new();
    catalog
        .register_static_module("builtin:bench", &*REGISTRY)
        .expect("static module");
    catalog
});

fn plugin_runtime(c: &mut Criterion) {
    let mut group = c.benchmark_group("plugin_runtime");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(100);

    group.bench_function("registry_create_drop", |b| {
        Lazy::force(&REGISTRY);
        b.iter(|| {
            let unit = REGISTRY.create("bench.unit").expect("create");
            drop(unit);
        });
    });

    group.bench_function("catalog_create_drop", |b| {
        Lazy::force(&CATALOG);
        b.iter(|| {
            let unit = CATALOG.create("bench.unit").expect("create");
            drop(unit);
        });
    });

    group.bench_function("catalog_id_resolution", |b| {
        Lazy::force(&CATALOG);
        b.iter(|| CATALOG.module_for("bench.unit"));
    });

    group.finish();
}

criterion_group!(benches, plugin_runtime);
criterion_main!(benches);
