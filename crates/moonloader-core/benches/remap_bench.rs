use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use moonloader_core::{
    CompilationCache, CompiledArtifact, Dialect, ErrorRemapper, LineMap, LoaderConfig, LuaError,
    MockFileSystem, UpdateSignal, Vfs,
};

fn remapper(artifacts: usize) -> ErrorRemapper {
    let config = LoaderConfig::default();
    let cache = Arc::new(CompilationCache::new());
    for i in 0..artifacts {
        cache.upsert(CompiledArtifact {
            source_path: format!("addon/file{}.moon", i),
            full_source_path: format!("lua/addon/file{}.moon", i),
            output_path: format!("addon/file{}.lua", i),
            full_output_path: format!("cache/moonloader/lua/addon/file{}.lua", i),
            update_signal: UpdateSignal::from_secs(1),
            dialect: Dialect::MoonScript,
            line_map: (1..2000u32).step_by(3).map(|l| (l, l / 2 + 1)).collect::<LineMap>(),
        });
    }
    let vfs = Vfs::new(Arc::new(MockFileSystem::new()), config.search_paths.clone());
    ErrorRemapper::new(cache, vfs, &config)
}

fn bench_remap_stack_entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("remap_stack_entry");
    for artifacts in [10, 1000] {
        let remapper = remapper(artifacts);
        group.bench_with_input(BenchmarkId::from_parameter(artifacts), &remapper, |b, r| {
            b.iter(|| r.remap_stack_entry(black_box("cache/moonloader/lua/addon/file7.lua"), 1234))
        });
    }
    group.finish();
}

fn bench_remap_error(c: &mut Criterion) {
    let remapper = remapper(100);
    let error = LuaError::new(
        "cache/moonloader/lua/addon/file3.lua:1500: bad argument #1 to 'x' \
         (cache/moonloader/lua/addon/file4.lua:12: expected string)",
    )
    .with_frame("[C]", -1)
    .with_frame("cache/moonloader/lua/addon/file3.lua", 1500)
    .with_frame("cache/moonloader/lua/addon/file9.lua", 77)
    .with_frame("lua/autorun/plain.lua", 3);

    c.bench_function("remap_error", |b| b.iter(|| remapper.remap_error(black_box(&error))));

    let plain =
        LuaError::new("lua/autorun/plain.lua:3: boom").with_frame("lua/autorun/plain.lua", 3);
    c.bench_function("remap_error_pass_through", |b| {
        b.iter(|| remapper.remap_error(black_box(&plain)))
    });
}

criterion_group!(benches, bench_remap_stack_entry, bench_remap_error);
criterion_main!(benches);
