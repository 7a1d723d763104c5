use std::sync::Arc;
use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use stratadb::{BufferPoolConfig, BufferPoolManager};

fn create_buffer_pool(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let config = BufferPoolConfig {
        pool_size,
        replacer_k: 2,
    };
    let buffer_pool = Arc::new(BufferPoolManager::new(config, file.path()).unwrap());
    (buffer_pool, file)
}

fn bench_fetch_resident(c: &mut Criterion) {
    let (buffer_pool, _file) = create_buffer_pool(64);
    let mut page_ids = Vec::new();
    for _ in 0..32 {
        let (_, page_id) = buffer_pool.new_page().unwrap();
        buffer_pool.unpin_page(page_id, false);
        page_ids.push(page_id);
    }

    let mut cursor = 0;
    c.bench_function("fetch_resident_page", |b| {
        b.iter(|| {
            let page_id = page_ids[cursor % page_ids.len()];
            cursor += 1;
            let _page = buffer_pool.fetch_page(page_id).unwrap();
            buffer_pool.unpin_page(page_id, false);
        })
    });
}

fn bench_eviction_churn(c: &mut Criterion) {
    // Pool much smaller than the working set: every fetch evicts
    let (buffer_pool, _file) = create_buffer_pool(8);
    let mut page_ids = Vec::new();
    for _ in 0..64 {
        let (_, page_id) = buffer_pool.new_page().unwrap();
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    let mut cursor = 0;
    c.bench_function("eviction_churn", |b| {
        b.iter(|| {
            let page_id = page_ids[cursor % page_ids.len()];
            cursor += 7;
            let _page = buffer_pool.fetch_page(page_id).unwrap();
            buffer_pool.unpin_page(page_id, false);
        })
    });
}

criterion_group!(benches, bench_fetch_resident, bench_eviction_churn);
criterion_main!(benches);
