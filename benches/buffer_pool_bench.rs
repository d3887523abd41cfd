use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use sayandb::storage::buffer::BufferPoolManager;

// Create temporary db for benchmarking
fn create_bench_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn populate(buffer_pool: &BufferPoolManager, count: usize) -> Vec<i32> {
    let mut page_ids = Vec::with_capacity(count);
    for i in 0..count {
        let (page_id, page) = buffer_pool.new_page().unwrap();
        {
            let mut page_guard = page.write();
            page_guard.data[0..8].copy_from_slice(&(i as u64).to_le_bytes());
        }
        assert!(buffer_pool.unpin_page(page_id, true));
        page_ids.push(page_id);
    }
    page_ids
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [16usize, 128, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_fetch", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size);
            let page_ids = populate(&buffer_pool, size);

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random_fetch", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size);
            let page_ids = populate(&buffer_pool, size);

            let mut rng = rand::thread_rng();
            let random_indices: Vec<usize> =
                (0..size).map(|_| rng.gen_range(0..size)).collect();

            b.iter(|| {
                for &idx in &random_indices {
                    let page_id = page_ids[idx];
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });

        // A pool at half the working set exercises the LRU-K eviction path.
        group.bench_with_input(BenchmarkId::new("thrashing_fetch", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size / 2 + 1);
            let page_ids = populate(&buffer_pool, size);

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
