//! Buffer manager benchmarks
//!
//! - allocation: allocate + deallocate per size class
//! - get_page: pin + unpin of a resident page
//! - tagged_pointer: resolving a tagged pointer
//! - block_region: page reads from the backing store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;
use tierpool::storage::AlignedPage;
use tierpool::{AccessIntent, BlockRegion, BufferManager, Config, MigrationPolicy, PageId, PageSizeType};

fn bench_config(path: &std::path::Path) -> Config {
    Config::default()
        .with_ssd_path(path.join("ssd"))
        .with_reserved_virtual_memory(1 << 30)
        .with_migration_policy(MigrationPolicy::DramOnly)
        .with_dram_buffer_pool_size(64 << 20)
        .with_direct_io(false)
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    let dir = tempdir().unwrap();
    let bm = BufferManager::new(bench_config(dir.path())).unwrap();

    for bytes in [64usize, 5000, 64 << 10] {
        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::new("allocate_deallocate", bytes), &bytes, |b, &bytes| {
            b.iter(|| {
                let ptr = bm.allocate(black_box(bytes), 8).unwrap();
                bm.deallocate(ptr, bytes, 8);
            });
        });
    }

    group.finish();
}

fn bench_get_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_page");
    let dir = tempdir().unwrap();
    let bm = BufferManager::new(bench_config(dir.path())).unwrap();

    let ptr = bm.allocate(4096, 8).unwrap();
    let pid = ptr.page_id();
    bm.unpin_page(pid, false);

    group.bench_function("hot_read", |b| {
        b.iter(|| {
            let addr = bm.get_page(black_box(pid)).unwrap();
            black_box(addr);
            bm.unpin_page(pid, false);
        });
    });

    group.bench_function("hot_write", |b| {
        b.iter(|| {
            bm.pin_page(black_box(pid), AccessIntent::Write).unwrap();
            bm.unpin_page(pid, true);
        });
    });

    group.finish();
}

fn bench_tagged_pointer(c: &mut Criterion) {
    let mut group = c.benchmark_group("tagged_pointer");
    let dir = tempdir().unwrap();
    let bm = BufferManager::new(bench_config(dir.path())).unwrap();
    let ptr = bm.allocate(4096, 8).unwrap().cast::<u64>();

    group.throughput(Throughput::Elements(512));
    group.bench_function("sequential_read", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            let mut cursor = ptr;
            for _ in 0..512 {
                sum = sum.wrapping_add(unsafe { cursor.get(&bm).read() });
                cursor.increment();
            }
            black_box(sum)
        });
    });

    group.finish();
}

fn bench_block_region(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_region");
    let dir = tempdir().unwrap();
    let region = BlockRegion::open(dir.path().join("ssd"), false).unwrap();

    for size_type in [PageSizeType::KiB4, PageSizeType::KiB64, PageSizeType::MiB2] {
        let mut page = AlignedPage::new(size_type);
        for index in 0..8 {
            region.write_page(PageId::new(size_type, index), page.as_slice()).unwrap();
        }

        group.throughput(Throughput::Bytes(size_type.bytes() as u64));
        group.bench_with_input(BenchmarkId::new("read_page", size_type), &size_type, |b, &size_type| {
            let mut index = 0;
            b.iter(|| {
                region
                    .read_page(PageId::new(size_type, index), page.as_mut_slice())
                    .unwrap();
                index = (index + 1) % 8;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_allocation,
    bench_get_page,
    bench_tagged_pointer,
    bench_block_region
);
criterion_main!(benches);
