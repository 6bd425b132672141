//! Integration tests for the buffer manager.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;
use tierpool::{BufferManager, Config, MigrationPolicy, PageId, RegionAllocator, TaggedPointer};

const PAGE: usize = 4096;

fn config_at(path: &Path, policy: MigrationPolicy, dram_pages: usize) -> Config {
    Config::default()
        .with_ssd_path(path.join("ssd"))
        .with_reserved_virtual_memory(256 << 20)
        .with_direct_io(false)
        .with_migration_policy(policy)
        .with_dram_buffer_pool_size(dram_pages * PAGE)
        .with_secondary_buffer_pool_size(4 * dram_pages * PAGE)
}

fn create_bm(policy: MigrationPolicy, dram_pages: usize) -> (BufferManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let bm = BufferManager::new(config_at(dir.path(), policy, dram_pages)).unwrap();
    (bm, dir)
}

fn new_page(bm: &BufferManager) -> PageId {
    let ptr = bm.allocate(PAGE, 1).unwrap();
    bm.unpin_page(ptr.page_id(), false);
    ptr.page_id()
}

/// Test that data survives eviction and reload.
#[test]
fn test_data_persistence_across_evictions() {
    for policy in [MigrationPolicy::DramOnly, MigrationPolicy::Eager, MigrationPolicy::Lazy] {
        let (bm, _dir) = create_bm(policy, 3);

        let page_ids: Vec<PageId> = (0..10)
            .map(|i| {
                let pid = new_page(&bm);
                let mut guard = bm.fetch_page_write(pid).unwrap();
                guard[0] = i as u8;
                guard[PAGE - 1] = 100 + i as u8;
                pid
            })
            .collect();

        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bm.fetch_page_read(pid).unwrap();
            assert_eq!(guard[0], i as u8, "{} under {}", pid, policy);
            assert_eq!(guard[PAGE - 1], 100 + i as u8, "{} under {}", pid, policy);
        }
        assert!(bm.metrics().snapshot().num_evictions > 0);
    }
}

/// Test flush and reload from a second instance.
#[test]
fn test_flush_and_reload() {
    let dir = tempdir().unwrap();
    let data = b"Persistent data!";

    // First session: write and flush
    let pid = {
        let bm = BufferManager::new(config_at(dir.path(), MigrationPolicy::Eager, 8)).unwrap();
        let pid = new_page(&bm);
        {
            let mut guard = bm.fetch_page_write(pid).unwrap();
            guard[..data.len()].copy_from_slice(data);
        }
        bm.flush_all_pages().unwrap();
        assert!(!bm.is_dirty(pid));
        pid
    };

    // Second session: verify data
    {
        let bm = BufferManager::new(config_at(dir.path(), MigrationPolicy::Eager, 8)).unwrap();
        let guard = bm.fetch_page_read(pid).unwrap();
        assert_eq!(&guard[..data.len()], data);
        assert_eq!(bm.metrics().snapshot().total_misses, 1);
    }
}

/// Test concurrent readers and writers on more pages than fit in memory.
///
/// Writers fill a whole page with one value; readers check that they never
/// see a torn page.
#[test]
fn test_concurrent_fuzz_keeps_pages_intact() {
    let (bm, _dir) = create_bm(MigrationPolicy::DramOnly, 8);
    let bm = Arc::new(bm);

    let page_ids: Arc<Vec<PageId>> = Arc::new((0..32).map(|_| new_page(&bm)).collect());
    for &pid in page_ids.iter() {
        bm.fetch_page_write(pid).unwrap().fill(0);
    }

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let bm = Arc::clone(&bm);
            let page_ids = Arc::clone(&page_ids);
            thread::spawn(move || {
                let mut seed = t * 7919 + 1;
                for round in 0..500u64 {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let pid = page_ids[(seed >> 33) as usize % page_ids.len()];
                    if round % 4 == 0 {
                        let mut guard = bm.fetch_page_write(pid).unwrap();
                        guard.fill((t * 50 + round % 50) as u8);
                    } else {
                        let guard = bm.fetch_page_read(pid).unwrap();
                        let first = guard[0];
                        assert!(guard.iter().all(|&b| b == first), "torn page {}", pid);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for &pid in page_ids.iter() {
        assert_eq!(bm.get_pin_count(pid).unwrap_or(0), 0);
    }
    let snapshot = bm.metrics().snapshot();
    assert!(snapshot.num_evictions > 0);
    assert!(snapshot.current_bytes_used_dram <= 8 * PAGE as u64);
}

/// Test typed allocation through tagged pointers.
#[test]
fn test_tagged_pointer_round_trip() {
    let (bm, _dir) = create_bm(MigrationPolicy::Eager, 16);
    let alloc = RegionAllocator::<u64, _>::new(&bm);

    let base = alloc.allocate(512).unwrap();
    let mut cursor = base;
    for i in 0..512u64 {
        unsafe { cursor.get(&bm).write(i * i) };
        cursor.increment();
    }
    assert_eq!(cursor.offset_from(&base), 512);

    for i in 0..512u64 {
        let ptr = base + i as isize;
        assert_eq!(unsafe { ptr.get(&bm).read() }, i * i);

        let back = TaggedPointer::<u64>::from_raw(&bm, ptr.get(&bm)).unwrap();
        assert_eq!(back, ptr);
    }

    assert!(TaggedPointer::<u64>::null().get(&bm).is_null());
    assert!(TaggedPointer::<u64>::from_raw(&bm, &0u64).is_none());

    alloc.deallocate(base, 512);
    assert!(bm.get_pin_count(base.page_id()).is_none());
}

/// Test that a tagged pointer survives eviction of its page.
#[test]
fn test_tagged_pointer_survives_eviction() {
    let (bm, _dir) = create_bm(MigrationPolicy::DramOnly, 2);

    let ptr = bm.allocate(64, 8).unwrap().cast::<u32>();
    unsafe { (ptr + 3).get(&bm).write(0xDEAD_BEEF) };
    bm.unpin_page(ptr.page_id(), true);

    for _ in 0..4 {
        new_page(&bm);
    }
    assert!(bm.get_pin_count(ptr.page_id()).is_none());

    let _guard = bm.fetch_page_read(ptr.page_id()).unwrap();
    assert_eq!(unsafe { (ptr + 3).get(&bm).read() }, 0xDEAD_BEEF);
}

/// Test the background purge worker alongside regular traffic.
#[test]
fn test_purge_worker_with_traffic() {
    let dir = tempdir().unwrap();
    let config = config_at(dir.path(), MigrationPolicy::Eager, 4).with_eviction_purge_worker(true);
    let bm = BufferManager::new(config).unwrap();

    let pages: Vec<PageId> = (0..16).map(|_| new_page(&bm)).collect();
    for _ in 0..3 {
        for &pid in &pages {
            drop(bm.fetch_page_read(pid).unwrap());
        }
    }
    bm.purge_eviction_queues();
    assert!(bm.memory_consumption() > 0);
}
