//! Tiered buffer management.
//!
//! The buffer manager caches pages of ten size classes in two memory tiers
//! (DRAM and a secondary tier such as CXL or remote-NUMA memory) in front of
//! a block device. Every page has a fixed virtual address; moving it between
//! tiers changes where its physical memory lives, not where it is mapped.
//!
//! # Components
//! - [`BufferManager`] - Pinning, allocation, eviction and migration
//! - [`Frame`] - Lock-free metadata of one resident page
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII guards for page access
//! - [`MigrationPolicy`] - Which tier a page moves to
//! - [`Metrics`] - Counters and usage gauges
//! - [`NumaPlacement`] - Binding page memory to NUMA nodes

mod buffer_manager;
mod eviction;
mod frame;
mod metrics;
mod migration;
mod numa;
mod page_guard;
mod page_table;
mod pool;
mod purge_worker;
mod volatile_region;

pub use buffer_manager::BufferManager;
pub use eviction::{EvictionItem, EvictionQueue};
pub use frame::{AccessIntent, Frame, FrameState, Tier};
pub use metrics::{Metrics, MetricsSnapshot};
pub use migration::MigrationPolicy;
pub use numa::{placement_for, NoopPlacement, NumaPlacement};
pub use page_guard::{PageReadGuard, PageWriteGuard};
pub use volatile_region::VolatileRegion;

#[cfg(target_os = "linux")]
pub use numa::MbindPlacement;
