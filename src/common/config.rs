//! Configuration constants and the [`Config`] read at buffer manager construction.

use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::MigrationPolicy;
use crate::common::page_id::{PageSizeType, NUM_PAGE_SIZE_TYPES};
use crate::common::{Error, Result};

/// Size of the smallest page in bytes (one OS page).
pub const OS_PAGE_SIZE: usize = 4096;

/// Pages must be aligned to 512 bytes to be used with `O_DIRECT`.
pub const PAGE_ALIGNMENT: usize = 512;

/// How often the purge worker cleans stale items out of the eviction queues.
pub const IDLE_EVICTION_QUEUE_PURGE: Duration = Duration::from_millis(1000);

/// Upper bound of queue items inspected per purge pass.
pub const MAX_EVICTION_QUEUE_PURGES: usize = 1024;

/// Backoff rounds spent waiting for an evictable page before giving up.
pub const MAX_EVICTION_WAITS: usize = 1024;

/// Default size of the reserved (not committed) virtual address space.
pub const DEFAULT_RESERVED_VIRTUAL_MEMORY: usize = 1 << 38;

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;
const GIB: usize = 1 << 30;

/// Buffer manager configuration.
///
/// A `Config` is immutable for the lifetime of one [`BufferManager`]. To change
/// it, build a new manager and drop the old one.
///
/// [`BufferManager`]: crate::buffer::BufferManager
///
/// # Example
/// ```
/// use tierpool::{Config, MigrationPolicy};
///
/// let config = Config::default()
///     .with_dram_buffer_pool_size(64 << 20)
///     .with_migration_policy(MigrationPolicy::DramOnly);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.effective_secondary_size(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Byte budget of the DRAM tier (default: 1 GiB).
    pub dram_buffer_pool_size: usize,

    /// Byte budget of the secondary memory tier (default: 16 GiB).
    pub secondary_buffer_pool_size: usize,

    /// Where evicted pages go (default: eager).
    pub migration_policy: MigrationPolicy,

    /// NUMA node backing the secondary tier, `None` for no NUMA placement.
    pub numa_node: Option<u32>,

    /// Directory, file or block device backing the pages.
    pub ssd_path: PathBuf,

    /// Virtual address space reserved for all volatile regions together.
    pub reserved_virtual_memory: usize,

    /// Run a background thread that purges stale eviction candidates.
    pub enable_eviction_purge_worker: bool,

    /// Open the backing store with `O_DIRECT` where supported.
    pub direct_io: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dram_buffer_pool_size: GIB,
            secondary_buffer_pool_size: 16 * GIB,
            migration_policy: MigrationPolicy::Eager,
            numa_node: None,
            ssd_path: std::env::temp_dir().join("tierpool"),
            reserved_virtual_memory: DEFAULT_RESERVED_VIRTUAL_MEMORY,
            enable_eviction_purge_worker: false,
            direct_io: true,
        }
    }
}

impl Config {
    /// Load the configuration from `TIERPOOL_*` environment variables.
    ///
    /// Unset variables keep their default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup("TIERPOOL_DRAM_SIZE") {
            config.dram_buffer_pool_size = parse_bytes("TIERPOOL_DRAM_SIZE", &value)?;
        }
        if let Some(value) = lookup("TIERPOOL_SECONDARY_SIZE") {
            config.secondary_buffer_pool_size = parse_bytes("TIERPOOL_SECONDARY_SIZE", &value)?;
        }
        if let Some(value) = lookup("TIERPOOL_RESERVED_MEMORY") {
            config.reserved_virtual_memory = parse_bytes("TIERPOOL_RESERVED_MEMORY", &value)?;
        }
        if let Some(value) = lookup("TIERPOOL_MIGRATION_POLICY") {
            config.migration_policy = value.parse()?;
        }
        if let Some(value) = lookup("TIERPOOL_NUMA_NODE") {
            let node = value.trim().parse::<u32>().map_err(|_| {
                Error::InvalidConfig(format!("TIERPOOL_NUMA_NODE: not a node id: {value:?}"))
            })?;
            config.numa_node = Some(node);
        }
        if let Some(value) = lookup("TIERPOOL_SSD_PATH") {
            config.ssd_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TIERPOOL_PURGE_WORKER") {
            config.enable_eviction_purge_worker = parse_bool("TIERPOOL_PURGE_WORKER", &value)?;
        }
        if let Some(value) = lookup("TIERPOOL_DIRECT_IO") {
            config.direct_io = parse_bool("TIERPOOL_DIRECT_IO", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_dram_buffer_pool_size(mut self, bytes: usize) -> Self {
        self.dram_buffer_pool_size = bytes;
        self
    }

    pub fn with_secondary_buffer_pool_size(mut self, bytes: usize) -> Self {
        self.secondary_buffer_pool_size = bytes;
        self
    }

    pub fn with_migration_policy(mut self, policy: MigrationPolicy) -> Self {
        self.migration_policy = policy;
        self
    }

    pub fn with_numa_node(mut self, node: Option<u32>) -> Self {
        self.numa_node = node;
        self
    }

    pub fn with_ssd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssd_path = path.into();
        self
    }

    pub fn with_reserved_virtual_memory(mut self, bytes: usize) -> Self {
        self.reserved_virtual_memory = bytes;
        self
    }

    pub fn with_eviction_purge_worker(mut self, enabled: bool) -> Self {
        self.enable_eviction_purge_worker = enabled;
        self
    }

    pub fn with_direct_io(mut self, enabled: bool) -> Self {
        self.direct_io = enabled;
        self
    }

    /// Secondary tier budget after applying the migration policy.
    ///
    /// The DRAM-only policy disables the secondary tier.
    pub fn effective_secondary_size(&self) -> usize {
        if self.migration_policy == MigrationPolicy::DramOnly {
            0
        } else {
            self.secondary_buffer_pool_size
        }
    }

    /// Bytes of virtual memory reserved for a single size class.
    ///
    /// Every region is a multiple of the largest page size so that all slots
    /// of every size class stay aligned.
    pub fn reserved_bytes_per_region(&self) -> usize {
        let max_page = PageSizeType::MAX.bytes();
        self.reserved_virtual_memory / NUM_PAGE_SIZE_TYPES / max_page * max_page
    }

    /// Check that the configuration can back a buffer manager.
    pub fn validate(&self) -> Result<()> {
        if self.reserved_bytes_per_region() == 0 {
            return Err(Error::InvalidConfig(format!(
                "reserved virtual memory of {} bytes cannot hold one {} slot per size class",
                self.reserved_virtual_memory,
                PageSizeType::MAX
            )));
        }
        if self.migration_policy.uses_dram() && self.dram_buffer_pool_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} migration needs a non-empty DRAM buffer pool",
                self.migration_policy
            )));
        }
        if self.migration_policy.requires_secondary() && self.secondary_buffer_pool_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} migration needs a non-empty secondary buffer pool",
                self.migration_policy
            )));
        }
        Ok(())
    }
}

/// Parse a byte count with an optional `KiB`, `MiB` or `GiB` suffix.
fn parse_bytes(key: &str, value: &str) -> Result<usize> {
    let value = value.trim();
    let (digits, unit) = if let Some(digits) = value.strip_suffix("GiB") {
        (digits, GIB)
    } else if let Some(digits) = value.strip_suffix("MiB") {
        (digits, MIB)
    } else if let Some(digits) = value.strip_suffix("KiB") {
        (digits, KIB)
    } else {
        (value, 1)
    };

    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or_else(|| Error::InvalidConfig(format!("{key}: not a byte size: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{key}: not a boolean: {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_os_page_size_is_power_of_two() {
        assert!(OS_PAGE_SIZE.is_power_of_two());
        assert_eq!(OS_PAGE_SIZE % PAGE_ALIGNMENT, 0);
    }

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.migration_policy, MigrationPolicy::Eager);
        assert_eq!(config.reserved_bytes_per_region() % PageSizeType::MAX.bytes(), 0);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup_from(&[
            ("TIERPOOL_DRAM_SIZE", "64MiB"),
            ("TIERPOOL_SECONDARY_SIZE", "1GiB"),
            ("TIERPOOL_MIGRATION_POLICY", "lazy"),
            ("TIERPOOL_NUMA_NODE", "1"),
            ("TIERPOOL_SSD_PATH", "/dev/nvme0n1"),
            ("TIERPOOL_PURGE_WORKER", "true"),
            ("TIERPOOL_DIRECT_IO", "off"),
        ]))
        .unwrap();

        assert_eq!(config.dram_buffer_pool_size, 64 * MIB);
        assert_eq!(config.secondary_buffer_pool_size, GIB);
        assert_eq!(config.migration_policy, MigrationPolicy::Lazy);
        assert_eq!(config.numa_node, Some(1));
        assert_eq!(config.ssd_path, PathBuf::from("/dev/nvme0n1"));
        assert!(config.enable_eviction_purge_worker);
        assert!(!config.direct_io);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = Config::from_lookup(lookup_from(&[("TIERPOOL_DRAM_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Config::from_lookup(lookup_from(&[("TIERPOOL_MIGRATION_POLICY", "random")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("k", "4096").unwrap(), 4096);
        assert_eq!(parse_bytes("k", "8KiB").unwrap(), 8 * KIB);
        assert_eq!(parse_bytes("k", " 2 GiB ").unwrap(), 2 * GIB);
        assert!(parse_bytes("k", "-1").is_err());
    }

    #[test]
    fn test_dram_only_disables_secondary() {
        let config = Config::default().with_migration_policy(MigrationPolicy::DramOnly);
        assert_eq!(config.effective_secondary_size(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_reservation() {
        let config = Config::default().with_reserved_virtual_memory(PageSizeType::MAX.bytes());
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_missing_tier() {
        let config = Config::default().with_dram_buffer_pool_size(0);
        assert!(config.validate().is_err());

        let config = Config::default()
            .with_migration_policy(MigrationPolicy::SecondaryOnly)
            .with_secondary_buffer_pool_size(0);
        assert!(config.validate().is_err());
    }
}
