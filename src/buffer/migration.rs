//! Migration policy - where pages go when they leave DRAM.

use std::fmt;
use std::str::FromStr;

use crate::buffer::frame::{AccessIntent, Tier};
use crate::common::Error;

/// Rule set governing between which tiers pages move.
///
/// | policy          | fault in  | DRAM victim goes to              | promote on access |
/// |-----------------|-----------|----------------------------------|-------------------|
/// | `Eager`         | DRAM      | secondary (device if full)       | always            |
/// | `Lazy`          | DRAM      | device, unless clean & volatile  | writes only       |
/// | `DramOnly`      | DRAM      | device                           | n/a               |
/// | `SecondaryOnly` | secondary | n/a                              | never             |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MigrationPolicy {
    /// Always relocate DRAM victims to the secondary tier.
    #[default]
    Eager,
    /// Write dirty victims to the device, keep clean ones in memory only if
    /// the device has no copy.
    Lazy,
    /// No secondary tier.
    DramOnly,
    /// Pages live on the secondary tier only.
    SecondaryOnly,
}

impl MigrationPolicy {
    /// Tier that receives pages faulted in from the device or allocated.
    #[inline]
    pub fn fault_in_tier(self) -> Tier {
        match self {
            MigrationPolicy::SecondaryOnly => Tier::Secondary,
            _ => Tier::Dram,
        }
    }

    /// Whether a DRAM victim should move to the secondary tier.
    ///
    /// Even when this holds, a full secondary tier makes the victim fall back
    /// to the block device.
    #[inline]
    pub fn prefers_secondary_on_eviction(self, dirty: bool, durable: bool) -> bool {
        match self {
            MigrationPolicy::Eager => true,
            MigrationPolicy::Lazy => !dirty && !durable,
            // SecondaryOnly never holds pages in DRAM.
            MigrationPolicy::DramOnly | MigrationPolicy::SecondaryOnly => false,
        }
    }

    /// Whether an access to a page on the secondary tier moves it to DRAM.
    #[inline]
    pub fn promote_on_access(self, intent: AccessIntent) -> bool {
        match self {
            MigrationPolicy::Eager | MigrationPolicy::DramOnly => true,
            MigrationPolicy::Lazy => intent == AccessIntent::Write,
            MigrationPolicy::SecondaryOnly => false,
        }
    }

    #[inline]
    pub fn uses_dram(self) -> bool {
        self != MigrationPolicy::SecondaryOnly
    }

    #[inline]
    pub fn requires_secondary(self) -> bool {
        self == MigrationPolicy::SecondaryOnly
    }
}

impl fmt::Display for MigrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPolicy::Eager => "eager",
            MigrationPolicy::Lazy => "lazy",
            MigrationPolicy::DramOnly => "dram_only",
            MigrationPolicy::SecondaryOnly => "secondary_only",
        };
        f.write_str(name)
    }
}

impl FromStr for MigrationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "eager" => Ok(MigrationPolicy::Eager),
            "lazy" => Ok(MigrationPolicy::Lazy),
            "dram_only" | "dram" => Ok(MigrationPolicy::DramOnly),
            "secondary_only" | "secondary" | "numa_only" => Ok(MigrationPolicy::SecondaryOnly),
            other => Err(Error::InvalidConfig(format!(
                "unknown migration policy {:?}",
                other
            ))),
        }
    }
}
