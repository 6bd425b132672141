//! NUMA placement - moving page memory between memory nodes.
//!
//! DRAM and the secondary tier share one virtual address range. Migrating a
//! page between tiers keeps its address and only rebinds its physical memory
//! to another node, so outstanding tagged pointers never notice.

use std::io;

/// Capability to place memory near a given memory node.
pub trait NumaPlacement: Send + Sync {
    /// Bind the `len` bytes at `data` to `node`, or back to the default local
    /// policy for `None`, moving already populated pages.
    fn place(&self, data: *mut u8, len: usize, node: Option<u32>) -> io::Result<()>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Placement for machines without NUMA: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlacement;

impl NumaPlacement for NoopPlacement {
    fn place(&self, _data: *mut u8, _len: usize, _node: Option<u32>) -> io::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Placement through the Linux `mbind(2)` system call.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MbindPlacement;

#[cfg(target_os = "linux")]
impl MbindPlacement {
    const MPOL_DEFAULT: libc::c_long = 0;
    const MPOL_BIND: libc::c_long = 2;
    const MPOL_MF_MOVE: libc::c_ulong = 1 << 1;
    const MAX_NODES: u32 = 64;
}

#[cfg(target_os = "linux")]
impl NumaPlacement for MbindPlacement {
    fn place(&self, data: *mut u8, len: usize, node: Option<u32>) -> io::Result<()> {
        let (mode, mask, max_node, flags) = match node {
            Some(node) if node < Self::MAX_NODES => (
                Self::MPOL_BIND,
                1u64 << node,
                // The kernel ignores the last bit of maxnode.
                libc::c_ulong::from(Self::MAX_NODES + 1),
                Self::MPOL_MF_MOVE,
            ),
            Some(node) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("NUMA node {} is out of range", node),
                ))
            }
            None => (Self::MPOL_DEFAULT, 0, 0, 0),
        };

        let mask_ptr: *const u64 = if node.is_some() { &mask } else { std::ptr::null() };

        // SAFETY: mbind only changes the memory policy of the given range and
        // reads `max_node` bits from `mask_ptr`, which points to a live u64.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                data as *mut libc::c_void,
                len as libc::c_ulong,
                mode,
                mask_ptr,
                max_node,
                flags,
            )
        };

        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mbind"
    }
}

/// Choose the placement for a target node.
///
/// Without a target node, or off Linux, pages never move between nodes.
pub fn placement_for(numa_node: Option<u32>) -> Box<dyn NumaPlacement> {
    #[cfg(target_os = "linux")]
    {
        if numa_node.is_some() {
            return Box::new(MbindPlacement);
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = numa_node;
    }

    Box::new(NoopPlacement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_placement() {
        let placement = NoopPlacement;
        let mut byte = 0u8;
        assert!(placement.place(&mut byte, 1, Some(3)).is_ok());
        assert_eq!(placement.name(), "noop");
    }

    #[test]
    fn test_placement_for_without_node() {
        assert_eq!(placement_for(None).name(), "noop");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_mbind_rejects_out_of_range_node() {
        let placement = MbindPlacement;
        let err = placement
            .place(std::ptr::null_mut(), 4096, Some(1000))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
