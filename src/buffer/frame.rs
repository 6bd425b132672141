//! Frame - metadata of one resident page.
//!
//! A [`Frame`] tracks everything the buffer manager needs to know about a
//! resident page:
//! - The stamped state word (pin count, dirty flag, eviction state, version)
//! - Which memory tier holds the page
//! - The address of the page's volatile slot
//!
//! # State Word
//! ```text
//! 63        56 55 54                                          0
//! ┌───────────┬──┬─────────────────────────────────────────────┐
//! │   state   │ D│                  version                    │
//! └───────────┴──┴─────────────────────────────────────────────┘
//! state: 0 = unlocked, 1..=252 = shared pins, 253 = exclusive,
//!        254 = marked, 255 = evicted
//! ```
//!
//! Every transition is a single compare-and-swap on the state word. The
//! version grows whenever a frame becomes unlocked or marked, which is how a
//! stale eviction candidate recognizes that the page was reused.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};

use crate::common::PageId;

const STATE_SHIFT: u32 = 56;
const DIRTY_BIT: u64 = 1 << 55;
const VERSION_MASK: u64 = DIRTY_BIT - 1;

const UNLOCKED: u64 = 0;
const MAX_SHARED: u64 = 0xFC;
const LOCKED: u64 = 0xFD;
const MARKED: u64 = 0xFE;
const EVICTED: u64 = 0xFF;

#[inline]
const fn state_bits(word: u64) -> u64 {
    word >> STATE_SHIFT
}

#[inline]
const fn compose(state: u64, dirty: bool, version: u64) -> u64 {
    (state << STATE_SHIFT) | if dirty { DIRTY_BIT } else { 0 } | (version & VERSION_MASK)
}

#[inline]
const fn with_state(word: u64, state: u64) -> u64 {
    (word & !(0xFF << STATE_SHIFT)) | (state << STATE_SHIFT)
}

/// Version counter of a state word.
#[inline]
pub const fn version(word: u64) -> u64 {
    word & VERSION_MASK
}

/// Dirty flag of a state word.
#[inline]
pub const fn is_dirty_word(word: u64) -> bool {
    word & DIRTY_BIT != 0
}

/// Decoded lock state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Resident, no pins, not an eviction candidate.
    Unlocked,
    /// Pinned for reading by the given number of holders.
    Shared(u32),
    /// Pinned exclusively, for writing, I/O or eviction.
    Exclusive,
    /// Unpinned and selected as eviction candidate.
    Marked,
    /// Slot reclaimed, the frame is logically dead.
    Evicted,
}

impl FrameState {
    /// Decode the lock state of a state word.
    #[inline]
    pub fn of(word: u64) -> Self {
        match state_bits(word) {
            UNLOCKED => FrameState::Unlocked,
            LOCKED => FrameState::Exclusive,
            MARKED => FrameState::Marked,
            EVICTED => FrameState::Evicted,
            shared => FrameState::Shared(shared as u32),
        }
    }
}

/// The memory tier a resident page lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tier {
    /// Fast local memory.
    Dram = 0,
    /// The slower secondary memory tier (e.g. a remote NUMA node or CXL memory).
    Secondary = 1,
}

impl Tier {
    #[inline]
    fn from_u8(value: u8) -> Tier {
        if value == Tier::Secondary as u8 {
            Tier::Secondary
        } else {
            Tier::Dram
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Dram => write!(f, "DRAM"),
            Tier::Secondary => write!(f, "secondary"),
        }
    }
}

/// Whether a pin is taken for reading (shared) or writing (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessIntent {
    Read,
    Write,
}

/// Metadata of one resident page.
///
/// # Thread Safety
/// All fields are atomics. The state word is the single point of
/// synchronization: `data`, `tier` and `durable` are only changed by the
/// holder of an exclusive lock (or a pin, for promotion) and published by
/// the release ordering of the unlocking compare-and-swap.
pub struct Frame {
    page_id: PageId,

    /// Stamped state: lock state, dirty flag and version.
    state: AtomicU64,

    /// [`Tier`] the page currently occupies.
    tier: AtomicU8,

    /// Address of the volatile slot, or null while not mapped.
    data: AtomicPtr<u8>,

    /// Whether the block device holds a copy of this page.
    durable: AtomicBool,

    /// Deallocated while still pinned. The last unpin reclaims the slot.
    freed: AtomicBool,
}

impl Frame {
    /// Create a frame that is exclusively locked by its creator.
    ///
    /// The creator installs the frame in the page table, fills the slot and
    /// then unlocks or downgrades it. Concurrent lookups wait in the meantime.
    pub fn new_locked(page_id: PageId, tier: Tier) -> Self {
        Self {
            page_id,
            state: AtomicU64::new(compose(LOCKED, false, 0)),
            tier: AtomicU8::new(tier as u8),
            data: AtomicPtr::new(ptr::null_mut()),
            durable: AtomicBool::new(false),
            freed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Load the current state word.
    #[inline]
    pub fn load(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        FrameState::of(self.load())
    }

    #[inline]
    fn cas(&self, old: u64, new: u64) -> bool {
        self.state
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // ========================================================================
    // Pinning
    // ========================================================================

    /// Try to add a shared pin, starting from the observed word `old`.
    ///
    /// Legal from unlocked, shared and marked. Pinning a marked frame aborts
    /// its pending eviction. Returns false if the state changed or does not
    /// allow a shared pin.
    #[inline]
    pub fn try_lock_shared(&self, old: u64) -> bool {
        let next = match state_bits(old) {
            UNLOCKED | MARKED => 1,
            pins if pins < MAX_SHARED => pins + 1,
            _ => return false,
        };
        self.cas(old, with_state(old, next))
    }

    /// Try to take the exclusive lock, starting from the observed word `old`.
    ///
    /// Legal from unlocked and marked.
    #[inline]
    pub fn try_lock_exclusive(&self, old: u64) -> bool {
        match state_bits(old) {
            UNLOCKED | MARKED => self.cas(old, with_state(old, LOCKED)),
            _ => false,
        }
    }

    /// Drop one shared pin.
    ///
    /// Returns the new state word if this was the last pin, so the caller can
    /// enqueue an eviction candidate carrying the fresh version.
    ///
    /// # Panics
    /// Panics if the frame holds no shared pin.
    pub fn unlock_shared(&self) -> Option<u64> {
        loop {
            let old = self.load();
            let pins = state_bits(old);
            assert!(
                (1..=MAX_SHARED).contains(&pins),
                "pin count underflow on {}",
                self.page_id
            );

            let (new, last) = if pins == 1 {
                (compose(UNLOCKED, is_dirty_word(old), version(old) + 1), true)
            } else {
                (with_state(old, pins - 1), false)
            };

            if self.cas(old, new) {
                return last.then_some(new);
            }
        }
    }

    /// Release the exclusive lock. Returns the new state word.
    ///
    /// # Panics
    /// Panics if the frame is not exclusively locked.
    pub fn unlock_exclusive(&self) -> u64 {
        loop {
            let old = self.load();
            assert_eq!(
                state_bits(old),
                LOCKED,
                "{} is not locked exclusively",
                self.page_id
            );
            let new = compose(UNLOCKED, is_dirty_word(old), version(old) + 1);
            if self.cas(old, new) {
                return new;
            }
        }
    }

    /// Turn the exclusive lock into a single shared pin.
    pub fn downgrade_to_shared(&self) {
        loop {
            let old = self.load();
            assert_eq!(
                state_bits(old),
                LOCKED,
                "{} is not locked exclusively",
                self.page_id
            );
            if self.cas(old, with_state(old, 1)) {
                return;
            }
        }
    }

    /// Number of pins. An exclusive lock counts as one pin.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        match self.state() {
            FrameState::Shared(pins) => pins,
            FrameState::Exclusive => 1,
            _ => 0,
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Try to mark an unlocked frame as eviction candidate.
    ///
    /// Bumps the version, so candidates queued before the mark become stale.
    /// Returns the new state word on success.
    pub fn try_mark(&self, old: u64) -> Option<u64> {
        if state_bits(old) != UNLOCKED {
            return None;
        }
        let new = compose(MARKED, is_dirty_word(old), version(old) + 1);
        self.cas(old, new).then_some(new)
    }

    /// Lock a marked frame for eviction.
    ///
    /// Succeeds only if the frame is still marked with exactly
    /// `expected_version`. Any pin or re-mark since then makes this a no-op.
    pub fn try_lock_for_eviction(&self, expected_version: u64) -> bool {
        loop {
            let old = self.load();
            if state_bits(old) != MARKED || version(old) != expected_version {
                return false;
            }
            if self.cas(old, with_state(old, LOCKED)) {
                return true;
            }
        }
    }

    /// Retire an exclusively locked frame.
    ///
    /// # Panics
    /// Panics if the frame is not exclusively locked.
    pub fn mark_evicted(&self) {
        let old = self.load();
        assert_eq!(
            state_bits(old),
            LOCKED,
            "evicting {} without holding its lock",
            self.page_id
        );
        self.state
            .store(compose(EVICTED, false, version(old) + 1), Ordering::Release);
    }

    #[inline]
    pub fn is_evicted(&self) -> bool {
        self.state() == FrameState::Evicted
    }

    // ========================================================================
    // Dirty flag
    // ========================================================================

    #[inline]
    pub fn set_dirty(&self) {
        self.state.fetch_or(DIRTY_BIT, Ordering::AcqRel);
    }

    /// Clear the dirty flag. Returns whether it was set.
    #[inline]
    pub fn clear_dirty(&self) -> bool {
        is_dirty_word(self.state.fetch_and(!DIRTY_BIT, Ordering::AcqRel))
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        is_dirty_word(self.load())
    }

    // ========================================================================
    // Residency
    // ========================================================================

    #[inline]
    pub fn tier(&self) -> Tier {
        Tier::from_u8(self.tier.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_tier(&self, tier: Tier) {
        self.tier.store(tier as u8, Ordering::Release);
    }

    /// Atomically move the frame from one tier to another.
    ///
    /// Returns false if the frame was not in `from`.
    #[inline]
    pub fn try_move_tier(&self, from: Tier, to: Tier) -> bool {
        self.tier
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_data(&self, data: *mut u8) {
        self.data.store(data, Ordering::Release);
    }

    #[inline]
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_durable(&self, durable: bool) {
        self.durable.store(durable, Ordering::Release);
    }

    #[inline]
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// Record that the page's allocation was released. Irreversible.
    #[inline]
    pub fn set_freed(&self) {
        self.freed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.load();
        f.debug_struct("Frame")
            .field("page_id", &self.page_id)
            .field("state", &FrameState::of(word))
            .field("dirty", &is_dirty_word(word))
            .field("version", &version(word))
            .field("tier", &self.tier())
            .field("durable", &self.is_durable())
            .finish()
    }
}
