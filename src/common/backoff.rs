//! Busy waiting with escalating backoff.

use std::thread;
use std::time::Duration;

/// Rounds after which a waiter stops spinning and starts yielding.
const SPIN_ROUNDS: usize = 4;

/// Rounds after which a waiter sleeps on every other round.
const YIELD_ROUNDS: usize = 32;

/// Rounds after which waiting is considered stuck.
pub const STUCK_ROUNDS: usize = 1_000_000;

/// Back off for one round of a busy-wait loop.
///
/// Escalates from pure spinning to `yield_now` to short sleeps as `repeat`
/// grows.
///
/// # Panics
/// Panics once `repeat` reaches [`STUCK_ROUNDS`]: something holds a lock that
/// is never released.
#[inline]
pub fn yield_backoff(repeat: usize) {
    if repeat < SPIN_ROUNDS {
        std::hint::spin_loop();
    } else if repeat < YIELD_ROUNDS || repeat & 1 == 1 {
        thread::yield_now();
    } else if repeat < STUCK_ROUNDS {
        thread::sleep(Duration::from_nanos(1000));
    } else {
        panic!("yielded for {} rounds, something is blocking", repeat);
    }
}
