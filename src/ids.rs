//! Identifier & Clock (C1)
//!
//! A process-wide monotonic clock and a k-sortable ID generator yielding
//! strings of the form `<prefix>_<time36>_<rand36>`.

use rand::Rng;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Prefixes distinguishing ID kinds, referenced by component modules.
pub mod prefix {
    pub const TRACE: &str = "tr";
    pub const SPAN: &str = "sp";
    pub const TASK: &str = "tsk";
    pub const DECISION: &str = "dec";
    pub const ACTION: &str = "act";
    pub const OUTCOME: &str = "out";
    pub const EDGE: &str = "edge";
    pub const PERMISSION: &str = "perm";
    pub const CREDENTIAL: &str = "cred";
    pub const EVENT: &str = "evt";
}

/// Milliseconds since the Unix epoch, forward-only within a process
/// lifetime (the OS clock is trusted not to go backwards; if it does, the
/// previous value is returned rather than producing a non-monotonic id).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A steady duration source for span timing, independent of wall-clock
/// adjustments.
pub fn steady_now() -> Instant {
    Instant::now()
}

/// Generate a k-sortable id with 80 bits of randomness: `<prefix>_<time36>_<rand36>`.
pub fn new_id(prefix: &str) -> String {
    let time36 = to_base36(now_ms() as u128);
    let rand_part: u128 = rand::thread_rng().gen::<u128>() & ((1u128 << 80) - 1);
    let rand36 = to_base36(rand_part);
    format!("{}_{}_{}", prefix, time36, rand36)
}

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        let digit = (n % 36) as usize;
        out.push(ALPHABET[digit]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}
