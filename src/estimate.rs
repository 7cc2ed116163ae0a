//! Conversion-time estimate used to pace the simulated progress bar.
//!
//! The backend exposes no progress channel, so the estimate is a coarse step
//! function of file size: 30 s for anything up to 2 MiB, plus another 30 s for
//! every started 2 MiB beyond that.

/// One mebibyte.
pub const MEBIBYTE: u64 = 1024 * 1024;

/// Size covered by one estimate step.
pub const BASE_SIZE: u64 = 2 * MEBIBYTE;

/// Seconds added per step.
pub const BASE_TIME_SECS: u64 = 30;

/// Upper bound on accepted file size (50 MiB).
pub const MAX_FILE_BYTES: u64 = 50 * MEBIBYTE;

/// Estimated conversion time in seconds for a file of `byte_size` bytes.
pub fn estimated_seconds(byte_size: u64) -> u64 {
    if byte_size <= BASE_SIZE {
        return BASE_TIME_SECS;
    }
    let extra = byte_size - BASE_SIZE;
    let intervals = extra.div_ceil(BASE_SIZE);
    BASE_TIME_SECS + intervals * BASE_TIME_SECS
}
