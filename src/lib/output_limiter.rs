//! Output limiter
//!
//! Bounds the combined size of captured stdout and stderr so a result fits
//! the 64k per-instance limit of the management transport.
//!
//! Limits apply to the UTF-8 text that goes into the result, after any
//! invalid bytes have been replaced. Cuts land on a character boundary, so a
//! stream may end up a few bytes shorter than its share but never longer.

/// Combined byte budget for stdout + stderr
pub const OUTPUT_BUDGET: usize = 60 * 1024;

/// Share of the budget kept for stderr when both streams have content
pub const STDERR_SHARE: usize = 1024;

/// Trim `stdout` and `stderr` in place so their encoded length fits
/// [`OUTPUT_BUDGET`].
///
/// Returns `true` when anything was cut.
pub fn limit_output(stdout: &mut String, stderr: &mut String) -> bool {
    if stdout.len() + stderr.len() <= OUTPUT_BUDGET {
        return false;
    }

    if stderr.is_empty() {
        truncate_on_char_boundary(stdout, OUTPUT_BUDGET - 1);
    } else if stdout.is_empty() {
        truncate_on_char_boundary(stderr, OUTPUT_BUDGET - 1);
    } else {
        truncate_on_char_boundary(stdout, OUTPUT_BUDGET - 1 - STDERR_SHARE);
        truncate_on_char_boundary(stderr, STDERR_SHARE - 1);
    }

    true
}

/// Cut `text` to at most `max_bytes`, backing off to the previous character
/// boundary
fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
