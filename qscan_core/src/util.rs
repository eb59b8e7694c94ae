//! Numeric helpers shared by the planner and the reconstructor.

use std::time::Duration;

/// `num / den`, saturating to `±f64::MAX` instead of overflowing.
///
/// The quotient is returned as-is whenever it is representable; otherwise the
/// result takes the sign of `num / den` (`0 / 0` saturates to `+MAX`).
#[inline]
pub fn divide_safely(num: f64, den: f64) -> f64 {
    if den.abs() >= 1.0 || num.abs() < (den * f64::MAX).abs() {
        return num / den;
    }
    let negative = (num < 0.0) != (den.is_sign_negative() && den != 0.0);
    if negative { -f64::MAX } else { f64::MAX }
}

/// Round half away from zero and clamp into `usize`. Non-finite and negative
/// inputs become 0.
#[inline]
pub fn round_to_usize(x: f64) -> usize {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let r = x.round().min(usize::MAX as f64) as usize;
    r
}

/// One bin of `seconds`, rounded to whole milliseconds and at least 1 ms.
#[inline]
pub fn bin_duration(seconds: f64) -> Duration {
    let ms = round_to_usize(seconds * 1000.0).max(1);
    Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
}
