//! Human-readable rendering of sizes and ratios

const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// Render a byte count using binary-prefixed units
///
/// Sizes below 1 KiB are printed as a plain byte count; everything else is
/// printed in the largest unit that keeps the value at or above 1, with two
/// decimals (`"4.05 GiB"`, `"5.20 MiB"`).
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn si_string(size: u64) -> String {
    if size < 1024 {
        return format!("{size} bytes");
    }

    let mut exp = ((size as f64).log2() / 1024f64.log2()).floor() as u32;
    let mut converted = (100.0 * (size as f64 / 1024f64.powi(exp as i32))).round() / 100.0;

    // Rounding can carry us into the next unit (1023.999 KiB -> 1.00 MiB)
    if (converted - 1024.0).abs() < f64::EPSILON {
        converted = 1.0;
        exp += 1;
    }

    match PREFIXES.get(exp as usize - 1) {
        Some(prefix) => format!("{converted:.2} {prefix}iB"),
        None => format!("{size} bytes"),
    }
}

/// Render `used` out of `total` as a percentage with two decimals
///
/// A zero total, or usage at or above the total, is `"100%"`; zero usage is
/// `"0%"`. Anything short of full never rounds up to 100.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(used: u64, total: u64) -> String {
    if total == 0 || used >= total {
        return "100%".to_string();
    }
    if used == 0 {
        return "0%".to_string();
    }

    let mut converted = (10_000.0 * (used as f64 / total as f64)).round() / 100.0;
    if (converted - 100.0).abs() < f64::EPSILON {
        converted = 99.99;
    }
    format!("{converted:.2}%")
}
