//! File size policy helpers

use crate::CompressOptions;
use std::fmt;

/// Outcome of comparing an asset size against the configured limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCheck {
    /// Within the upload limit
    pub is_valid: bool,
    pub actual_size: u64,
    pub max_size: u64,
    /// Larger than the target size
    pub needs_compression: bool,
}

/// Compare `size` against the limits in `options`
pub fn check_file_size(size: u64, options: &CompressOptions) -> SizeCheck {
    SizeCheck {
        is_valid: size <= options.max_size,
        actual_size: size,
        max_size: options.max_size,
        needs_compression: size > options.target_size,
    }
}

/// Human readable size, base 1024 (`1536` -> `"1.5 KB"`)
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.1}", value);
    let trimmed = formatted.strip_suffix(".0").unwrap_or(&formatted);
    format!("{} {}", trimmed, UNITS[unit])
}

/// Storage savings from a compression run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Savings {
    pub saved_mb: f64,
    pub saved_cost: f64,
    pub original_cost: f64,
    pub compressed_cost: f64,
}

/// Default storage cost per megabyte used by [`calculate_savings`] callers
pub const DEFAULT_COST_PER_MB: f64 = 0.01;

pub fn calculate_savings(original_size: u64, compressed_size: u64, cost_per_mb: f64) -> Savings {
    let original_mb = original_size as f64 / (1024.0 * 1024.0);
    let compressed_mb = compressed_size as f64 / (1024.0 * 1024.0);
    let saved_mb = original_mb - compressed_mb;

    Savings {
        saved_mb,
        saved_cost: saved_mb * cost_per_mb,
        original_cost: original_mb * cost_per_mb,
        compressed_cost: compressed_mb * cost_per_mb,
    }
}

impl fmt::Display for Savings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "saved {:.2} MB (cost {:.4} -> {:.4}, saved {:.4})",
            self.saved_mb, self.original_cost, self.compressed_cost, self.saved_cost
        )
    }
}
