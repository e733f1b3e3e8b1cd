//! # Utility Functions Module
//!
//! This module provides utility functions that improve code readability
//! and reduce boilerplate across the application.

/// Converts a vector of string-like items to Vec<String>.
///
/// This utility function accepts any iterable of items that can be converted
/// to String, eliminating repetitive `.to_string()` calls when building
/// encoder command lines.
///
/// # Example
/// ```rust
/// use media_delivery_optimizer::utils::to_string_vec;
///
/// // Instead of vec!["-q".to_string(), "80".to_string()] you can write:
/// let args = to_string_vec(["-q", "80"]);
/// assert_eq!(args, vec!["-q".to_string(), "80".to_string()]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Path of a persistent ledger file for a given library root.
///
/// Ledgers live under the state directory (default `~/.media-delivery`),
/// one file per library, keyed by a hash of the library root so different
/// libraries never share state.
pub fn ledger_file_path(
    state_dir: Option<&std::path::Path>,
    library_root: &std::path::Path,
    name: &str,
) -> anyhow::Result<std::path::PathBuf> {
    use sha2::{Digest, Sha256};

    let state_dir = match state_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
            .join(".media-delivery"),
    };

    std::fs::create_dir_all(&state_dir)?;

    let mut hasher = Sha256::new();
    hasher.update(library_root.to_string_lossy().as_bytes());
    let hash = hex::encode(hasher.finalize())[..16].to_string();

    Ok(state_dir.join(format!("{}_{}.json", name, hash)))
}

/// Size reduction as a fraction of the original.
///
/// Undefined (reported as 0) when the original size is 0.
pub fn size_reduction(original: u64, converted: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        (original as f64 - converted as f64) / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_vec_string_literals() {
        let result = to_string_vec(["hello", "world"]);
        assert_eq!(result, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_to_string_vec_mixed_types() {
        let num = 42;
        let result = to_string_vec(["-q", &num.to_string()]);
        assert_eq!(result, vec!["-q".to_string(), "42".to_string()]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_size_reduction() {
        assert_eq!(size_reduction(100, 40), 0.6);
        assert_eq!(size_reduction(0, 40), 0.0);
        assert_eq!(size_reduction(100, 100), 0.0);
    }
}
