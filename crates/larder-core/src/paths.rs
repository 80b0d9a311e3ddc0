//! Directory layout under the larder home.

use dirs::home_dir;
use std::path::PathBuf;

/// Returns the primary larder directory, or None if the user's home cannot
/// be resolved.
pub fn try_larder_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("LARDER_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".larder"))
}

/// Returns the canonical larder home directory (`~/.larder`).
///
/// # Panics
///
/// Panics if neither `LARDER_HOME` is set nor the user's home directory can
/// be resolved.
pub fn larder_home() -> PathBuf {
    try_larder_home().expect("Could not determine home directory. Set LARDER_HOME to override.")
}

/// Package store: ~/.larder/store
pub fn store_path() -> PathBuf {
    larder_home().join("store")
}

/// Download and registry-document cache: ~/.larder/cache
pub fn cache_path() -> PathBuf {
    larder_home().join("cache")
}

/// Per-project lock files: ~/.larder/locks
pub fn locks_path() -> PathBuf {
    larder_home().join("locks")
}

/// Scratch space: ~/.larder/tmp (guaranteed same volume as store, so the
/// final publish rename is atomic)
pub fn tmp_path() -> PathBuf {
    larder_home().join("tmp")
}

/// Optional configuration file: ~/.larder/config.toml
pub fn config_path() -> PathBuf {
    larder_home().join("config.toml")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_extraction() {
        assert_eq!(
            filename_from_url("https://example.com/a/b/pkg-1.0+linux+x86-64.tar.gz"),
            "pkg-1.0+linux+x86-64.tar.gz"
        );
        assert_eq!(filename_from_url(""), "");
    }
}
