//! Utility functions shared across the crate.

use std::path::{Path, PathBuf};

/// Get the user's config directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// Default output path next to the input: `deck.json` -> `deck-fr.json`.
pub fn translated_output_path(input: &Path, target: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = input.extension().and_then(|s| s.to_str()).unwrap_or("json");
    input.with_file_name(format!("{stem}-{target}.{ext}"))
}

/// First `limit` items joined for log lines and summaries.
pub fn preview<S: AsRef<str>>(items: &[S], limit: usize) -> String {
    let mut out = items
        .iter()
        .take(limit)
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > limit {
        out.push_str(&format!(", ... ({} more)", items.len() - limit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translated_output_path() {
        let out = translated_output_path(Path::new("/tmp/deck.json"), "ja");
        assert_eq!(out, PathBuf::from("/tmp/deck-ja.json"));
    }

    #[test]
    fn test_preview_truncates() {
        let ids = ["a", "b", "c", "d"];
        assert_eq!(preview(&ids, 2), "a, b, ... (2 more)");
        assert_eq!(preview(&ids, 10), "a, b, c, d");
    }
}
