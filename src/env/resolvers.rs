// src/env/resolvers.rs

//! Stock name-resolver functions.
//!
//! A resolver maps a logical asset name to a path relative to the
//! corresponding root, or `None` when the name cannot be resolved.

use std::sync::Arc;

use crate::env::DirectoryIndex;

/// A pluggable name-to-relative-path mapping.
pub type Resolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Uses the name as the relative path, unchanged.
pub fn pass_through() -> Resolver {
    Arc::new(|name| Some(name.to_string()))
}

/// Looks the bare file name up anywhere under an indexed root, so rules can
/// refer to inputs without spelling their directory.
pub fn flatten(index: DirectoryIndex) -> Resolver {
    Arc::new(move |name| index.get_path(name))
}

/// Treats dots in the file stem as directory separators:
/// `textures.ui.cursor.png` resolves to `textures/ui/cursor.png`.
pub fn namespaced() -> Resolver {
    Arc::new(|name| {
        let (stem, extension) = match name.rfind('.') {
            Some(idx) => name.split_at(idx),
            None => (name, ""),
        };
        Some(format!("{}{}", stem.replace('.', "/"), extension))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_keeps_names() {
        assert_eq!(pass_through()("a/b.txt").as_deref(), Some("a/b.txt"));
    }

    #[test]
    fn namespaced_splits_stem_dots_only() {
        let resolve = namespaced();
        assert_eq!(
            resolve("textures.ui.cursor.png").as_deref(),
            Some("textures/ui/cursor.png")
        );
        assert_eq!(resolve("plain.png").as_deref(), Some("plain.png"));
        assert_eq!(resolve("noext").as_deref(), Some("noext"));
    }
}
