//! Token substitution over checked-out template trees.

use crate::error::Result;
use crate::state::StateStore;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"<[A-Z][A-Z0-9_]*>").expect("token regex is valid"))
}

/// Placeholder tokens still present in `text`.
pub fn unresolved(text: &str) -> BTreeSet<String> {
    token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// All regular files under `dir`, skipping `.git`.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Substitute store tokens in every text file under `dir`, in place.
///
/// Returns the set of tokens left unresolved across the tree.
pub fn render_tree(dir: &Path, store: &StateStore) -> Result<BTreeSet<String>> {
    let mut leftover = BTreeSet::new();
    for path in walk_files(dir)? {
        let bytes = std::fs::read(&path)?;
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        let rendered = store.render(&text);
        leftover.extend(unresolved(&rendered));
        if rendered != text {
            std::fs::write(&path, rendered)?;
        }
    }
    if !leftover.is_empty() {
        tracing::warn!(dir = %dir.display(), tokens = ?leftover, "unresolved template tokens");
    }
    Ok(leftover)
}
