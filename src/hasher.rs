//! Deterministic content hashing of an app source tree.
//!
//! The digest covers every tracked file's relative path and byte content, in
//! sorted path order, so it is independent of filesystem timestamps and
//! traversal order. `.gitignore` files anywhere under the tree are honored
//! through the `ignore` crate's matcher, with the deepest applicable file
//! taking precedence, so negated patterns whitelist correctly instead of
//! being stripped. Dependency and output directories are always excluded so
//! that installing dependencies never invalidates the hash.
//!
//! Hashing runs once per app per pass, never on a request path. Multi-second
//! walks over large trees are acceptable; elapsed time is logged at debug.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories excluded from hashing and discovery regardless of ignore-file
/// content. `node_modules` in particular: the installer writes there, and an
/// install must never count as a source change.
pub(crate) const ALWAYS_EXCLUDE: [&str; 3] = ["node_modules", "dist", ".git"];

const GITIGNORE_FILE: &str = ".gitignore";

/// Compute the digest of `source_dir`, applying `extra_excludes` (gitignore
/// syntax, rooted at `source_dir`) on top of any `.gitignore` files found in
/// the tree.
pub fn hash_tree(source_dir: &Path, extra_excludes: &[String]) -> std::io::Result<String> {
    let start = Instant::now();

    let matchers = collect_gitignore_matchers(source_dir)?;
    let extra = build_extra_matcher(source_dir, extra_excludes);

    let mut files: Vec<PathBuf> = Vec::new();
    let mut walker = WalkDir::new(source_dir).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io_error)?;
        let path = entry.path();
        let is_dir = entry.file_type().is_dir();

        if entry.depth() == 0 {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_dir && ALWAYS_EXCLUDE.contains(&name.as_ref()) {
            walker.skip_current_dir();
            continue;
        }
        if is_excluded(path, is_dir, &matchers, extra.as_ref()) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    // Sorted relative paths make the digest independent of walk order.
    let mut relative: Vec<(String, PathBuf)> = files
        .into_iter()
        .map(|path| {
            let rel = path
                .strip_prefix(source_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            (rel, path)
        })
        .collect();
    relative.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut total_bytes: u64 = 0;
    let file_count = relative.len();
    for (rel, path) in relative {
        let content = std::fs::read(&path)?;
        total_bytes += content.len() as u64;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }

    let digest = hex::encode(hasher.finalize());
    debug!(
        dir = %source_dir.display(),
        files = file_count,
        bytes = total_bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "hashed source tree"
    );
    Ok(digest)
}

/// Collect every `.gitignore` under the tree and build one matcher per file,
/// rooted at that file's directory. Returned deepest-first so that nested
/// ignore files override their ancestors.
fn collect_gitignore_matchers(source_dir: &Path) -> std::io::Result<Vec<(PathBuf, Gitignore)>> {
    let mut matchers = Vec::new();
    let mut walker = WalkDir::new(source_dir).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io_error)?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if entry.depth() > 0 && ALWAYS_EXCLUDE.contains(&name.as_ref()) {
                walker.skip_current_dir();
            }
            continue;
        }
        if name == GITIGNORE_FILE {
            let root = entry
                .path()
                .parent()
                .unwrap_or(source_dir)
                .to_path_buf();
            let (gitignore, err) = Gitignore::new(entry.path());
            if let Some(err) = err {
                warn!(file = %entry.path().display(), %err, "partially invalid .gitignore");
            }
            matchers.push((root, gitignore));
        }
    }
    matchers.sort_by_key(|(root, _)| std::cmp::Reverse(root.components().count()));
    Ok(matchers)
}

fn build_extra_matcher(source_dir: &Path, extra_excludes: &[String]) -> Option<Gitignore> {
    if extra_excludes.is_empty() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(source_dir);
    for pattern in extra_excludes {
        if let Err(err) = builder.add_line(None, pattern) {
            warn!(%pattern, %err, "skipping invalid exclude pattern");
        }
    }
    match builder.build() {
        Ok(gi) => Some(gi),
        Err(err) => {
            warn!(%err, "failed to build exclude matcher");
            None
        }
    }
}

fn is_excluded(
    path: &Path,
    is_dir: bool,
    matchers: &[(PathBuf, Gitignore)],
    extra: Option<&Gitignore>,
) -> bool {
    // Caller-supplied excludes are hard exclusions, no whitelisting.
    if let Some(extra) = extra {
        if matches!(
            extra.matched_path_or_any_parents(path, is_dir),
            Match::Ignore(_)
        ) {
            return true;
        }
    }
    // First definitive answer from the deepest applicable .gitignore wins.
    for (root, gitignore) in matchers {
        if !path.starts_with(root) {
            continue;
        }
        match gitignore.matched_path_or_any_parents(path, is_dir) {
            Match::Ignore(_) => return true,
            Match::Whitelist(_) => return false,
            Match::None => {}
        }
    }
    false
}

fn io_error(err: walkdir::Error) -> std::io::Error {
    err.into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk loop detected"))
}
