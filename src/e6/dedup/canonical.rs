use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::e6::dedup::DedupError;
use crate::e6::dedup::registry::{PostGroup, PostRegistry, absolute_path, find_shortest_path};

/// Rewrites every duplicate of every post in the registry as a symbolic link
/// to that post's canonical copy. Returns the number of paths rewritten.
///
/// Any removal or link-creation failure aborts the run: a half-mutated link
/// graph that nobody hears about is worse than stopping.
pub(crate) fn canonicalize_all(registry: &PostRegistry) -> Result<usize, DedupError> {
    let mut rewritten = 0;
    for group in registry.groups() {
        rewritten += canonicalize_group(group)?;
    }
    Ok(rewritten)
}

/// Picks the canonical copy for one post and re-points every other tracked
/// path at it. Paths that already link to the canonical copy are left
/// untouched, so running canonicalization twice changes nothing.
fn canonicalize_group(group: &PostGroup) -> Result<usize, DedupError> {
    let Some(canonical) = find_shortest_path(&group.copies) else {
        // No regular copy survives; the repair engine owns this case.
        return Ok(0);
    };
    let canonical = canonical.clone();

    let mut rewritten = 0;
    for path in group.copies.iter().chain(group.links.iter()) {
        if *path == canonical {
            continue;
        }
        let target = relative_link_target(path, &canonical);
        if link_matches(path, &target) {
            continue;
        }
        trace!(
            "Replacing {} with a link to {}",
            path.display(),
            target.display()
        );
        replace_with_link(path, &target).map_err(|source| DedupError::FilesystemConflict {
            path: path.clone(),
            target: target.clone(),
            source,
        })?;
        rewritten += 1;
    }

    if rewritten > 0 {
        trace!(
            "Post {}: kept {} as canonical, rewrote {} duplicates",
            group.id(),
            canonical.display(),
            rewritten
        );
    }
    Ok(rewritten)
}

/// The link target written at `link`: the relative path from the link's
/// parent directory to the canonical copy, so whole trees stay relocatable.
fn relative_link_target(link: &Path, canonical: &Path) -> PathBuf {
    let link_abs = absolute_path(link);
    let canonical_abs = absolute_path(canonical);
    let base = link_abs.parent().unwrap_or_else(|| Path::new(""));
    relative_from(&canonical_abs, base)
}

/// Computes a relative path that reaches `target` from `base` without
/// touching the filesystem. Both paths must already be absolute.
fn relative_from(target: &Path, base: &Path) -> PathBuf {
    let target_components: Vec<Component> = target.components().collect();
    let base_components: Vec<Component> = base.components().collect();

    let shared = target_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[shared..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

/// True when `path` is already a symbolic link whose stored target equals
/// `target` byte for byte.
fn link_matches(path: &Path, target: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::read_link(path)
            .map(|existing| existing == *target)
            .unwrap_or(false),
        _ => false,
    }
}

/// Removes whatever sits at `path` (file or link, broken links included) and
/// creates a symbolic link to `target` in its place. Remove-then-create is
/// not atomic; a crash between the two steps leaves a missing path that the
/// repair engine recovers on the next run.
fn replace_with_link(path: &Path, target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => fs::remove_file(path)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    create_symlink(target, path)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    // Creating symlinks requires a privilege most accounts lack unless
    // developer mode is enabled; degrade to a hard link so dedup still works.
    match std::os::windows::fs::symlink_file(target, link) {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            warn!(
                "Symbolic links unavailable ({}); hard-linking {} instead",
                err,
                link.display()
            );
            let resolved = link.parent().unwrap_or_else(|| Path::new("")).join(target);
            fs::hard_link(resolved, link)
        }
        other => other,
    }
}
