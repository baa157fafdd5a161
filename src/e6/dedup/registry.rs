use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Every file belonging to one post id discovered during a scan, split into
/// regular files ("copies") and symbolic links. Insertion order is preserved
/// in both lists because it breaks ties during canonical path selection.
#[derive(Debug)]
pub(crate) struct PostGroup {
    id: i64,
    pub(crate) copies: Vec<PathBuf>,
    pub(crate) links: Vec<PathBuf>,
}

impl PostGroup {
    fn new(id: i64) -> Self {
        PostGroup {
            id,
            copies: Vec::new(),
            links: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.id
    }
}

/// In-memory registry of posts discovered on disk, keyed by post id.
///
/// The registry is an explicit value handed into each scan rather than
/// process-wide state, so multiple scan/clean cycles (and tests) cannot leak
/// entries into each other. It lives for a single deduplication run and is
/// discarded afterwards; the filesystem itself is the only durable state.
#[derive(Debug, Default)]
pub(crate) struct PostRegistry {
    groups: BTreeMap<i64, PostGroup>,
}

impl PostRegistry {
    pub(crate) fn new() -> Self {
        PostRegistry::default()
    }

    pub(crate) fn record_copy(&mut self, id: i64, path: PathBuf) {
        self.group_mut(id).copies.push(path);
    }

    pub(crate) fn record_link(&mut self, id: i64, path: PathBuf) {
        self.group_mut(id).links.push(path);
    }

    fn group_mut(&mut self, id: i64) -> &mut PostGroup {
        self.groups.entry(id).or_insert_with(|| PostGroup::new(id))
    }

    pub(crate) fn get(&self, id: i64) -> Option<&PostGroup> {
        self.groups.get(&id)
    }

    pub(crate) fn remove(&mut self, id: i64) -> Option<PostGroup> {
        self.groups.remove(&id)
    }

    pub(crate) fn groups(&self) -> impl Iterator<Item = &PostGroup> {
        self.groups.values()
    }

    pub(crate) fn groups_mut(&mut self) -> impl Iterator<Item = &mut PostGroup> {
        self.groups.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Index of the path with the shortest absolute string form; ties go to the
/// first-encountered element.
pub(crate) fn shortest_path_index(paths: &[PathBuf]) -> Option<usize> {
    (0..paths.len()).min_by_key(|&i| absolute_len(&paths[i]))
}

/// The canonical path rule: among candidates, the shortest absolute path
/// wins. Shorter paths are assumed closer to an original organizational
/// location and more likely to retain descriptive directory context.
pub(crate) fn find_shortest_path(paths: &[PathBuf]) -> Option<&PathBuf> {
    shortest_path_index(paths).map(|i| &paths[i])
}

/// Resolves a path against the working directory without touching the
/// filesystem, falling back to the path as given if resolution fails.
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn absolute_len(path: &Path) -> usize {
    absolute_path(path).as_os_str().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_absolute_path_wins() {
        let paths = vec![
            PathBuf::from("/downloads/fox wolf/3 17.jpg"),
            PathBuf::from("/downloads/fox/1 17.jpg"),
            PathBuf::from("/downloads/fox wolf bird/2 17.jpg"),
        ];
        assert_eq!(
            find_shortest_path(&paths),
            Some(&PathBuf::from("/downloads/fox/1 17.jpg"))
        );
    }

    #[test]
    fn ties_resolve_to_first_encountered() {
        let paths = vec![
            PathBuf::from("/downloads/a/1 17.jpg"),
            PathBuf::from("/downloads/b/2 17.jpg"),
        ];
        assert_eq!(shortest_path_index(&paths), Some(0));
    }

    #[test]
    fn empty_candidate_set_has_no_shortest() {
        let paths: Vec<PathBuf> = Vec::new();
        assert_eq!(find_shortest_path(&paths), None);
    }

    #[test]
    fn registry_preserves_insertion_order() {
        let mut registry = PostRegistry::new();
        registry.record_copy(17, PathBuf::from("b/2 17.jpg"));
        registry.record_copy(17, PathBuf::from("a/1 17.jpg"));
        registry.record_link(17, PathBuf::from("c/3 17.jpg"));

        let group = registry.get(17).unwrap();
        assert_eq!(group.copies[0], PathBuf::from("b/2 17.jpg"));
        assert_eq!(group.copies[1], PathBuf::from("a/1 17.jpg"));
        assert_eq!(group.links, vec![PathBuf::from("c/3 17.jpg")]);
        assert_eq!(registry.len(), 1);
    }
}
