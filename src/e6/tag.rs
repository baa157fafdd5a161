use std::cmp::Ordering;

/// Normalizes a raw tag list into the canonical ordering used as a search
/// signature, a directory name, and a cache key for repeated queries.
///
/// Tags are lowercased, trimmed, and sorted descending by the value of their
/// bytes read as a little-endian unsigned integer. Tags containing `:`
/// (metadata tags like `order:score`) and tags starting with `-` (exclusions)
/// sort as if their value were negated, which pushes them behind every plain
/// tag no matter where they appeared in the input.
pub(crate) fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|tag| tag.as_ref().trim().to_lowercase())
        .collect();
    normalized.sort_by(|a, b| compare_tags(a, b));
    normalized
}

/// Metadata and exclusion tags are deferred to the end of the ordering.
fn is_deferred(tag: &str) -> bool {
    tag.contains(':') || tag.starts_with('-')
}

/// Comparison key equivalent to reading the tag's bytes as a little-endian
/// unsigned integer: a longer byte string always has a larger value (its top
/// byte is never zero), and equal lengths compare by the reversed bytes.
/// The key is injective per distinct string, so the ordering is total and
/// independent of the input order.
fn byte_value_key(tag: &str) -> (usize, Vec<u8>) {
    let mut bytes = tag.as_bytes().to_vec();
    bytes.reverse();
    (tag.len(), bytes)
}

fn compare_tags(a: &str, b: &str) -> Ordering {
    match (is_deferred(a), is_deferred(b)) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        // Plain tags: descending byte value.
        (false, false) => byte_value_key(b).cmp(&byte_value_key(a)),
        // Deferred tags: negated value, so descending order becomes ascending.
        (true, true) => byte_value_key(a).cmp(&byte_value_key(b)),
    }
}
