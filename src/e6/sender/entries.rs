use serde::Deserialize;

/// A post record as returned by the API. Only the fields the downloader
/// consumes are modeled; everything else in the payload is ignored.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PostEntry {
    pub(crate) id: i64,
    pub(crate) file: FileEntry,
    #[serde(default)]
    pub(crate) flags: FlagEntry,
}

/// The media file attached to a post. `url` is absent when the post has no
/// downloadable media (or it is hidden from anonymous users); such posts are
/// excluded from download sets.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct FileEntry {
    #[serde(default)]
    pub(crate) url: Option<String>,
    pub(crate) ext: String,
    #[serde(default)]
    pub(crate) size: i64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub(crate) struct FlagEntry {
    #[serde(default)]
    pub(crate) deleted: bool,
}

/// An ordered collection of posts (a comic or series).
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PoolEntry {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) post_ids: Vec<i64>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PostListResponse {
    pub(crate) posts: Vec<PostEntry>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct SinglePostResponse {
    pub(crate) post: PostEntry,
}
