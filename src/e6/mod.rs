pub(crate) mod dedup;
pub(crate) mod fetcher;
pub(crate) mod io;
pub(crate) mod sender;
pub(crate) mod tag;
