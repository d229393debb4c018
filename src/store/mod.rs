//! File-backed state: the crawl cursor and the delivery queue directory.

mod cursor;
mod queue_dir;

pub use cursor::PersistentCursor;
pub use queue_dir::QueueDirectory;
