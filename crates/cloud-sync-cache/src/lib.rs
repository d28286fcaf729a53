mod cache;
mod index;
mod path;

pub use cache::{CacheError, CacheStats, FileCache};
pub use index::CachedFileInfo;
