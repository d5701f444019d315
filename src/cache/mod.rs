pub mod key;
pub mod query_cache;

pub use key::{Family, QueryKey, Scope};
pub use query_cache::{CachePartition, QueryCache};
