pub mod metadata_cache;

pub use metadata_cache::*;
