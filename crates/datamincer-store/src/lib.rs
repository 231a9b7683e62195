//! Persistent stores used by DataMincer products.
//!
//! `State` keeps per-product key/value data across runs, `Cache` holds
//! content-addressed blobs and files, and `FileManager` maps bundle URIs to
//! local paths.

pub mod atomic;
pub mod cache;
pub mod errors;
pub mod files;
pub mod state;

pub use atomic::{write_bytes_atomic, write_json_atomic};
pub use cache::{CACHE_INDEX, Cache, CacheBin, DEFAULT_BIN, content_id};
pub use errors::{StoreError, StoreResult};
pub use files::{FileManager, FileRoots, prepare_directory};
pub use state::{STATE_FILE, State};
