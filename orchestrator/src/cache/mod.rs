//! In-memory caches

pub mod node_status;

pub use node_status::NodeStatusCache;
