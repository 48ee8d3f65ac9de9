//! Domain models

pub mod node;
pub mod resource;
pub mod task;
