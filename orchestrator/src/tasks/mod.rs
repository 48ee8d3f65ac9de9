//! Task and template management

pub mod service;

pub use service::TaskService;
