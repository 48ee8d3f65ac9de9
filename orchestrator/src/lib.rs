//! DeployMaster library
//!
//! Mirrors SVN resources, fans artifacts out from a master node to its
//! slaves and runs post-deploy commands, keeping a history of every run.

pub mod app;
pub mod cache;
pub mod deploy;
pub mod diagnostic;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod probe;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod svn;
pub mod tasks;
pub mod transfer;
pub mod utils;
pub mod vault;
pub mod workers;
