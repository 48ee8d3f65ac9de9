//! Request and response bodies of the DeployMaster HTTP API

pub mod models;
