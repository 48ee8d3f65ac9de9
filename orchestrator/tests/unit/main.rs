//! Unit and engine-level tests

mod fixtures;
mod test_engine;
mod test_fsm;
mod test_paths;
mod test_server;
mod test_tasks;
