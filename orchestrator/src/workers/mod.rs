//! Background workers

pub mod prober;
