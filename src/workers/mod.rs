//! Background workers

pub mod expiry_sweeper;

pub use expiry_sweeper::{ExpirySweeper, SweepSummary};
