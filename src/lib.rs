#![allow(clippy::result_large_err)]

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod lro;
pub mod preflight;
pub mod rest;
pub mod target;
pub mod telemetry;

pub use crate::config::SweepConfig;
pub use crate::engine::{SweepEngine, SweepSummary};
pub use crate::error::{Error, Result};
