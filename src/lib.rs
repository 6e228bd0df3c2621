//! Day-ahead market clearing and redispatch for power systems.
//!
//! A model is read from a directory of CSV files and a `model.toml` ([`input`]), turned into
//! validated [`model::Parameters`] and solved sub-horizon by sub-horizon as a sequence of linear
//! programs ([`simulation`]). Results are written as CSV tables ([`output`]).
#![warn(missing_docs)]
pub mod cli;
pub mod error;
pub mod horizon;
pub mod id;
pub mod input;
pub mod log;
pub mod model;
pub mod network;
pub mod output;
pub mod profile;
pub mod settings;
pub mod simulation;
pub mod units;

#[cfg(test)]
mod fixture;
