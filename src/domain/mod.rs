//! Core domain types and logic.

pub mod error;
pub mod calendar;
pub mod instrument;
pub mod account;
pub mod position;
pub mod ledger;
pub mod execution;
pub mod funds;
pub mod portfolio;
pub mod exchange;
pub mod simulation;
pub mod config_validation;
