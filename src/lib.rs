//! tradesim: a simulated retail trading venue.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. [`runner`] drives the market
//! simulation on timers and [`cli`] is the command-line front end.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod runner;
pub mod cli;
