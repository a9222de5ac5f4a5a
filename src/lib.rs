//! netpulse: concurrent reachability, port and UDP service monitoring for a
//! dynamic list of network targets.
pub mod aggregator;
pub mod checkers;
pub mod config;
pub mod error;
pub mod logging;
pub mod netinfo;
pub mod ping;
pub mod pool;
pub mod ports;
mod resolve;
pub mod scanner;
pub mod server;
pub mod target;
pub mod types;
pub mod web;
pub mod worker;
