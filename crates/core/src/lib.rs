#![deny(warnings)]

pub mod analysis;
pub mod capture;
pub mod config;
pub mod emotion;
pub mod metrics;
pub mod present;
pub mod session;
pub mod share;
pub mod speech;
pub mod util;
