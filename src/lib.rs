// Core infrastructure modules
pub mod core;
pub mod config;

// Sample programs
pub mod accounts;
pub mod employee;
pub mod results_grid;
pub mod transfer;

// In-memory executors shared by unit and integration tests.
#[doc(hidden)]
pub mod test_utils;
