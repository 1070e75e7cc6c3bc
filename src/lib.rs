// Library crate for integration tests.
// main.rs drives the same modules through this crate.

pub mod audit;
pub mod config;
pub mod error;
pub mod notify;
pub mod process;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;
