pub mod bus;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod filter;
pub mod infra;
pub mod services;
pub mod timing;
