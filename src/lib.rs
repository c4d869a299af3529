pub mod api;
pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod index;
pub mod locator;
pub mod orchestrator;
pub mod types;
pub mod validator;
