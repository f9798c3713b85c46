// Library exports for askbox
// This allows integration tests and the binary to share one module tree

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod qa;
pub mod routes;
pub mod state;
pub mod validation;
