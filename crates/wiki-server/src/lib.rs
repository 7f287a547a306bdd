pub mod config;
pub mod error;
pub mod governor;
pub mod routes;
pub mod server;
pub mod stream;
