//! HTTP surface: extractors, handlers and the route table.

pub mod extract;
pub mod handlers;
pub mod routes;

pub use routes::configure;
