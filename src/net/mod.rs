//! HTTP request/response types and the network seam.

mod client;
mod types;

#[cfg(test)]
pub mod fake;

pub use client::{is_delivered, HttpNetwork, Network};
pub(crate) use types::wire_body;
pub use types::{Headers, Request, RequestMode, ResponseSnapshot};
