//! Host side of server-initiated requests.
//!
//! [`HostCapabilities`] bundles the handlers the host offers to servers;
//! [`HostClientHandler`] bridges them onto the rmcp client role for one
//! connection.

mod client;
mod convert;
mod handler;

pub use client::HostClientHandler;
pub use handler::HostCapabilities;
