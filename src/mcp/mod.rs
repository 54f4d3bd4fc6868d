pub mod cache;
pub mod client;
pub mod stdio_transport;
pub mod transport;
