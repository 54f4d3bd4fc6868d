pub mod backend;
pub mod bridge;
pub mod channel;
pub mod screenshot;
pub mod transport;
pub mod types;
