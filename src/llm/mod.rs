pub mod provider;
pub mod providers;
pub mod registry;
pub mod tools;
pub mod types;
