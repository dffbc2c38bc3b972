pub mod client;
pub mod provider;
pub mod validate;
