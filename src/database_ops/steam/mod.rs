pub mod client;
pub mod payload;
pub mod transform;
