pub mod adapters;
pub mod connection;
pub mod normalize;
pub mod router;
pub mod types;
