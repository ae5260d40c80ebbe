pub mod flow_buffer;
pub mod store;

pub use flow_buffer::{FLOW_RETENTION, FlowBuffer};
pub use store::{Revisions, SharedStore, StateStore};
