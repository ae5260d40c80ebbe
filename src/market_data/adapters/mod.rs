pub mod ws;

pub use ws::WsTransport;
