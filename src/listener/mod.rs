//! Inbound side: TCP listeners that accept peers, ask the bus whether to
//! admit them, and hand admitted sockets to the session layer.

mod acceptor;
mod registry;

pub use acceptor::Listener;
pub use registry::ListenerRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener id already in use")]
    AlreadyExists,
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),
}
