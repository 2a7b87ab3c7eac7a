mod loader;
mod types;

pub use types::{BindType, Config, ConnectionConfig, IpFamily, ListenerConfig, LogConfig};
