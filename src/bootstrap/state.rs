//! Shared server state.
//!
//! One instance lives for the life of the process and is handed to every
//! component: the bus, the listener and connection registries, the loaded
//! configuration and the shutdown signal.

use std::sync::Arc;

use crate::bus::SharedBus;
use crate::config::Config;
use crate::listener::ListenerRegistry;
use crate::session::ConnectionRegistry;

use super::Shutdown;

pub struct ServerState {
    pub config: Config,
    pub bus: SharedBus,
    pub listeners: ListenerRegistry,
    pub connections: ConnectionRegistry,
    pub shutdown: Shutdown,
}

pub type SharedServerState = Arc<ServerState>;

impl ServerState {
    pub fn new(config: Config, bus: SharedBus) -> SharedServerState {
        Arc::new(Self {
            config,
            bus,
            listeners: ListenerRegistry::new(),
            connections: ConnectionRegistry::new(),
            shutdown: Shutdown::new(),
        })
    }
}
