mod server;
mod shutdown;
mod state;

pub use server::Server;
pub use shutdown::Shutdown;
pub use state::{ServerState, SharedServerState};
