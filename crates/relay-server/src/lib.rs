pub mod connection;
pub mod error;
pub mod health;
pub mod hub;
pub mod server;
pub mod websocket;

pub use connection::{ConnectionLimits, Frame, TransportError};
pub use error::{HubError, ServerError};
pub use hub::{Hub, HubHandle, HubSnapshot};
pub use server::{build_router, start, AppState, ServerHandle};
