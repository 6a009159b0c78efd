//! Runtime side of the GitLab pipeline notifier: the WebSocket transport,
//! the reconnecting supervisor and the concrete sinks, settings and logging
//! it is wired to.

pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod settings;
pub mod supervisor;
pub mod transport;

pub use error::{ConfigError, ConnectionError, SupervisorError};
pub use supervisor::{
    DispatchStats, NotificationDispatcher, StopHandle, Supervisor, SupervisorConfig,
    SupervisorState,
};
pub use transport::{validate_endpoint, Connection, Connector, TransportConfig, WsConnector};
