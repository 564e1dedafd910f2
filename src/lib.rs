pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod job;
pub mod log;
pub mod osc;
pub mod schema;
pub mod server;
pub mod tools;

pub use config::Config;
pub use diagnostics::Diagnostics;
pub use discovery::{PortDiscovery, SocketEntry, SocketTable};
pub use dispatcher::{ErrorKind, ToolDispatcher, ToolResponse};
pub use error::{CuebridgeError, Result};
pub use generator::{CodeGenerator, PatternGenerator};
pub use job::JobIds;
pub use log::{LogLevel, RingLog};
pub use osc::{EndpointTable, OscClient};
pub use server::Server;
pub use tools::{Tool, ToolContext};
