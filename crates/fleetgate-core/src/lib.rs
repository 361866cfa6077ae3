pub mod constants;
pub mod error;
pub mod event;
pub mod types;

pub use error::{Error, Result};
pub use event::{AlertSeverity, DomainEvent, EventKind, EventSender, event_channel};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
