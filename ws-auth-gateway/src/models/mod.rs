mod connection;
mod context;
mod level;
mod outcome;

pub use connection::{ConnectionMetadata, MetadataError, SEC_WEBSOCKET_PROTOCOL};
pub use context::{AuthContext, is_production_environment};
pub use level::PermissivenessLevel;
pub use outcome::{AuthOutcome, UserIdentity};
