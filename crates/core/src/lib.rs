pub mod config;
pub mod error;

pub use config::{
    ConfigScope, KindRules, McpServerDecl, PermissionSettings, Settings, SourcedPattern,
    TransportKind,
};
pub use error::ConfigError;
