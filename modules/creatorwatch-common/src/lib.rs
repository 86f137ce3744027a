pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AppConfig, EmailConfig, LogFormat, DEFAULT_FALLBACK_ACTOR_ID, DEFAULT_PRIMARY_ACTOR_ID,
};
pub use error::{ConfigError, DeliveryError, StoreError};
pub use types::*;
