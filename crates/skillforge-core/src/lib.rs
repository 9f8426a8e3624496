pub mod codes;
pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{Result, SkillforgeError};
pub use event::EventBus;
pub use types::*;
