//! Ezra Core
//!
//! Shared foundation for the Ezra workspace:
//!
//! - [`EzraError`] and the crate-wide [`Result`] alias
//! - Typed configuration loaded from the environment ([`EzraConfig`])
//! - Logging initialization
//! - Contracts for the collaborators the voice pipeline and mimic poster
//!   depend on but do not implement (agent orchestrator, LLM, web search,
//!   knowledge-graph repository, Discord text surface)
//! - In-memory doubles of those collaborators for tests
//!
//! # Example
//!
//! ```no_run
//! use ezra_core::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!     let config = EzraConfig::from_env()?;
//!     log_settings(&config);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logger;
pub mod testing;
pub mod types;

pub use config::{
    get_env_bool, get_env_or, get_env_parse, load_env, log_settings, EzraConfig, MimicSettings,
    VoiceSettings,
};
pub use error::{EzraError, Result};
pub use logger::init_logging;
pub use types::*;
