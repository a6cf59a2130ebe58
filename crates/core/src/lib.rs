//! Ambient stack shared by every crate in the node agent workspace:
//! configuration, error plumbing, and logging initialisation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{NodeUuidMode, Settings};
pub use error::{CoreError, CoreResult};
