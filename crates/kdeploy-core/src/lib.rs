pub mod applier;
pub mod builder;
pub mod config;
pub mod error;
pub mod io;
pub mod kubectl;
pub mod ledger;
pub mod paths;
pub mod pipeline;
pub mod plan;
pub mod readiness;
pub mod runner;
pub mod status;
pub mod template;
pub mod tenant;
pub mod types;

pub use error::{DeployError, Result};
