pub mod approval;
pub mod audit;
pub mod backend;
pub mod config;
pub mod environment;
pub mod error;
pub mod installer;
pub mod io;
pub mod lock;
pub mod metadata;
pub mod paths;
pub mod pipeline;
pub mod pypi;
pub mod registry;
pub mod security;
pub mod types;

pub use error::{PkgError, Result};

#[cfg(test)]
pub(crate) mod test_support;
