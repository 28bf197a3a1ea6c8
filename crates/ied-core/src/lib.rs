#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

//! Core library for ied, a package manager for CommonJS modules.
//!
//! Requested packages are resolved through a chain of resolvers, linked into a
//! nested-looking `node_modules` tree and materialized in a flat,
//! content-addressed layout by the [`pkg::Store`].

pub mod config;
pub mod error;
pub mod pkg;
pub mod version;

pub use config::{Config, LogFormat, LogLevel};
pub use error::Error;
pub use version::VERSION;
