//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML file from the platform config
//! directory (or an explicit path), supplies defaults for everything that is
//! missing, and converts the result into the settings the node needs.

pub mod config;
