//! service-catalog - a catalog of named services with pluggable storage.
//!
//! The catalog is one JSON document holding every record. It lives in a
//! local file or an Azure blob and is replaced wholesale on every change.
//! A REST API and a CLI sit on top of the same store.
//!
//! # Modules
//!
//! - [`catalog`] - Record and partial-update types
//! - [`storage`] - Storage backend trait, document codec and implementations
//! - [`store`] - Catalog operations (list, get, create, update, delete)
//! - [`server`] - REST API
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration loading
//! - [`logging`] - Tracing subscriber setup
//! - [`cli`] - Command-line interface definitions

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod server;
pub mod storage;
pub mod store;
