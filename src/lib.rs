//! # simfetch Core Library
//!
//! This crate provides the core functionality for the `simfetch` command-line
//! application: retrieving result and diagnostic bundles from a remote
//! simulation service and normalizing them for local inspection.
//!
//! ## Key Modules
//!
//! - [`receiver`]: A transient HTTP endpoint that accepts exactly one file
//!   upload per invocation and reports its outcome to a waiting caller.
//! - [`normalize`]: Turns a tar-format bundle into an inspectable directory
//!   tree, stripping the common member prefix and repairing legacy names.
//! - [`session`]: Interleaves the receiver lifecycle with a remote action so
//!   a caller gets back either a downloaded file or a clean cancellation.
//! - [`remote`]: The control-plane interface the session layer drives, plus
//!   a thin JSON-over-HTTP client implementation.

pub mod cli;
pub mod error;
pub use error::FetchError;

pub mod normalize;
pub mod receiver;
pub mod remote;
pub mod session;
