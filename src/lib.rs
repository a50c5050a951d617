//! pikernel library: the stages behind the `pikernel` binary.
//!
//! Exposed for integration tests, which drive each stage with a fake kernel
//! build and a local stand-in for the remote target.

pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod kconfig;
pub mod kernel;
pub mod modules;
pub mod package;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod remote;
pub mod staging;
pub mod timing;
