//! blockvoice: turns a list of text blocks into one audio file.
//!
//! A submitted job fans out into one unit per block. Workers synthesize the
//! units independently and in any order; the worker that records the last
//! outcome assembles the composite.

pub mod assembly;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod fan_in;
pub mod hooks;
pub mod job;
pub mod lifecycle;
pub mod logging;
pub mod normalize;
pub mod providers;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod store;
pub mod workspace;

pub use error::{BlockvoiceError, Result};
pub use service::Coordinator;
