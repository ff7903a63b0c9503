//! Resumable descending scan over a dense numeric ID space.
//!
//! A [`manager::RangeManager`] feeds IDs into a bounded [`queue::WorkQueue`],
//! a pool of [`worker::FetchWorker`]s fetches and classifies them, and every
//! result lands exactly once in a [`store::ResultStore`]. The
//! [`lifecycle::Scanner`] ties it together and owns shutdown.

mod error;
mod macros;
mod parse;

pub mod checkpoint;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod queue;
pub mod record;
pub mod request;
pub mod store;
pub mod wait;
pub mod worker;

pub use error::{Error, FetchError, Result, StoreError};
