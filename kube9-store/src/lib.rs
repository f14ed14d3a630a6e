//! The Cluster Store (spec.md §4.A): durable state for nodes and pods,
//! reached either through a real Postgres-backed implementation or an
//! in-memory fake used in unit tests. Both implement the same [`Store`]
//! trait so the scheduler, control loops, and HTTP layer never know
//! which backing they're talking to.

pub mod error;
pub mod memory;
pub mod postgres;
mod rows;
mod store;

pub use error::{Result, StoreError};
pub use store::{NewNode, NewPod, Store};
