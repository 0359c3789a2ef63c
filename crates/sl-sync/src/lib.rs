#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sl-sync** – Folds the durable event log into the central aggregate on
//! an independent timer from the write path, takes periodic snapshots, and
//! compacts the log behind them.

pub mod snapshotter;
pub mod worker;

pub use snapshotter::Snapshotter;
pub use worker::{SyncConfig, SyncOutcome, SyncWorker};
