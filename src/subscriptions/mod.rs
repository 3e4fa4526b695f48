//! Live subscriptions to data sources.
//!
//! A subscription is a per-consumer cursor into one data source:
//! - Notifications are delivered on the subscription's execution context
//! - Rapid notifications fold into one pending delivery
//! - Added/removed/updated references accumulate until a reset snapshot
//!
//! Termination is the only cancellation primitive. It is idempotent, and a
//! delivery already scheduled for a terminated subscription is dropped.
//!
//! # Example
//!
//! ```ignore
//! let files = ArraySource::new(["f1", "f2"]);
//! let source: SourceRef = files.clone();
//!
//! let subscription = subscribe(&source, context.into(), SubscriptionConfig::default(), |sub| {
//!     let snapshot = sub.snapshot_resetting_change_tracking(true);
//!     println!("now {} items, added {:?}", snapshot.items.len(), snapshot.added);
//! });
//!
//! files.push("f3");
//! context.run_pending();
//! subscription.terminate();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{Snapshot, Subscription, SubscriptionConfig, SubscriptionId, UpdateHandler};
