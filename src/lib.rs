//! # Reconcile
//!
//! A reconciliation engine that keeps a sectioned, optionally hierarchical
//! list model in sync with live data sources.
//!
//! ## Core Concepts
//!
//! - **Data sources**: ordered item lists that notify subscribers of change
//! - **Compositions**: data sources concatenating other data sources
//! - **Subscriptions**: cursors that track added/removed/updated items
//! - **Sections**: named groupings binding a source into the model, with
//!   on-demand expansion of items into child sources
//! - **Controller**: owner of the model, applying every change as one
//!   serialized, diffed update
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{ArraySource, Controller, ControllerConfig, Section, UpdateContext};
//!
//! let context = UpdateContext::new();
//! let controller = Controller::new(
//!     ControllerConfig::hierarchical(),
//!     context.clone(),
//!     surface,
//!     registry,
//! );
//!
//! let files = ArraySource::new(["f1", "f2"]);
//! controller.add_sections(vec![Section::new("files", files.clone())?])?;
//!
//! // Sources may change from any thread; updates apply on the context
//! files.push("f3");
//! context.run_pending();
//! ```

pub mod context;
pub mod controller;
pub mod error;
pub mod item;
pub mod model;
pub mod registry;
pub mod section;
pub mod sources;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use context::{Coalescer, Done, ExecutionContext, SequentialQueue, UpdateContext};
pub use controller::{
    ActionKind, ActionOutcome, CollectionAction, Completion, ContentListener, Controller,
    ControllerConfig, RenderSurface,
};
pub use error::{ReconcileError, Result};
pub use item::{Capabilities, ChildrenProvider, DataItem, SectionProvider, SelectionInteraction};
pub use model::{
    place_items, ModelDiff, ModelSection, ModelSnapshot, ModelUpdate, Placement, SectionSnapshot,
    Wrapper,
};
pub use registry::{CellConfiguration, CellProvider, CellStyle, ProviderRegistry};
pub use section::{ExpansionState, InsertionMetrics, Section};
pub use sources::{
    same_source, subscribe, ArraySource, Composition, CompositionFilter, DataSource,
    RecordCompletion, SourceRef,
};
pub use subscriptions::{
    Snapshot, Subscription, SubscriptionConfig, SubscriptionId, SubscriptionManager, UpdateHandler,
};
pub use types::*;
