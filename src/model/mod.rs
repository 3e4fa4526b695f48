//! The rendering model: sections of ordered, optionally nested items.
//!
//! A [`ModelSnapshot`] is the single source of truth handed to the rendering
//! surface. It is only ever replaced wholesale by the controller's update
//! pipeline, together with a [`ModelDiff`] against the previous one.

mod diff;
pub mod insertion;
mod snapshot;
mod wrapper;

pub use diff::{ModelDiff, ModelUpdate};
pub use insertion::{place_items, Placement};
pub use snapshot::{ModelSection, ModelSnapshot, SectionSnapshot};
pub use wrapper::Wrapper;
