//! Core types for the reconciliation engine.

use crate::error::{ReconcileError, Result};
use crate::item::DataItem;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of one logical item.
///
/// Unique within the visible item list of a single data source; the same
/// reference may recur across sources or nesting levels.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference(Arc<str>);

impl Reference {
    pub fn new(value: impl AsRef<str>) -> Self {
        Reference(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.0)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Reference::new(value)
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Reference(Arc::from(value))
    }
}

/// Type tag used to dispatch an item to a cell provider.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemType(Cow<'static, str>);

impl ItemType {
    /// Generic fallback type every renderer understands.
    pub const PRESENTABLE: ItemType = ItemType(Cow::Borrowed("presentable"));
    pub const ITEM: ItemType = ItemType(Cow::Borrowed("item"));
    pub const ACTION: ItemType = ItemType(Cow::Borrowed("action"));
    pub const VIEW: ItemType = ItemType(Cow::Borrowed("view"));
    pub const SECTION: ItemType = ItemType(Cow::Borrowed("section"));

    pub fn new(name: impl Into<String>) -> Self {
        ItemType(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemType({})", self.0)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a section within a controller.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct SectionId(Arc<str>);

impl SectionId {
    /// Create a section identifier. Empty identifiers are rejected.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref();
        if value.trim().is_empty() {
            return Err(ReconcileError::InvalidSection(
                "section identifier must not be empty".to_string(),
            ));
        }
        Ok(SectionId(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Section({})", self.0)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for SectionId {
    type Error = ReconcileError;

    fn try_from(value: &str) -> Result<Self> {
        SectionId::new(value)
    }
}

impl TryFrom<String> for SectionId {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self> {
        SectionId::new(value)
    }
}

impl TryFrom<&SectionId> for SectionId {
    type Error = ReconcileError;

    fn try_from(value: &SectionId) -> Result<Self> {
        Ok(value.clone())
    }
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a data source instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl SourceId {
    /// Allocate the next process-wide source id.
    pub fn next() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

/// Identity of a registry owner (typically one controller).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl OwnerId {
    pub fn next() -> Self {
        OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

/// Lifecycle state of a data source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceState {
    Loading,
    Idle,
    /// The source failed and contributes no items.
    Failed { reason: String },
}

impl SourceState {
    pub fn is_failed(&self) -> bool {
        matches!(self, SourceState::Failed { .. })
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SourceState::Loading)
    }
}

/// A (possibly partially resolved) item known to a data source.
#[derive(Clone, Debug)]
pub struct Record {
    pub reference: Reference,
    pub item_type: ItemType,
    /// Payload; `None` while the content is still being fetched.
    pub item: Option<Arc<dyn DataItem>>,
    /// Content version, compared on versioned replacement.
    pub version: u64,
}

impl Record {
    /// A record whose payload has not been fetched yet.
    pub fn unresolved(reference: impl Into<Reference>, item_type: ItemType) -> Self {
        Self {
            reference: reference.into(),
            item_type,
            item: None,
            version: 0,
        }
    }

    /// A fully resolved record taking identity, type and version from the item.
    pub fn from_item(item: Arc<dyn DataItem>) -> Self {
        Self {
            reference: item.reference(),
            item_type: item.item_type(),
            version: item.version().unwrap_or(0),
            item: Some(item),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.item.is_some()
    }
}

impl From<Reference> for Record {
    fn from(reference: Reference) -> Self {
        Record::unresolved(reference, ItemType::ITEM)
    }
}

impl From<&str> for Record {
    fn from(reference: &str) -> Self {
        Record::unresolved(reference, ItemType::ITEM)
    }
}

impl From<Arc<dyn DataItem>> for Record {
    fn from(item: Arc<dyn DataItem>) -> Self {
        Record::from_item(item)
    }
}

/// Composite identity of a reference and the section showing it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WrappedReference {
    pub reference: Reference,
    pub section: SectionId,
}

impl WrappedReference {
    pub fn new(reference: Reference, section: SectionId) -> Self {
        Self { reference, section }
    }
}

impl fmt::Debug for WrappedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wrapped({}@{})", self.reference, self.section)
    }
}

/// Identity of an item inside the rendering model.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemRef {
    Plain { reference: Reference },
    Wrapped(WrappedReference),
}

impl ItemRef {
    pub fn plain(reference: impl Into<Reference>) -> Self {
        ItemRef::Plain {
            reference: reference.into(),
        }
    }

    pub fn wrapped(reference: impl Into<Reference>, section: SectionId) -> Self {
        ItemRef::Wrapped(WrappedReference::new(reference.into(), section))
    }

    /// The underlying data source reference.
    pub fn reference(&self) -> &Reference {
        match self {
            ItemRef::Plain { reference } => reference,
            ItemRef::Wrapped(wrapped) => &wrapped.reference,
        }
    }

    /// The owning section, if this identity is wrapped.
    pub fn section(&self) -> Option<&SectionId> {
        match self {
            ItemRef::Plain { .. } => None,
            ItemRef::Wrapped(wrapped) => Some(&wrapped.section),
        }
    }
}

impl fmt::Debug for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Plain { reference } => write!(f, "{:?}", reference),
            ItemRef::Wrapped(wrapped) => write!(f, "{:?}", wrapped),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Plain { reference } => write!(f, "{}", reference),
            ItemRef::Wrapped(wrapped) => write!(f, "{}@{}", wrapped.reference, wrapped.section),
        }
    }
}

/// Visible position of an item: section index and row within the section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexPath {
    pub section: usize,
    pub item: usize,
}

impl IndexPath {
    pub fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}
