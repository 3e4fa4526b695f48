//! Cell provider registry, keyed by item type.
//!
//! The registry is an explicit object owned by the host and injected into
//! controllers. Providers can be registered globally or for one owner; an
//! owner's entries are dropped when the host reports the owner destroyed.

use crate::sources::SourceRef;
use crate::types::{ItemRef, ItemType, OwnerId, Record, SectionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Presentation style requested by a section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStyle {
    #[default]
    TableCell,
    GridCell,
    Header,
    FillSpace,
}

/// Everything a provider needs to realize one item.
#[derive(Clone)]
pub struct CellConfiguration {
    pub section: SectionId,
    pub item: ItemRef,
    /// `None` while the record is not known; render a placeholder.
    pub record: Option<Record>,
    pub style: CellStyle,
    pub source: Option<SourceRef>,
}

impl CellConfiguration {
    /// True if the payload has not arrived yet.
    pub fn is_placeholder(&self) -> bool {
        !self.record.as_ref().is_some_and(Record::is_resolved)
    }
}

impl fmt::Debug for CellConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellConfiguration")
            .field("section", &self.section)
            .field("item", &self.item)
            .field("record", &self.record)
            .field("style", &self.style)
            .field("source", &self.source.as_ref().map(|source| source.id()))
            .finish()
    }
}

/// Realizes a record as a cell of type `C`.
pub trait CellProvider<C>: Send + Sync {
    fn provide_cell(&self, configuration: &CellConfiguration) -> C;
}

impl<C, F> CellProvider<C> for F
where
    F: Fn(&CellConfiguration) -> C + Send + Sync,
{
    fn provide_cell(&self, configuration: &CellConfiguration) -> C {
        self(configuration)
    }
}

type ProviderMap<C> = HashMap<ItemType, Arc<dyn CellProvider<C>>>;

/// Type-keyed lookup of cell providers.
pub struct ProviderRegistry<C> {
    providers: RwLock<ProviderMap<C>>,
    owned: RwLock<HashMap<OwnerId, ProviderMap<C>>>,
}

impl<C> ProviderRegistry<C> {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            owned: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider for every owner. Replaces an earlier one.
    pub fn register<P>(&self, item_type: ItemType, provider: P)
    where
        P: CellProvider<C> + 'static,
    {
        tracing::debug!(item_type = %item_type, "registering cell provider");
        self.providers.write().insert(item_type, Arc::new(provider));
    }

    /// Register a provider used only by `owner`, taking precedence over the
    /// global one.
    pub fn register_for_owner<P>(&self, owner: OwnerId, item_type: ItemType, provider: P)
    where
        P: CellProvider<C> + 'static,
    {
        self.owned
            .write()
            .entry(owner)
            .or_default()
            .insert(item_type, Arc::new(provider));
    }

    /// Provider for a type, falling back to the presentable provider.
    pub fn provider_for(&self, item_type: &ItemType) -> Option<Arc<dyn CellProvider<C>>> {
        let providers = self.providers.read();
        providers
            .get(item_type)
            .or_else(|| providers.get(&ItemType::PRESENTABLE))
            .cloned()
    }

    /// Like [`provider_for`](Self::provider_for), consulting the owner's
    /// providers first.
    pub fn provider_for_owner(
        &self,
        owner: OwnerId,
        item_type: &ItemType,
    ) -> Option<Arc<dyn CellProvider<C>>> {
        let owned = self
            .owned
            .read()
            .get(&owner)
            .and_then(|providers| providers.get(item_type).cloned());

        owned.or_else(|| self.provider_for(item_type))
    }

    /// Drop everything registered for `owner`.
    pub fn owner_destroyed(&self, owner: OwnerId) {
        if self.owned.write().remove(&owner).is_some() {
            tracing::debug!(?owner, "dropped owner providers");
        }
    }

    pub fn is_registered(&self, item_type: &ItemType) -> bool {
        self.providers.read().contains_key(item_type)
    }
}

impl<C> Default for ProviderRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ProviderRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.providers.read().keys().collect::<Vec<_>>())
            .field("owners", &self.owned.read().len())
            .finish()
    }
}
