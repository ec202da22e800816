//! Weave items
//!
//! A [`WeaveItem`] is the unit of work for one (aspect, join point) match.
//! Items live in a [`WeaveItems`] arena and refer to each other by
//! [`ItemId`]; the *needs*/*used-by* edge sets form the consumption graph
//! along which failures propagate.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::debug;
use weft_metadata::{FieldRef, MethodRef, TypeName, TypeSig};

use crate::aspect::AspectKind;
use crate::contribution::{BodyEdit, Contribution, CtorPlan};
use crate::joinpoint::Joinpoint;
use crate::mapping::PrototypeItemMapping;

/// Index of an item in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

impl ItemId {
    /// Position in the arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Memoized resolutions of one item
///
/// Only references without generic parameters are cached; parameter
/// resolution depends on the method being cloned.
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    /// Type signatures
    pub types: FxHashMap<TypeSig, TypeSig>,
    /// Field references
    pub fields: FxHashMap<FieldRef, FieldRef>,
    /// Method references resolved to methods
    pub methods: FxHashMap<MethodRef, MethodRef>,
}

impl ResolutionCache {
    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.types.len() + self.fields.len() + self.methods.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One aspect applied at one join point
#[derive(Debug, Clone)]
pub struct WeaveItem {
    /// Arena index
    pub id: ItemId,
    /// Declaration order of the aspect
    pub aspect: usize,
    /// Aspect name
    pub aspect_name: String,
    /// Aspect kind
    pub kind: AspectKind,
    /// Where the advice applies
    pub joinpoint: Joinpoint,
    /// Module receiving the contributions
    pub target_module: String,
    /// Advice type the item copies from, if any
    pub advice_type: Option<TypeName>,
    /// Contributions, fixed at construction
    pub contributions: Vec<Contribution>,
    /// Placeholder types bound for this item only (join point or relative
    /// binding)
    pub type_mappings: BTreeMap<TypeName, TypeName>,
    /// Placeholder members referenced by the advice
    pub item_mappings: Vec<PrototypeItemMapping>,
    /// Target-side arguments for the advice type's generic parameters
    pub type_params: Vec<TypeSig>,
    /// Base constructor selections, for new base types
    pub ctor_plans: Vec<CtorPlan>,
    /// Edits on existing method bodies
    pub edits: Vec<BodyEdit>,
    /// Failure flag (monotonic)
    pub errored: bool,
    /// Items whose outputs this item consumes
    pub needs: BTreeSet<ItemId>,
    /// Items consuming this item's outputs
    pub used_by: BTreeSet<ItemId>,
    /// Memoized resolutions
    pub cache: ResolutionCache,
}

impl WeaveItem {
    /// Create an item with no contributions
    pub fn new(
        id: ItemId,
        aspect: usize,
        aspect_name: impl Into<String>,
        kind: AspectKind,
        joinpoint: Joinpoint,
    ) -> Self {
        let target_module = joinpoint.module().to_string();
        Self {
            id,
            aspect,
            aspect_name: aspect_name.into(),
            kind,
            joinpoint,
            target_module,
            advice_type: None,
            contributions: Vec::new(),
            type_mappings: BTreeMap::new(),
            item_mappings: Vec::new(),
            type_params: Vec::new(),
            ctor_plans: Vec::new(),
            edits: Vec::new(),
            errored: false,
            needs: BTreeSet::new(),
            used_by: BTreeSet::new(),
            cache: ResolutionCache::default(),
        }
    }

    /// Type the join point belongs to
    pub fn joinpoint_type(&self) -> Option<&TypeName> {
        self.joinpoint.declaring_type()
    }
}

/// Arena of weave items with a liveness snapshot
#[derive(Debug, Clone, Default)]
pub struct WeaveItems {
    items: Vec<WeaveItem>,
    live: Vec<bool>,
}

impl WeaveItems {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next pushed item will get
    pub fn next_id(&self) -> ItemId {
        ItemId(self.items.len() as u32)
    }

    /// Add an item; its id must be [`WeaveItems::next_id`]
    pub fn push(&mut self, item: WeaveItem) -> ItemId {
        debug_assert_eq!(item.id, self.next_id());
        let id = item.id;
        self.live.push(!item.errored);
        self.items.push(item);
        id
    }

    /// Number of items, failed ones included
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item by id
    pub fn get(&self, id: ItemId) -> &WeaveItem {
        &self.items[id.index()]
    }

    /// Mutable item by id
    pub fn get_mut(&mut self, id: ItemId) -> &mut WeaveItem {
        &mut self.items[id.index()]
    }

    /// Every item in id order
    pub fn iter(&self) -> impl Iterator<Item = &WeaveItem> {
        self.items.iter()
    }

    /// Whether the item was live at the last refresh
    pub fn is_live(&self, id: ItemId) -> bool {
        self.live.get(id.index()).copied().unwrap_or(false)
    }

    /// Ids live at the last refresh
    pub fn live_ids(&self) -> Vec<ItemId> {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(index, _)| ItemId(index as u32))
            .collect()
    }

    /// Items live at the last refresh
    pub fn live(&self) -> impl Iterator<Item = &WeaveItem> {
        self.items.iter().filter(move |item| self.is_live(item.id))
    }

    /// Number of items live at the last refresh
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    /// Recompute the liveness snapshot from the error flags
    pub fn refresh_liveness(&mut self) {
        self.live = self.items.iter().map(|item| !item.errored).collect();
    }

    /// Record that `user` consumes an output of `provider`
    pub fn add_need(&mut self, user: ItemId, provider: ItemId) {
        if user == provider {
            return;
        }
        self.items[user.index()].needs.insert(provider);
        self.items[provider.index()].used_by.insert(user);
        if self.items[provider.index()].errored {
            self.fail(user);
        }
    }

    /// Mark an item failed and propagate along *used-by* edges
    ///
    /// Returns every item newly put in error, `id` included.
    pub fn fail(&mut self, id: ItemId) -> Vec<ItemId> {
        let mut failed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let item = &mut self.items[current.index()];
            if item.errored {
                continue;
            }
            item.errored = true;
            if current != id {
                debug!(item = %current, cause = %id, "weave item failed through dependency");
            }
            failed.push(current);
            pending.extend(item.used_by.iter().copied());
        }
        failed
    }

    /// Fail every item consuming an output of a failed item
    ///
    /// Needed after edges are added between items that may already be in
    /// error.
    pub fn propagate(&mut self) -> Vec<ItemId> {
        let failed: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.errored)
            .flat_map(|item| item.used_by.iter().copied())
            .collect();
        let mut newly = Vec::new();
        for id in failed {
            newly.extend(self.fail(id));
        }
        newly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(count: u32) -> WeaveItems {
        let mut items = WeaveItems::new();
        for index in 0..count {
            let id = items.next_id();
            items.push(WeaveItem::new(
                id,
                index as usize,
                format!("aspect{}", index),
                AspectKind::TypeMembers,
                Joinpoint::Assembly {
                    module: "App".to_string(),
                },
            ));
        }
        items
    }

    #[test]
    fn test_failure_is_transitive() {
        let mut items = arena(4);
        // 0 needs 1, 1 needs 2; 3 is independent
        items.add_need(ItemId(0), ItemId(1));
        items.add_need(ItemId(1), ItemId(2));
        let failed = items.fail(ItemId(2));
        assert_eq!(failed.len(), 3);
        assert!(items.get(ItemId(0)).errored);
        assert!(!items.get(ItemId(3)).errored);
    }

    #[test]
    fn test_liveness_refreshes_at_boundaries() {
        let mut items = arena(2);
        items.fail(ItemId(1));
        assert!(items.is_live(ItemId(1)));
        items.refresh_liveness();
        assert_eq!(items.live_ids(), vec![ItemId(0)]);
        assert_eq!(items.live_count(), 1);
    }

    #[test]
    fn test_edge_onto_failed_item_fails_user() {
        let mut items = arena(3);
        items.fail(ItemId(2));
        items.add_need(ItemId(1), ItemId(2));
        items.add_need(ItemId(0), ItemId(1));
        assert!(items.get(ItemId(1)).errored);
        assert!(items.get(ItemId(0)).errored);
    }

    #[test]
    fn test_propagate_handles_cycles() {
        let mut items = arena(3);
        items.add_need(ItemId(0), ItemId(1));
        items.add_need(ItemId(1), ItemId(0));
        items.get_mut(ItemId(1)).errored = true;
        let newly = items.propagate();
        assert_eq!(newly, vec![ItemId(0)]);
        assert!(!items.get(ItemId(2)).errored);
    }
}
