use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{attribute::Attribute, presentation::PresentationModel},
    obs::{self, MetricsEvent},
    types::{AttributeId, ModelId, Source},
    value::WireValue,
};
use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
};
use thiserror::Error as ThisError;

///
/// ModelStoreError
///

#[derive(Debug, ThisError)]
pub enum ModelStoreError {
    #[error("presentation model '{0}' already exists")]
    DuplicateModelId(ModelId),

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(AttributeId),
}

impl ModelStoreError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateModelId(_) => ErrorClass::DuplicateRegistration,
            Self::UnknownAttribute(_) => ErrorClass::Protocol,
        }
    }
}

impl From<ModelStoreError> for InternalError {
    fn from(err: ModelStoreError) -> Self {
        Self::new(err.class(), ErrorOrigin::ModelStore, err.to_string())
    }
}

///
/// ModelStoreEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Added,
    Removed,
}

#[derive(Clone, Debug)]
pub struct ModelStoreEvent {
    pub kind: EventKind,
    pub model_id: ModelId,
    pub model_type: String,
    pub source: Source,
}

///
/// ValueChange
///
/// Reported for every effective attribute mutation. No-op sets produce none.
///

#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    pub attribute_id: AttributeId,
    pub old_value: WireValue,
    pub new_value: WireValue,
}

///
/// Subscription
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Subscription(u64);

type Listener = Rc<dyn Fn(&ModelStoreEvent)>;

struct ListenerEntry {
    id: Subscription,
    /// `None` listens to every model type.
    model_type: Option<String>,
    listener: Listener,
}

///
/// ModelStore
///
/// Indexed in-memory registry of presentation models and their attributes.
/// The four indexes (models by id, models by type, attribute owner, and
/// attributes by qualifier) are updated all-or-nothing per add/remove.
///

#[derive(Default)]
pub struct ModelStore {
    models: HashMap<ModelId, PresentationModel>,
    by_type: HashMap<String, Vec<ModelId>>,
    attribute_owner: HashMap<AttributeId, ModelId>,
    by_qualifier: HashMap<String, Vec<AttributeId>>,
    listeners: Vec<ListenerEntry>,
    next_subscription: u64,
}

impl ModelStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Index a model under all four indexes and return the ADDED event.
    ///
    /// Callers dispatch the returned event via [`Self::notify`] once their
    /// own mutable borrow of the store has ended.
    pub fn add(
        &mut self,
        model: PresentationModel,
        source: Source,
    ) -> Result<ModelStoreEvent, InternalError> {
        if self.models.contains_key(model.id()) {
            return Err(ModelStoreError::DuplicateModelId(model.id().clone()).into());
        }

        let model_id = model.id().clone();
        let model_type = model.model_type().to_string();

        self.by_type
            .entry(model_type.clone())
            .or_default()
            .push(model_id.clone());

        for attr in model.attributes() {
            self.attribute_owner
                .insert(attr.id().clone(), model_id.clone());
            if let Some(qualifier) = attr.qualifier() {
                self.by_qualifier
                    .entry(qualifier.to_string())
                    .or_default()
                    .push(attr.id().clone());
            }
        }

        self.models.insert(model_id.clone(), model);
        obs::record(MetricsEvent::ModelAdded);

        Ok(ModelStoreEvent {
            kind: EventKind::Added,
            model_id,
            model_type,
            source,
        })
    }

    /// De-index a model. Removing an absent model is a no-op, not an error.
    pub fn remove(
        &mut self,
        model_id: &ModelId,
        source: Source,
    ) -> Option<(PresentationModel, ModelStoreEvent)> {
        let model = self.models.remove(model_id)?;

        if let Some(ids) = self.by_type.get_mut(model.model_type()) {
            ids.retain(|id| id != model_id);
            if ids.is_empty() {
                self.by_type.remove(model.model_type());
            }
        }

        for attr in model.attributes() {
            self.attribute_owner.remove(attr.id());
            if let Some(qualifier) = attr.qualifier() {
                self.remove_from_qualifier_index(qualifier, attr.id());
            }
        }

        obs::record(MetricsEvent::ModelRemoved);

        let event = ModelStoreEvent {
            kind: EventKind::Removed,
            model_id: model_id.clone(),
            model_type: model.model_type().to_string(),
            source,
        };

        Some((model, event))
    }

    // ---------------------------------------------------------------------
    // Lookups (unknown keys return empty/absent, never fail)
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn find_by_id(&self, model_id: &ModelId) -> Option<&PresentationModel> {
        self.models.get(model_id)
    }

    #[must_use]
    pub fn find_all_by_type(&self, model_type: &str) -> Vec<&PresentationModel> {
        self.by_type
            .get(model_type)
            .map(|ids| ids.iter().filter_map(|id| self.models.get(id)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn find_all_by_qualifier(&self, qualifier: &str) -> Vec<&Attribute> {
        self.by_qualifier
            .get(qualifier)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.attribute_by_id(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn attribute_by_id(&self, attribute_id: &AttributeId) -> Option<&Attribute> {
        let model_id = self.attribute_owner.get(attribute_id)?;
        self.models.get(model_id)?.attribute_by_id(attribute_id)
    }

    // ---------------------------------------------------------------------
    // Attribute mutation
    // ---------------------------------------------------------------------

    /// Set an attribute's value. Returns `None` for a no-op set (value equal
    /// to the current one); only effective changes are reported.
    pub fn set_value(
        &mut self,
        attribute_id: &AttributeId,
        value: WireValue,
    ) -> Result<Option<ValueChange>, InternalError> {
        let attr = self
            .attribute_mut(attribute_id)
            .ok_or_else(|| ModelStoreError::UnknownAttribute(attribute_id.clone()))?;

        let Some(old_value) = attr.set_value(value.clone()) else {
            return Ok(None);
        };

        obs::record(MetricsEvent::ValueChanged);

        Ok(Some(ValueChange {
            attribute_id: attribute_id.clone(),
            old_value,
            new_value: value,
        }))
    }

    /// Re-qualify an attribute. The qualifier index self-maintains.
    pub fn set_qualifier(
        &mut self,
        attribute_id: &AttributeId,
        qualifier: Option<String>,
    ) -> Result<(), InternalError> {
        let attr = self
            .attribute_mut(attribute_id)
            .ok_or_else(|| ModelStoreError::UnknownAttribute(attribute_id.clone()))?;
        let old = attr.set_qualifier(qualifier.clone());

        if old == qualifier {
            return Ok(());
        }
        if let Some(old) = old {
            self.remove_from_qualifier_index(&old, attribute_id);
        }
        if let Some(new) = qualifier {
            self.by_qualifier
                .entry(new)
                .or_default()
                .push(attribute_id.clone());
        }

        Ok(())
    }

    /// Plan a qualifier broadcast for `model_id`: every other attribute
    /// sharing one of its qualifiers, paired with the value it would
    /// receive. Read-only so callers can vet each target before applying.
    #[must_use]
    pub fn qualifier_broadcast_targets(
        &self,
        model_id: &ModelId,
    ) -> Vec<(AttributeId, WireValue)> {
        let Some(model) = self.models.get(model_id) else {
            return Vec::new();
        };

        let mut targets = Vec::new();
        for attr in model.attributes() {
            let Some(qualifier) = attr.qualifier() else {
                continue;
            };
            if let Some(ids) = self.by_qualifier.get(qualifier) {
                for id in ids {
                    if id != attr.id() {
                        targets.push((id.clone(), attr.value().clone()));
                    }
                }
            }
        }

        targets
    }

    /// Broadcast every qualified attribute value of `model_id` to all other
    /// attributes sharing the same qualifier. Single-hop: values converge
    /// within this call, chains do not cascade.
    pub fn update_qualifiers(&mut self, model_id: &ModelId) -> Vec<ValueChange> {
        let mut changes = Vec::new();
        for (target, value) in self.qualifier_broadcast_targets(model_id) {
            // Target attributes verified by the index; unknown ids here
            // would be an index inconsistency.
            if let Ok(Some(change)) = self.set_value(&target, value) {
                changes.push(change);
            }
        }

        changes
    }

    fn attribute_mut(&mut self, attribute_id: &AttributeId) -> Option<&mut Attribute> {
        let model_id = self.attribute_owner.get(attribute_id)?.clone();
        self.models.get_mut(&model_id)?.attribute_mut(attribute_id)
    }

    fn remove_from_qualifier_index(&mut self, qualifier: &str, attribute_id: &AttributeId) {
        if let Some(ids) = self.by_qualifier.get_mut(qualifier) {
            ids.retain(|id| id != attribute_id);
            if ids.is_empty() {
                self.by_qualifier.remove(qualifier);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    /// Register a listener, optionally scoped to one model type. Listeners
    /// fire in registration order.
    pub fn add_listener(
        &mut self,
        model_type: Option<String>,
        listener: Listener,
    ) -> Subscription {
        self.next_subscription += 1;
        let id = Subscription(self.next_subscription);
        self.listeners.push(ListenerEntry {
            id,
            model_type,
            listener,
        });

        id
    }

    pub fn remove_listener(&mut self, subscription: Subscription) {
        self.listeners.retain(|entry| entry.id != subscription);
    }

    /// Snapshot the listeners matching an event, in registration order.
    #[must_use]
    pub fn listeners_for(&self, event: &ModelStoreEvent) -> Vec<Listener> {
        self.listeners
            .iter()
            .filter(|entry| {
                entry
                    .model_type
                    .as_ref()
                    .is_none_or(|t| t == &event.model_type)
            })
            .map(|entry| Rc::clone(&entry.listener))
            .collect()
    }

    /// Dispatch an event to all matching listeners. A panicking listener
    /// never prevents later listeners from running.
    pub fn notify(&self, event: &ModelStoreEvent) {
        for listener in self.listeners_for(event) {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                obs::record(MetricsEvent::ListenerPanicked);
            }
        }
    }

    /// Drop all models and indexes; listeners survive a reset.
    pub fn clear(&mut self) {
        self.models.clear();
        self.by_type.clear();
        self.attribute_owner.clear();
        self.by_qualifier.clear();
    }

    #[cfg(test)]
    pub(crate) fn index_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.models.len(),
            self.by_type.values().map(Vec::len).sum(),
            self.attribute_owner.len(),
            self.by_qualifier.values().map(Vec::len).sum(),
        )
    }
}


#[cfg(test)]
mod consistency_props {
    use super::*;
    use crate::{model::presentation::PresentationModelBuilder, types::IdGenerator};
    use proptest::prelude::*;

    /// Random add/remove interleavings must leave every index describing
    /// exactly the live models, with no orphans and no gaps.
    fn run_script(script: &[(u8, bool)]) {
        let mut ids = IdGenerator::with_prefix("prop");
        let mut store = ModelStore::new();
        let mut live: Vec<ModelId> = Vec::new();

        for (slot, is_add) in script {
            if *is_add {
                let model = PresentationModelBuilder::new(format!("type-{}", slot % 3))
                    .qualified_attribute(
                        ids.next_attribute_id(),
                        "a",
                        WireValue::Int(i64::from(*slot)),
                        format!("q-{}", ids.next_attribute_id()),
                    )
                    .attribute(ids.next_attribute_id(), "b", WireValue::Null)
                    .build(&mut ids)
                    .expect("build");
                live.push(model.id().clone());
                store.add(model, Source::Local).expect("add");
            } else if !live.is_empty() {
                let victim = live.remove(usize::from(*slot) % live.len());
                store.remove(&victim, Source::Local);
            }
        }

        let (models, by_type, attrs, qualified) = store.index_sizes();
        assert_eq!(models, live.len());
        assert_eq!(by_type, live.len());
        assert_eq!(attrs, live.len() * 2);
        assert_eq!(qualified, live.len());
        for id in &live {
            let model = store.find_by_id(id).expect("live model present");
            for attr in model.attributes() {
                assert!(store.attribute_by_id(attr.id()).is_some());
            }
        }
    }

    proptest! {
        #[test]
        fn indexes_track_live_models(script in prop::collection::vec((any::<u8>(), any::<bool>()), 0..64)) {
            run_script(&script);
        }
    }
}
