use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::{self, MetricsEvent},
    types::{AttributeId, BeanHandle, ModelId},
    value::WireValue,
};
use std::{any::Any, collections::HashMap, rc::Rc};
use thiserror::Error as ThisError;

///
/// BeanError
///

#[derive(Debug, ThisError)]
pub enum BeanError {
    #[error("bean {0} is already registered")]
    DuplicateHandle(BeanHandle),

    #[error("model '{0}' is already bound to a bean")]
    DuplicateModel(ModelId),

    #[error("bean {0} is not managed by this context")]
    NotManaged(BeanHandle),

    #[error("model '{0}' does not belong to a managed bean")]
    UnmanagedModel(ModelId),

    #[error("attribute '{0}' has no list storage")]
    UnknownList(AttributeId),
}

impl BeanError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateHandle(_) | Self::DuplicateModel(_) => ErrorClass::DuplicateRegistration,
            Self::NotManaged(_) | Self::UnmanagedModel(_) => ErrorClass::NotManaged,
            Self::UnknownList(_) => ErrorClass::Protocol,
        }
    }
}

impl From<BeanError> for InternalError {
    fn from(err: BeanError) -> Self {
        Self::new(err.class(), ErrorOrigin::Beans, err.to_string())
    }
}

///
/// BeanEvent
///
/// Payload for bean added/removed subscriptions.
///

#[derive(Clone, Debug)]
pub struct BeanEvent {
    pub handle: BeanHandle,
    pub class_name: String,
    pub model_id: ModelId,
}

///
/// BeanSubscription
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BeanSubscription(u64);

type BeanListener = Rc<dyn Fn(&BeanEvent)>;

struct ListenerEntry {
    id: BeanSubscription,
    /// `None` listens to every bean class.
    class_name: Option<String>,
    listener: BeanListener,
}

///
/// BeanEntry
///
/// One managed bean: its class, the presentation model carrying its state,
/// and the type-erased bean value (`Rc<RefCell<B>>` behind `dyn Any`).
///

pub struct BeanEntry {
    pub class_name: String,
    pub model_id: ModelId,
    pub bean: Rc<dyn Any>,
}

///
/// BeanRepository
///
/// Arena of managed beans keyed by handle, with a model-id reverse index and
/// the element storage for every observable list attribute. A bean is
/// "managed" exactly while it has an entry here.
///

#[derive(Default)]
pub struct BeanRepository {
    entries: HashMap<BeanHandle, BeanEntry>,
    by_model: HashMap<ModelId, BeanHandle>,
    lists: HashMap<AttributeId, Vec<WireValue>>,
    next_handle: u64,
    added: Vec<ListenerEntry>,
    removed: Vec<ListenerEntry>,
    next_subscription: u64,
}

impl BeanRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles are minted before registration so facades can be bound to
    /// their holder while the bean is still being built.
    pub fn allocate_handle(&mut self) -> BeanHandle {
        self.next_handle += 1;
        BeanHandle(self.next_handle)
    }

    pub fn register(
        &mut self,
        handle: BeanHandle,
        class_name: impl Into<String>,
        model_id: ModelId,
        bean: Rc<dyn Any>,
    ) -> Result<(), InternalError> {
        if self.entries.contains_key(&handle) {
            return Err(BeanError::DuplicateHandle(handle).into());
        }
        if self.by_model.contains_key(&model_id) {
            return Err(BeanError::DuplicateModel(model_id).into());
        }

        self.by_model.insert(model_id.clone(), handle);
        self.entries.insert(
            handle,
            BeanEntry {
                class_name: class_name.into(),
                model_id,
                bean,
            },
        );
        obs::record(MetricsEvent::BeanCreated);

        Ok(())
    }

    /// Unregister a bean. Deleting an unmanaged handle is a no-op.
    pub fn delete(&mut self, handle: BeanHandle) -> Option<BeanEntry> {
        let entry = self.entries.remove(&handle)?;
        self.by_model.remove(&entry.model_id);
        obs::record(MetricsEvent::BeanDeleted);

        Some(entry)
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn entry(&self, handle: BeanHandle) -> Option<&BeanEntry> {
        self.entries.get(&handle)
    }

    #[must_use]
    pub fn is_managed(&self, handle: BeanHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    #[must_use]
    pub fn handle_by_model(&self, model_id: &ModelId) -> Option<BeanHandle> {
        self.by_model.get(model_id).copied()
    }

    /// Remoting identity of a managed bean. Identity-bearing operations on
    /// unmanaged beans fail rather than inventing an id.
    pub fn remoting_id(&self, handle: BeanHandle) -> Result<ModelId, InternalError> {
        self.entries
            .get(&handle)
            .map(|entry| entry.model_id.clone())
            .ok_or_else(|| BeanError::NotManaged(handle).into())
    }

    /// Handles of all managed beans of one class, in handle order.
    #[must_use]
    pub fn find_all(&self, class_name: &str) -> Vec<BeanHandle> {
        let mut handles: Vec<BeanHandle> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.class_name == class_name)
            .map(|(handle, _)| *handle)
            .collect();
        handles.sort_unstable();

        handles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ---------------------------------------------------------------------
    // List storage
    // ---------------------------------------------------------------------

    pub fn init_list(&mut self, attribute_id: AttributeId) {
        self.lists.entry(attribute_id).or_default();
    }

    pub fn list(&self, attribute_id: &AttributeId) -> Result<&[WireValue], InternalError> {
        self.lists
            .get(attribute_id)
            .map(Vec::as_slice)
            .ok_or_else(|| BeanError::UnknownList(attribute_id.clone()).into())
    }

    pub fn list_mut(
        &mut self,
        attribute_id: &AttributeId,
    ) -> Result<&mut Vec<WireValue>, InternalError> {
        self.lists
            .get_mut(attribute_id)
            .ok_or_else(|| BeanError::UnknownList(attribute_id.clone()).into())
    }

    pub fn drop_list(&mut self, attribute_id: &AttributeId) {
        self.lists.remove(attribute_id);
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    pub fn on_added(
        &mut self,
        class_name: Option<String>,
        listener: BeanListener,
    ) -> BeanSubscription {
        let id = self.next_subscription_id();
        self.added.push(ListenerEntry {
            id,
            class_name,
            listener,
        });

        id
    }

    pub fn on_removed(
        &mut self,
        class_name: Option<String>,
        listener: BeanListener,
    ) -> BeanSubscription {
        let id = self.next_subscription_id();
        self.removed.push(ListenerEntry {
            id,
            class_name,
            listener,
        });

        id
    }

    pub fn unsubscribe(&mut self, subscription: BeanSubscription) {
        self.added.retain(|entry| entry.id != subscription);
        self.removed.retain(|entry| entry.id != subscription);
    }

    /// Snapshot the added-listeners matching a class, in registration order.
    #[must_use]
    pub fn added_listeners_for(&self, class_name: &str) -> Vec<BeanListener> {
        Self::matching(&self.added, class_name)
    }

    #[must_use]
    pub fn removed_listeners_for(&self, class_name: &str) -> Vec<BeanListener> {
        Self::matching(&self.removed, class_name)
    }

    fn matching(entries: &[ListenerEntry], class_name: &str) -> Vec<BeanListener> {
        entries
            .iter()
            .filter(|entry| entry.class_name.as_deref().is_none_or(|c| c == class_name))
            .map(|entry| Rc::clone(&entry.listener))
            .collect()
    }

    fn next_subscription_id(&mut self) -> BeanSubscription {
        self.next_subscription += 1;
        BeanSubscription(self.next_subscription)
    }

    /// Drop all beans and list storage; subscriptions survive a reset.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_model.clear();
        self.lists.clear();
    }
}
