use crate::{
    beans::{
        Bean, BeanEvent, BeanRepository, BeanSubscription,
        builder::{BeanBinder, BeanClassRegistry, RemotingBean},
        facade::downcast_bean,
        repository::BeanError,
    },
    command::{Command, CommandQueue, WireAttribute, apply, codec},
    controller::{ControllerError, ControllerInstance, ControllerRegistry, ControllerSpec},
    convert::{ConverterRegistry, RemotingValue},
    dispatch::{DispatchAction, EventDispatcher},
    error::{ErrorOrigin, InternalError},
    gc::GarbageCollector,
    model::{
        presentation::{PresentationModel, PresentationModelBuilder},
        store::{ModelStore, ModelStoreError, ModelStoreEvent, Subscription, ValueChange},
    },
    obs::{self, MetricsEvent},
    schema::{ClassInfo, ClassRepository, FieldKind},
    types::{
        AttributeId, BeanHandle, ClassId, INTERNAL_ATTRIBUTES_TYPE, IdGenerator, ModelId, Source,
        SystemId,
    },
    value::WireValue,
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashSet},
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
};

///
/// ContextConfig
///

#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub garbage_collection_active: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            garbage_collection_active: true,
        }
    }
}

///
/// ValueSubscription
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ValueSubscription(u64);

struct ValueListenerEntry {
    id: ValueSubscription,
    /// `None` observes every attribute.
    filter: Option<AttributeId>,
    listener: Rc<dyn Fn(&ValueChange)>,
}

///
/// Reaction
///
/// Completion of one round trip. Completed when the transport reports the
/// response batch applied, failed when the session resets with the round
/// trip still outstanding.
///

enum ReactionState<T> {
    Pending,
    Completed(T),
    Failed(InternalError),
    Taken,
}

pub struct Reaction<T> {
    state: Rc<RefCell<ReactionState<T>>>,
}

impl<T> Clone for Reaction<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Reaction<T> {
    pub(crate) fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(ReactionState::Pending)),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), ReactionState::Pending)
    }

    /// Take the outcome once available; `None` while still pending or after
    /// a previous take.
    pub fn try_take(&self) -> Option<Result<T, InternalError>> {
        let mut state = self.state.borrow_mut();
        match &*state {
            ReactionState::Pending | ReactionState::Taken => None,
            ReactionState::Completed(_) | ReactionState::Failed(_) => {
                match std::mem::replace(&mut *state, ReactionState::Taken) {
                    ReactionState::Completed(value) => Some(Ok(value)),
                    ReactionState::Failed(err) => Some(Err(err)),
                    ReactionState::Pending | ReactionState::Taken => None,
                }
            }
        }
    }

    pub(crate) fn complete(&self, value: T) {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, ReactionState::Pending) {
            *state = ReactionState::Completed(value);
        }
    }

    pub(crate) fn fail(&self, err: InternalError) {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, ReactionState::Pending) {
            *state = ReactionState::Failed(err);
        }
    }
}

/// Sets the applying-remote flag for the lifetime of one batch, restoring
/// the previous value afterwards even when application fails mid-batch.
struct RemoteApplyGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> RemoteApplyGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for RemoteApplyGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

///
/// ContextInner
///
/// The shared state behind one remoting peer: every repository, the command
/// queue, the reference-graph collector, and the applying-remote flag that
/// drives echo suppression. Single-threaded by design; interior mutability
/// is per-component `RefCell`s, and no component borrow is ever held across
/// a user-callback invocation.
///

pub struct ContextInner {
    pub(crate) system_id: SystemId,
    pub(crate) config: ContextConfig,
    pub(crate) ids: RefCell<IdGenerator>,
    pub(crate) converters: ConverterRegistry,
    pub(crate) store: RefCell<ModelStore>,
    pub(crate) classes: RefCell<ClassRepository>,
    pub(crate) beans: RefCell<BeanRepository>,
    pub(crate) factories: RefCell<BeanClassRegistry>,
    pub(crate) queue: RefCell<CommandQueue>,
    pub(crate) gc: RefCell<GarbageCollector>,
    pub(crate) dispatcher: RefCell<EventDispatcher>,
    pub(crate) controllers: RefCell<ControllerRegistry>,
    announced: RefCell<HashSet<ClassId>>,
    value_listeners: RefCell<Vec<ValueListenerEntry>>,
    next_value_subscription: Cell<u64>,
    pending: RefCell<Vec<Reaction<()>>>,
    applying_remote: Cell<bool>,
}

impl ContextInner {
    /// Source tag for the mutation currently in flight.
    pub(crate) fn source(&self) -> Source {
        if self.applying_remote.get() {
            Source::Remote
        } else {
            Source::Local
        }
    }

    /// Queue an outbound command unless the mutation is itself the replay of
    /// a remote command. This suppression is what keeps applied changes from
    /// echoing back to their originator.
    pub(crate) fn push_command(&self, command: Command) {
        if !self.applying_remote.get() {
            self.queue.borrow_mut().enqueue(command);
        }
    }

    /// Dispatch a model-store event with no store borrow held, so listeners
    /// are free to call back into the context.
    pub(crate) fn notify_store(&self, event: &ModelStoreEvent) {
        let listeners = self.store.borrow().listeners_for(event);
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                obs::record(MetricsEvent::ListenerPanicked);
            }
        }
    }

    /// Announce a class's wire schema once, before its first bean crosses
    /// the wire.
    pub(crate) fn announce_class(&self, info: &ClassInfo) {
        if self.applying_remote.get() {
            return;
        }
        if self.announced.borrow_mut().insert(info.class_id) {
            self.push_command(Command::CreateBeanType {
                class_id: info.class_id,
                class_name: info.class_name.clone(),
                fields: info.fields.clone(),
            });
        }
    }

    // ---------------------------------------------------------------------
    // Attribute access (facade backend)
    // ---------------------------------------------------------------------

    pub(crate) fn attribute_value(&self, id: &AttributeId) -> Result<WireValue, InternalError> {
        self.store
            .borrow()
            .attribute_by_id(id)
            .map(|attr| attr.value().clone())
            .ok_or_else(|| ModelStoreError::UnknownAttribute(id.clone()).into())
    }

    pub(crate) fn attribute_qualifier(
        &self,
        id: &AttributeId,
    ) -> Result<Option<String>, InternalError> {
        self.store
            .borrow()
            .attribute_by_id(id)
            .map(|attr| attr.qualifier().map(str::to_string))
            .ok_or_else(|| ModelStoreError::UnknownAttribute(id.clone()).into())
    }

    pub(crate) fn set_attribute_qualifier(
        &self,
        id: &AttributeId,
        qualifier: Option<String>,
    ) -> Result<(), InternalError> {
        self.store.borrow_mut().set_qualifier(id, qualifier)
    }

    pub(crate) fn set_scalar(
        &self,
        id: &AttributeId,
        value: WireValue,
    ) -> Result<(), InternalError> {
        let change = self.store.borrow_mut().set_value(id, value)?;
        if let Some(change) = change {
            self.push_command(Command::ValueChanged {
                attribute_id: change.attribute_id.clone(),
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
            });
            self.notify_value_change(&change);
        }

        Ok(())
    }

    pub(crate) fn set_reference(
        &self,
        holder: BeanHandle,
        id: &AttributeId,
        target: Option<BeanHandle>,
    ) -> Result<(), InternalError> {
        let old_value = self.attribute_value(id)?;
        let new_value = match target {
            Some(handle) => WireValue::Ref(self.beans.borrow().remoting_id(handle)?),
            None => WireValue::Null,
        };
        if old_value == new_value {
            return Ok(());
        }

        // Graph bookkeeping first: a rejected edge must leave the attribute
        // untouched.
        let old_handle = old_value
            .as_ref_id()
            .and_then(|model_id| self.beans.borrow().handle_by_model(model_id));
        self.gc
            .borrow_mut()
            .on_property_value_changed(holder, old_handle, target)?;

        self.set_scalar(id, new_value)
    }

    /// Run the graph bookkeeping implied by a value change that may swap
    /// bean references (remote replay, qualifier broadcast).
    pub(crate) fn track_reference_change(
        &self,
        change: &ValueChange,
    ) -> Result<(), InternalError> {
        let old_ref = change.old_value.as_ref_id();
        let new_ref = change.new_value.as_ref_id();
        if old_ref.is_none() && new_ref.is_none() {
            return Ok(());
        }
        let Some(holder) = self.attribute_holder(&change.attribute_id) else {
            return Ok(());
        };

        let old = old_ref.and_then(|model_id| self.beans.borrow().handle_by_model(model_id));
        let new = new_ref.and_then(|model_id| self.beans.borrow().handle_by_model(model_id));
        self.gc
            .borrow_mut()
            .on_property_value_changed(holder, old, new)
    }

    /// The managed bean owning an attribute, if any.
    pub(crate) fn attribute_holder(&self, id: &AttributeId) -> Option<BeanHandle> {
        let model_id = {
            let store = self.store.borrow();
            store.attribute_by_id(id)?.model_id().cloned()
        }?;

        self.beans.borrow().handle_by_model(&model_id)
    }

    pub(crate) fn resolve_ref(
        &self,
        model_id: &ModelId,
    ) -> Result<(BeanHandle, Rc<dyn Any>), InternalError> {
        let beans = self.beans.borrow();
        let handle = beans
            .handle_by_model(model_id)
            .ok_or_else(|| BeanError::UnmanagedModel(model_id.clone()))?;
        let entry = beans.entry(handle).ok_or_else(|| {
            InternalError::invariant(
                ErrorOrigin::Beans,
                format!("bean index out of sync for model '{model_id}'"),
            )
        })?;

        Ok((handle, Rc::clone(&entry.bean)))
    }

    pub(crate) fn remoting_id(&self, handle: BeanHandle) -> Result<ModelId, InternalError> {
        self.beans.borrow().remoting_id(handle)
    }

    // ---------------------------------------------------------------------
    // List access (facade backend)
    // ---------------------------------------------------------------------

    fn index_error(id: &AttributeId, index: usize, len: usize) -> InternalError {
        InternalError::invariant(
            ErrorOrigin::Beans,
            format!("index {index} out of bounds for list '{id}' of length {len}"),
        )
    }

    pub(crate) fn list_len(&self, id: &AttributeId) -> Result<usize, InternalError> {
        Ok(self.beans.borrow().list(id)?.len())
    }

    pub(crate) fn list_value(
        &self,
        id: &AttributeId,
        index: usize,
    ) -> Result<WireValue, InternalError> {
        let beans = self.beans.borrow();
        let list = beans.list(id)?;
        list.get(index)
            .cloned()
            .ok_or_else(|| Self::index_error(id, index, list.len()))
    }

    pub(crate) fn list_snapshot(&self, id: &AttributeId) -> Result<Vec<WireValue>, InternalError> {
        Ok(self.beans.borrow().list(id)?.to_vec())
    }

    pub(crate) fn list_insert(
        &self,
        holder: BeanHandle,
        id: &AttributeId,
        index: usize,
        value: WireValue,
    ) -> Result<(), InternalError> {
        {
            let beans = self.beans.borrow();
            let len = beans.list(id)?.len();
            if index > len {
                return Err(Self::index_error(id, index, len));
            }
        }

        if let Some(model_id) = value.as_ref_id() {
            let element = self
                .beans
                .borrow()
                .handle_by_model(model_id)
                .ok_or_else(|| BeanError::UnmanagedModel(model_id.clone()))?;
            self.gc.borrow_mut().on_added_to_list(holder, element)?;
        }

        self.beans
            .borrow_mut()
            .list_mut(id)?
            .insert(index, value.clone());
        self.push_command(Command::ListAdd {
            attribute_id: id.clone(),
            index,
            elements: vec![value],
        });

        Ok(())
    }

    pub(crate) fn list_remove_at(
        &self,
        holder: BeanHandle,
        id: &AttributeId,
        index: usize,
    ) -> Result<WireValue, InternalError> {
        let old = {
            let mut beans = self.beans.borrow_mut();
            let list = beans.list_mut(id)?;
            if index >= list.len() {
                return Err(Self::index_error(id, index, list.len()));
            }
            list.remove(index)
        };

        if let Some(element) = old
            .as_ref_id()
            .and_then(|model_id| self.beans.borrow().handle_by_model(model_id))
        {
            self.gc.borrow_mut().on_removed_from_list(holder, element);
        }

        self.push_command(Command::ListRemove {
            attribute_id: id.clone(),
            from: index,
            to: index + 1,
        });

        Ok(old)
    }

    pub(crate) fn list_replace(
        &self,
        holder: BeanHandle,
        id: &AttributeId,
        index: usize,
        value: WireValue,
    ) -> Result<(), InternalError> {
        let old = self.list_value(id, index)?;
        if old == value {
            return Ok(());
        }

        if let Some(model_id) = value.as_ref_id() {
            let element = self
                .beans
                .borrow()
                .handle_by_model(model_id)
                .ok_or_else(|| BeanError::UnmanagedModel(model_id.clone()))?;
            self.gc.borrow_mut().on_added_to_list(holder, element)?;
        }
        if let Some(element) = old
            .as_ref_id()
            .and_then(|model_id| self.beans.borrow().handle_by_model(model_id))
        {
            self.gc.borrow_mut().on_removed_from_list(holder, element);
        }

        {
            let mut beans = self.beans.borrow_mut();
            let list = beans.list_mut(id)?;
            list[index] = value.clone();
        }
        self.push_command(Command::ListReplace {
            attribute_id: id.clone(),
            index,
            element: value,
        });

        Ok(())
    }

    pub(crate) fn list_clear(
        &self,
        holder: BeanHandle,
        id: &AttributeId,
    ) -> Result<(), InternalError> {
        let old: Vec<WireValue> = {
            let mut beans = self.beans.borrow_mut();
            std::mem::take(beans.list_mut(id)?)
        };
        if old.is_empty() {
            return Ok(());
        }

        for value in &old {
            if let Some(element) = value
                .as_ref_id()
                .and_then(|model_id| self.beans.borrow().handle_by_model(model_id))
            {
                self.gc.borrow_mut().on_removed_from_list(holder, element);
            }
        }
        self.push_command(Command::ListRemove {
            attribute_id: id.clone(),
            from: 0,
            to: old.len(),
        });

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Value listeners
    // ---------------------------------------------------------------------

    pub(crate) fn add_value_listener(
        &self,
        filter: Option<AttributeId>,
        listener: Rc<dyn Fn(&ValueChange)>,
    ) -> ValueSubscription {
        let id = ValueSubscription(self.next_value_subscription.get() + 1);
        self.next_value_subscription.set(id.0);
        self.value_listeners.borrow_mut().push(ValueListenerEntry {
            id,
            filter,
            listener,
        });

        id
    }

    pub(crate) fn remove_value_listener(&self, subscription: ValueSubscription) {
        self.value_listeners
            .borrow_mut()
            .retain(|entry| entry.id != subscription);
    }

    fn notify_value_change(&self, change: &ValueChange) {
        let listeners: Vec<Rc<dyn Fn(&ValueChange)>> = self
            .value_listeners
            .borrow()
            .iter()
            .filter(|entry| {
                entry
                    .filter
                    .as_ref()
                    .is_none_or(|id| id == &change.attribute_id)
            })
            .map(|entry| Rc::clone(&entry.listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
                obs::record(MetricsEvent::ListenerPanicked);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Bean lifecycle
    // ---------------------------------------------------------------------

    /// Tear one bean down everywhere: repository entry, list storage,
    /// presentation model, reference graph. `fire_listeners` is false for an
    /// explicit local delete (the caller already knows) and true for remote
    /// deletions and GC rejections.
    pub(crate) fn remove_bean(&self, handle: BeanHandle, fire_listeners: bool) {
        let Some(entry) = self.beans.borrow_mut().delete(handle) else {
            return;
        };
        let bean_event = BeanEvent {
            handle,
            class_name: entry.class_name.clone(),
            model_id: entry.model_id.clone(),
        };

        let removed = self.store.borrow_mut().remove(&entry.model_id, self.source());
        if let Some((model, _)) = &removed {
            let mut beans = self.beans.borrow_mut();
            for attr in model.attributes() {
                beans.drop_list(attr.id());
            }
        }
        self.gc.borrow_mut().forget(handle);
        self.push_command(Command::DeleteBean {
            bean_id: entry.model_id,
        });

        if let Some((_, event)) = &removed {
            self.notify_store(event);
        }
        if fire_listeners {
            let listeners = self
                .beans
                .borrow()
                .removed_listeners_for(&bean_event.class_name);
            for listener in listeners {
                listener(&bean_event);
            }
        }
    }

    pub(crate) fn fire_bean_added(&self, handle: BeanHandle) {
        let snapshot = {
            let beans = self.beans.borrow();
            beans.entry(handle).map(|entry| {
                (
                    beans.added_listeners_for(&entry.class_name),
                    BeanEvent {
                        handle,
                        class_name: entry.class_name.clone(),
                        model_id: entry.model_id.clone(),
                    },
                )
            })
        };
        if let Some((listeners, event)) = snapshot {
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

fn create_bean<B: RemotingBean>(
    inner: &Rc<ContextInner>,
    is_root: bool,
) -> Result<Bean<B>, InternalError> {
    inner.factories.borrow_mut().register::<B>()?;
    let (info, _) = inner
        .classes
        .borrow_mut()
        .get_or_register(&B::descriptor(), &inner.converters)?;
    inner.announce_class(&info);

    let model = {
        let mut ids = inner.ids.borrow_mut();
        let mut builder = PresentationModelBuilder::new(info.class_name.clone());
        for field in &info.fields {
            builder = builder.attribute(ids.next_attribute_id(), field.name.clone(), WireValue::Null);
        }
        builder.build(&mut ids)?
    };
    let model_id = model.id().clone();

    let wire_attributes: Vec<WireAttribute> = model
        .attributes()
        .iter()
        .map(|attr| WireAttribute {
            attribute_id: attr.id().clone(),
            property_name: attr.property_name().to_string(),
            value: attr.value().clone(),
            qualifier: attr.qualifier().map(str::to_string),
        })
        .collect();

    let handle = inner.beans.borrow_mut().allocate_handle();
    {
        let mut beans = inner.beans.borrow_mut();
        for (field, attr) in info.fields.iter().zip(model.attributes()) {
            if field.kind == FieldKind::List {
                beans.init_list(attr.id().clone());
            }
        }
    }

    let event = inner.store.borrow_mut().add(model, inner.source())?;

    let bean = {
        let store = inner.store.borrow();
        let model_ref = store.find_by_id(&model_id).ok_or_else(|| {
            InternalError::invariant(
                ErrorOrigin::Beans,
                format!("model '{model_id}' vanished during bean creation"),
            )
        })?;
        let binder = BeanBinder::new(Rc::downgrade(inner), handle, model_ref);
        let mut value = B::default();
        value.bind(&binder)?;
        Rc::new(RefCell::new(value))
    };

    inner.beans.borrow_mut().register(
        handle,
        info.class_name.clone(),
        model_id.clone(),
        Rc::clone(&bean) as Rc<dyn Any>,
    )?;
    inner.gc.borrow_mut().on_bean_created(handle, is_root)?;
    inner.push_command(Command::CreateBean {
        class_id: info.class_id,
        bean_id: model_id,
        attributes: wire_attributes,
    });
    inner.notify_store(&event);

    Ok(Bean::from_parts(handle, bean))
}

///
/// RemotingContext
///
/// One peer's synchronization context: the public entry point for creating
/// and deleting beans, registering controllers, flushing outbound command
/// batches and applying incoming ones.
///

#[derive(Clone)]
pub struct RemotingContext {
    inner: Rc<ContextInner>,
}

impl RemotingContext {
    #[must_use]
    pub fn builder() -> RemotingContextBuilder {
        RemotingContextBuilder::default()
    }

    /// Context with a generated identity and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn system_id(&self) -> &SystemId {
        &self.inner.system_id
    }

    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Make a bean class known so that incoming create-bean commands for it
    /// can be materialized. Local `create` calls register implicitly.
    pub fn register_bean_class<B: RemotingBean>(&self) -> Result<(), InternalError> {
        self.inner.factories.borrow_mut().register::<B>()?;
        self.inner
            .classes
            .borrow_mut()
            .get_or_register(&B::descriptor(), &self.inner.converters)?;

        Ok(())
    }

    pub fn register_controller(&self, spec: ControllerSpec) -> Result<(), InternalError> {
        self.inner.controllers.borrow_mut().register_spec(spec)
    }

    /// Raw model-store eventing, optionally scoped to one model type. The
    /// seam session layers hook for add/remove bookkeeping below the bean
    /// abstraction.
    pub fn on_model_event(
        &self,
        model_type: Option<&str>,
        listener: impl Fn(&ModelStoreEvent) + 'static,
    ) -> Subscription {
        self.inner
            .store
            .borrow_mut()
            .add_listener(model_type.map(str::to_string), Rc::new(listener))
    }

    pub fn unsubscribe_model(&self, subscription: Subscription) {
        self.inner.store.borrow_mut().remove_listener(subscription);
    }

    /// Observe effective attribute changes across the whole context.
    pub fn on_value_changed(
        &self,
        listener: impl Fn(&ValueChange) + 'static,
    ) -> ValueSubscription {
        self.inner.add_value_listener(None, Rc::new(listener))
    }

    pub fn unsubscribe_value(&self, subscription: ValueSubscription) {
        self.inner.remove_value_listener(subscription);
    }

    /// Bean-added subscription, optionally scoped to one class. Fires only
    /// for beans materialized from remote commands, never for local
    /// `create` calls.
    pub fn on_bean_added(
        &self,
        class_name: Option<&str>,
        listener: impl Fn(&BeanEvent) + 'static,
    ) -> BeanSubscription {
        self.inner
            .beans
            .borrow_mut()
            .on_added(class_name.map(str::to_string), Rc::new(listener))
    }

    /// Bean-removed subscription. Fires for remote deletions and GC
    /// rejections, not for explicit local deletes.
    pub fn on_bean_removed(
        &self,
        class_name: Option<&str>,
        listener: impl Fn(&BeanEvent) + 'static,
    ) -> BeanSubscription {
        self.inner
            .beans
            .borrow_mut()
            .on_removed(class_name.map(str::to_string), Rc::new(listener))
    }

    pub fn unsubscribe(&self, subscription: BeanSubscription) {
        self.inner.beans.borrow_mut().unsubscribe(subscription);
    }

    /// One-shot handler for the next internal-attributes exchange.
    pub fn on_internal_attributes(&self, handler: impl FnOnce(&PresentationModel) + 'static) {
        self.inner
            .dispatcher
            .borrow_mut()
            .on_internal_attributes(handler);
    }

    // ---------------------------------------------------------------------
    // Bean lifecycle
    // ---------------------------------------------------------------------

    pub fn create<B: RemotingBean>(&self) -> Result<Bean<B>, InternalError> {
        create_bean(&self.inner, false)
    }

    /// Create a bean flagged as a reachability root (top-level models that
    /// must survive every sweep on their own).
    pub fn create_root<B: RemotingBean>(&self) -> Result<Bean<B>, InternalError> {
        create_bean(&self.inner, true)
    }

    /// Delete a managed bean on both sides. Deleting an unmanaged bean is a
    /// no-op.
    pub fn delete<B>(&self, bean: &Bean<B>) {
        self.inner.remove_bean(bean.handle(), false);
    }

    #[must_use]
    pub fn is_managed<B>(&self, bean: &Bean<B>) -> bool {
        self.inner.beans.borrow().is_managed(bean.handle())
    }

    /// Remoting identity of a managed bean; identity-bearing operations on
    /// unmanaged beans fail.
    pub fn remoting_id<B>(&self, bean: &Bean<B>) -> Result<ModelId, InternalError> {
        self.inner.remoting_id(bean.handle())
    }

    pub fn get_bean<B: RemotingBean>(&self, model_id: &ModelId) -> Result<Bean<B>, InternalError> {
        let (handle, bean) = self.inner.resolve_ref(model_id)?;
        downcast_bean(handle, bean)
    }

    pub fn find_all<B: RemotingBean>(&self) -> Result<Vec<Bean<B>>, InternalError> {
        let handles = self.inner.beans.borrow().find_all(B::CLASS_NAME);
        handles
            .into_iter()
            .map(|handle| {
                let bean = {
                    let beans = self.inner.beans.borrow();
                    let entry = beans.entry(handle).ok_or(BeanError::NotManaged(handle))?;
                    Rc::clone(&entry.bean)
                };
                downcast_bean(handle, bean)
            })
            .collect()
    }

    /// Broadcast every qualified attribute value of `bean` to all other
    /// attributes sharing the same qualifier (single hop, no cascading).
    pub fn update_qualifiers<B>(&self, bean: &Bean<B>) -> Result<(), InternalError> {
        let model_id = self.inner.remoting_id(bean.handle())?;
        let targets = self
            .inner
            .store
            .borrow()
            .qualifier_broadcast_targets(&model_id);
        for (attribute_id, value) in targets {
            let old_value = self.inner.attribute_value(&attribute_id)?;
            if old_value == value {
                continue;
            }

            // Graph bookkeeping first: a broadcast that would close a
            // reference cycle must leave the target attribute untouched.
            self.inner.track_reference_change(&ValueChange {
                attribute_id: attribute_id.clone(),
                old_value,
                new_value: value.clone(),
            })?;
            self.inner.set_scalar(&attribute_id, value)?;
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Controllers
    // ---------------------------------------------------------------------

    /// Announce a remoting context id to the peer.
    pub fn open_context(&self, context_id: &str) {
        self.inner.controllers.borrow_mut().create_context(context_id);
        self.inner.push_command(Command::CreateContext {
            context_id: context_id.to_string(),
        });
    }

    /// Tear down a context: every controller created under it is destroyed
    /// and its root model becomes GC-eligible.
    pub fn close_context(&self, context_id: &str) {
        let removed = self.inner.controllers.borrow_mut().destroy_context(context_id);
        for instance in removed {
            if let Some(handle) = self.inner.beans.borrow().handle_by_model(&instance.model_id) {
                self.inner.gc.borrow_mut().on_bean_removed(handle);
            }
        }
        self.inner.push_command(Command::DestroyContext {
            context_id: context_id.to_string(),
        });
    }

    /// Instantiate a registered controller: runs its root-bean factory,
    /// records the instance and announces it to the peer. Returns the new
    /// controller id.
    pub fn create_controller(
        &self,
        context_id: &str,
        controller_name: &str,
        parent_controller_id: Option<&str>,
    ) -> Result<String, InternalError> {
        let spec = self.inner.controllers.borrow().spec(controller_name)?;
        let model_id = (spec.root_factory())(self)?;
        let controller_id = self.inner.ids.borrow_mut().next_controller_id();

        self.inner
            .controllers
            .borrow_mut()
            .add_instance(ControllerInstance {
                controller_id: controller_id.clone(),
                controller_name: controller_name.to_string(),
                model_id: model_id.clone(),
                parent_controller_id: parent_controller_id.map(str::to_string),
                context_id: Some(context_id.to_string()),
            })?;
        self.inner.push_command(Command::CreateController {
            controller_id: controller_id.clone(),
            model_id,
            controller_name: controller_name.to_string(),
            parent_controller_id: parent_controller_id.map(str::to_string),
        });

        Ok(controller_id)
    }

    /// Destroy a controller instance. Its root model loses root status and
    /// is collected, with its subtree, on the next sweep.
    pub fn destroy_controller(&self, controller_id: &str) -> Result<(), InternalError> {
        let instance = self
            .inner
            .controllers
            .borrow_mut()
            .remove_instance(controller_id)
            .ok_or_else(|| ControllerError::UnknownInstance(controller_id.to_string()))?;

        if let Some(handle) = self.inner.beans.borrow().handle_by_model(&instance.model_id) {
            self.inner.gc.borrow_mut().on_bean_removed(handle);
        }
        self.inner.push_command(Command::DestroyController {
            controller_id: controller_id.to_string(),
        });

        Ok(())
    }

    /// Invoke a named action on the peer hosting the controller. The
    /// reaction completes when the transport reports the round trip applied.
    pub fn call_action(
        &self,
        controller_id: &str,
        action_name: &str,
        params: Vec<(String, WireValue)>,
    ) -> Result<Reaction<()>, InternalError> {
        self.inner.controllers.borrow().instance(controller_id)?;
        self.inner.push_command(Command::CallAction {
            controller_id: controller_id.to_string(),
            action_name: action_name.to_string(),
            params,
        });

        let reaction = Reaction::pending();
        self.inner.pending.borrow_mut().push(reaction.clone());

        Ok(reaction)
    }

    /// Transport callback: the response to the last flush has been fully
    /// applied, so outstanding reactions complete.
    pub fn finish_round_trip(&self) {
        let pending: Vec<Reaction<()>> = self.inner.pending.borrow_mut().drain(..).collect();
        for reaction in pending {
            reaction.complete(());
        }
    }

    // ---------------------------------------------------------------------
    // Wire boundary
    // ---------------------------------------------------------------------

    /// Take the accumulated outbound batch, in mutation order.
    pub fn flush(&self) -> Vec<Command> {
        self.inner.queue.borrow_mut().flush()
    }

    /// Flush and JSON-encode in one step.
    pub fn flush_encoded(&self) -> Result<String, InternalError> {
        codec::encode_batch(&self.flush())
    }

    #[must_use]
    pub fn pending_command_count(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Apply a remote batch in order. Later commands may reference beans
    /// created by earlier commands in the same batch, so application stops
    /// at the first failure.
    pub fn apply_batch(&self, commands: Vec<Command>) -> Result<(), InternalError> {
        let _guard = RemoteApplyGuard::new(&self.inner.applying_remote);
        for command in commands {
            apply::apply(&self.inner, command)?;
        }

        Ok(())
    }

    pub fn apply_encoded(&self, payload: &str) -> Result<(), InternalError> {
        self.apply_batch(codec::decode_batch(payload)?)
    }

    /// Hand the context a presentation model that arrived out of band
    /// (session layers use this for internal attribute exchanges). Routes
    /// through the dispatcher; internal-attribute models fire the one-shot
    /// handlers.
    pub fn ingest_model(&self, model: PresentationModel) -> Result<(), InternalError> {
        let event = self.inner.store.borrow_mut().add(model, Source::Remote)?;
        self.inner.notify_store(&event);

        if EventDispatcher::route(&event) == DispatchAction::ConsumeInternal {
            let handlers = self.inner.dispatcher.borrow_mut().take_internal_handlers();
            let model = self.inner.store.borrow().find_by_id(&event.model_id).cloned();
            if let Some(model) = model {
                for handler in handlers {
                    handler(&model);
                }
            }
        }

        Ok(())
    }

    /// Build and ingest an internal-attributes model in one step.
    pub fn exchange_internal_attributes(
        &self,
        values: Vec<(String, WireValue)>,
    ) -> Result<(), InternalError> {
        let model = {
            let mut ids = self.inner.ids.borrow_mut();
            let mut builder = PresentationModelBuilder::new(INTERNAL_ATTRIBUTES_TYPE);
            for (name, value) in values {
                builder = builder.attribute(ids.next_attribute_id(), name, value);
            }
            builder.build(&mut ids)?
        };

        self.ingest_model(model)
    }

    // ---------------------------------------------------------------------
    // Garbage collection and session lifecycle
    // ---------------------------------------------------------------------

    /// Observer for sweep rejections (rejection is routine, not an error).
    /// The handler runs inside the sweep and must not call back into the
    /// context.
    pub fn on_gc_reject(&self, handler: impl Fn(&BTreeSet<BeanHandle>) + 'static) {
        self.inner.gc.borrow_mut().set_on_reject(Box::new(handler));
    }

    /// One reachability sweep. Rejected beans are deleted everywhere, the
    /// peer is told, and removed-listeners fire. Returns the remoting ids of
    /// the rejected beans.
    pub fn sweep_garbage(&self) -> Vec<ModelId> {
        let rejected = self.inner.gc.borrow_mut().gc();
        let mut model_ids = Vec::with_capacity(rejected.len());
        for handle in rejected {
            if let Ok(model_id) = self.inner.remoting_id(handle) {
                model_ids.push(model_id);
            }
            self.inner.remove_bean(handle, true);
        }

        model_ids
    }

    #[must_use]
    pub fn managed_instances_count(&self) -> usize {
        self.inner.gc.borrow().managed_instances_count()
    }

    /// Full session reset: the transport failed, so local synchronized state
    /// is no longer trustworthy. Pending reactions fail with a transport
    /// error; all repositories are emptied. Registered specs, factories and
    /// subscriptions survive for the reconnect.
    pub fn reset(&self) {
        let err = InternalError::transport("session reset; resynchronize on reconnect");
        let pending: Vec<Reaction<()>> = self.inner.pending.borrow_mut().drain(..).collect();
        for reaction in pending {
            reaction.fail(err.clone());
        }

        self.inner.queue.borrow_mut().clear();
        self.inner.store.borrow_mut().clear();
        self.inner.beans.borrow_mut().clear();
        self.inner.gc.borrow_mut().clear();
        self.inner.classes.borrow_mut().clear();
        self.inner.announced.borrow_mut().clear();
        self.inner.controllers.borrow_mut().clear();
    }
}

impl Default for RemotingContext {
    fn default() -> Self {
        Self::new()
    }
}

///
/// RemotingContextBuilder
///

pub struct RemotingContextBuilder {
    system_id: Option<SystemId>,
    config: ContextConfig,
    converters: ConverterRegistry,
}

impl Default for RemotingContextBuilder {
    fn default() -> Self {
        Self {
            system_id: None,
            config: ContextConfig::default(),
            converters: ConverterRegistry::with_defaults(),
        }
    }
}

impl RemotingContextBuilder {
    #[must_use]
    pub fn system_id(mut self, system_id: SystemId) -> Self {
        self.system_id = Some(system_id);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an additional scalar converter. Ambiguous registrations
    /// fail here, at startup.
    pub fn register_converter<T: RemotingValue>(mut self) -> Result<Self, InternalError> {
        self.converters.register::<T>()?;
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> RemotingContext {
        let system_id = self.system_id.unwrap_or_else(SystemId::generate);
        let ids = IdGenerator::with_prefix(system_id.as_str().to_string());

        RemotingContext {
            inner: Rc::new(ContextInner {
                system_id,
                gc: RefCell::new(GarbageCollector::new(self.config.garbage_collection_active)),
                config: self.config,
                ids: RefCell::new(ids),
                converters: self.converters,
                store: RefCell::new(ModelStore::new()),
                classes: RefCell::new(ClassRepository::new()),
                beans: RefCell::new(BeanRepository::new()),
                factories: RefCell::new(BeanClassRegistry::new()),
                queue: RefCell::new(CommandQueue::new()),
                dispatcher: RefCell::new(EventDispatcher::new()),
                controllers: RefCell::new(ControllerRegistry::new()),
                announced: RefCell::new(HashSet::new()),
                value_listeners: RefCell::new(Vec::new()),
                next_value_subscription: Cell::new(0),
                pending: RefCell::new(Vec::new()),
                applying_remote: Cell::new(false),
            }),
        }
    }
}
