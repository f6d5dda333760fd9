use crate::{
    beans::{Bean, builder::RemotingBean},
    context::{ContextInner, ValueSubscription},
    convert::RemotingValue,
    error::{ErrorOrigin, InternalError},
    model::store::ValueChange,
    types::{AttributeId, BeanHandle, ModelId},
    value::WireValue,
};
use std::{
    any::Any,
    cell::RefCell,
    marker::PhantomData,
    rc::{Rc, Weak},
};

///
/// AttributeBinding
///
/// Connects one facade field to its backing attribute. Holds the context
/// weakly: beans never keep their context alive.
///

pub struct AttributeBinding {
    ctx: Weak<ContextInner>,
    attribute_id: AttributeId,
    holder: BeanHandle,
}

impl AttributeBinding {
    pub(crate) const fn new(
        ctx: Weak<ContextInner>,
        attribute_id: AttributeId,
        holder: BeanHandle,
    ) -> Self {
        Self {
            ctx,
            attribute_id,
            holder,
        }
    }

    #[must_use]
    pub const fn attribute_id(&self) -> &AttributeId {
        &self.attribute_id
    }

    fn context(&self) -> Result<Rc<ContextInner>, InternalError> {
        self.ctx.upgrade().ok_or_else(|| {
            InternalError::internal(
                ErrorOrigin::Beans,
                "remoting context was dropped while a bean facade was still in use",
            )
        })
    }
}

fn unbound() -> InternalError {
    InternalError::invariant(
        ErrorOrigin::Beans,
        "facade is not bound; beans must be created through a remoting context",
    )
}

pub(crate) fn downcast_bean<B: RemotingBean>(
    handle: BeanHandle,
    bean: Rc<dyn Any>,
) -> Result<Bean<B>, InternalError> {
    let inner = bean.downcast::<RefCell<B>>().map_err(|_| {
        InternalError::internal(
            ErrorOrigin::Beans,
            format!("bean {handle} is not an instance of '{}'", B::CLASS_NAME),
        )
    })?;

    Ok(Bean::from_parts(handle, inner))
}

///
/// Property
///
/// Scalar-valued facade. Reads and writes go straight through to the backing
/// attribute; the facade itself holds no value.
///

pub struct Property<T: RemotingValue> {
    binding: Option<AttributeBinding>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RemotingValue> Default for Property<T> {
    fn default() -> Self {
        Self {
            binding: None,
            _marker: PhantomData,
        }
    }
}

impl<T: RemotingValue> Property<T> {
    pub fn bind(&mut self, binding: AttributeBinding) {
        self.binding = Some(binding);
    }

    fn binding(&self) -> Result<&AttributeBinding, InternalError> {
        self.binding.as_ref().ok_or_else(unbound)
    }

    /// Current value; `None` while the attribute is null.
    pub fn get(&self) -> Result<Option<T>, InternalError> {
        let binding = self.binding()?;
        let value = binding.context()?.attribute_value(binding.attribute_id())?;
        if value.is_null() {
            return Ok(None);
        }

        Ok(Some(T::from_wire(&value)?))
    }

    pub fn set(&self, value: T) -> Result<(), InternalError> {
        self.set_wire(value.to_wire())
    }

    /// Reset to null.
    pub fn clear(&self) -> Result<(), InternalError> {
        self.set_wire(WireValue::Null)
    }

    fn set_wire(&self, value: WireValue) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding
            .context()?
            .set_scalar(binding.attribute_id(), value)
    }

    /// Current qualifier, if any.
    pub fn qualifier(&self) -> Result<Option<String>, InternalError> {
        let binding = self.binding()?;
        binding.context()?.attribute_qualifier(binding.attribute_id())
    }

    /// Join (or leave, with `None`) a qualifier group. Qualifiers are local
    /// metadata; they only cross the wire with the initial create-bean.
    pub fn set_qualifier(&self, qualifier: Option<String>) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding
            .context()?
            .set_attribute_qualifier(binding.attribute_id(), qualifier)
    }

    /// Observe effective changes of this property, from either side.
    pub fn on_changed(
        &self,
        listener: impl Fn(&ValueChange) + 'static,
    ) -> Result<ValueSubscription, InternalError> {
        let binding = self.binding()?;
        Ok(binding
            .context()?
            .add_value_listener(Some(binding.attribute_id().clone()), Rc::new(listener)))
    }
}

///
/// BeanRef
///
/// Facade for a property holding another managed bean. Every mutation runs
/// the reference-graph bookkeeping; a set that would close a cycle fails
/// here and leaves the reference unchanged.
///

pub struct BeanRef<B: RemotingBean> {
    binding: Option<AttributeBinding>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: RemotingBean> Default for BeanRef<B> {
    fn default() -> Self {
        Self {
            binding: None,
            _marker: PhantomData,
        }
    }
}

impl<B: RemotingBean> BeanRef<B> {
    pub fn bind(&mut self, binding: AttributeBinding) {
        self.binding = Some(binding);
    }

    fn binding(&self) -> Result<&AttributeBinding, InternalError> {
        self.binding.as_ref().ok_or_else(unbound)
    }

    pub fn get(&self) -> Result<Option<Bean<B>>, InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        match ctx.attribute_value(binding.attribute_id())? {
            WireValue::Null => Ok(None),
            WireValue::Ref(model_id) => {
                let (handle, bean) = ctx.resolve_ref(&model_id)?;
                Ok(Some(downcast_bean(handle, bean)?))
            }
            other => Err(InternalError::invariant(
                ErrorOrigin::Beans,
                format!("reference attribute holds a {} value", other.tag()),
            )),
        }
    }

    pub fn set(&self, bean: Option<&Bean<B>>) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding.context()?.set_reference(
            binding.holder,
            binding.attribute_id(),
            bean.map(Bean::handle),
        )
    }

    /// Current qualifier, if any.
    pub fn qualifier(&self) -> Result<Option<String>, InternalError> {
        let binding = self.binding()?;
        binding.context()?.attribute_qualifier(binding.attribute_id())
    }

    /// Join (or leave, with `None`) a qualifier group.
    pub fn set_qualifier(&self, qualifier: Option<String>) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding
            .context()?
            .set_attribute_qualifier(binding.attribute_id(), qualifier)
    }
}

///
/// ObservableList
///
/// Scalar-valued list facade. Element storage lives in the context; every
/// structural mutation is synchronized as one splice command.
///

pub struct ObservableList<T: RemotingValue> {
    binding: Option<AttributeBinding>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RemotingValue> Default for ObservableList<T> {
    fn default() -> Self {
        Self {
            binding: None,
            _marker: PhantomData,
        }
    }
}

impl<T: RemotingValue> ObservableList<T> {
    pub fn bind(&mut self, binding: AttributeBinding) {
        self.binding = Some(binding);
    }

    fn binding(&self) -> Result<&AttributeBinding, InternalError> {
        self.binding.as_ref().ok_or_else(unbound)
    }

    pub fn len(&self) -> Result<usize, InternalError> {
        let binding = self.binding()?;
        binding.context()?.list_len(binding.attribute_id())
    }

    pub fn is_empty(&self) -> Result<bool, InternalError> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<T, InternalError> {
        let binding = self.binding()?;
        let value = binding
            .context()?
            .list_value(binding.attribute_id(), index)?;

        Ok(T::from_wire(&value)?)
    }

    pub fn add(&self, value: T) -> Result<(), InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let len = ctx.list_len(binding.attribute_id())?;
        ctx.list_insert(binding.holder, binding.attribute_id(), len, value.to_wire())
    }

    pub fn insert(&self, index: usize, value: T) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding.context()?.list_insert(
            binding.holder,
            binding.attribute_id(),
            index,
            value.to_wire(),
        )
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding.context()?.list_replace(
            binding.holder,
            binding.attribute_id(),
            index,
            value.to_wire(),
        )
    }

    pub fn remove(&self, index: usize) -> Result<T, InternalError> {
        let binding = self.binding()?;
        let old = binding
            .context()?
            .list_remove_at(binding.holder, binding.attribute_id(), index)?;

        Ok(T::from_wire(&old)?)
    }

    pub fn clear(&self) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding
            .context()?
            .list_clear(binding.holder, binding.attribute_id())
    }

    pub fn to_vec(&self) -> Result<Vec<T>, InternalError> {
        let binding = self.binding()?;
        let snapshot = binding.context()?.list_snapshot(binding.attribute_id())?;
        snapshot
            .iter()
            .map(|value| T::from_wire(value).map_err(Into::into))
            .collect()
    }
}

///
/// BeanList
///
/// List facade whose elements are managed beans. Mutations run the same
/// reference-graph bookkeeping as [`BeanRef`].
///

pub struct BeanList<B: RemotingBean> {
    binding: Option<AttributeBinding>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: RemotingBean> Default for BeanList<B> {
    fn default() -> Self {
        Self {
            binding: None,
            _marker: PhantomData,
        }
    }
}

impl<B: RemotingBean> BeanList<B> {
    pub fn bind(&mut self, binding: AttributeBinding) {
        self.binding = Some(binding);
    }

    fn binding(&self) -> Result<&AttributeBinding, InternalError> {
        self.binding.as_ref().ok_or_else(unbound)
    }

    pub fn len(&self) -> Result<usize, InternalError> {
        let binding = self.binding()?;
        binding.context()?.list_len(binding.attribute_id())
    }

    pub fn is_empty(&self) -> Result<bool, InternalError> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Bean<B>, InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let value = ctx.list_value(binding.attribute_id(), index)?;
        self.resolve(&ctx, &value)
    }

    pub fn add(&self, bean: &Bean<B>) -> Result<(), InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let len = ctx.list_len(binding.attribute_id())?;
        let element = WireValue::Ref(ctx.remoting_id(bean.handle())?);
        ctx.list_insert(binding.holder, binding.attribute_id(), len, element)
    }

    pub fn insert(&self, index: usize, bean: &Bean<B>) -> Result<(), InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let element = WireValue::Ref(ctx.remoting_id(bean.handle())?);
        ctx.list_insert(binding.holder, binding.attribute_id(), index, element)
    }

    pub fn remove(&self, index: usize) -> Result<Bean<B>, InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let old = ctx.list_remove_at(binding.holder, binding.attribute_id(), index)?;
        self.resolve(&ctx, &old)
    }

    /// Remove the first occurrence of `bean`; `false` if absent.
    pub fn remove_bean(&self, bean: &Bean<B>) -> Result<bool, InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let model_id = ctx.remoting_id(bean.handle())?;
        let snapshot = ctx.list_snapshot(binding.attribute_id())?;
        let Some(index) = snapshot
            .iter()
            .position(|value| value.as_ref_id() == Some(&model_id))
        else {
            return Ok(false);
        };

        ctx.list_remove_at(binding.holder, binding.attribute_id(), index)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), InternalError> {
        let binding = self.binding()?;
        binding
            .context()?
            .list_clear(binding.holder, binding.attribute_id())
    }

    pub fn to_vec(&self) -> Result<Vec<Bean<B>>, InternalError> {
        let binding = self.binding()?;
        let ctx = binding.context()?;
        let snapshot = ctx.list_snapshot(binding.attribute_id())?;
        snapshot
            .iter()
            .map(|value| self.resolve(&ctx, value))
            .collect()
    }

    fn resolve(&self, ctx: &Rc<ContextInner>, value: &WireValue) -> Result<Bean<B>, InternalError> {
        let model_id: &ModelId = value.as_ref_id().ok_or_else(|| {
            InternalError::invariant(
                ErrorOrigin::Beans,
                format!("bean list holds a {} value", value.tag()),
            )
        })?;
        let (handle, bean) = ctx.resolve_ref(model_id)?;
        downcast_bean(handle, bean)
    }
}
