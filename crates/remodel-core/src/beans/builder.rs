use crate::{
    beans::facade::AttributeBinding,
    context::ContextInner,
    error::{ErrorOrigin, InternalError},
    model::presentation::PresentationModel,
    schema::ClassDescriptor,
    types::BeanHandle,
};
use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    marker::PhantomData,
    rc::{Rc, Weak},
};

///
/// RemotingBean
///
/// Implemented by every synchronizable bean class. The descriptor is the
/// explicit, ordered declaration of the class's wire schema; `bind` wires
/// each facade field to its backing attribute. Both must agree: a descriptor
/// field without a bound facade is dead wire traffic, a facade bound to an
/// undeclared field fails at bind time.
///

pub trait RemotingBean: Default + 'static {
    const CLASS_NAME: &'static str;

    fn descriptor() -> ClassDescriptor;

    fn bind(&mut self, binder: &BeanBinder<'_>) -> Result<(), InternalError>;
}

///
/// BeanBinder
///
/// Handed to [`RemotingBean::bind`] while a bean is being built or
/// materialized. Resolves property names against the bean's presentation
/// model and produces the facade bindings.
///

pub struct BeanBinder<'a> {
    ctx: Weak<ContextInner>,
    holder: BeanHandle,
    model: &'a PresentationModel,
}

impl<'a> BeanBinder<'a> {
    pub(crate) const fn new(
        ctx: Weak<ContextInner>,
        holder: BeanHandle,
        model: &'a PresentationModel,
    ) -> Self {
        Self { ctx, holder, model }
    }

    /// Binding for one declared field. Unknown names mean the descriptor and
    /// the bind implementation have drifted apart.
    pub fn attribute(&self, property_name: &str) -> Result<AttributeBinding, InternalError> {
        let attr = self.model.attribute(property_name).ok_or_else(|| {
            InternalError::invariant(
                ErrorOrigin::Beans,
                format!(
                    "bind refers to property '{property_name}' missing from model '{}'",
                    self.model.id()
                ),
            )
        })?;

        Ok(AttributeBinding::new(
            self.ctx.clone(),
            attr.id().clone(),
            self.holder,
        ))
    }
}

///
/// Instantiate
///
/// Type-erased factory used when an incoming create-bean command has to
/// materialize a bean whose concrete Rust type is only known by class name.
///

pub(crate) trait Instantiate {
    fn instantiate(&self, binder: &BeanBinder<'_>) -> Result<Rc<dyn Any>, InternalError>;
}

struct TypedInstantiator<B: RemotingBean>(PhantomData<B>);

impl<B: RemotingBean> Instantiate for TypedInstantiator<B> {
    fn instantiate(&self, binder: &BeanBinder<'_>) -> Result<Rc<dyn Any>, InternalError> {
        let mut bean = B::default();
        bean.bind(binder)?;

        Ok(Rc::new(RefCell::new(bean)))
    }
}

///
/// BeanClassRegistry
///
/// Class-name -> instantiator mapping. Registration is idempotent for the
/// same Rust type; two different types claiming one class name is a
/// configuration error.
///

#[derive(Default)]
pub(crate) struct BeanClassRegistry {
    by_name: HashMap<&'static str, RegistryEntry>,
}

struct RegistryEntry {
    type_id: TypeId,
    instantiator: Rc<dyn Instantiate>,
}

impl BeanClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: RemotingBean>(&mut self) -> Result<(), InternalError> {
        match self.by_name.get(B::CLASS_NAME) {
            Some(entry) if entry.type_id == TypeId::of::<B>() => Ok(()),
            Some(_) => Err(InternalError::duplicate(
                ErrorOrigin::Beans,
                format!(
                    "bean class '{}' is already registered by a different type",
                    B::CLASS_NAME
                ),
            )),
            None => {
                self.by_name.insert(
                    B::CLASS_NAME,
                    RegistryEntry {
                        type_id: TypeId::of::<B>(),
                        instantiator: Rc::new(TypedInstantiator::<B>(PhantomData)),
                    },
                );
                Ok(())
            }
        }
    }

    /// Factory for a class arriving over the wire. A missing factory means
    /// the peer creates beans this side never registered.
    pub fn instantiator(&self, class_name: &str) -> Result<Rc<dyn Instantiate>, InternalError> {
        self.by_name
            .get(class_name)
            .map(|entry| Rc::clone(&entry.instantiator))
            .ok_or_else(|| {
                InternalError::protocol(
                    ErrorOrigin::Beans,
                    format!("no bean factory registered for class '{class_name}'"),
                )
            })
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.by_name.contains_key(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{beans::Property, error::ErrorClass};

    #[derive(Default)]
    struct Person {
        name: Property<String>,
    }

    impl RemotingBean for Person {
        const CLASS_NAME: &'static str = "app.Person";

        fn descriptor() -> ClassDescriptor {
            ClassDescriptor::new(Self::CLASS_NAME).property::<String>("name")
        }

        fn bind(&mut self, binder: &BeanBinder<'_>) -> Result<(), InternalError> {
            self.name.bind(binder.attribute("name")?);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Impostor;

    impl RemotingBean for Impostor {
        const CLASS_NAME: &'static str = "app.Person";

        fn descriptor() -> ClassDescriptor {
            ClassDescriptor::new(Self::CLASS_NAME)
        }

        fn bind(&mut self, _: &BeanBinder<'_>) -> Result<(), InternalError> {
            Ok(())
        }
    }

    #[test]
    fn registration_is_idempotent_per_type_but_exclusive_per_name() {
        let mut registry = BeanClassRegistry::new();
        registry.register::<Person>().expect("first registration");
        registry.register::<Person>().expect("same type again");
        assert!(registry.contains("app.Person"));

        let err = registry.register::<Impostor>().unwrap_err();
        assert_eq!(err.class, ErrorClass::DuplicateRegistration);
    }

    #[test]
    fn unregistered_class_has_no_factory() {
        let registry = BeanClassRegistry::new();
        let err = registry.instantiator("app.Ghost").map(|_| ()).unwrap_err();
        assert_eq!(err.class, ErrorClass::Protocol);
        assert!(err.message.contains("no bean factory"));
    }
}
