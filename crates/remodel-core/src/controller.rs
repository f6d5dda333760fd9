use crate::{
    context::RemotingContext,
    error::{ErrorClass, ErrorOrigin, InternalError},
    types::ModelId,
    value::WireValue,
};
use std::{collections::HashMap, rc::Rc};
use thiserror::Error as ThisError;

///
/// ControllerError
///

#[derive(Debug, ThisError)]
pub enum ControllerError {
    #[error("controller '{0}' is already registered")]
    DuplicateController(String),

    #[error("controller instance '{0}' already exists")]
    DuplicateInstance(String),

    #[error("unknown controller '{0}'")]
    UnknownController(String),

    #[error("unknown controller instance '{0}'")]
    UnknownInstance(String),

    #[error("controller '{controller}' has no action '{action}'")]
    UnknownAction { controller: String, action: String },
}

impl ControllerError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateController(_) | Self::DuplicateInstance(_) => {
                ErrorClass::DuplicateRegistration
            }
            Self::UnknownController(_) | Self::UnknownInstance(_) | Self::UnknownAction { .. } => {
                ErrorClass::Protocol
            }
        }
    }
}

impl From<ControllerError> for InternalError {
    fn from(err: ControllerError) -> Self {
        Self::new(err.class(), ErrorOrigin::Controller, err.to_string())
    }
}

///
/// ActionCall
///
/// One invocation of a named controller action with named wire parameters.
///

#[derive(Clone, Debug)]
pub struct ActionCall {
    pub controller_id: String,
    pub action_name: String,
    pub params: Vec<(String, WireValue)>,
}

impl ActionCall {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&WireValue> {
        self.params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }
}

pub type ActionHandler = Rc<dyn Fn(&ActionCall) -> Result<(), InternalError>>;
pub type RootFactory = Rc<dyn Fn(&RemotingContext) -> Result<ModelId, InternalError>>;

///
/// ControllerSpec
///
/// Declaration of one controller: its name, the factory producing its root
/// bean, and its named action handlers. Specs live on the side that hosts
/// the controller logic; the peer only ever sees instance ids.
///

pub struct ControllerSpec {
    name: String,
    root: RootFactory,
    actions: HashMap<String, ActionHandler>,
}

impl ControllerSpec {
    pub fn new(
        name: impl Into<String>,
        root: impl Fn(&RemotingContext) -> Result<ModelId, InternalError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            root: Rc::new(root),
            actions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn action(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&ActionCall) -> Result<(), InternalError> + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Rc::new(handler));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn root_factory(&self) -> RootFactory {
        Rc::clone(&self.root)
    }

    pub(crate) fn action_handler(&self, action: &str) -> Result<ActionHandler, InternalError> {
        self.actions.get(action).map(Rc::clone).ok_or_else(|| {
            ControllerError::UnknownAction {
                controller: self.name.clone(),
                action: action.to_string(),
            }
            .into()
        })
    }
}

///
/// ControllerInstance
///

#[derive(Clone, Debug)]
pub struct ControllerInstance {
    pub controller_id: String,
    pub controller_name: String,
    pub model_id: ModelId,
    pub parent_controller_id: Option<String>,
    pub context_id: Option<String>,
}

///
/// ControllerRegistry
///
/// Specs by name, live instances by id, and the context-id grouping used to
/// tear a whole remoting context's controllers down at once.
///

#[derive(Default)]
pub struct ControllerRegistry {
    specs: HashMap<String, Rc<ControllerSpec>>,
    instances: HashMap<String, ControllerInstance>,
    contexts: HashMap<String, Vec<String>>,
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_spec(&mut self, spec: ControllerSpec) -> Result<(), InternalError> {
        if self.specs.contains_key(spec.name()) {
            return Err(ControllerError::DuplicateController(spec.name().to_string()).into());
        }
        self.specs.insert(spec.name().to_string(), Rc::new(spec));

        Ok(())
    }

    pub fn spec(&self, name: &str) -> Result<Rc<ControllerSpec>, InternalError> {
        self.specs
            .get(name)
            .map(Rc::clone)
            .ok_or_else(|| ControllerError::UnknownController(name.to_string()).into())
    }

    /// Announce a remoting context id. Idempotent.
    pub fn create_context(&mut self, context_id: &str) {
        self.contexts.entry(context_id.to_string()).or_default();
    }

    /// Tear down a context: every controller instance created under it is
    /// removed and returned, in creation order.
    pub fn destroy_context(&mut self, context_id: &str) -> Vec<ControllerInstance> {
        let Some(controller_ids) = self.contexts.remove(context_id) else {
            return Vec::new();
        };

        controller_ids
            .iter()
            .filter_map(|id| self.instances.remove(id))
            .collect()
    }

    pub fn add_instance(&mut self, instance: ControllerInstance) -> Result<(), InternalError> {
        if self.instances.contains_key(&instance.controller_id) {
            return Err(ControllerError::DuplicateInstance(instance.controller_id).into());
        }
        if let Some(context_id) = &instance.context_id {
            self.contexts
                .entry(context_id.clone())
                .or_default()
                .push(instance.controller_id.clone());
        }
        self.instances
            .insert(instance.controller_id.clone(), instance);

        Ok(())
    }

    /// Remove one instance. Absent ids are a no-op (destruction is
    /// idempotent across both peers).
    pub fn remove_instance(&mut self, controller_id: &str) -> Option<ControllerInstance> {
        let instance = self.instances.remove(controller_id)?;
        if let Some(context_id) = &instance.context_id {
            if let Some(ids) = self.contexts.get_mut(context_id) {
                ids.retain(|id| id != controller_id);
            }
        }

        Some(instance)
    }

    pub fn instance(&self, controller_id: &str) -> Result<&ControllerInstance, InternalError> {
        self.instances
            .get(controller_id)
            .ok_or_else(|| ControllerError::UnknownInstance(controller_id.to_string()).into())
    }

    /// Resolve the handler for an incoming action call.
    pub fn action_handler(
        &self,
        controller_id: &str,
        action: &str,
    ) -> Result<ActionHandler, InternalError> {
        let instance = self.instance(controller_id)?;
        self.spec(&instance.controller_name)?.action_handler(action)
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Drop all instances and contexts; specs survive a reset.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.contexts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ControllerSpec {
        ControllerSpec::new(name, |_| Ok(ModelId::new("root"))).action("ping", |_| Ok(()))
    }

    fn instance(id: &str, name: &str, context: Option<&str>) -> ControllerInstance {
        ControllerInstance {
            controller_id: id.to_string(),
            controller_name: name.to_string(),
            model_id: ModelId::new(format!("m-{id}")),
            parent_controller_id: None,
            context_id: context.map(str::to_string),
        }
    }

    #[test]
    fn duplicate_spec_registration_is_rejected() {
        let mut registry = ControllerRegistry::new();
        registry.register_spec(spec("chat")).expect("register");
        let err = registry.register_spec(spec("chat")).unwrap_err();
        assert_eq!(err.class, ErrorClass::DuplicateRegistration);
    }

    #[test]
    fn action_handlers_resolve_through_the_instance() {
        let mut registry = ControllerRegistry::new();
        registry.register_spec(spec("chat")).expect("register");
        registry
            .add_instance(instance("c-1", "chat", None))
            .expect("instance");

        assert!(registry.action_handler("c-1", "ping").is_ok());

        let err = registry
            .action_handler("c-1", "missing")
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Protocol);
        assert!(err.message.contains("no action 'missing'"));

        let err = registry
            .action_handler("c-9", "ping")
            .map(|_| ())
            .unwrap_err();
        assert!(err.message.contains("unknown controller instance"));
    }

    #[test]
    fn destroying_a_context_removes_its_controllers() {
        let mut registry = ControllerRegistry::new();
        registry.register_spec(spec("chat")).expect("register");
        registry.create_context("ctx-1");
        registry
            .add_instance(instance("c-1", "chat", Some("ctx-1")))
            .expect("instance");
        registry
            .add_instance(instance("c-2", "chat", Some("ctx-1")))
            .expect("instance");
        registry
            .add_instance(instance("c-3", "chat", Some("ctx-2")))
            .expect("instance");

        let removed = registry.destroy_context("ctx-1");
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.instance_count(), 1);
        assert!(registry.instance("c-3").is_ok());

        // Unknown contexts tear down nothing.
        assert!(registry.destroy_context("ctx-1").is_empty());
    }

    #[test]
    fn instance_removal_is_idempotent() {
        let mut registry = ControllerRegistry::new();
        registry
            .add_instance(instance("c-1", "chat", Some("ctx-1")))
            .expect("instance");

        assert!(registry.remove_instance("c-1").is_some());
        assert!(registry.remove_instance("c-1").is_none());
    }
}
