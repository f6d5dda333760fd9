use crate::{
    model::store::{EventKind, ModelStoreEvent},
    types::{
        ACTION_CALL_TYPE, BEAN_SCHEMA_TYPE, INTERNAL_ATTRIBUTES_TYPE, LIST_SPLICE_TYPE, Source,
    },
};
use crate::model::presentation::PresentationModel;

///
/// EventClass
///
/// Classification of a presentation model by its type string. The reserved
/// meta-types are protocol plumbing; everything else is an application bean
/// class.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventClass {
    BeanSchema,
    ActionCall,
    InternalAttributes,
    ListSplice,
    Bean,
}

#[must_use]
pub fn classify(model_type: &str) -> EventClass {
    match model_type {
        BEAN_SCHEMA_TYPE => EventClass::BeanSchema,
        ACTION_CALL_TYPE => EventClass::ActionCall,
        INTERNAL_ATTRIBUTES_TYPE => EventClass::InternalAttributes,
        LIST_SPLICE_TYPE => EventClass::ListSplice,
        _ => EventClass::Bean,
    }
}

///
/// DispatchAction
///
/// What the context has to do in response to a model-store event.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchAction {
    /// A bean-typed model arrived from the remote peer; instantiate and bind
    /// the corresponding bean.
    MaterializeBean,
    /// A controller action call arrived; invoke its handler.
    InvokeAction,
    /// An internal-attributes exchange arrived; run the one-shot handlers.
    ConsumeInternal,
    Ignore,
}

type InternalHandler = Box<dyn FnOnce(&PresentationModel)>;

///
/// EventDispatcher
///
/// Routes model-store events by event class and change source. The source
/// check is the echo-suppression gate: locally-originated events never
/// trigger the remote-facing reactions, so an applied remote change can
/// never bounce back as a new outbound command.
///

#[derive(Default)]
pub struct EventDispatcher {
    internal_handlers: Vec<InternalHandler>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(event: &ModelStoreEvent) -> DispatchAction {
        if event.kind != EventKind::Added || event.source != Source::Remote {
            return DispatchAction::Ignore;
        }

        match classify(&event.model_type) {
            EventClass::Bean => DispatchAction::MaterializeBean,
            EventClass::ActionCall => DispatchAction::InvokeAction,
            EventClass::InternalAttributes => DispatchAction::ConsumeInternal,
            EventClass::BeanSchema | EventClass::ListSplice => DispatchAction::Ignore,
        }
    }

    /// Register a handler for the next internal-attributes exchange.
    /// Handlers are one-shot: the whole set fires once and is cleared.
    pub fn on_internal_attributes(&mut self, handler: impl FnOnce(&PresentationModel) + 'static) {
        self.internal_handlers.push(Box::new(handler));
    }

    /// Take the pending one-shot handlers, leaving none registered.
    #[must_use]
    pub fn take_internal_handlers(&mut self) -> Vec<InternalHandler> {
        std::mem::take(&mut self.internal_handlers)
    }

    #[must_use]
    pub fn has_internal_handlers(&self) -> bool {
        !self.internal_handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelId;

    fn event(model_type: &str, kind: EventKind, source: Source) -> ModelStoreEvent {
        ModelStoreEvent {
            kind,
            model_id: ModelId::new("m-1"),
            model_type: model_type.to_string(),
            source,
        }
    }

    #[test]
    fn remote_bean_addition_materializes() {
        let e = event("app.Person", EventKind::Added, Source::Remote);
        assert_eq!(EventDispatcher::route(&e), DispatchAction::MaterializeBean);
    }

    #[test]
    fn local_events_are_suppressed() {
        for model_type in ["app.Person", ACTION_CALL_TYPE, INTERNAL_ATTRIBUTES_TYPE] {
            let e = event(model_type, EventKind::Added, Source::Local);
            assert_eq!(
                EventDispatcher::route(&e),
                DispatchAction::Ignore,
                "locally-sourced '{model_type}' must not be re-dispatched"
            );
        }
    }

    #[test]
    fn meta_types_route_to_their_handlers() {
        let action = event(ACTION_CALL_TYPE, EventKind::Added, Source::Remote);
        assert_eq!(EventDispatcher::route(&action), DispatchAction::InvokeAction);

        let internal = event(INTERNAL_ATTRIBUTES_TYPE, EventKind::Added, Source::Remote);
        assert_eq!(
            EventDispatcher::route(&internal),
            DispatchAction::ConsumeInternal
        );

        let schema = event(BEAN_SCHEMA_TYPE, EventKind::Added, Source::Remote);
        assert_eq!(EventDispatcher::route(&schema), DispatchAction::Ignore);
    }

    #[test]
    fn removals_never_materialize() {
        let e = event("app.Person", EventKind::Removed, Source::Remote);
        assert_eq!(EventDispatcher::route(&e), DispatchAction::Ignore);
    }

    #[test]
    fn internal_handlers_are_one_shot() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_internal_attributes(|_| {});
        dispatcher.on_internal_attributes(|_| {});
        assert!(dispatcher.has_internal_handlers());

        let handlers = dispatcher.take_internal_handlers();
        assert_eq!(handlers.len(), 2);
        assert!(!dispatcher.has_internal_handlers());
    }
}
