//! Application of incoming command batches against the local context.
//!
//! Every function here runs with the applying-remote flag set, so mutations
//! performed while replaying a command never queue outbound commands of
//! their own.

use crate::{
    beans::{builder::BeanBinder, repository::BeanError},
    command::{Command, WireAttribute},
    context::ContextInner,
    controller::{ActionCall, ControllerInstance},
    dispatch::{DispatchAction, EventDispatcher},
    error::{ErrorOrigin, InternalError},
    model::{attribute::Attribute, presentation::PresentationModelBuilder},
    obs::{self, MetricsEvent},
    schema::FieldKind,
    types::{ACTION_CALL_TYPE, AttributeId, BeanHandle, ClassId, ModelId, Source},
    value::WireValue,
};
use std::rc::Rc;

/// Apply one command. Commands within a batch may depend on their
/// predecessors, so callers stop at the first error.
pub(crate) fn apply(ctx: &Rc<ContextInner>, command: Command) -> Result<(), InternalError> {
    obs::record(MetricsEvent::CommandsApplied(1));

    match command {
        Command::CreateBeanType {
            class_id,
            class_name,
            fields,
        } => {
            ctx.classes
                .borrow_mut()
                .adopt_remote(class_id, &class_name, &fields)?;
            Ok(())
        }
        Command::CreateBean {
            class_id,
            bean_id,
            attributes,
        } => create_bean(ctx, class_id, bean_id, &attributes),
        Command::DeleteBean { bean_id } => {
            // Idempotent: both sides may delete concurrently. The handle
            // lookup ends before remove_bean re-borrows the repository.
            let handle = ctx.beans.borrow().handle_by_model(&bean_id);
            if let Some(handle) = handle {
                ctx.remove_bean(handle, true);
            }
            Ok(())
        }
        Command::ValueChanged {
            attribute_id,
            old_value: _,
            new_value,
        } => value_changed(ctx, &attribute_id, new_value),
        Command::ListAdd {
            attribute_id,
            index,
            elements,
        } => {
            let holder = list_holder(ctx, &attribute_id)?;
            for (offset, element) in elements.into_iter().enumerate() {
                ctx.list_insert(holder, &attribute_id, index + offset, element)?;
            }
            Ok(())
        }
        Command::ListRemove {
            attribute_id,
            from,
            to,
        } => {
            if from > to {
                return Err(InternalError::protocol(
                    ErrorOrigin::Command,
                    format!("list_remove range {from}..{to} is inverted"),
                ));
            }
            let holder = list_holder(ctx, &attribute_id)?;
            for _ in from..to {
                ctx.list_remove_at(holder, &attribute_id, from)?;
            }
            Ok(())
        }
        Command::ListReplace {
            attribute_id,
            index,
            element,
        } => {
            let holder = list_holder(ctx, &attribute_id)?;
            ctx.list_replace(holder, &attribute_id, index, element)
        }
        Command::CreateContext { context_id } => {
            ctx.controllers.borrow_mut().create_context(&context_id);
            Ok(())
        }
        Command::DestroyContext { context_id } => {
            let removed = ctx.controllers.borrow_mut().destroy_context(&context_id);
            for instance in removed {
                unroot(ctx, &instance.model_id);
            }
            Ok(())
        }
        Command::CreateController {
            controller_id,
            model_id,
            controller_name,
            parent_controller_id,
        } => {
            // The controller's model was materialized as an ordinary bean by
            // the preceding create_bean; promote it to a reachability root so
            // an independent local sweep cannot reject it.
            let root = resolve_handle(ctx, &model_id)?;
            ctx.controllers.borrow_mut().add_instance(ControllerInstance {
                controller_id,
                controller_name,
                model_id,
                parent_controller_id,
                context_id: None,
            })?;
            ctx.gc.borrow_mut().mark_as_root(root)?;
            Ok(())
        }
        Command::DestroyController { controller_id } => {
            if let Some(instance) = ctx.controllers.borrow_mut().remove_instance(&controller_id) {
                unroot(ctx, &instance.model_id);
            }
            Ok(())
        }
        Command::CallAction {
            controller_id,
            action_name,
            params,
        } => call_action(ctx, controller_id, action_name, params),
    }
}

/// Materialize a bean announced by the peer: rebuild the presentation model
/// from the wire attributes, let the dispatcher route the add, instantiate
/// the bean through its registered factory and wire its reference edges.
fn create_bean(
    ctx: &Rc<ContextInner>,
    class_id: ClassId,
    bean_id: ModelId,
    attributes: &[WireAttribute],
) -> Result<(), InternalError> {
    // A peer announcing one of our own ids means the transport looped the
    // batch back; fail fast instead of colliding with the original bean.
    if ctx.ids.borrow().is_local(bean_id.as_str()) {
        return Err(InternalError::protocol(
            ErrorOrigin::Command,
            format!("create_bean id '{bean_id}' was minted locally; peer echoed our own bean"),
        ));
    }

    let info = ctx.classes.borrow().require_by_id(class_id)?;

    for wire in attributes {
        if info.field(&wire.property_name).is_none() {
            return Err(InternalError::protocol(
                ErrorOrigin::Command,
                format!(
                    "create_bean for '{}' carries undeclared property '{}'",
                    info.class_name, wire.property_name
                ),
            ));
        }
    }

    let model = {
        let mut ids = ctx.ids.borrow_mut();
        let mut builder =
            PresentationModelBuilder::new(info.class_name.clone()).with_id(bean_id.clone());
        for wire in attributes {
            let mut attr = Attribute::new(
                wire.attribute_id.clone(),
                wire.property_name.clone(),
                wire.value.clone(),
            );
            if let Some(qualifier) = &wire.qualifier {
                attr = attr.with_qualifier(qualifier.clone());
            }
            builder = builder.raw_attribute(attr);
        }
        builder.build(&mut ids)?
    };

    let event = ctx.store.borrow_mut().add(model, Source::Remote)?;
    if EventDispatcher::route(&event) != DispatchAction::MaterializeBean {
        // Meta-typed model; indexed but never backed by a bean.
        ctx.notify_store(&event);
        return Ok(());
    }

    let handle = ctx.beans.borrow_mut().allocate_handle();
    {
        let mut beans = ctx.beans.borrow_mut();
        for wire in attributes {
            let is_list = info
                .field(&wire.property_name)
                .is_some_and(|field| field.kind == FieldKind::List);
            if is_list {
                beans.init_list(wire.attribute_id.clone());
            }
        }
    }

    let bean = {
        let instantiator = ctx.factories.borrow().instantiator(&info.class_name)?;
        let store = ctx.store.borrow();
        let model_ref = store.find_by_id(&bean_id).ok_or_else(|| {
            InternalError::invariant(
                ErrorOrigin::Command,
                format!("model '{bean_id}' vanished during materialization"),
            )
        })?;
        let binder = BeanBinder::new(Rc::downgrade(ctx), handle, model_ref);
        instantiator.instantiate(&binder)?
    };

    ctx.beans
        .borrow_mut()
        .register(handle, info.class_name.clone(), bean_id, bean)?;
    ctx.gc.borrow_mut().on_bean_created(handle, false)?;

    // Reference-valued attributes arriving pre-populated become graph edges.
    for wire in attributes {
        if let Some(target_model) = wire.value.as_ref_id() {
            let target = resolve_handle(ctx, target_model)?;
            ctx.gc
                .borrow_mut()
                .on_property_value_changed(handle, None, Some(target))?;
        }
    }

    ctx.notify_store(&event);
    ctx.fire_bean_added(handle);

    Ok(())
}

fn value_changed(
    ctx: &Rc<ContextInner>,
    attribute_id: &AttributeId,
    new_value: WireValue,
) -> Result<(), InternalError> {
    let old_value = ctx.attribute_value(attribute_id)?;
    if old_value == new_value {
        return Ok(());
    }

    // Graph bookkeeping first: a rejected reference change must leave the
    // attribute untouched.
    ctx.track_reference_change(&crate::model::store::ValueChange {
        attribute_id: attribute_id.clone(),
        old_value,
        new_value: new_value.clone(),
    })?;

    ctx.set_scalar(attribute_id, new_value)
}

/// Invoke a named action. The call travels as a transient action-call model
/// so the dispatcher's routing (and its echo suppression) stays on the path.
fn call_action(
    ctx: &Rc<ContextInner>,
    controller_id: String,
    action_name: String,
    params: Vec<(String, WireValue)>,
) -> Result<(), InternalError> {
    let model = {
        let mut ids = ctx.ids.borrow_mut();
        PresentationModelBuilder::new(ACTION_CALL_TYPE)
            .attribute(
                ids.next_attribute_id(),
                "controller_id",
                WireValue::Text(controller_id.clone()),
            )
            .attribute(
                ids.next_attribute_id(),
                "action_name",
                WireValue::Text(action_name.clone()),
            )
            .build(&mut ids)?
    };
    let model_id = model.id().clone();

    let event = ctx.store.borrow_mut().add(model, Source::Remote)?;
    ctx.notify_store(&event);

    let result = if EventDispatcher::route(&event) == DispatchAction::InvokeAction {
        let handler = ctx
            .controllers
            .borrow()
            .action_handler(&controller_id, &action_name)?;
        handler(&ActionCall {
            controller_id,
            action_name,
            params,
        })
    } else {
        Ok(())
    };

    // Action-call models are transient; they never outlive the invocation.
    let removed = ctx.store.borrow_mut().remove(&model_id, Source::Remote);
    if let Some((_, event)) = removed {
        ctx.notify_store(&event);
    }

    result
}

fn list_holder(ctx: &ContextInner, id: &AttributeId) -> Result<BeanHandle, InternalError> {
    ctx.attribute_holder(id).ok_or_else(|| {
        InternalError::protocol(
            ErrorOrigin::Command,
            format!("list command for attribute '{id}' without a managed bean"),
        )
    })
}

fn resolve_handle(ctx: &ContextInner, model_id: &ModelId) -> Result<BeanHandle, InternalError> {
    ctx.beans
        .borrow()
        .handle_by_model(model_id)
        .ok_or_else(|| BeanError::UnmanagedModel(model_id.clone()).into())
}

/// Withdraw root status from a controller's root bean; the subtree becomes
/// GC-eligible on the next sweep.
fn unroot(ctx: &ContextInner, model_id: &ModelId) {
    if let Some(handle) = ctx.beans.borrow().handle_by_model(model_id) {
        ctx.gc.borrow_mut().on_bean_removed(handle);
    }
}
