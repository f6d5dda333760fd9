//! Reachability semantics at the bean level: scalar mutations never affect
//! liveness, reference transfers keep beans alive, cycles are rejected at
//! the mutating call, and sweeps delete everywhere.

use remodel_core::{
    beans::{Bean, BeanBinder, BeanList, BeanRef, Property, RemotingBean},
    context::{ContextConfig, RemotingContext},
    error::InternalError,
    schema::ClassDescriptor,
    types::SystemId,
};
use std::{cell::RefCell, rc::Rc};

#[derive(Default)]
struct Node {
    label: Property<String>,
    next: BeanRef<Node>,
    children: BeanList<Node>,
}

impl RemotingBean for Node {
    const CLASS_NAME: &'static str = "app.Node";

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor::new(Self::CLASS_NAME)
            .property::<String>("label")
            .reference("next")
            .reference_list("children")
    }

    fn bind(&mut self, binder: &BeanBinder<'_>) -> Result<(), InternalError> {
        self.label.bind(binder.attribute("label")?);
        self.next.bind(binder.attribute("next")?);
        self.children.bind(binder.attribute("children")?);
        Ok(())
    }
}

fn context() -> RemotingContext {
    let ctx = RemotingContext::builder()
        .system_id(SystemId::named("gc"))
        .build();
    ctx.register_bean_class::<Node>().expect("register class");
    ctx
}

fn link(holder: &Bean<Node>, target: Option<&Bean<Node>>) {
    holder.with(|n| n.next.set(target)).expect("set next");
}

#[test]
fn scalar_mutations_never_affect_reachability() {
    let ctx = context();
    let root = ctx.create_root::<Node>().expect("root");
    let child = ctx.create::<Node>().expect("child");
    link(&root, Some(&child));

    root.with(|n| n.label.set("root".into())).expect("set");
    child.with(|n| n.label.set("child".into())).expect("set");
    child.with(|n| n.label.clear()).expect("clear");

    assert!(ctx.sweep_garbage().is_empty());
    assert_eq!(ctx.managed_instances_count(), 2);
}

#[test]
fn unreachable_beans_are_rejected_and_removed_everywhere() {
    let ctx = context();
    let removed: Rc<RefCell<u32>> = Rc::default();
    let counter = Rc::clone(&removed);
    ctx.on_bean_removed(Some(Node::CLASS_NAME), move |_| {
        *counter.borrow_mut() += 1;
    });

    let root = ctx.create_root::<Node>().expect("root");
    let orphan = ctx.create::<Node>().expect("orphan");
    let orphan_id = ctx.remoting_id(&orphan).expect("id");
    ctx.flush();

    let rejected = ctx.sweep_garbage();
    assert_eq!(rejected, vec![orphan_id]);
    assert!(!ctx.is_managed(&orphan));
    assert!(ctx.is_managed(&root));
    assert_eq!(*removed.borrow(), 1, "removed subscription fires for GC");

    // The peer is told: the sweep queued a delete for the orphan.
    let batch = ctx.flush();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].name(), "delete_bean");
}

#[test]
fn reference_transfer_keeps_a_bean_alive() {
    let ctx = context();
    let holder_a = ctx.create_root::<Node>().expect("a");
    let holder_b = ctx.create_root::<Node>().expect("b");
    let shared = ctx.create::<Node>().expect("shared");

    link(&holder_a, Some(&shared));
    assert!(ctx.sweep_garbage().is_empty());

    // Second holder grabs it before the first lets go.
    link(&holder_b, Some(&shared));
    link(&holder_a, None);
    assert!(ctx.sweep_garbage().is_empty());
    assert!(ctx.is_managed(&shared));

    // Last reference gone: collected on the next sweep.
    link(&holder_b, None);
    let rejected = ctx.sweep_garbage();
    assert_eq!(rejected.len(), 1);
    assert!(!ctx.is_managed(&shared));
}

#[test]
fn closing_a_reference_cycle_fails_and_leaves_state_unchanged() {
    let ctx = context();
    let root = ctx.create_root::<Node>().expect("root");
    let child = ctx.create::<Node>().expect("child");
    link(&root, Some(&child));

    let err = child
        .with(|n| n.next.set(Some(&root)))
        .unwrap_err();
    assert!(err.is_circular_dependency());

    // The rejected mutation must not have touched the attribute.
    assert_eq!(child.with(|n| n.next.get()).expect("get"), None);

    // Both beans stay alive and the graph stays consistent.
    assert!(ctx.sweep_garbage().is_empty());
    assert!(ctx.is_managed(&root));
    assert!(ctx.is_managed(&child));
}

#[test]
fn self_reference_is_a_cycle() {
    let ctx = context();
    let node = ctx.create_root::<Node>().expect("node");
    let err = node.with(|n| n.next.set(Some(&node))).unwrap_err();
    assert!(err.is_circular_dependency());
}

#[test]
fn list_membership_cycles_are_rejected() {
    let ctx = context();
    let root = ctx.create_root::<Node>().expect("root");
    let child = ctx.create::<Node>().expect("child");
    root.with(|n| n.children.add(&child)).expect("add");

    let err = child.with(|n| n.children.add(&root)).unwrap_err();
    assert!(err.is_circular_dependency());
    assert_eq!(child.with(|n| n.children.len()).expect("len"), 0);

    // Removing the forward edge reopens the path.
    assert!(root.with(|n| n.children.remove_bean(&child)).expect("remove"));
    child.with(|n| n.children.add(&root)).expect("now legal");
}

#[test]
fn qualifier_broadcast_cannot_close_a_cycle() {
    let ctx = context();
    let a = ctx.create_root::<Node>().expect("a");
    let b = ctx.create::<Node>().expect("b");
    let c = ctx.create_root::<Node>().expect("c");
    link(&a, Some(&b));
    link(&c, Some(&a));

    // b.next and c.next form a qualifier group; broadcasting c.next's
    // value (a) into b.next would close the a -> b -> a loop.
    b.with(|n| n.next.set_qualifier(Some("mirror".into())))
        .expect("qualify");
    c.with(|n| n.next.set_qualifier(Some("mirror".into())))
        .expect("qualify");

    let err = ctx.update_qualifiers(&c).unwrap_err();
    assert!(err.is_circular_dependency());

    // The rejected broadcast must not have touched the target attribute.
    assert_eq!(b.with(|n| n.next.get()).expect("get"), None);
    assert!(ctx.sweep_garbage().is_empty());
}

#[test]
fn rejection_callback_observes_each_sweep() {
    let ctx = context();
    let sweeps: Rc<RefCell<Vec<usize>>> = Rc::default();
    let log = Rc::clone(&sweeps);
    ctx.on_gc_reject(move |handles| {
        log.borrow_mut().push(handles.len());
    });

    ctx.create_root::<Node>().expect("root");
    ctx.create::<Node>().expect("orphan 1");
    ctx.create::<Node>().expect("orphan 2");

    ctx.sweep_garbage();
    ctx.sweep_garbage(); // nothing left to reject
    assert_eq!(*sweeps.borrow(), vec![2]);
}

#[test]
fn deleting_the_root_collects_a_deep_chain() {
    let ctx = context();
    let root = ctx.create_root::<Node>().expect("root");

    let mut tail = root.clone();
    for _ in 0..1_000 {
        let node = ctx.create::<Node>().expect("node");
        link(&tail, Some(&node));
        tail = node;
    }
    assert!(ctx.sweep_garbage().is_empty());
    assert_eq!(ctx.managed_instances_count(), 1_001);

    ctx.delete(&root);
    let rejected = ctx.sweep_garbage();
    assert_eq!(rejected.len(), 1_000, "whole chain collected in one sweep");
    assert_eq!(ctx.managed_instances_count(), 0);
}

#[test]
fn inactive_collector_tracks_nothing() {
    let ctx = RemotingContext::builder()
        .system_id(SystemId::named("gc-off"))
        .config(ContextConfig {
            garbage_collection_active: false,
        })
        .build();
    ctx.register_bean_class::<Node>().expect("register class");

    let a = ctx.create::<Node>().expect("a");
    let b = ctx.create::<Node>().expect("b");
    link(&a, Some(&b));
    link(&b, Some(&a)); // cycles are the caller's problem now

    assert!(ctx.sweep_garbage().is_empty());
    assert!(ctx.is_managed(&a));
    assert!(ctx.is_managed(&b));
}
