//! Two-peer synchronization scenarios driven entirely through the public
//! context API: create on one side, flush, apply on the other, and assert
//! that state converges without commands echoing back.

use remodel_core::{
    beans::{BeanBinder, BeanList, BeanRef, ObservableList, Property, RemotingBean},
    context::RemotingContext,
    controller::ControllerSpec,
    error::{ErrorClass, InternalError},
    schema::ClassDescriptor,
    types::SystemId,
    value::WireValue,
};
use std::{cell::RefCell, rc::Rc};

#[derive(Default)]
struct Person {
    name: Property<String>,
    partner: BeanRef<Person>,
    tags: ObservableList<String>,
    friends: BeanList<Person>,
}

impl RemotingBean for Person {
    const CLASS_NAME: &'static str = "app.Person";

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor::new(Self::CLASS_NAME)
            .property::<String>("name")
            .reference("partner")
            .list::<String>("tags")
            .reference_list("friends")
    }

    fn bind(&mut self, binder: &BeanBinder<'_>) -> Result<(), InternalError> {
        self.name.bind(binder.attribute("name")?);
        self.partner.bind(binder.attribute("partner")?);
        self.tags.bind(binder.attribute("tags")?);
        self.friends.bind(binder.attribute("friends")?);
        Ok(())
    }
}

fn context(name: &str) -> RemotingContext {
    let ctx = RemotingContext::builder()
        .system_id(SystemId::named(name))
        .build();
    ctx.register_bean_class::<Person>().expect("register class");
    ctx
}

fn pair() -> (RemotingContext, RemotingContext) {
    (context("alpha"), context("beta"))
}

fn pump(from: &RemotingContext, to: &RemotingContext) {
    to.apply_batch(from.flush()).expect("apply batch");
}

#[test]
fn created_bean_materializes_on_the_peer() {
    let (a, b) = pair();

    let added: Rc<RefCell<u32>> = Rc::default();
    let counter = Rc::clone(&added);
    b.on_bean_added(Some(Person::CLASS_NAME), move |_| {
        *counter.borrow_mut() += 1;
    });

    let person = a.create::<Person>().expect("create");
    person
        .with(|p| p.name.set("Ada".into()))
        .expect("set name");
    pump(&a, &b);

    let mirrored = b.find_all::<Person>().expect("find_all");
    assert_eq!(mirrored.len(), 1);
    assert_eq!(
        mirrored[0].with(|p| p.name.get()).expect("get"),
        Some("Ada".into())
    );
    assert_eq!(*added.borrow(), 1, "materialization fires exactly once");

    // Echo suppression: applying the batch queued nothing on the receiver.
    assert_eq!(b.pending_command_count(), 0);

    // Both sides agree on the remoting identity.
    assert_eq!(
        a.remoting_id(&person).expect("id"),
        b.remoting_id(&mirrored[0]).expect("id")
    );
}

#[test]
fn local_creation_does_not_fire_added_subscriptions() {
    let (a, _) = pair();

    let added: Rc<RefCell<u32>> = Rc::default();
    let counter = Rc::clone(&added);
    a.on_bean_added(None, move |_| {
        *counter.borrow_mut() += 1;
    });

    a.create::<Person>().expect("create");
    assert_eq!(
        *added.borrow(),
        0,
        "the creating side already holds the bean; no self-notification"
    );
}

#[test]
fn value_changes_flow_both_ways_without_echo() {
    let (a, b) = pair();
    let person = a.create::<Person>().expect("create");
    pump(&a, &b);

    let mirrored = &b.find_all::<Person>().expect("find_all")[0];
    mirrored
        .with(|p| p.name.set("Grace".into()))
        .expect("set on b");
    pump(&b, &a);

    assert_eq!(
        person.with(|p| p.name.get()).expect("get"),
        Some("Grace".into())
    );
    assert_eq!(
        a.pending_command_count(),
        0,
        "an applied value change must not be re-queued"
    );

    // No-op set after convergence stays silent.
    person
        .with(|p| p.name.set("Grace".into()))
        .expect("noop set");
    assert_eq!(a.pending_command_count(), 0);
}

#[test]
fn references_and_lists_synchronize() {
    let (a, b) = pair();
    let ada = a.create::<Person>().expect("create");
    let grace = a.create::<Person>().expect("create");
    ada.with(|p| p.name.set("Ada".into())).expect("set");
    grace.with(|p| p.name.set("Grace".into())).expect("set");
    ada.with(|p| p.partner.set(Some(&grace))).expect("ref");
    ada.with(|p| p.tags.add("pioneer".into())).expect("tag");
    ada.with(|p| p.tags.add("mathematician".into())).expect("tag");
    ada.with(|p| p.friends.add(&grace)).expect("friend");
    pump(&a, &b);

    let ada_id = a.remoting_id(&ada).expect("id");
    let mirrored = b.get_bean::<Person>(&ada_id).expect("get_bean");

    let partner = mirrored
        .with(|p| p.partner.get())
        .expect("partner")
        .expect("partner set");
    assert_eq!(
        partner.with(|p| p.name.get()).expect("get"),
        Some("Grace".into())
    );

    assert_eq!(
        mirrored.with(|p| p.tags.to_vec()).expect("tags"),
        vec!["pioneer".to_string(), "mathematician".to_string()]
    );
    let friends = mirrored.with(|p| p.friends.to_vec()).expect("friends");
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0], partner);

    // Structural list edits keep converging.
    mirrored.with(|p| p.tags.remove(0)).expect("remove");
    pump(&b, &a);
    assert_eq!(
        ada.with(|p| p.tags.to_vec()).expect("tags"),
        vec!["mathematician".to_string()]
    );
}

#[test]
fn qualifier_broadcast_converges_and_unbind_stops_it() {
    let (a, _) = pair();
    let left = a.create::<Person>().expect("create");
    let right = a.create::<Person>().expect("create");

    left.with(|p| p.name.set_qualifier(Some("selection".into())))
        .expect("qualify");
    right
        .with(|p| p.name.set_qualifier(Some("selection".into())))
        .expect("qualify");

    left.with(|p| p.name.set("shared".into())).expect("set");
    a.update_qualifiers(&left).expect("broadcast");
    assert_eq!(
        right.with(|p| p.name.get()).expect("get"),
        Some("shared".into())
    );

    // Unbind, change again: the former group member keeps its value.
    right
        .with(|p| p.name.set_qualifier(None))
        .expect("unbind");
    left.with(|p| p.name.set("changed".into())).expect("set");
    a.update_qualifiers(&left).expect("broadcast");
    assert_eq!(
        right.with(|p| p.name.get()).expect("get"),
        Some("shared".into())
    );
}

#[test]
fn concurrent_deletion_is_idempotent() {
    let (a, b) = pair();
    let person = a.create::<Person>().expect("create");
    pump(&a, &b);
    let mirrored = b.find_all::<Person>().expect("find_all").remove(0);

    // Both sides delete before either batch crosses.
    a.delete(&person);
    b.delete(&mirrored);
    pump(&a, &b);
    pump(&b, &a);

    assert!(a.find_all::<Person>().expect("find_all").is_empty());
    assert!(b.find_all::<Person>().expect("find_all").is_empty());

    // A second local delete is a no-op too.
    a.delete(&person);
    assert!(a.remoting_id(&person).unwrap_err().is_not_managed());
}

#[test]
fn remote_deletion_of_a_live_bean_applies_cleanly() {
    let (a, b) = pair();
    let person = a.create::<Person>().expect("create");
    pump(&a, &b);
    assert_eq!(b.find_all::<Person>().expect("find_all").len(), 1);

    // Only one side deletes; the peer tears down a still-live bean.
    a.delete(&person);
    pump(&a, &b);

    assert!(b.find_all::<Person>().expect("find_all").is_empty());
    assert_eq!(b.pending_command_count(), 0);
}

#[test]
fn echoed_own_create_bean_is_rejected() {
    let (a, _) = pair();
    a.create::<Person>().expect("create");

    // A transport loop hands the batch back to its originator.
    let err = a.apply_batch(a.flush()).unwrap_err();
    assert_eq!(err.class, ErrorClass::Protocol);
    assert!(err.message.contains("minted locally"));
}

#[test]
fn controller_actions_run_on_the_hosting_peer() {
    let (server, client) = pair();

    let renames: Rc<RefCell<Vec<String>>> = Rc::default();
    let seen = Rc::clone(&renames);
    server
        .register_controller(
            ControllerSpec::new("people", |ctx| {
                let root = ctx.create_root::<Person>()?;
                ctx.remoting_id(&root)
            })
            .action("rename", move |call| {
                if let Some(WireValue::Text(name)) = call.param("name") {
                    seen.borrow_mut().push(name.clone());
                }
                Ok(())
            }),
        )
        .expect("register controller");

    server.open_context("session-1");
    let controller_id = server
        .create_controller("session-1", "people", None)
        .expect("create controller");
    pump(&server, &client);

    // The controller's root bean materialized on the client.
    assert_eq!(client.find_all::<Person>().expect("find_all").len(), 1);

    let reaction = client
        .call_action(
            &controller_id,
            "rename",
            vec![("name".to_string(), WireValue::Text("Hopper".into()))],
        )
        .expect("call");
    pump(&client, &server);
    client.finish_round_trip();

    assert_eq!(*renames.borrow(), vec!["Hopper".to_string()]);
    assert!(reaction.try_take().expect("completed").is_ok());

    // Unknown actions fail batch application on the hosting side.
    client
        .call_action(&controller_id, "explode", Vec::new())
        .expect("call");
    let err = server.apply_batch(client.flush()).unwrap_err();
    assert_eq!(err.class, ErrorClass::Protocol);
}

#[test]
fn mirrored_controller_root_survives_client_sweeps() {
    let (server, client) = pair();
    server
        .register_controller(ControllerSpec::new("people", |ctx| {
            let root = ctx.create_root::<Person>()?;
            ctx.remoting_id(&root)
        }))
        .expect("register controller");

    server.open_context("session-1");
    let controller_id = server
        .create_controller("session-1", "people", None)
        .expect("create controller");
    pump(&server, &client);

    // The mirrored root is pinned: an independent client sweep keeps it.
    assert!(client.sweep_garbage().is_empty());
    assert_eq!(client.find_all::<Person>().expect("find_all").len(), 1);

    // Destroying the controller unpins it on both sides.
    server
        .destroy_controller(&controller_id)
        .expect("destroy controller");
    assert_eq!(server.sweep_garbage().len(), 1);
    pump(&server, &client);
    assert!(client.find_all::<Person>().expect("find_all").is_empty());
    assert!(client.sweep_garbage().is_empty());
}

#[test]
fn destroying_a_controller_collects_its_root_bean() {
    let (server, client) = pair();
    server
        .register_controller(ControllerSpec::new("people", |ctx| {
            let root = ctx.create_root::<Person>()?;
            ctx.remoting_id(&root)
        }))
        .expect("register controller");

    server.open_context("session-1");
    let controller_id = server
        .create_controller("session-1", "people", None)
        .expect("create controller");
    pump(&server, &client);
    assert_eq!(server.sweep_garbage().len(), 0, "rooted bean survives");

    server
        .destroy_controller(&controller_id)
        .expect("destroy controller");
    let rejected = server.sweep_garbage();
    assert_eq!(rejected.len(), 1, "unrooted bean is collected");

    pump(&server, &client);
    assert!(client.find_all::<Person>().expect("find_all").is_empty());
}

#[test]
fn encoded_batches_roundtrip_between_peers() {
    let (a, b) = pair();
    let person = a.create::<Person>().expect("create");
    person.with(|p| p.name.set("Ada".into())).expect("set");

    let payload = a.flush_encoded().expect("encode");
    b.apply_encoded(&payload).expect("apply");

    assert_eq!(b.find_all::<Person>().expect("find_all").len(), 1);

    // Garbage fails loudly instead of desynchronizing.
    let err = b.apply_encoded("definitely not json").unwrap_err();
    assert_eq!(err.class, ErrorClass::Protocol);
}

#[test]
fn unregistered_class_fails_application() {
    let a = context("alpha");
    let b = RemotingContext::builder()
        .system_id(SystemId::named("bare"))
        .build();

    a.create::<Person>().expect("create");
    let err = b.apply_batch(a.flush()).unwrap_err();
    assert_eq!(err.class, ErrorClass::Protocol);
}

#[test]
fn reset_fails_outstanding_reactions_and_clears_state() {
    let (server, client) = pair();
    server
        .register_controller(
            ControllerSpec::new("people", |ctx| {
                let root = ctx.create_root::<Person>()?;
                ctx.remoting_id(&root)
            })
            .action("noop", |_| Ok(())),
        )
        .expect("register controller");
    server.open_context("session-1");
    let controller_id = server
        .create_controller("session-1", "people", None)
        .expect("create controller");
    pump(&server, &client);

    let reaction = client
        .call_action(&controller_id, "noop", Vec::new())
        .expect("call");
    client.reset();

    let err = reaction.try_take().expect("failed").unwrap_err();
    assert_eq!(err.class, ErrorClass::Transport);
    assert!(client.find_all::<Person>().expect("find_all").is_empty());
    assert_eq!(client.pending_command_count(), 0);
}
