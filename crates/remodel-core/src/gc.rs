use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::{self, MetricsEvent},
    types::BeanHandle,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error as ThisError;

///
/// GcError
///

#[derive(Debug, ThisError)]
pub enum GcError {
    #[error("bean {0} is already registered with the garbage collector")]
    DuplicateInstance(BeanHandle),

    #[error("bean {0} is not managed by the garbage collector")]
    NotManaged(BeanHandle),

    #[error("reference from {holder} to {target} would close a cycle")]
    CircularReference {
        holder: BeanHandle,
        target: BeanHandle,
    },
}

impl GcError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateInstance(_) => ErrorClass::DuplicateRegistration,
            Self::NotManaged(_) => ErrorClass::NotManaged,
            Self::CircularReference { .. } => ErrorClass::CircularDependency,
        }
    }
}

impl From<GcError> for InternalError {
    fn from(err: GcError) -> Self {
        Self::new(err.class(), ErrorOrigin::Gc, err.to_string())
    }
}

///
/// Instance
///
/// Bookkeeping node for one managed bean: root flag plus reference edges in
/// both directions, counted per edge (the same pair of beans may be linked
/// through several properties or list slots at once).
///

#[derive(Debug, Default)]
struct Instance {
    is_root: bool,
    referenced_by: HashMap<BeanHandle, usize>,
    references_out: HashMap<BeanHandle, usize>,
}

///
/// RejectHandler
///

pub type RejectHandler = Box<dyn Fn(&BTreeSet<BeanHandle>)>;

///
/// GarbageCollector
///
/// Back-reference counting over the managed bean graph. Scalar-valued
/// properties and lists are never part of the graph. Cycles cannot be
/// reclaimed by reference counting, so any mutation that would close one is
/// rejected synchronously at the mutating call instead of leaking.
///

pub struct GarbageCollector {
    active: bool,
    instances: HashMap<BeanHandle, Instance>,
    on_reject: Option<RejectHandler>,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(active: bool) -> Self {
        Self {
            active,
            instances: HashMap::new(),
            on_reject: None,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Install the rejection callback invoked once per sweep that rejects
    /// anything. Rejection is a routine outcome, not an error.
    pub fn set_on_reject(&mut self, handler: RejectHandler) {
        self.on_reject = Some(handler);
    }

    /// Exact count of currently tracked instances.
    #[must_use]
    pub fn managed_instances_count(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_managed(&self, handle: BeanHandle) -> bool {
        self.instances.contains_key(&handle)
    }

    // ---------------------------------------------------------------------
    // Graph bookkeeping
    // ---------------------------------------------------------------------

    /// Register a bean exactly once. A second registration for the same
    /// handle is a programmer error, regardless of either root flag.
    pub fn on_bean_created(
        &mut self,
        handle: BeanHandle,
        is_root: bool,
    ) -> Result<(), InternalError> {
        if !self.active {
            return Ok(());
        }
        if self.instances.contains_key(&handle) {
            return Err(GcError::DuplicateInstance(handle).into());
        }

        self.instances.insert(
            handle,
            Instance {
                is_root,
                ..Instance::default()
            },
        );

        Ok(())
    }

    /// Promote an already-registered bean to a reachability root (a
    /// controller model announced by the peer after its create-bean).
    pub fn mark_as_root(&mut self, handle: BeanHandle) -> Result<(), InternalError> {
        if !self.active {
            return Ok(());
        }
        let instance = self
            .instances
            .get_mut(&handle)
            .ok_or(GcError::NotManaged(handle))?;
        instance.is_root = true;

        Ok(())
    }

    /// Withdraw a bean's root status. The bean and its subtree become
    /// GC-eligible on the next sweep rather than being removed immediately.
    pub fn on_bean_removed(&mut self, handle: BeanHandle) {
        if !self.active {
            return;
        }
        if let Some(instance) = self.instances.get_mut(&handle) {
            instance.is_root = false;
        }
    }

    /// Property edge bookkeeping. `old`/`new` are the handles of managed
    /// beans held before/after the mutation; scalar values never reach this
    /// call. The cycle check runs before any edge is touched, so a rejected
    /// mutation leaves the graph unchanged.
    pub fn on_property_value_changed(
        &mut self,
        holder: BeanHandle,
        old: Option<BeanHandle>,
        new: Option<BeanHandle>,
    ) -> Result<(), InternalError> {
        if !self.active || old == new {
            return Ok(());
        }

        if let Some(target) = new {
            self.check_edge(holder, target)?;
        }
        if let Some(target) = old {
            self.remove_edge(holder, target);
        }
        if let Some(target) = new {
            self.add_edge(holder, target);
        }

        Ok(())
    }

    pub fn on_added_to_list(
        &mut self,
        holder: BeanHandle,
        element: BeanHandle,
    ) -> Result<(), InternalError> {
        if !self.active {
            return Ok(());
        }
        self.check_edge(holder, element)?;
        self.add_edge(holder, element);

        Ok(())
    }

    pub fn on_removed_from_list(&mut self, holder: BeanHandle, element: BeanHandle) {
        if !self.active {
            return;
        }
        self.remove_edge(holder, element);
    }

    /// Validate a prospective edge: both ends managed, no path from `target`
    /// back to `holder`. Iterative traversal; deep chains must not recurse.
    fn check_edge(&self, holder: BeanHandle, target: BeanHandle) -> Result<(), InternalError> {
        if !self.instances.contains_key(&holder) {
            return Err(GcError::NotManaged(holder).into());
        }
        if !self.instances.contains_key(&target) {
            return Err(GcError::NotManaged(target).into());
        }
        if holder == target {
            return Err(GcError::CircularReference { holder, target }.into());
        }

        let mut visited: HashSet<BeanHandle> = HashSet::new();
        let mut stack = vec![target];
        while let Some(current) = stack.pop() {
            if current == holder {
                return Err(GcError::CircularReference { holder, target }.into());
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(instance) = self.instances.get(&current) {
                stack.extend(instance.references_out.keys().copied());
            }
        }

        Ok(())
    }

    fn add_edge(&mut self, holder: BeanHandle, target: BeanHandle) {
        if let Some(instance) = self.instances.get_mut(&holder) {
            *instance.references_out.entry(target).or_insert(0) += 1;
        }
        if let Some(instance) = self.instances.get_mut(&target) {
            *instance.referenced_by.entry(holder).or_insert(0) += 1;
        }
    }

    fn remove_edge(&mut self, holder: BeanHandle, target: BeanHandle) {
        if let Some(instance) = self.instances.get_mut(&holder) {
            if let Some(count) = instance.references_out.get_mut(&target) {
                *count -= 1;
                if *count == 0 {
                    instance.references_out.remove(&target);
                }
            }
        }
        if let Some(instance) = self.instances.get_mut(&target) {
            if let Some(count) = instance.referenced_by.get_mut(&holder) {
                *count -= 1;
                if *count == 0 {
                    instance.referenced_by.remove(&holder);
                }
            }
        }
    }

    /// Drop a bean and all its edges from the graph. Used for explicit
    /// deletion, where the bean is gone now rather than GC-eligible later.
    pub fn forget(&mut self, handle: BeanHandle) {
        if !self.active {
            return;
        }
        if let Some(instance) = self.instances.remove(&handle) {
            for holder in instance.referenced_by.keys() {
                if let Some(other) = self.instances.get_mut(holder) {
                    other.references_out.remove(&handle);
                }
            }
            for target in instance.references_out.keys() {
                if let Some(other) = self.instances.get_mut(target) {
                    other.referenced_by.remove(&handle);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sweep
    // ---------------------------------------------------------------------

    /// One reachability sweep. Everything not reachable from a root is
    /// rejected as a batch: removed from the managed set, reported through
    /// the rejection callback, and returned. Safe to call repeatedly, with
    /// or without managed instances.
    pub fn gc(&mut self) -> BTreeSet<BeanHandle> {
        if !self.active {
            return BTreeSet::new();
        }

        let mut marked: HashSet<BeanHandle> = HashSet::new();
        let mut queue: VecDeque<BeanHandle> = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.is_root)
            .map(|(handle, _)| *handle)
            .collect();

        while let Some(current) = queue.pop_front() {
            if !marked.insert(current) {
                continue;
            }
            if let Some(instance) = self.instances.get(&current) {
                queue.extend(instance.references_out.keys().copied());
            }
        }

        let rejected: BTreeSet<BeanHandle> = self
            .instances
            .keys()
            .filter(|handle| !marked.contains(handle))
            .copied()
            .collect();

        for handle in &rejected {
            if let Some(instance) = self.instances.remove(handle) {
                // Survivors never reference rejected nodes, but rejected
                // nodes may reference survivors; drop those back-references.
                for (target, count) in instance.references_out {
                    if let Some(survivor) = self.instances.get_mut(&target) {
                        match survivor.referenced_by.get_mut(handle) {
                            Some(existing) if *existing > count => *existing -= count,
                            _ => {
                                survivor.referenced_by.remove(handle);
                            }
                        }
                    }
                }
            }
        }

        obs::record(MetricsEvent::GcSweep {
            rejected: rejected.len() as u64,
        });

        if !rejected.is_empty() {
            if let Some(handler) = &self.on_reject {
                handler(&rejected);
            }
        }

        rejected
    }

    /// Forget everything (session reset).
    pub fn clear(&mut self) {
        self.instances.clear();
    }
}
