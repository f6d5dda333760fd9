pub mod builder;
pub mod facade;
pub mod repository;

pub use builder::{BeanBinder, RemotingBean};
pub use facade::{BeanList, BeanRef, ObservableList, Property};
pub use repository::{BeanEntry, BeanError, BeanEvent, BeanRepository, BeanSubscription};

use crate::types::BeanHandle;
use std::{cell::RefCell, fmt, rc::Rc};

///
/// Bean
///
/// Typed handle to one managed bean. Cheap to clone; all clones share the
/// same underlying bean. State lives in the facades inside `B`, so shared
/// access is all any caller needs.
///

pub struct Bean<B> {
    handle: BeanHandle,
    inner: Rc<RefCell<B>>,
}

impl<B> Bean<B> {
    pub(crate) const fn from_parts(handle: BeanHandle, inner: Rc<RefCell<B>>) -> Self {
        Self { handle, inner }
    }

    #[must_use]
    pub const fn handle(&self) -> BeanHandle {
        self.handle
    }

    /// Run `f` against the bean's facades.
    pub fn with<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.inner.borrow())
    }
}

impl<B> Clone for Bean<B> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<B> PartialEq for Bean<B> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<B> Eq for Bean<B> {}

impl<B> fmt::Debug for Bean<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bean").field(&self.handle).finish()
    }
}
