use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Not a stable API; intended for internal use and may change without notice.
///

#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// Construct a protocol error for a specific origin.
    ///
    /// Protocol errors indicate a schema or command mismatch between peers
    /// and are never retried.
    pub(crate) fn protocol(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Protocol, origin, message)
    }

    /// Construct a duplicate-registration error (programmer/configuration
    /// error, fatal at registration time).
    pub(crate) fn duplicate(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::DuplicateRegistration, origin, message)
    }

    /// Construct a circular-dependency error. Raised synchronously at the
    /// mutating call that would introduce the offending edge.
    pub(crate) fn circular(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::CircularDependency, ErrorOrigin::Gc, message)
    }

    /// Construct a not-managed error: an operation implying remoting identity
    /// was attempted on a bean absent from the bean repository.
    pub(crate) fn not_managed(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotManaged, origin, message)
    }

    /// Construct a transport-class error (session no longer trustworthy).
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transport, ErrorOrigin::Session, message)
    }

    /// Construct an internal error for a specific origin.
    pub(crate) fn internal(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, origin, message)
    }

    /// Construct an invariant violation for a specific origin.
    pub(crate) fn invariant(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, origin, message)
    }

    #[must_use]
    pub const fn is_circular_dependency(&self) -> bool {
        matches!(self.class, ErrorClass::CircularDependency)
    }

    #[must_use]
    pub const fn is_not_managed(&self) -> bool {
        matches!(self.class, ErrorClass::NotManaged)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorClass
///
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Schema/command mismatch between peers (unknown command, unknown class
    /// id, missing converter, wire-schema divergence).
    Protocol,
    /// Duplicate presentation-model id, duplicate GC registration, duplicate
    /// converter or class registration.
    DuplicateRegistration,
    /// A property/list mutation would close a cycle in the managed bean graph.
    CircularDependency,
    /// Connector-boundary failure; recovery is disconnect + session reset.
    Transport,
    /// Identity-bearing operation on a bean absent from the repository.
    NotManaged,
    Internal,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Protocol => "protocol",
            Self::DuplicateRegistration => "duplicate_registration",
            Self::CircularDependency => "circular_dependency",
            Self::Transport => "transport",
            Self::NotManaged => "not_managed",
            Self::Internal => "internal",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    ModelStore,
    Schema,
    Beans,
    Command,
    Converter,
    Controller,
    Gc,
    Session,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ModelStore => "model_store",
            Self::Schema => "schema",
            Self::Beans => "beans",
            Self::Command => "command",
            Self::Converter => "converter",
            Self::Controller => "controller",
            Self::Gc => "gc",
            Self::Session => "session",
        };
        write!(f, "{label}")
    }
}
