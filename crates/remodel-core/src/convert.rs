use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    value::{WireTag, WireValue},
};
use std::{any::TypeId, collections::HashMap};
use thiserror::Error as ThisError;

///
/// ConvertError
///

#[derive(Debug, ThisError)]
pub enum ConvertError {
    #[error("expected {expected} value, found {found}")]
    TypeMismatch { expected: WireTag, found: WireTag },

    #[error("no converter registered for type '{type_name}'")]
    MissingConverter { type_name: &'static str },

    #[error("converter for type '{type_name}' already registered")]
    DuplicateConverter { type_name: &'static str },
}

impl ConvertError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::TypeMismatch { .. } | Self::MissingConverter { .. } => ErrorClass::Protocol,
            Self::DuplicateConverter { .. } => ErrorClass::DuplicateRegistration,
        }
    }
}

impl From<ConvertError> for InternalError {
    fn from(err: ConvertError) -> Self {
        Self::new(err.class(), ErrorOrigin::Converter, err.to_string())
    }
}

///
/// RemotingValue
///
/// Conversion between a typed scalar and its wire-safe representation.
/// One implementation per scalar type; the converter registry enforces the
/// one-converter-per-type rule at startup.
///

pub trait RemotingValue: Sized + 'static {
    const TAG: WireTag;

    fn to_wire(&self) -> WireValue;
    fn from_wire(value: &WireValue) -> Result<Self, ConvertError>;
}

impl RemotingValue for bool {
    const TAG: WireTag = WireTag::Bool;

    fn to_wire(&self) -> WireValue {
        WireValue::Bool(*self)
    }

    fn from_wire(value: &WireValue) -> Result<Self, ConvertError> {
        match value {
            WireValue::Bool(v) => Ok(*v),
            other => Err(ConvertError::TypeMismatch {
                expected: Self::TAG,
                found: other.tag(),
            }),
        }
    }
}

impl RemotingValue for i64 {
    const TAG: WireTag = WireTag::Int;

    fn to_wire(&self) -> WireValue {
        WireValue::Int(*self)
    }

    fn from_wire(value: &WireValue) -> Result<Self, ConvertError> {
        match value {
            WireValue::Int(v) => Ok(*v),
            other => Err(ConvertError::TypeMismatch {
                expected: Self::TAG,
                found: other.tag(),
            }),
        }
    }
}

impl RemotingValue for f64 {
    const TAG: WireTag = WireTag::Double;

    fn to_wire(&self) -> WireValue {
        WireValue::Double(*self)
    }

    fn from_wire(value: &WireValue) -> Result<Self, ConvertError> {
        match value {
            WireValue::Double(v) => Ok(*v),
            other => Err(ConvertError::TypeMismatch {
                expected: Self::TAG,
                found: other.tag(),
            }),
        }
    }
}

impl RemotingValue for String {
    const TAG: WireTag = WireTag::Text;

    fn to_wire(&self) -> WireValue {
        WireValue::Text(self.clone())
    }

    fn from_wire(value: &WireValue) -> Result<Self, ConvertError> {
        match value {
            WireValue::Text(v) => Ok(v.clone()),
            other => Err(ConvertError::TypeMismatch {
                expected: Self::TAG,
                found: other.tag(),
            }),
        }
    }
}

///
/// ConverterRegistry
///
/// Startup-time registry of scalar converters, looked up by exact type.
/// Exactly one converter may claim a given type; duplicates are rejected
/// eagerly at registration, not at first use.
///

pub struct ConverterRegistry {
    by_type: HashMap<TypeId, ConverterEntry>,
}

#[derive(Clone, Copy, Debug)]
struct ConverterEntry {
    type_name: &'static str,
    tag: WireTag,
}

impl ConverterRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in scalar converters.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        // Built-ins cannot collide; unwrap via expect is a startup invariant.
        for register in [
            Self::register::<bool>,
            Self::register::<i64>,
            Self::register::<f64>,
            Self::register::<String>,
        ] {
            register(&mut registry).expect("built-in converter registration cannot collide");
        }

        registry
    }

    pub fn register<T: RemotingValue>(&mut self) -> Result<(), ConvertError> {
        let type_name = std::any::type_name::<T>();
        if self.by_type.contains_key(&TypeId::of::<T>()) {
            return Err(ConvertError::DuplicateConverter { type_name });
        }

        self.by_type.insert(
            TypeId::of::<T>(),
            ConverterEntry {
                type_name,
                tag: T::TAG,
            },
        );

        Ok(())
    }

    /// Resolve the wire tag claimed for a scalar type.
    pub fn tag_for(&self, type_id: TypeId, type_name: &'static str) -> Result<WireTag, ConvertError> {
        self.by_type
            .get(&type_id)
            .map(|entry| entry.tag)
            .ok_or(ConvertError::MissingConverter { type_name })
    }

    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
