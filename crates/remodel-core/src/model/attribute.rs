use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    types::{AttributeId, ModelId},
    value::WireValue,
};
use thiserror::Error as ThisError;

///
/// AttributeError
///

#[derive(Debug, ThisError)]
pub enum AttributeError {
    #[error("attribute '{attribute_id}' already belongs to model '{model_id}'")]
    AlreadyAttached {
        attribute_id: AttributeId,
        model_id: ModelId,
    },
}

impl From<AttributeError> for InternalError {
    fn from(err: AttributeError) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::ModelStore,
            err.to_string(),
        )
    }
}

///
/// Attribute
///
/// A single named, optionally-qualified scalar slot. The back-reference to
/// the owning presentation model is set exactly once at attach time.
///

#[derive(Clone, Debug)]
pub struct Attribute {
    id: AttributeId,
    property_name: String,
    value: WireValue,
    qualifier: Option<String>,
    model_id: Option<ModelId>,
}

impl Attribute {
    #[must_use]
    pub fn new(id: AttributeId, property_name: impl Into<String>, value: WireValue) -> Self {
        Self {
            id,
            property_name: property_name.into(),
            value,
            qualifier: None,
            model_id: None,
        }
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    #[must_use]
    pub const fn id(&self) -> &AttributeId {
        &self.id
    }

    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    #[must_use]
    pub const fn value(&self) -> &WireValue {
        &self.value
    }

    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Owning presentation model, once attached.
    #[must_use]
    pub const fn model_id(&self) -> Option<&ModelId> {
        self.model_id.as_ref()
    }

    /// Bind this attribute to its presentation model. Immutable once set.
    pub(crate) fn attach(&mut self, model_id: ModelId) -> Result<(), AttributeError> {
        if let Some(existing) = &self.model_id {
            return Err(AttributeError::AlreadyAttached {
                attribute_id: self.id.clone(),
                model_id: existing.clone(),
            });
        }
        self.model_id = Some(model_id);

        Ok(())
    }

    /// Overwrite the value, reporting the old value only when it actually
    /// changed. No-op sets (new equals old) return `None` and must not fire
    /// any change notification.
    pub(crate) fn set_value(&mut self, value: WireValue) -> Option<WireValue> {
        if self.value == value {
            return None;
        }

        Some(std::mem::replace(&mut self.value, value))
    }

    pub(crate) fn set_qualifier(&mut self, qualifier: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.qualifier, qualifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(name: &str) -> Attribute {
        Attribute::new(AttributeId::new(format!("a-{name}")), name, WireValue::Null)
    }

    #[test]
    fn attach_is_set_once() {
        let mut attr = attribute("name");
        attr.attach(ModelId::new("m-1")).expect("first attach");

        let err = attr.attach(ModelId::new("m-2")).unwrap_err();
        assert!(matches!(err, AttributeError::AlreadyAttached { .. }));
        assert_eq!(attr.model_id(), Some(&ModelId::new("m-1")));
    }

    #[test]
    fn noop_set_value_reports_no_change() {
        let mut attr = attribute("name");
        assert!(attr.set_value(WireValue::Null).is_none());

        let old = attr.set_value(WireValue::Int(1));
        assert_eq!(old, Some(WireValue::Null));

        assert!(
            attr.set_value(WireValue::Int(1)).is_none(),
            "setting the current value must not report a change"
        );
    }

    #[test]
    fn null_to_value_and_back_both_count_as_changes() {
        let mut attr = attribute("name");
        assert!(attr.set_value(WireValue::Text("x".into())).is_some());
        assert!(attr.set_value(WireValue::Null).is_some());
    }
}
