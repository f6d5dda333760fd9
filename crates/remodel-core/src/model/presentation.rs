use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::attribute::Attribute,
    types::{AttributeId, IdGenerator, ModelId},
    value::WireValue,
};
use thiserror::Error as ThisError;

///
/// PresentationModelError
///

#[derive(Debug, ThisError)]
pub enum PresentationModelError {
    #[error("duplicate property name '{property_name}' in model '{model_id}'")]
    DuplicatePropertyName {
        model_id: ModelId,
        property_name: String,
    },

    #[error("duplicate qualifier '{qualifier}' in model '{model_id}'")]
    DuplicateQualifier { model_id: ModelId, qualifier: String },
}

impl From<PresentationModelError> for InternalError {
    fn from(err: PresentationModelError) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::ModelStore,
            err.to_string(),
        )
    }
}

///
/// PresentationModel
///
/// A named, typed bag of attributes: the wire-level unit of synchronization.
/// No two attributes share a property name; no two attributes share a
/// non-null qualifier.
///

#[derive(Clone, Debug)]
pub struct PresentationModel {
    id: ModelId,
    model_type: String,
    attributes: Vec<Attribute>,
}

impl PresentationModel {
    #[must_use]
    pub const fn id(&self) -> &ModelId {
        &self.id
    }

    #[must_use]
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    #[must_use]
    pub fn attribute(&self, property_name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|attr| attr.property_name() == property_name)
    }

    #[must_use]
    pub fn attribute_by_id(&self, id: &AttributeId) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.id() == id)
    }

    pub(crate) fn attribute_mut(&mut self, id: &AttributeId) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|attr| attr.id() == id)
    }
}

///
/// PresentationModelBuilder
///
/// Enforces the per-model uniqueness invariants at construction and attaches
/// every attribute's model back-reference exactly once.
///

pub struct PresentationModelBuilder {
    id: Option<ModelId>,
    model_type: String,
    attributes: Vec<Attribute>,
}

impl PresentationModelBuilder {
    #[must_use]
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            id: None,
            model_type: model_type.into(),
            attributes: Vec::new(),
        }
    }

    /// Caller-supplied id; a generated one is used otherwise.
    #[must_use]
    pub fn with_id(mut self, id: ModelId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn attribute(mut self, id: AttributeId, name: impl Into<String>, value: WireValue) -> Self {
        self.attributes.push(Attribute::new(id, name, value));
        self
    }

    #[must_use]
    pub fn qualified_attribute(
        mut self,
        id: AttributeId,
        name: impl Into<String>,
        value: WireValue,
        qualifier: impl Into<String>,
    ) -> Self {
        self.attributes
            .push(Attribute::new(id, name, value).with_qualifier(qualifier));
        self
    }

    #[must_use]
    pub fn raw_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn build(self, ids: &mut IdGenerator) -> Result<PresentationModel, InternalError> {
        let id = self.id.unwrap_or_else(|| ids.next_model_id());

        for (pos, attr) in self.attributes.iter().enumerate() {
            let dup_name = self.attributes[..pos]
                .iter()
                .any(|prev| prev.property_name() == attr.property_name());
            if dup_name {
                return Err(PresentationModelError::DuplicatePropertyName {
                    model_id: id,
                    property_name: attr.property_name().to_string(),
                }
                .into());
            }

            if let Some(qualifier) = attr.qualifier() {
                let dup_qualifier = self.attributes[..pos]
                    .iter()
                    .any(|prev| prev.qualifier() == Some(qualifier));
                if dup_qualifier {
                    return Err(PresentationModelError::DuplicateQualifier {
                        model_id: id,
                        qualifier: qualifier.to_string(),
                    }
                    .into());
                }
            }
        }

        let mut attributes = self.attributes;
        for attr in &mut attributes {
            attr.attach(id.clone())?;
        }

        Ok(PresentationModel {
            id,
            model_type: self.model_type,
            attributes,
        })
    }
}
