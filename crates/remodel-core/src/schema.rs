use crate::{
    convert::{ConverterRegistry, RemotingValue},
    error::{ErrorClass, ErrorOrigin, InternalError},
    types::ClassId,
    value::WireTag,
};
use serde::{Deserialize, Serialize};
use std::{any::TypeId, collections::HashMap, rc::Rc};
use thiserror::Error as ThisError;

///
/// SchemaError
///

#[derive(Debug, ThisError)]
pub enum SchemaError {
    #[error("class '{0}' already registered with a different descriptor")]
    ConflictingClass(String),

    #[error("duplicate field '{field}' in class '{class_name}'")]
    DuplicateField { class_name: String, field: String },

    #[error("unknown class id {0}")]
    UnknownClassId(ClassId),

    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("wire schema for class '{class_name}' diverges at field '{field}'")]
    SchemaMismatch { class_name: String, field: String },
}

impl SchemaError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::ConflictingClass(_) | Self::DuplicateField { .. } => {
                ErrorClass::DuplicateRegistration
            }
            Self::UnknownClassId(_) | Self::UnknownClass(_) | Self::SchemaMismatch { .. } => {
                ErrorClass::Protocol
            }
        }
    }
}

impl From<SchemaError> for InternalError {
    fn from(err: SchemaError) -> Self {
        Self::new(err.class(), ErrorOrigin::Schema, err.to_string())
    }
}

///
/// FieldKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Property,
    List,
}

///
/// FieldInfo
///
/// One entry of the canonical wire schema. Also the exact shape transmitted
/// in the type-registration handshake, so both sides agree on ordering and
/// type codes.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
    pub tag: WireTag,
}

///
/// ClassInfo
///
/// Canonical, once-computed wire schema for one bean class. The field
/// ordering and type codes never change for a running pair of peers.
///

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub class_name: String,
    pub class_id: ClassId,
    pub fields: Vec<FieldInfo>,
}

impl ClassInfo {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

///
/// ClassDescriptor
///
/// Explicit schema declaration for one bean class: ordered
/// `{name, kind, value-type}` triples. Replaces runtime reflection.
///

pub struct ClassDescriptor {
    class_name: &'static str,
    fields: Vec<FieldDescriptor>,
}

struct FieldDescriptor {
    name: &'static str,
    kind: FieldKind,
    value: ValueKind,
}

enum ValueKind {
    Scalar {
        type_id: TypeId,
        type_name: &'static str,
    },
    Bean,
}

impl ClassDescriptor {
    #[must_use]
    pub fn new(class_name: &'static str) -> Self {
        Self {
            class_name,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// Scalar-valued property.
    #[must_use]
    pub fn property<T: RemotingValue>(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind: FieldKind::Property,
            value: ValueKind::Scalar {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        });
        self
    }

    /// Scalar-valued observable list.
    #[must_use]
    pub fn list<T: RemotingValue>(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind: FieldKind::List,
            value: ValueKind::Scalar {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        });
        self
    }

    /// Property holding another managed bean.
    #[must_use]
    pub fn reference(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind: FieldKind::Property,
            value: ValueKind::Bean,
        });
        self
    }

    /// Observable list of managed beans.
    #[must_use]
    pub fn reference_list(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind: FieldKind::List,
            value: ValueKind::Bean,
        });
        self
    }

    /// Resolve every field against the converter registry into the canonical
    /// ordered schema. Missing converters and duplicate names fail here,
    /// before anything reaches the wire.
    fn resolve(&self, converters: &ConverterRegistry) -> Result<Vec<FieldInfo>, InternalError> {
        let mut fields: Vec<FieldInfo> = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            if fields.iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField {
                    class_name: self.class_name.to_string(),
                    field: field.name.to_string(),
                }
                .into());
            }

            let tag = match &field.value {
                ValueKind::Scalar { type_id, type_name } => {
                    converters.tag_for(*type_id, type_name)?
                }
                ValueKind::Bean => WireTag::Ref,
            };

            fields.push(FieldInfo {
                name: field.name.to_string(),
                kind: field.kind,
                tag,
            });
        }

        Ok(fields)
    }
}

///
/// ClassRepository
///
/// Memoized class-name -> ClassInfo mapping plus the id tables for both
/// directions of the handshake: ids this side minted (`by_id`) and ids the
/// remote peer announced via type registration (`remote_ids`).
///

#[derive(Default)]
pub struct ClassRepository {
    by_name: HashMap<String, Rc<ClassInfo>>,
    by_id: HashMap<ClassId, Rc<ClassInfo>>,
    remote_ids: HashMap<ClassId, String>,
    next_id: u32,
}

impl ClassRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized registration: the first call for a class resolves its
    /// descriptor and assigns the next class id; later calls return the
    /// cached info. `true` means the class was newly created and its type
    /// registration still has to be transmitted.
    pub fn get_or_register(
        &mut self,
        descriptor: &ClassDescriptor,
        converters: &ConverterRegistry,
    ) -> Result<(Rc<ClassInfo>, bool), InternalError> {
        if let Some(existing) = self.by_name.get(descriptor.class_name()) {
            let fields = descriptor.resolve(converters)?;
            if existing.fields != fields {
                return Err(
                    SchemaError::ConflictingClass(descriptor.class_name().to_string()).into(),
                );
            }
            return Ok((Rc::clone(existing), false));
        }

        let fields = descriptor.resolve(converters)?;
        self.next_id += 1;
        let info = Rc::new(ClassInfo {
            class_name: descriptor.class_name().to_string(),
            class_id: ClassId(self.next_id),
            fields,
        });

        self.by_name
            .insert(info.class_name.clone(), Rc::clone(&info));
        self.by_id.insert(info.class_id, Rc::clone(&info));

        Ok((info, true))
    }

    /// Adopt a remote type registration. The class must already be known
    /// locally by name (beans cannot be materialized without their local
    /// descriptor), and the transmitted schema must match the local one
    /// field for field.
    pub fn adopt_remote(
        &mut self,
        class_id: ClassId,
        class_name: &str,
        fields: &[FieldInfo],
    ) -> Result<Rc<ClassInfo>, InternalError> {
        let local = self
            .by_name
            .get(class_name)
            .ok_or_else(|| SchemaError::UnknownClass(class_name.to_string()))?;

        if local.fields.len() != fields.len() {
            return Err(SchemaError::SchemaMismatch {
                class_name: class_name.to_string(),
                field: "<arity>".to_string(),
            }
            .into());
        }
        for (local_field, wire_field) in local.fields.iter().zip(fields) {
            if local_field != wire_field {
                return Err(SchemaError::SchemaMismatch {
                    class_name: class_name.to_string(),
                    field: wire_field.name.clone(),
                }
                .into());
            }
        }

        let local = Rc::clone(local);
        self.remote_ids.insert(class_id, class_name.to_string());

        Ok(local)
    }

    /// Resolve a class id referenced by an incoming create-bean command.
    /// Accepts remote-announced ids first, then locally-minted ids.
    pub fn require_by_id(&self, class_id: ClassId) -> Result<Rc<ClassInfo>, InternalError> {
        if let Some(name) = self.remote_ids.get(&class_id) {
            if let Some(info) = self.by_name.get(name) {
                return Ok(Rc::clone(info));
            }
        }
        self.by_id
            .get(&class_id)
            .map(Rc::clone)
            .ok_or_else(|| SchemaError::UnknownClassId(class_id).into())
    }

    #[must_use]
    pub fn find_by_name(&self, class_name: &str) -> Option<Rc<ClassInfo>> {
        self.by_name.get(class_name).map(Rc::clone)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        self.remote_ids.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ClassDescriptor {
        ClassDescriptor::new("app.Person")
            .property::<String>("name")
            .property::<i64>("age")
            .reference("friend")
            .list::<f64>("scores")
            .reference_list("children")
    }

    #[test]
    fn registration_is_memoized_with_stable_ordering() {
        let converters = ConverterRegistry::with_defaults();
        let mut classes = ClassRepository::new();

        let (info, created) = classes.get_or_register(&person(), &converters).expect("register");
        assert!(created);
        assert_eq!(info.class_id, ClassId(1));

        let names: Vec<&str> = info.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age", "friend", "scores", "children"]);
        assert_eq!(info.field("friend").unwrap().tag, WireTag::Ref);
        assert_eq!(info.field("scores").unwrap().kind, FieldKind::List);

        let (again, created) = classes.get_or_register(&person(), &converters).expect("again");
        assert!(!created, "second registration must hit the memo");
        assert_eq!(again.class_id, info.class_id);
    }

    #[test]
    fn missing_converter_fails_registration() {
        struct Opaque;
        impl RemotingValue for Opaque {
            const TAG: WireTag = WireTag::Text;
            fn to_wire(&self) -> crate::value::WireValue {
                crate::value::WireValue::Null
            }
            fn from_wire(_: &crate::value::WireValue) -> Result<Self, crate::convert::ConvertError> {
                Ok(Self)
            }
        }

        let converters = ConverterRegistry::with_defaults();
        let mut classes = ClassRepository::new();
        let descriptor = ClassDescriptor::new("app.Opaque").property::<Opaque>("field");

        let err = classes.get_or_register(&descriptor, &converters).unwrap_err();
        assert_eq!(err.class, ErrorClass::Protocol);
        assert!(err.message.contains("no converter registered"));
    }

    #[test]
    fn duplicate_field_name_fails_registration() {
        let converters = ConverterRegistry::with_defaults();
        let mut classes = ClassRepository::new();
        let descriptor = ClassDescriptor::new("app.Bad")
            .property::<i64>("x")
            .list::<i64>("x");

        let err = classes.get_or_register(&descriptor, &converters).unwrap_err();
        assert_eq!(err.class, ErrorClass::DuplicateRegistration);
    }

    #[test]
    fn adopt_remote_validates_the_schema_contract() {
        let converters = ConverterRegistry::with_defaults();
        let mut classes = ClassRepository::new();
        let (info, _) = classes.get_or_register(&person(), &converters).expect("register");

        // Matching schema from the peer, under the peer's own id.
        let adopted = classes
            .adopt_remote(ClassId(9), "app.Person", &info.fields.clone())
            .expect("adopt");
        assert_eq!(adopted.class_name, "app.Person");
        assert_eq!(
            classes.require_by_id(ClassId(9)).unwrap().class_name,
            "app.Person"
        );

        // Diverging schema is a protocol error.
        let mut wrong = info.fields.clone();
        wrong[0].tag = WireTag::Int;
        let err = classes
            .adopt_remote(ClassId(10), "app.Person", &wrong)
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Protocol);
        assert!(err.message.contains("diverges at field 'name'"));
    }

    #[test]
    fn unknown_class_id_is_a_protocol_error() {
        let classes = ClassRepository::new();
        let err = classes.require_by_id(ClassId(404)).unwrap_err();
        assert_eq!(err.class, ErrorClass::Protocol);
        assert!(err.message.contains("unknown class id"));
    }
}
