use crate::types::ModelId;
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// WireValue
///
/// The wire-safe representation of one attribute slot. Scalars plus `Ref`,
/// which carries the presentation-model id of a referenced managed bean.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Ref(ModelId),
}

impl WireValue {
    #[must_use]
    pub const fn tag(&self) -> WireTag {
        match self {
            Self::Null => WireTag::Null,
            Self::Bool(_) => WireTag::Bool,
            Self::Int(_) => WireTag::Int,
            Self::Double(_) => WireTag::Double,
            Self::Text(_) => WireTag::Text,
            Self::Ref(_) => WireTag::Ref,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Referenced model id, when this value is a bean reference.
    #[must_use]
    pub const fn as_ref_id(&self) -> Option<&ModelId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Ref(id) => write!(f, "&{id}"),
        }
    }
}

///
/// WireTag
///
/// Wire type code. Part of the class-info schema contract: once assigned for
/// a running pair of peers these codes must never change.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireTag {
    Null,
    Bool,
    Int,
    Double,
    Text,
    Ref,
}

impl WireTag {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool => 1,
            Self::Int => 2,
            Self::Double => 3,
            Self::Text => 4,
            Self::Ref => 5,
        }
    }
}

impl fmt::Display for WireTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::Text => "text",
            Self::Ref => "ref",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_codes_are_stable() {
        // These codes are the schema contract; changing them breaks peers.
        assert_eq!(WireTag::Null.code(), 0);
        assert_eq!(WireTag::Bool.code(), 1);
        assert_eq!(WireTag::Int.code(), 2);
        assert_eq!(WireTag::Double.code(), 3);
        assert_eq!(WireTag::Text.code(), 4);
        assert_eq!(WireTag::Ref.code(), 5);
    }

    #[test]
    fn value_reports_matching_tag() {
        assert_eq!(WireValue::Null.tag(), WireTag::Null);
        assert_eq!(WireValue::Bool(true).tag(), WireTag::Bool);
        assert_eq!(WireValue::Text("x".into()).tag(), WireTag::Text);
        assert_eq!(WireValue::Ref(ModelId::new("m-1")).tag(), WireTag::Ref);
    }

    #[test]
    fn equality_detects_no_op_sets() {
        assert_eq!(WireValue::Int(4), WireValue::Int(4));
        assert_ne!(WireValue::Int(4), WireValue::Int(5));
        assert_ne!(WireValue::Null, WireValue::Int(4));
    }

    #[test]
    fn wire_value_json_roundtrip() {
        let values = vec![
            WireValue::Null,
            WireValue::Bool(false),
            WireValue::Int(-7),
            WireValue::Double(2.5),
            WireValue::Text("qualified".into()),
            WireValue::Ref(ModelId::new("peer-4")),
        ];
        for value in values {
            let json = serde_json::to_string(&value).expect("serialize");
            let back: WireValue = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, value, "wire value must round-trip via json");
        }
    }
}
