pub mod codec;
pub mod queue;

pub(crate) mod apply;

pub use queue::CommandQueue;

use crate::{
    schema::FieldInfo,
    types::{AttributeId, ClassId, ModelId},
    value::WireValue,
};
use serde::{Deserialize, Serialize};

///
/// WireAttribute
///
/// Attribute as transmitted inside a create-bean command. Both sides share
/// attribute ids, so later value-changed commands resolve directly.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WireAttribute {
    pub attribute_id: AttributeId,
    pub property_name: String,
    pub value: WireValue,
    pub qualifier: Option<String>,
}

///
/// Command
///
/// The wire alphabet. The enum is closed: decoding an unknown command id is
/// a protocol error at the codec boundary, and dispatch is an exhaustive
/// match with exactly one handler per variant.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "id", rename_all = "snake_case")]
pub enum Command {
    CreateBeanType {
        class_id: ClassId,
        class_name: String,
        fields: Vec<FieldInfo>,
    },
    CreateBean {
        class_id: ClassId,
        bean_id: ModelId,
        attributes: Vec<WireAttribute>,
    },
    DeleteBean {
        bean_id: ModelId,
    },
    ValueChanged {
        attribute_id: AttributeId,
        old_value: WireValue,
        new_value: WireValue,
    },
    ListAdd {
        attribute_id: AttributeId,
        index: usize,
        elements: Vec<WireValue>,
    },
    ListRemove {
        attribute_id: AttributeId,
        from: usize,
        to: usize,
    },
    ListReplace {
        attribute_id: AttributeId,
        index: usize,
        element: WireValue,
    },
    CreateContext {
        context_id: String,
    },
    DestroyContext {
        context_id: String,
    },
    CreateController {
        controller_id: String,
        model_id: ModelId,
        controller_name: String,
        parent_controller_id: Option<String>,
    },
    DestroyController {
        controller_id: String,
    },
    CallAction {
        controller_id: String,
        action_name: String,
        params: Vec<(String, WireValue)>,
    },
}

impl Command {
    /// Stable command id used on the wire and in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateBeanType { .. } => "create_bean_type",
            Self::CreateBean { .. } => "create_bean",
            Self::DeleteBean { .. } => "delete_bean",
            Self::ValueChanged { .. } => "value_changed",
            Self::ListAdd { .. } => "list_add",
            Self::ListRemove { .. } => "list_remove",
            Self::ListReplace { .. } => "list_replace",
            Self::CreateContext { .. } => "create_context",
            Self::DestroyContext { .. } => "destroy_context",
            Self::CreateController { .. } => "create_controller",
            Self::DestroyController { .. } => "destroy_controller",
            Self::CallAction { .. } => "call_action",
        }
    }
}
