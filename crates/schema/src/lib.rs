pub mod attribute_type;
pub mod core_schema;
pub mod description;
pub mod entry_check;
pub mod error;
pub mod matching;
pub mod object_class;
pub mod options;
pub mod schema;
pub mod selection;

pub use attribute_type::{
    AttributeType, AttributeTypeDefinition, AttributeTypeDefinitionBuilder, AttributeTypeId,
    AttributeTypeRegistry, Usage,
};
pub use core_schema::names;
pub use description::{AttributeDescription, DescriptionKey};
pub use error::{DescriptionError, SchemaError, SchemaViolation};
pub use matching::{Comparison, MatchingRule, MatchingRuleKind, Syntax};
pub use object_class::{
    ObjectClass, ObjectClassDefinition, ObjectClassDefinitionBuilder, ObjectClassId,
    ObjectClassKind, ObjectClassRegistry,
};
pub use schema::Schema;
pub use selection::RequestedAttribute;
