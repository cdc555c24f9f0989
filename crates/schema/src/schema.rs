use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    attribute_type::{AttributeType, AttributeTypeDefinition, AttributeTypeId, AttributeTypeRegistry},
    error::SchemaError,
    matching::{MatchingRule, Syntax},
    object_class::{ObjectClass, ObjectClassDefinition, ObjectClassId, ObjectClassRegistry},
    options::OptionTable,
};

/// The in-memory schema graph.
///
/// Registration needs exclusive access and happens while the schema is
/// loaded. Afterwards the schema is shared read-only, with the per-type
/// description caches as the only interior mutability.
#[derive(Debug, Default)]
pub struct Schema {
    syntaxes: HashMap<String, Arc<Syntax>>,
    matching_rules: HashMap<String, Arc<MatchingRule>>,
    attribute_types: AttributeTypeRegistry,
    object_classes: ObjectClassRegistry,
    options: OptionTable,
    next_description_key: AtomicU64,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_syntax(&mut self, syntax: Syntax) -> Result<(), SchemaError> {
        if self.syntaxes.contains_key(&syntax.oid) {
            return Err(SchemaError::DuplicateOid(syntax.oid));
        }
        self.syntaxes.insert(syntax.oid.clone(), Arc::new(syntax));
        Ok(())
    }

    pub fn register_matching_rule(&mut self, rule: MatchingRule) -> Result<(), SchemaError> {
        let oid_key = rule.oid.to_ascii_lowercase();
        let name_key = rule.name.to_ascii_lowercase();
        if self.matching_rules.contains_key(&oid_key) {
            return Err(SchemaError::DuplicateOid(rule.oid));
        }
        if self.matching_rules.contains_key(&name_key) {
            return Err(SchemaError::DuplicateName(rule.name));
        }
        if !self.syntaxes.contains_key(&rule.syntax_oid) {
            return Err(SchemaError::SyntaxNotFound(rule.syntax_oid));
        }
        let rule = Arc::new(rule);
        self.matching_rules.insert(oid_key, rule.clone());
        self.matching_rules.insert(name_key, rule);
        Ok(())
    }

    pub fn register_attribute_type(
        &mut self,
        definition: AttributeTypeDefinition,
    ) -> Result<AttributeTypeId, SchemaError> {
        self.attribute_types
            .register(definition, &self.syntaxes, &self.matching_rules)
    }

    pub fn register_object_class(
        &mut self,
        definition: ObjectClassDefinition,
    ) -> Result<ObjectClassId, SchemaError> {
        self.object_classes
            .register(definition, &self.attribute_types)
    }

    /// Accepts a new tagging option in attribute descriptions; `prefix`
    /// makes it a family such as `lang-`.
    pub fn register_option(&mut self, name: &str, prefix: bool) -> Result<(), SchemaError> {
        self.options.register(name, prefix)
    }

    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    pub fn find_syntax(&self, oid: &str) -> Option<&Syntax> {
        self.syntaxes.get(oid).map(Arc::as_ref)
    }

    pub fn find_matching_rule(&self, name_or_oid: &str) -> Option<&MatchingRule> {
        self.matching_rules
            .get(&name_or_oid.to_ascii_lowercase())
            .map(Arc::as_ref)
    }

    pub fn attribute_types(&self) -> &AttributeTypeRegistry {
        &self.attribute_types
    }

    pub fn find_attribute_type(&self, name_or_oid: &str) -> Option<&AttributeType> {
        self.attribute_types.find(name_or_oid)
    }

    pub fn attribute_type(&self, id: AttributeTypeId) -> &AttributeType {
        self.attribute_types.get(id)
    }

    pub fn is_subtype(&self, sub: AttributeTypeId, sup: AttributeTypeId) -> bool {
        self.attribute_types.is_subtype(sub, sup)
    }

    pub fn object_classes(&self) -> &ObjectClassRegistry {
        &self.object_classes
    }

    pub fn find_object_class(&self, name_or_oid: &str) -> Option<&ObjectClass> {
        self.object_classes.find(name_or_oid)
    }

    pub fn object_class(&self, id: ObjectClassId) -> &ObjectClass {
        self.object_classes.get(id)
    }

    pub(crate) fn next_description_key(&self) -> u64 {
        self.next_description_key.fetch_add(1, Ordering::Relaxed)
    }
}
