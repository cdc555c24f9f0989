use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    attribute_type::{AttributeTypeId, AttributeTypeRegistry},
    error::SchemaError,
};

pub const EXTENSIBLE_OBJECT_OID: &str = "1.3.6.1.4.1.1466.101.120.111";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("oc#{_0}")]
pub struct ObjectClassId(pub(crate) usize);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display,
)]
pub enum ObjectClassKind {
    Abstract,
    #[default]
    Structural,
    Auxiliary,
}

#[derive(Clone, Debug, Default, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct ObjectClassDefinition {
    #[builder(setter(into))]
    pub oid: String,
    #[builder(setter(each(name = "name", into)))]
    pub names: Vec<String>,
    #[builder(setter(each(name = "superior", into)))]
    pub sup: Vec<String>,
    pub kind: ObjectClassKind,
    #[builder(setter(each(name = "required", into)))]
    pub must: Vec<String>,
    #[builder(setter(each(name = "allowed", into)))]
    pub may: Vec<String>,
    pub obsolete: bool,
}

#[derive(Clone, Debug)]
pub struct ObjectClass {
    id: ObjectClassId,
    oid: String,
    names: Vec<String>,
    superiors: Vec<ObjectClassId>,
    kind: ObjectClassKind,
    /// Own and inherited.
    required: Vec<AttributeTypeId>,
    /// Own and inherited, excluding the required ones.
    allowed: Vec<AttributeTypeId>,
    obsolete: bool,
}

impl ObjectClass {
    pub fn id(&self) -> ObjectClassId {
        self.id
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.oid == name || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn superiors(&self) -> &[ObjectClassId] {
        &self.superiors
    }

    pub fn kind(&self) -> ObjectClassKind {
        self.kind
    }

    pub fn required(&self) -> &[AttributeTypeId] {
        &self.required
    }

    pub fn allowed(&self) -> &[AttributeTypeId] {
        &self.allowed
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    pub fn is_extensible(&self) -> bool {
        self.oid == EXTENSIBLE_OBJECT_OID
    }
}

#[derive(Debug, Default)]
pub struct ObjectClassRegistry {
    classes: Vec<ObjectClass>,
    index: HashMap<String, ObjectClassId>,
}

impl ObjectClassRegistry {
    pub(crate) fn register(
        &mut self,
        definition: ObjectClassDefinition,
        attribute_types: &AttributeTypeRegistry,
    ) -> Result<ObjectClassId, SchemaError> {
        let oid_key = definition.oid.to_ascii_lowercase();
        if self.index.contains_key(&oid_key) {
            return Err(SchemaError::DuplicateOid(definition.oid));
        }
        let mut keys = Vec::with_capacity(definition.names.len());
        for name in &definition.names {
            let key = name.to_ascii_lowercase();
            if self.index.contains_key(&key) || keys.contains(&key) {
                return Err(SchemaError::DuplicateName(name.clone()));
            }
            keys.push(key);
        }

        let mut superiors = Vec::with_capacity(definition.sup.len());
        let mut required = Vec::new();
        let mut allowed = Vec::new();
        for sup_name in &definition.sup {
            let sup = self
                .find(sup_name)
                .ok_or_else(|| SchemaError::SuperiorNotFound(sup_name.clone()))?;
            superiors.push(sup.id);
            required.extend_from_slice(&sup.required);
            allowed.extend_from_slice(&sup.allowed);
        }
        let lookup = |name: &String| {
            attribute_types
                .find(name)
                .map(|t| t.id())
                .ok_or_else(|| SchemaError::UndefinedType(name.clone()))
        };
        for name in &definition.must {
            required.push(lookup(name)?);
        }
        for name in &definition.may {
            allowed.push(lookup(name)?);
        }
        required.sort();
        required.dedup();
        allowed.sort();
        allowed.dedup();
        allowed.retain(|a| required.binary_search(a).is_err());

        let id = ObjectClassId(self.classes.len());
        debug!(object_class = ?definition.names.first(), %id, "Registered object class");
        self.classes.push(ObjectClass {
            id,
            oid: definition.oid,
            names: definition.names,
            superiors,
            kind: definition.kind,
            required,
            allowed,
            obsolete: definition.obsolete,
        });
        self.index.insert(oid_key, id);
        for key in keys {
            self.index.insert(key, id);
        }
        Ok(id)
    }

    pub fn find(&self, name_or_oid: &str) -> Option<&ObjectClass> {
        self.index
            .get(&name_or_oid.to_ascii_lowercase())
            .map(|id| &self.classes[id.0])
    }

    pub fn get(&self, id: ObjectClassId) -> &ObjectClass {
        &self.classes[id.0]
    }

    /// Whether `sub` is `sup` or inherits from it.
    pub fn is_subclass(&self, sub: ObjectClassId, sup: ObjectClassId) -> bool {
        if sub == sup {
            return true;
        }
        self.classes[sub.0]
            .superiors
            .iter()
            .any(|s| self.is_subclass(*s, sup))
    }

    /// The class and every class it inherits from.
    pub fn ancestors(&self, id: ObjectClassId) -> Vec<ObjectClassId> {
        let mut result = vec![id];
        let mut next = 0;
        while next < result.len() {
            for sup in &self.classes[result[next].0].superiors {
                if !result.contains(sup) {
                    result.push(*sup);
                }
            }
            next += 1;
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectClass> {
        self.classes.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::Schema;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inheritance() {
        let schema = Schema::with_core_schema().unwrap();
        let top = schema.find_object_class("top").unwrap().id();
        let person = schema.find_object_class("person").unwrap();
        let inet = schema.find_object_class("inetOrgPerson").unwrap();
        let classes = schema.object_classes();
        assert!(classes.is_subclass(inet.id(), person.id()));
        assert!(classes.is_subclass(inet.id(), top));
        assert!(!classes.is_subclass(person.id(), inet.id()));
        let cn = schema.find_attribute_type("cn").unwrap().id();
        let mail = schema.find_attribute_type("mail").unwrap().id();
        assert!(inet.required().contains(&cn));
        assert!(inet.allowed().contains(&mail));
        assert!(!person.allowed().contains(&mail));
        let names: Vec<_> = classes
            .ancestors(inet.id())
            .into_iter()
            .map(|id| classes.get(id).name().to_owned())
            .collect();
        assert_eq!(
            names,
            vec!["inetOrgPerson", "organizationalPerson", "person", "top"]
        );
    }

    #[test]
    fn test_undefined_attribute() {
        let mut schema = Schema::with_core_schema().unwrap();
        let result = schema.register_object_class(
            crate::ObjectClassDefinitionBuilder::default()
                .oid("1.2.3.4")
                .name("broken")
                .superior("top")
                .required("noSuchAttribute")
                .build()
                .unwrap(),
        );
        assert_eq!(
            result,
            Err(crate::SchemaError::UndefinedType("noSuchAttribute".to_owned()))
        );
        assert!(schema.find_object_class("broken").is_none());
    }
}
