use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    description::AttributeDescription,
    error::SchemaError,
    matching::{MatchingRule, Syntax},
};

/// Stable index of an attribute type inside its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("at#{_0}")]
pub struct AttributeTypeId(pub(crate) usize);

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::EnumString,
    strum::Display,
)]
#[strum(ascii_case_insensitive)]
pub enum Usage {
    #[default]
    #[strum(serialize = "userApplications")]
    UserApplications,
    #[strum(serialize = "directoryOperation")]
    DirectoryOperation,
    #[strum(serialize = "distributedOperation")]
    DistributedOperation,
    #[strum(serialize = "dSAOperation")]
    DsaOperation,
}

impl Usage {
    pub fn is_operational(self) -> bool {
        self != Usage::UserApplications
    }
}

#[derive(Clone, Debug, Default, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct AttributeTypeDefinition {
    #[builder(setter(into))]
    pub oid: String,
    #[builder(setter(each(name = "name", into)))]
    pub names: Vec<String>,
    #[builder(setter(into, strip_option))]
    pub sup: Option<String>,
    #[builder(setter(into, strip_option))]
    pub syntax: Option<String>,
    #[builder(setter(into, strip_option))]
    pub equality: Option<String>,
    #[builder(setter(into, strip_option))]
    pub ordering: Option<String>,
    #[builder(setter(into, strip_option))]
    pub substrings: Option<String>,
    pub usage: Usage,
    pub obsolete: bool,
    pub single_value: bool,
    pub no_user_modification: bool,
}

#[derive(derive_more::Debug)]
pub struct AttributeType {
    id: AttributeTypeId,
    oid: String,
    names: Vec<String>,
    sup: Option<AttributeTypeId>,
    subtypes: Vec<AttributeTypeId>,
    syntax: Arc<Syntax>,
    equality: Option<Arc<MatchingRule>>,
    ordering: Option<Arc<MatchingRule>>,
    substrings: Option<Arc<MatchingRule>>,
    usage: Usage,
    obsolete: bool,
    single_value: bool,
    no_user_modification: bool,
    /// Interned descriptions of this type. The bare description, once
    /// created, is always the first element.
    #[debug(skip)]
    pub(crate) descriptions: RwLock<Vec<Arc<AttributeDescription>>>,
}

impl AttributeType {
    pub fn id(&self) -> AttributeTypeId {
        self.id
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// The canonical name: the first declared name, or the OID.
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.oid == name || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn sup(&self) -> Option<AttributeTypeId> {
        self.sup
    }

    /// Immediate subtypes only.
    pub fn subtypes(&self) -> &[AttributeTypeId] {
        &self.subtypes
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    pub fn equality(&self) -> Option<&MatchingRule> {
        self.equality.as_deref()
    }

    pub fn ordering(&self) -> Option<&MatchingRule> {
        self.ordering.as_deref()
    }

    pub fn substrings(&self) -> Option<&MatchingRule> {
        self.substrings.as_deref()
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn is_operational(&self) -> bool {
        self.usage.is_operational()
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    pub fn is_single_value(&self) -> bool {
        self.single_value
    }

    pub fn is_no_user_modification(&self) -> bool {
        self.no_user_modification
    }

    /// Snapshot of the descriptions interned so far.
    pub fn descriptions(&self) -> Vec<Arc<AttributeDescription>> {
        self.descriptions.read().clone()
    }
}

/// Arena of attribute types, indexed by lowercase name and OID.
#[derive(Debug, Default)]
pub struct AttributeTypeRegistry {
    types: Vec<AttributeType>,
    index: HashMap<String, AttributeTypeId>,
}

fn resolve_rule(
    rules: &HashMap<String, Arc<MatchingRule>>,
    name: Option<&String>,
    inherited: Option<&Arc<MatchingRule>>,
    syntax: &Syntax,
) -> Result<Option<Arc<MatchingRule>>, SchemaError> {
    let Some(name) = name else {
        return Ok(inherited.cloned());
    };
    let rule = rules
        .get(&name.to_ascii_lowercase())
        .ok_or_else(|| SchemaError::MatchingRuleNotFound(name.clone()))?;
    if !rule.applies_to(syntax) {
        return Err(SchemaError::InappropriateMatchingRule {
            rule: rule.name.clone(),
            syntax: syntax.oid.clone(),
        });
    }
    Ok(Some(rule.clone()))
}

impl AttributeTypeRegistry {
    pub(crate) fn register(
        &mut self,
        definition: AttributeTypeDefinition,
        syntaxes: &HashMap<String, Arc<Syntax>>,
        rules: &HashMap<String, Arc<MatchingRule>>,
    ) -> Result<AttributeTypeId, SchemaError> {
        let oid_key = definition.oid.to_ascii_lowercase();
        if self.index.contains_key(&oid_key) {
            return Err(SchemaError::DuplicateOid(definition.oid));
        }
        let mut seen = Vec::with_capacity(definition.names.len());
        for name in &definition.names {
            let key = name.to_ascii_lowercase();
            if self.index.contains_key(&key) || seen.contains(&key) {
                return Err(SchemaError::DuplicateName(name.clone()));
            }
            seen.push(key);
        }
        let display_name = definition
            .names
            .first()
            .cloned()
            .unwrap_or_else(|| definition.oid.clone());

        let sup = match &definition.sup {
            Some(sup_name) => Some(
                self.find(sup_name)
                    .ok_or_else(|| SchemaError::SuperiorNotFound(sup_name.clone()))?,
            ),
            None => None,
        };
        if let Some(sup) = sup {
            if sup.usage != definition.usage {
                return Err(SchemaError::IncompatibleUsage(format!(
                    "`{}` has usage {} but its superior `{}` has usage {}",
                    display_name,
                    definition.usage,
                    sup.name(),
                    sup.usage
                )));
            }
            if sup.obsolete && !definition.obsolete {
                return Err(SchemaError::IncompatibleUsage(format!(
                    "`{}` must be obsolete since its superior `{}` is",
                    display_name,
                    sup.name()
                )));
            }
        }

        let syntax = match (&definition.syntax, sup) {
            (Some(oid), _) => syntaxes
                .get(oid)
                .cloned()
                .ok_or_else(|| SchemaError::SyntaxNotFound(oid.clone()))?,
            (None, Some(sup)) => sup.syntax.clone(),
            (None, None) => return Err(SchemaError::Incomplete(display_name)),
        };
        let equality = resolve_rule(
            rules,
            definition.equality.as_ref(),
            sup.and_then(|s| s.equality.as_ref()),
            &syntax,
        )?;
        let ordering = resolve_rule(
            rules,
            definition.ordering.as_ref(),
            sup.and_then(|s| s.ordering.as_ref()),
            &syntax,
        )?;
        let substrings = resolve_rule(
            rules,
            definition.substrings.as_ref(),
            sup.and_then(|s| s.substrings.as_ref()),
            &syntax,
        )?;
        let sup = sup.map(|s| s.id);

        let id = AttributeTypeId(self.types.len());
        self.types.push(AttributeType {
            id,
            oid: definition.oid,
            names: definition.names,
            sup,
            subtypes: Vec::new(),
            syntax,
            equality,
            ordering,
            substrings,
            usage: definition.usage,
            obsolete: definition.obsolete,
            single_value: definition.single_value,
            no_user_modification: definition.no_user_modification,
            descriptions: RwLock::new(Vec::new()),
        });
        if let Some(sup) = sup {
            self.types[sup.0].subtypes.push(id);
        }
        self.index.insert(oid_key, id);
        for key in seen {
            self.index.insert(key, id);
        }
        debug!(attribute_type = %display_name, %id, "Registered attribute type");
        Ok(id)
    }

    /// Case-insensitive lookup by any name or by OID.
    pub fn find(&self, name_or_oid: &str) -> Option<&AttributeType> {
        self.index
            .get(&name_or_oid.to_ascii_lowercase())
            .map(|id| &self.types[id.0])
    }

    /// Ids are only minted by this registry, so they always index a type.
    pub fn get(&self, id: AttributeTypeId) -> &AttributeType {
        &self.types[id.0]
    }

    pub fn is_subtype(&self, sub: AttributeTypeId, sup: AttributeTypeId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.types[id.0].sup;
        }
        false
    }

    /// The type itself followed by its superiors, nearest first.
    pub fn superior_chain(&self, id: AttributeTypeId) -> impl Iterator<Item = &AttributeType> {
        std::iter::successors(Some(&self.types[id.0]), |t| t.sup.map(|s| &self.types[s.0]))
    }

    /// The type itself and all of its transitive subtypes, depth first.
    pub fn subtype_closure(&self, id: AttributeTypeId) -> Vec<AttributeTypeId> {
        let mut result = vec![id];
        let mut next = 0;
        while next < result.len() {
            let current = result[next];
            result.extend_from_slice(&self.types[current.0].subtypes);
            next += 1;
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{Comparison, MatchingRuleKind};
    use pretty_assertions::assert_eq;

    const DIRECTORY_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.15";

    fn fixtures() -> (
        HashMap<String, Arc<Syntax>>,
        HashMap<String, Arc<MatchingRule>>,
    ) {
        let mut syntaxes = HashMap::new();
        syntaxes.insert(
            DIRECTORY_STRING.to_owned(),
            Arc::new(Syntax::new(DIRECTORY_STRING, "Directory String")),
        );
        let mut rules = HashMap::new();
        let rule = Arc::new(MatchingRule::new(
            "2.5.13.2",
            "caseIgnoreMatch",
            MatchingRuleKind::Equality,
            DIRECTORY_STRING,
            Comparison::CaseIgnore,
        ));
        rules.insert("2.5.13.2".to_owned(), rule.clone());
        rules.insert("caseignorematch".to_owned(), rule);
        (syntaxes, rules)
    }

    fn name_type() -> AttributeTypeDefinition {
        AttributeTypeDefinitionBuilder::default()
            .oid("2.5.4.41")
            .name("name")
            .syntax(DIRECTORY_STRING)
            .equality("caseIgnoreMatch")
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_inherit() {
        let (syntaxes, rules) = fixtures();
        let mut registry = AttributeTypeRegistry::default();
        let name = registry.register(name_type(), &syntaxes, &rules).unwrap();
        let cn = registry
            .register(
                AttributeTypeDefinitionBuilder::default()
                    .oid("2.5.4.3")
                    .name("cn")
                    .name("commonName")
                    .sup("name")
                    .build()
                    .unwrap(),
                &syntaxes,
                &rules,
            )
            .unwrap();
        let cn_type = registry.find("COMMONNAME").unwrap();
        assert_eq!(cn_type.id(), cn);
        assert_eq!(cn_type.name(), "cn");
        assert_eq!(cn_type.syntax().oid, DIRECTORY_STRING);
        assert_eq!(cn_type.equality().unwrap().name, "caseIgnoreMatch");
        assert_eq!(registry.find("2.5.4.3").unwrap().id(), cn);
        assert!(registry.is_subtype(cn, name));
        assert!(registry.is_subtype(cn, cn));
        assert!(!registry.is_subtype(name, cn));
        assert_eq!(registry.get(name).subtypes(), &[cn]);
        assert_eq!(registry.subtype_closure(name), vec![name, cn]);
        let chain: Vec<_> = registry.superior_chain(cn).map(|t| t.name()).collect();
        assert_eq!(chain, vec!["cn", "name"]);
    }

    #[test]
    fn test_register_errors() {
        let (syntaxes, rules) = fixtures();
        let mut registry = AttributeTypeRegistry::default();
        registry.register(name_type(), &syntaxes, &rules).unwrap();
        assert_eq!(
            registry.register(name_type(), &syntaxes, &rules),
            Err(SchemaError::DuplicateOid("2.5.4.41".to_owned()))
        );
        let orphan = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.3")
            .name("orphan")
            .sup("missing")
            .build()
            .unwrap();
        assert_eq!(
            registry.register(orphan, &syntaxes, &rules),
            Err(SchemaError::SuperiorNotFound("missing".to_owned()))
        );
        let operational = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.4")
            .name("opName")
            .sup("name")
            .usage(Usage::DirectoryOperation)
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(operational, &syntaxes, &rules),
            Err(SchemaError::IncompatibleUsage(_))
        ));
        let incomplete = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.5")
            .name("nothing")
            .build()
            .unwrap();
        assert_eq!(
            registry.register(incomplete, &syntaxes, &rules),
            Err(SchemaError::Incomplete("nothing".to_owned()))
        );
        let bad_rule = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.6")
            .name("badRule")
            .syntax(DIRECTORY_STRING)
            .equality("noSuchMatch")
            .build()
            .unwrap();
        assert_eq!(
            registry.register(bad_rule, &syntaxes, &rules),
            Err(SchemaError::MatchingRuleNotFound("noSuchMatch".to_owned()))
        );
        let duplicate_name = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.7")
            .name("NAME")
            .syntax(DIRECTORY_STRING)
            .build()
            .unwrap();
        assert_eq!(
            registry.register(duplicate_name, &syntaxes, &rules),
            Err(SchemaError::DuplicateName("NAME".to_owned()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_obsolete_superior() {
        let (syntaxes, rules) = fixtures();
        let mut registry = AttributeTypeRegistry::default();
        let mut old = name_type();
        old.obsolete = true;
        registry.register(old, &syntaxes, &rules).unwrap();
        let child = AttributeTypeDefinitionBuilder::default()
            .oid("1.2.8")
            .name("child")
            .sup("name")
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(child.clone(), &syntaxes, &rules),
            Err(SchemaError::IncompatibleUsage(_))
        ));
        let obsolete_child = AttributeTypeDefinition {
            obsolete: true,
            ..child
        };
        registry
            .register(obsolete_child, &syntaxes, &rules)
            .unwrap();
    }
}
