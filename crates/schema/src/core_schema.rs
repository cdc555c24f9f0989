//! Bootstrap of the standard schema elements every directory needs, plus the
//! common person/organization classes.

use crate::{
    attribute_type::{AttributeTypeDefinition, Usage},
    error::SchemaError,
    matching::{Comparison, MatchingRule, MatchingRuleKind, Syntax},
    object_class::{ObjectClassDefinition, ObjectClassKind},
    schema::Schema,
};

pub mod names {
    pub const OBJECT_CLASS: &str = "objectClass";
    pub const STRUCTURAL_OBJECT_CLASS: &str = "structuralObjectClass";
    pub const HAS_SUBORDINATES: &str = "hasSubordinates";
    pub const ENTRY_UUID: &str = "entryUUID";
    pub const REF: &str = "ref";
    pub const EXTENSIBLE_OBJECT: &str = "extensibleObject";
    pub const REFERRAL: &str = "referral";
    pub const TOP: &str = "top";
}

mod syntax {
    pub const BOOLEAN: &str = "1.3.6.1.4.1.1466.115.121.1.7";
    pub const CERTIFICATE: &str = "1.3.6.1.4.1.1466.115.121.1.8";
    pub const DN: &str = "1.3.6.1.4.1.1466.115.121.1.12";
    pub const DIRECTORY_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.15";
    pub const GENERALIZED_TIME: &str = "1.3.6.1.4.1.1466.115.121.1.24";
    pub const IA5_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.26";
    pub const INTEGER: &str = "1.3.6.1.4.1.1466.115.121.1.27";
    pub const OID: &str = "1.3.6.1.4.1.1466.115.121.1.38";
    pub const OCTET_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.40";
    pub const TELEPHONE_NUMBER: &str = "1.3.6.1.4.1.1466.115.121.1.50";
    pub const UUID: &str = "1.3.6.1.1.16.1";
}

const SYNTAXES: &[(&str, &str, bool)] = &[
    (syntax::BOOLEAN, "Boolean", false),
    (syntax::CERTIFICATE, "Certificate", true),
    (syntax::DN, "Distinguished Name", false),
    (syntax::DIRECTORY_STRING, "Directory String", false),
    (syntax::GENERALIZED_TIME, "Generalized Time", false),
    (syntax::IA5_STRING, "IA5 String", false),
    (syntax::INTEGER, "Integer", false),
    (syntax::OID, "OID", false),
    (syntax::OCTET_STRING, "Octet String", false),
    (syntax::TELEPHONE_NUMBER, "Telephone Number", false),
    (syntax::UUID, "UUID", false),
];

use Comparison::{CaseExact, CaseIgnore, Integer, Telephone};
use MatchingRuleKind::{Equality, Ordering, Substrings};

const MATCHING_RULES: &[(&str, &str, MatchingRuleKind, &str, Comparison)] = &[
    ("2.5.13.0", "objectIdentifierMatch", Equality, syntax::OID, CaseIgnore),
    ("2.5.13.1", "distinguishedNameMatch", Equality, syntax::DN, CaseIgnore),
    ("2.5.13.2", "caseIgnoreMatch", Equality, syntax::DIRECTORY_STRING, CaseIgnore),
    ("2.5.13.3", "caseIgnoreOrderingMatch", Ordering, syntax::DIRECTORY_STRING, CaseIgnore),
    ("2.5.13.4", "caseIgnoreSubstringsMatch", Substrings, syntax::DIRECTORY_STRING, CaseIgnore),
    ("2.5.13.5", "caseExactMatch", Equality, syntax::DIRECTORY_STRING, CaseExact),
    ("2.5.13.7", "caseExactSubstringsMatch", Substrings, syntax::DIRECTORY_STRING, CaseExact),
    ("2.5.13.13", "booleanMatch", Equality, syntax::BOOLEAN, CaseIgnore),
    ("2.5.13.14", "integerMatch", Equality, syntax::INTEGER, Integer),
    ("2.5.13.15", "integerOrderingMatch", Ordering, syntax::INTEGER, Integer),
    ("2.5.13.17", "octetStringMatch", Equality, syntax::OCTET_STRING, CaseExact),
    ("2.5.13.20", "telephoneNumberMatch", Equality, syntax::TELEPHONE_NUMBER, Telephone),
    ("2.5.13.21", "telephoneNumberSubstringsMatch", Substrings, syntax::TELEPHONE_NUMBER, Telephone),
    ("2.5.13.27", "generalizedTimeMatch", Equality, syntax::GENERALIZED_TIME, CaseExact),
    ("2.5.13.28", "generalizedTimeOrderingMatch", Ordering, syntax::GENERALIZED_TIME, CaseExact),
    ("2.5.13.34", "certificateExactMatch", Equality, syntax::CERTIFICATE, CaseExact),
    ("1.3.6.1.4.1.1466.109.114.1", "caseExactIA5Match", Equality, syntax::IA5_STRING, CaseExact),
    ("1.3.6.1.4.1.1466.109.114.2", "caseIgnoreIA5Match", Equality, syntax::IA5_STRING, CaseIgnore),
    ("1.3.6.1.4.1.1466.109.114.3", "caseIgnoreIA5SubstringsMatch", Substrings, syntax::IA5_STRING, CaseIgnore),
    ("1.3.6.1.1.16.2", "UUIDMatch", Equality, syntax::UUID, CaseIgnore),
];

/// Rules usable on syntaxes other than their own.
const RULE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("caseIgnoreMatch", &[syntax::IA5_STRING, syntax::TELEPHONE_NUMBER]),
    ("caseIgnoreSubstringsMatch", &[syntax::IA5_STRING, syntax::TELEPHONE_NUMBER]),
    ("caseExactMatch", &[syntax::IA5_STRING]),
];

struct CoreAttribute {
    oid: &'static str,
    names: &'static [&'static str],
    sup: Option<&'static str>,
    syntax: Option<&'static str>,
    equality: Option<&'static str>,
    ordering: Option<&'static str>,
    substrings: Option<&'static str>,
    usage: Usage,
    single_value: bool,
}

const fn user(
    oid: &'static str,
    names: &'static [&'static str],
    syntax: &'static str,
    equality: Option<&'static str>,
    substrings: Option<&'static str>,
) -> CoreAttribute {
    CoreAttribute {
        oid,
        names,
        sup: None,
        syntax: Some(syntax),
        equality,
        ordering: None,
        substrings,
        usage: Usage::UserApplications,
        single_value: false,
    }
}

const fn name_subtype(oid: &'static str, names: &'static [&'static str]) -> CoreAttribute {
    CoreAttribute {
        oid,
        names,
        sup: Some("name"),
        syntax: None,
        equality: None,
        ordering: None,
        substrings: None,
        usage: Usage::UserApplications,
        single_value: false,
    }
}

const fn operational(
    oid: &'static str,
    names: &'static [&'static str],
    syntax: &'static str,
    equality: &'static str,
    usage: Usage,
) -> CoreAttribute {
    CoreAttribute {
        oid,
        names,
        sup: None,
        syntax: Some(syntax),
        equality: Some(equality),
        ordering: None,
        substrings: None,
        usage,
        single_value: true,
    }
}

const ATTRIBUTE_TYPES: &[CoreAttribute] = &[
    user("2.5.4.0", &["objectClass"], syntax::OID, Some("objectIdentifierMatch"), None),
    operational(
        "2.5.21.9",
        &["structuralObjectClass"],
        syntax::OID,
        "objectIdentifierMatch",
        Usage::DirectoryOperation,
    ),
    operational(
        "2.5.18.9",
        &["hasSubordinates"],
        syntax::BOOLEAN,
        "booleanMatch",
        Usage::DirectoryOperation,
    ),
    operational(
        "1.3.6.1.1.16.4",
        &["entryUUID"],
        syntax::UUID,
        "UUIDMatch",
        Usage::DirectoryOperation,
    ),
    CoreAttribute {
        single_value: false,
        ..operational(
            "2.16.840.1.113730.3.1.34",
            &["ref"],
            syntax::IA5_STRING,
            "caseExactIA5Match",
            Usage::DistributedOperation,
        )
    },
    user(
        "2.5.4.41",
        &["name"],
        syntax::DIRECTORY_STRING,
        Some("caseIgnoreMatch"),
        Some("caseIgnoreSubstringsMatch"),
    ),
    name_subtype("2.5.4.3", &["cn", "commonName"]),
    name_subtype("2.5.4.4", &["sn", "surname"]),
    name_subtype("2.5.4.42", &["givenName", "gn"]),
    name_subtype("2.5.4.10", &["o", "organizationName"]),
    name_subtype("2.5.4.11", &["ou", "organizationalUnitName"]),
    name_subtype("2.5.4.12", &["title"]),
    user(
        "2.5.4.13",
        &["description"],
        syntax::DIRECTORY_STRING,
        Some("caseIgnoreMatch"),
        Some("caseIgnoreSubstringsMatch"),
    ),
    user(
        "2.5.4.20",
        &["telephoneNumber"],
        syntax::TELEPHONE_NUMBER,
        Some("telephoneNumberMatch"),
        Some("telephoneNumberSubstringsMatch"),
    ),
    user("2.5.4.34", &["seeAlso"], syntax::DN, Some("distinguishedNameMatch"), None),
    user("2.5.4.35", &["userPassword"], syntax::OCTET_STRING, Some("octetStringMatch"), None),
    user(
        "2.5.4.36",
        &["userCertificate"],
        syntax::CERTIFICATE,
        Some("certificateExactMatch"),
        None,
    ),
    user(
        "0.9.2342.19200300.100.1.1",
        &["uid", "userid"],
        syntax::DIRECTORY_STRING,
        Some("caseIgnoreMatch"),
        Some("caseIgnoreSubstringsMatch"),
    ),
    user(
        "0.9.2342.19200300.100.1.3",
        &["mail", "rfc822Mailbox"],
        syntax::IA5_STRING,
        Some("caseIgnoreIA5Match"),
        Some("caseIgnoreIA5SubstringsMatch"),
    ),
    CoreAttribute {
        single_value: true,
        ..user(
            "0.9.2342.19200300.100.1.25",
            &["dc", "domainComponent"],
            syntax::IA5_STRING,
            Some("caseIgnoreIA5Match"),
            Some("caseIgnoreIA5SubstringsMatch"),
        )
    },
    CoreAttribute {
        ordering: Some("integerOrderingMatch"),
        single_value: true,
        ..user(
            "2.16.840.1.113730.3.1.3",
            &["employeeNumber"],
            syntax::INTEGER,
            Some("integerMatch"),
            None,
        )
    },
];

struct CoreClass {
    oid: &'static str,
    name: &'static str,
    sup: &'static [&'static str],
    kind: ObjectClassKind,
    must: &'static [&'static str],
    may: &'static [&'static str],
}

const OBJECT_CLASSES: &[CoreClass] = &[
    CoreClass {
        oid: "2.5.6.0",
        name: "top",
        sup: &[],
        kind: ObjectClassKind::Abstract,
        must: &["objectClass"],
        may: &[],
    },
    CoreClass {
        oid: crate::object_class::EXTENSIBLE_OBJECT_OID,
        name: "extensibleObject",
        sup: &["top"],
        kind: ObjectClassKind::Auxiliary,
        must: &[],
        may: &[],
    },
    CoreClass {
        oid: "2.16.840.1.113730.3.2.6",
        name: "referral",
        sup: &["top"],
        kind: ObjectClassKind::Structural,
        must: &["ref"],
        may: &[],
    },
    CoreClass {
        oid: "2.5.6.6",
        name: "person",
        sup: &["top"],
        kind: ObjectClassKind::Structural,
        must: &["sn", "cn"],
        may: &["userPassword", "telephoneNumber", "seeAlso", "description"],
    },
    CoreClass {
        oid: "2.5.6.7",
        name: "organizationalPerson",
        sup: &["person"],
        kind: ObjectClassKind::Structural,
        must: &[],
        may: &["title", "ou"],
    },
    CoreClass {
        oid: "2.16.840.1.113730.3.2.2",
        name: "inetOrgPerson",
        sup: &["organizationalPerson"],
        kind: ObjectClassKind::Structural,
        must: &[],
        may: &["mail", "uid", "givenName", "employeeNumber", "userCertificate"],
    },
    CoreClass {
        oid: "2.5.6.4",
        name: "organization",
        sup: &["top"],
        kind: ObjectClassKind::Structural,
        must: &["o"],
        may: &["description", "telephoneNumber", "seeAlso", "userPassword"],
    },
    CoreClass {
        oid: "2.5.6.5",
        name: "organizationalUnit",
        sup: &["top"],
        kind: ObjectClassKind::Structural,
        must: &["ou"],
        may: &["description", "telephoneNumber", "seeAlso"],
    },
    CoreClass {
        oid: "1.3.6.1.4.1.1466.344",
        name: "dcObject",
        sup: &["top"],
        kind: ObjectClassKind::Auxiliary,
        must: &["dc"],
        may: &[],
    },
];

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

impl Schema {
    pub fn with_core_schema() -> Result<Schema, SchemaError> {
        let mut schema = Schema::new();
        for (oid, description, binary) in SYNTAXES {
            let syntax = Syntax::new(oid, description);
            schema.register_syntax(if *binary { syntax.binary() } else { syntax })?;
        }
        for (oid, name, kind, syntax_oid, comparison) in MATCHING_RULES {
            let mut rule = MatchingRule::new(oid, name, *kind, syntax_oid, *comparison);
            if let Some((_, extra)) = RULE_EXTENSIONS.iter().find(|(n, _)| n == name) {
                rule = rule.also_for(extra);
            }
            schema.register_matching_rule(rule)?;
        }
        for attribute in ATTRIBUTE_TYPES {
            schema.register_attribute_type(AttributeTypeDefinition {
                oid: attribute.oid.to_owned(),
                names: owned(attribute.names),
                sup: attribute.sup.map(str::to_owned),
                syntax: attribute.syntax.map(str::to_owned),
                equality: attribute.equality.map(str::to_owned),
                ordering: attribute.ordering.map(str::to_owned),
                substrings: attribute.substrings.map(str::to_owned),
                usage: attribute.usage,
                obsolete: false,
                single_value: attribute.single_value,
                no_user_modification: attribute.usage.is_operational(),
            })?;
        }
        for class in OBJECT_CLASSES {
            schema.register_object_class(ObjectClassDefinition {
                oid: class.oid.to_owned(),
                names: vec![class.name.to_owned()],
                sup: owned(class.sup),
                kind: class.kind,
                must: owned(class.must),
                may: owned(class.may),
                obsolete: false,
            })?;
        }
        Ok(schema)
    }
}
