use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use tracing::debug;

use crate::{
    attribute_type::{AttributeType, AttributeTypeId},
    error::DescriptionError,
    schema::Schema,
};

/// Upper bound on the number of distinct tagging options in one description.
pub const MAX_TAGGING_OPTIONS: usize = 64;
/// Upper bound on the length of the joined tag string.
pub const MAX_TAGGING_OPTIONS_LEN: usize = 1024;

/// Identity of an interned description, unique within a schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("ad#{_0}")]
pub struct DescriptionKey(u64);

/// An attribute type qualified by options, such as `cn;lang-en` or
/// `userCertificate;binary`. Instances are interned per type: two
/// equivalent description strings always resolve to the same `Arc`.
#[derive(Debug, derive_more::Display)]
#[display("{cname}")]
pub struct AttributeDescription {
    key: DescriptionKey,
    attribute_type: AttributeTypeId,
    operational: bool,
    cname: String,
    /// Lowercase, sorted in descending order, no duplicates.
    tags: Vec<String>,
    tag_string: String,
    binary: bool,
}

impl PartialEq for AttributeDescription {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AttributeDescription {}

impl Hash for AttributeDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

fn is_range(tag: &str) -> bool {
    tag.ends_with('-')
}

/// Every tag of `sup_tags` must be matched by an equal tag of `sub_tags`, or
/// cover one of them as a range prefix.
pub(crate) fn tags_match(sub_tags: &[String], sup_tags: &[String]) -> bool {
    sup_tags.iter().all(|sup| {
        sub_tags
            .iter()
            .any(|sub| sub == sup || (is_range(sup) && sub.starts_with(sup.as_str())))
    })
}

fn is_keychar(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';'
}

impl AttributeDescription {
    pub fn key(&self) -> DescriptionKey {
        self.key
    }

    pub fn attribute_type(&self) -> AttributeTypeId {
        self.attribute_type
    }

    /// Canonical form: type name, then `binary`, then the sorted tags.
    pub fn name(&self) -> &str {
        &self.cname
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn tag_string(&self) -> &str {
        &self.tag_string
    }

    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn has_range_tag(&self) -> bool {
        self.tags.iter().any(|t| is_range(t))
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn has_options(&self) -> bool {
        self.binary || self.has_tags()
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }
}

impl Schema {
    /// Parses and interns an attribute description.
    pub fn resolve(&self, raw: &str) -> Result<Arc<AttributeDescription>, DescriptionError> {
        if raw.is_empty() {
            return Err(DescriptionError::Empty);
        }
        if let Some(character) = raw.chars().find(|c| !is_keychar(*c)) {
            return Err(DescriptionError::InvalidCharacters {
                description: raw.to_owned(),
                character,
            });
        }
        let mut parts = raw.split(';');
        let base = parts.next().unwrap_or_default();
        let attribute_type = self
            .attribute_types()
            .find(base)
            .ok_or_else(|| DescriptionError::UndefinedType(base.to_owned()))?;
        if attribute_type.is_operational() && raw.len() > base.len() {
            return Err(DescriptionError::OperationalNoOptions(raw.to_owned()));
        }

        let mut binary = false;
        let mut tags: Vec<String> = Vec::new();
        let mut tags_len = 0;
        for option in parts {
            if option.is_empty() {
                return Err(DescriptionError::EmptyOption(raw.to_owned()));
            }
            if option.eq_ignore_ascii_case("binary") {
                if binary {
                    return Err(DescriptionError::DuplicateBinaryOption(raw.to_owned()));
                }
                if !attribute_type.syntax().binary_transfer {
                    return Err(DescriptionError::BinaryNotSupported(raw.to_owned()));
                }
                binary = true;
                continue;
            }
            if !self.options().is_recognized(option) {
                return Err(DescriptionError::UnrecognizedOption {
                    description: raw.to_owned(),
                    option: option.to_owned(),
                });
            }
            let tag = option.to_ascii_lowercase();
            let Err(position) = tags.binary_search_by(|existing| tag.cmp(existing)) else {
                continue;
            };
            if tags.len() == MAX_TAGGING_OPTIONS {
                return Err(DescriptionError::TooManyOptions(raw.to_owned()));
            }
            tags_len += tag.len() + usize::from(!tags.is_empty());
            if tags_len > MAX_TAGGING_OPTIONS_LEN {
                return Err(DescriptionError::OptionsTooLong(raw.to_owned()));
            }
            tags.insert(position, tag);
        }
        Ok(self.intern(attribute_type, binary, tags))
    }

    /// The description of a type without any option.
    pub fn bare_description(&self, id: AttributeTypeId) -> Arc<AttributeDescription> {
        self.intern(self.attribute_type(id), false, Vec::new())
    }

    fn intern(
        &self,
        attribute_type: &AttributeType,
        binary: bool,
        tags: Vec<String>,
    ) -> Arc<AttributeDescription> {
        let tag_string = tags.join(";");
        let same = |d: &&Arc<AttributeDescription>| {
            d.binary == binary && d.tag_string.eq_ignore_ascii_case(&tag_string)
        };
        {
            let cache = attribute_type.descriptions.read();
            if let Some(found) = cache.iter().find(same) {
                return found.clone();
            }
        }
        let mut cache = attribute_type.descriptions.write();
        // Another thread may have interned it between the two locks.
        if let Some(found) = cache.iter().find(same) {
            return found.clone();
        }
        let mut cname = attribute_type.name().to_owned();
        if binary {
            cname.push_str(";binary");
        }
        if !tag_string.is_empty() {
            cname.push(';');
            cname.push_str(&tag_string);
        }
        let description = Arc::new(AttributeDescription {
            key: DescriptionKey(self.next_description_key()),
            attribute_type: attribute_type.id(),
            operational: attribute_type.is_operational(),
            cname,
            tags,
            tag_string,
            binary,
        });
        if cache.is_empty() || !description.has_options() {
            cache.insert(0, description.clone());
        } else {
            cache.insert(1, description.clone());
        }
        debug!(description = %description, key = %description.key, "Interned attribute description");
        description
    }

    /// Whether `sub` can stand where `sup` is requested: its type is a
    /// subtype, it carries every flag of `sup`, and its tags cover those of
    /// `sup`.
    pub fn is_subtype_of_with_tags(
        &self,
        sub: &AttributeDescription,
        sup: &AttributeDescription,
    ) -> bool {
        if !self.is_subtype(sub.attribute_type, sup.attribute_type) {
            return false;
        }
        if sup.binary && !sub.binary {
            return false;
        }
        if sup.has_range_tag() && !sub.has_tags() {
            return false;
        }
        if !sup.has_tags() {
            return true;
        }
        if !sub.has_tags() {
            return false;
        }
        tags_match(&sub.tags, &sup.tags)
    }
}
