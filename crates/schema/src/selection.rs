use std::sync::Arc;

use crate::{description::AttributeDescription, object_class::ObjectClassId, schema::Schema};

/// One element of a search request's attribute list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestedAttribute {
    Description {
        description: Arc<AttributeDescription>,
        /// `-name`: subtypes of the named attribute are not returned.
        exact_only: bool,
    },
    /// `@class` / `+class`, or `!class` when `exclude` is set.
    ObjectClass { class: ObjectClassId, exclude: bool },
    /// `*`
    AllUserAttributes,
    /// `+`
    AllOperationalAttributes,
    /// `1.1`
    NoAttributes,
    Unknown(String),
}

impl Schema {
    pub fn parse_requested_attribute(&self, name: &str) -> RequestedAttribute {
        match name {
            "*" => return RequestedAttribute::AllUserAttributes,
            "+" => return RequestedAttribute::AllOperationalAttributes,
            "1.1" => return RequestedAttribute::NoAttributes,
            _ => {}
        }
        let class = |name: &str, exclude| {
            self.find_object_class(name)
                .map(|oc| RequestedAttribute::ObjectClass {
                    class: oc.id(),
                    exclude,
                })
        };
        let parsed = if let Some(rest) = name.strip_prefix(['@', '+']) {
            class(rest, false)
        } else if let Some(rest) = name.strip_prefix('!') {
            class(rest, true)
        } else if let Some(rest) = name.strip_prefix('-') {
            self.resolve(rest)
                .ok()
                .map(|description| RequestedAttribute::Description {
                    description,
                    exact_only: true,
                })
        } else {
            match self.resolve(name) {
                Ok(description) => Some(RequestedAttribute::Description {
                    description,
                    exact_only: false,
                }),
                // Bare object class names are still honored.
                Err(_) => class(name, false),
            }
        };
        parsed.unwrap_or_else(|| RequestedAttribute::Unknown(name.to_owned()))
    }

    pub fn parse_requested_attributes<S: AsRef<str>>(&self, names: &[S]) -> Vec<RequestedAttribute> {
        names
            .iter()
            .filter(|n| !n.as_ref().is_empty())
            .map(|n| self.parse_requested_attribute(n.as_ref()))
            .collect()
    }

    fn class_covers(&self, class: ObjectClassId, description: &AttributeDescription) -> bool {
        let class = self.object_class(class);
        class
            .required()
            .iter()
            .chain(class.allowed())
            .any(|t| self.is_subtype(description.attribute_type(), *t))
    }

    /// Whether `description` is selected by the requested attribute list.
    pub fn matches_requested_list(
        &self,
        description: &AttributeDescription,
        requested: &[RequestedAttribute],
    ) -> bool {
        for item in requested {
            match item {
                RequestedAttribute::Description {
                    description: wanted,
                    exact_only,
                } => {
                    if **wanted == *description {
                        return true;
                    }
                    if !exact_only && self.is_subtype_of_with_tags(description, wanted) {
                        return true;
                    }
                }
                RequestedAttribute::ObjectClass {
                    class,
                    exclude: true,
                } => {
                    if self.object_class(*class).is_extensible() {
                        return false;
                    }
                    return !self.class_covers(*class, description);
                }
                RequestedAttribute::ObjectClass {
                    class,
                    exclude: false,
                } => {
                    if self.object_class(*class).is_extensible()
                        || self.class_covers(*class, description)
                    {
                        return true;
                    }
                }
                RequestedAttribute::AllUserAttributes => {
                    if !description.is_operational() {
                        return true;
                    }
                }
                RequestedAttribute::AllOperationalAttributes => {
                    if description.is_operational() {
                        return true;
                    }
                }
                RequestedAttribute::NoAttributes | RequestedAttribute::Unknown(_) => {}
            }
        }
        false
    }
}
