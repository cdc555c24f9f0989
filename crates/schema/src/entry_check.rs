use std::collections::HashSet;

use crate::{
    attribute_type::AttributeTypeId,
    description::AttributeDescription,
    error::SchemaViolation,
    object_class::{ObjectClassId, ObjectClassKind},
    schema::Schema,
};

impl Schema {
    /// The most specific structural class among `names`.
    pub fn structural_object_class<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<ObjectClassId, SchemaViolation> {
        let classes = self.object_classes();
        let mut structural: Option<ObjectClassId> = None;
        for name in names {
            let class = classes
                .find(name.as_ref())
                .ok_or_else(|| SchemaViolation::UnknownObjectClass(name.as_ref().to_owned()))?;
            if class.kind() != ObjectClassKind::Structural {
                continue;
            }
            structural = match structural {
                None => Some(class.id()),
                Some(current) if classes.is_subclass(class.id(), current) => Some(class.id()),
                Some(current) if classes.is_subclass(current, class.id()) => Some(current),
                Some(current) => {
                    return Err(SchemaViolation::ConflictingStructuralClasses(
                        classes.get(current).name().to_owned(),
                        class.name().to_owned(),
                    ))
                }
            };
        }
        structural.ok_or(SchemaViolation::NoStructuralClass)
    }

    /// Checks that an entry's attributes are consistent with its object
    /// classes, and returns its structural class. `attributes` pairs each
    /// attribute with its number of values.
    pub fn check_entry<S: AsRef<str>>(
        &self,
        object_classes: &[S],
        attributes: &[(&AttributeDescription, usize)],
    ) -> Result<ObjectClassId, SchemaViolation> {
        if object_classes.is_empty() {
            return Err(SchemaViolation::NoObjectClass);
        }
        let structural = self.structural_object_class(object_classes)?;
        let registry = self.object_classes();
        let mut classes: Vec<ObjectClassId> = Vec::new();
        for name in object_classes {
            let class = registry
                .find(name.as_ref())
                .ok_or_else(|| SchemaViolation::UnknownObjectClass(name.as_ref().to_owned()))?;
            for ancestor in registry.ancestors(class.id()) {
                if !classes.contains(&ancestor) {
                    classes.push(ancestor);
                }
            }
        }
        let present: HashSet<AttributeTypeId> =
            attributes.iter().map(|(d, _)| d.attribute_type()).collect();
        for class in &classes {
            let class = registry.get(*class);
            for required in class.required() {
                if !present.iter().any(|t| self.is_subtype(*t, *required)) {
                    return Err(SchemaViolation::MissingRequiredAttribute {
                        class: class.name().to_owned(),
                        attribute: self.attribute_type(*required).name().to_owned(),
                    });
                }
            }
        }
        let extensible = classes.iter().any(|c| registry.get(*c).is_extensible());
        for (description, count) in attributes {
            let attribute_type = self.attribute_type(description.attribute_type());
            if attribute_type.is_single_value() && *count > 1 {
                return Err(SchemaViolation::SingleValueViolation(
                    description.name().to_owned(),
                ));
            }
            if extensible || attribute_type.is_operational() {
                continue;
            }
            let allowed = classes.iter().any(|c| {
                let class = registry.get(*c);
                class
                    .required()
                    .iter()
                    .chain(class.allowed())
                    .any(|t| self.is_subtype(attribute_type.id(), *t))
            });
            if !allowed {
                return Err(SchemaViolation::AttributeNotAllowed(
                    description.name().to_owned(),
                ));
            }
        }
        Ok(structural)
    }
}
