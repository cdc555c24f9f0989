use std::cmp::Ordering;

use crate::error::SchemaError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionDefinition {
    name: String,
    prefix: bool,
}

impl OptionDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A prefix entry such as `lang-` accepts every option starting with it.
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }
}

/// Tagging options accepted in attribute descriptions, kept sorted by name.
#[derive(Clone, Debug)]
pub struct OptionTable {
    entries: Vec<OptionDefinition>,
}

impl Default for OptionTable {
    fn default() -> Self {
        Self {
            entries: vec![OptionDefinition {
                name: "lang-".to_owned(),
                prefix: true,
            }],
        }
    }
}

impl OptionTable {
    pub fn register(&mut self, name: &str, prefix: bool) -> Result<(), SchemaError> {
        if name.is_empty()
            || name.eq_ignore_ascii_case("binary")
            || !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(SchemaError::InvalidOption(name.to_owned()));
        }
        let name = name.to_ascii_lowercase();
        match self
            .entries
            .binary_search_by(|entry| entry.name.as_str().cmp(&name))
        {
            Ok(pos) => self.entries[pos].prefix = prefix,
            Err(pos) => self.entries.insert(pos, OptionDefinition { name, prefix }),
        }
        Ok(())
    }

    pub fn entries(&self) -> &[OptionDefinition] {
        &self.entries
    }

    /// Binary search over the sorted table. An entry matches when it equals
    /// the option, or when it is a prefix entry and the option starts with it.
    pub fn is_recognized(&self, option: &str) -> bool {
        let option = option.to_ascii_lowercase();
        let option = option.as_bytes();
        let (mut top, mut bot) = (0, self.entries.len());
        while top < bot {
            let mid = (top + bot) / 2;
            let entry = &self.entries[mid];
            let name = entry.name.as_bytes();
            let ordering = if option.len() < name.len() {
                match option.cmp(&name[..option.len()]) {
                    Ordering::Equal => Ordering::Less,
                    other => other,
                }
            } else {
                match option[..name.len()].cmp(name) {
                    Ordering::Equal if option.len() == name.len() || entry.prefix => return true,
                    other => other,
                }
            };
            if ordering == Ordering::Less {
                bot = mid;
            } else {
                top = mid + 1;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_language_prefix() {
        let table = OptionTable::default();
        assert!(table.is_recognized("lang-en"));
        assert!(table.is_recognized("LANG-EN-US"));
        assert!(table.is_recognized("lang-"));
        assert!(!table.is_recognized("lang"));
        assert!(!table.is_recognized("x-foo"));
    }

    #[test]
    fn test_exact_entries() {
        let mut table = OptionTable::default();
        table.register("x-hidden", false).unwrap();
        table.register("phonetic", false).unwrap();
        table.register("x-tag-", true).unwrap();
        assert!(table.is_recognized("x-hidden"));
        assert!(!table.is_recognized("x-hiddenish"));
        assert!(table.is_recognized("Phonetic"));
        assert!(table.is_recognized("x-tag-blue"));
        assert!(!table.is_recognized("x-ta"));
        let names: Vec<_> = table.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["lang-", "phonetic", "x-hidden", "x-tag-"]);
    }

    #[test]
    fn test_register_rejects_binary() {
        let mut table = OptionTable::default();
        assert_eq!(
            table.register("binary", false),
            Err(SchemaError::InvalidOption("binary".to_owned()))
        );
        assert!(table.register("", true).is_err());
    }
}
