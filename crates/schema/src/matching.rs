#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Syntax {
    pub oid: String,
    pub description: String,
    /// Values of this syntax may be transferred with the `;binary` option.
    pub binary_transfer: bool,
}

impl Syntax {
    pub fn new(oid: &str, description: &str) -> Self {
        Self {
            oid: oid.to_owned(),
            description: description.to_owned(),
            binary_transfer: false,
        }
    }

    pub fn binary(mut self) -> Self {
        self.binary_transfer = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum MatchingRuleKind {
    Equality,
    Ordering,
    Substrings,
}

/// How two values are compared under a matching rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Comparison {
    #[default]
    CaseExact,
    CaseIgnore,
    /// Case-insensitive, ignoring spaces and hyphens.
    Telephone,
    Integer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchingRule {
    pub oid: String,
    pub name: String,
    pub kind: MatchingRuleKind,
    pub syntax_oid: String,
    pub comparison: Comparison,
    /// Other syntaxes this rule can be applied to.
    pub compatible_syntaxes: Vec<String>,
}

impl MatchingRule {
    pub fn new(
        oid: &str,
        name: &str,
        kind: MatchingRuleKind,
        syntax_oid: &str,
        comparison: Comparison,
    ) -> Self {
        Self {
            oid: oid.to_owned(),
            name: name.to_owned(),
            kind,
            syntax_oid: syntax_oid.to_owned(),
            comparison,
            compatible_syntaxes: Vec::new(),
        }
    }

    pub fn also_for(mut self, syntax_oids: &[&str]) -> Self {
        self.compatible_syntaxes
            .extend(syntax_oids.iter().map(|s| (*s).to_owned()));
        self
    }

    pub fn applies_to(&self, syntax: &Syntax) -> bool {
        self.syntax_oid == syntax.oid || self.compatible_syntaxes.iter().any(|s| *s == syntax.oid)
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self.comparison,
            Comparison::CaseIgnore | Comparison::Telephone
        )
    }

    pub fn is_telephone(&self) -> bool {
        self.comparison == Comparison::Telephone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_applicability() {
        let directory_string = Syntax::new("1.3.6.1.4.1.1466.115.121.1.15", "Directory String");
        let ia5 = Syntax::new("1.3.6.1.4.1.1466.115.121.1.26", "IA5 String");
        let rule = MatchingRule::new(
            "2.5.13.2",
            "caseIgnoreMatch",
            MatchingRuleKind::Equality,
            &directory_string.oid,
            Comparison::CaseIgnore,
        );
        assert!(rule.applies_to(&directory_string));
        assert!(!rule.applies_to(&ia5));
        assert!(rule.also_for(&[&ia5.oid]).applies_to(&ia5));
    }
}
