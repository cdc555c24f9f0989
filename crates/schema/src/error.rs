use thiserror::Error;

/// Errors raised while registering schema elements.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate OID `{0}`")]
    DuplicateOid(String),
    #[error("Name `{0}` is already registered")]
    DuplicateName(String),
    #[error("Superior `{0}` not found")]
    SuperiorNotFound(String),
    #[error("Incompatible usage: {0}")]
    IncompatibleUsage(String),
    #[error("Syntax `{0}` not found")]
    SyntaxNotFound(String),
    #[error("Matching rule `{0}` not found")]
    MatchingRuleNotFound(String),
    #[error("Matching rule `{rule}` cannot be applied to syntax `{syntax}`")]
    InappropriateMatchingRule { rule: String, syntax: String },
    #[error("Attribute type `{0}` has neither a syntax nor a superior")]
    Incomplete(String),
    #[error("Attribute type `{0}` is undefined")]
    UndefinedType(String),
    #[error("Invalid option definition `{0}`")]
    InvalidOption(String),
}

/// Errors raised while parsing an attribute description such as `cn;lang-en`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    #[error("Empty attribute description")]
    Empty,
    #[error("Attribute description `{description}` contains invalid character `{character}`")]
    InvalidCharacters { description: String, character: char },
    #[error("Attribute type `{0}` is undefined")]
    UndefinedType(String),
    #[error("Operational attribute `{0}` does not accept options")]
    OperationalNoOptions(String),
    #[error("Empty option in attribute description `{0}`")]
    EmptyOption(String),
    #[error("Option `binary` given twice in `{0}`")]
    DuplicateBinaryOption(String),
    #[error("Option `binary` is not supported by the syntax of `{0}`")]
    BinaryNotSupported(String),
    #[error("Unrecognized option `{option}` in `{description}`")]
    UnrecognizedOption { description: String, option: String },
    #[error("Too many options in `{0}`")]
    TooManyOptions(String),
    #[error("Options of `{0}` are too long")]
    OptionsTooLong(String),
}

/// An entry does not conform to the object classes it declares.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("No objectClass attribute")]
    NoObjectClass,
    #[error("Unknown object class `{0}`")]
    UnknownObjectClass(String),
    #[error("No structural object class")]
    NoStructuralClass,
    #[error("Structural object classes `{0}` and `{1}` are unrelated")]
    ConflictingStructuralClasses(String, String),
    #[error("Object class `{class}` requires attribute `{attribute}`")]
    MissingRequiredAttribute { class: String, attribute: String },
    #[error("Attribute `{0}` is not allowed by the entry's object classes")]
    AttributeNotAllowed(String),
    #[error("Attribute `{0}` is single-valued")]
    SingleValueViolation(String),
}
