use ldap3_proto::{proto::LdapResult as LdapResultOp, LdapResultCode};

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LdapError {
    pub code: LdapResultCode,
    pub message: String,
    /// Nearest existing ancestor, for `NoSuchObject`.
    pub matched_dn: String,
}

impl LdapError {
    pub fn new(code: LdapResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            matched_dn: String::new(),
        }
    }

    pub fn with_matched_dn(mut self, matched_dn: impl Into<String>) -> Self {
        self.matched_dn = matched_dn.into();
        self
    }
}

pub type LdapResult<T> = std::result::Result<T, LdapError>;

/// What every operation entry point reports back to the protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub code: LdapResultCode,
    pub matched_dn: String,
    pub message: String,
}

impl OperationResult {
    pub fn success() -> Self {
        Self {
            code: LdapResultCode::Success,
            matched_dn: String::new(),
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == LdapResultCode::Success
    }

    pub fn into_ldap_result(self) -> LdapResultOp {
        LdapResultOp {
            code: self.code,
            matcheddn: self.matched_dn,
            message: self.message,
            referral: vec![],
        }
    }
}

impl From<LdapError> for OperationResult {
    fn from(error: LdapError) -> Self {
        Self {
            code: error.code,
            matched_dn: error.matched_dn,
            message: error.message,
        }
    }
}

impl From<LdapResult<()>> for OperationResult {
    fn from(result: LdapResult<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => e.into(),
        }
    }
}

/// Maps a native result code, such as a stored procedure's return value,
/// into the LDAP result code space. Unknown codes become `Other`.
pub fn sanitize_result_code(code: i64) -> LdapResultCode {
    match code {
        0 => LdapResultCode::Success,
        1 => LdapResultCode::OperationsError,
        2 => LdapResultCode::ProtocolError,
        3 => LdapResultCode::TimeLimitExceeded,
        4 => LdapResultCode::SizeLimitExceeded,
        11 => LdapResultCode::AdminLimitExceeded,
        16 => LdapResultCode::NoSuchAttribute,
        17 => LdapResultCode::UndefinedAttributeType,
        18 => LdapResultCode::InappropriateMatching,
        19 => LdapResultCode::ConstraintViolation,
        21 => LdapResultCode::InvalidAttributeSyntax,
        32 => LdapResultCode::NoSuchObject,
        34 => LdapResultCode::InvalidDNSyntax,
        50 => LdapResultCode::InsufficentAccessRights,
        53 => LdapResultCode::UnwillingToPerform,
        64 => LdapResultCode::NamingViolation,
        65 => LdapResultCode::ObjectClassViolation,
        66 => LdapResultCode::NotAllowedOnNonLeaf,
        68 => LdapResultCode::EntryAlreadyExists,
        _ => LdapResultCode::Other,
    }
}
