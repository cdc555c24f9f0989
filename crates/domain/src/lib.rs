pub mod access;
pub mod dn;
pub mod entry;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod modification;
pub mod requests;

pub use access::{AccessControl, AccessRight, AclTarget, AllowAll};
pub use dn::{DnNormalizer, LdapDnNormalizer};
pub use entry::{Entry, EntryAttribute};
pub use error::{sanitize_result_code, LdapError, LdapResult, OperationResult};
pub use evaluator::{FilterEvaluator, FilterResult, SchemaFilterEvaluator};
pub use filter::{ExtensibleMatch, Filter, SubstringFilter};
pub use modification::{DefaultRdnDiff, ModOp, Modification, RdnDiff};
pub use requests::{
    AddRequest, DeleteRequest, ModifyDnRequest, ModifyRequest, SearchRequest, SearchScope,
};
