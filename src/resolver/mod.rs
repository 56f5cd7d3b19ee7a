//! Profile ownership: which browser profile a helper serves.
//!
//! [`owner::OwnerResolver`] walks the process tree against the
//! [`catalog::BrowserCatalog`]; [`identity::ProfileIdentity`] is the
//! address every hook-driven bus message is matched against.

pub mod catalog;
pub mod identity;
pub mod owner;
pub mod process;

/// Resolver configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("invalid executable pattern for {browser}: {source}")]
    Pattern {
        browser: String,
        #[source]
        source: regex::Error,
    },
    #[error("browser entry {0} is not built in and has no executable pattern")]
    MissingPattern(String),
}
