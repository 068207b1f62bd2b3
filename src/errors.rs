//! Error handling module
//!
//! Structured error types for directory access and descriptor decoding.
//! Every error maps onto a [`FailurePolicy`] so the audit phases can decide
//! whether to abort, skip the current object, or drop a single entry
//! without ad hoc conditionals at each call site.

use thiserror::Error;

/// Main error type for Active Directory operations
#[derive(Error, Debug)]
pub enum ADError {
    /// LDAP connection error
    #[error("LDAP connection failed: {0}")]
    ConnectionError(String),

    /// LDAP query/search error
    #[error("LDAP query failed: {0}")]
    QueryError(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Input validation error
    #[error("Invalid input: {0}")]
    ValidationError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed SID or security descriptor bytes
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Local file I/O, such as writing the report
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Failure to decode a binary SID or security descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before a structure was complete
    #[error("{structure} too short: need {needed} bytes, have {available}")]
    Truncated {
        structure: &'static str,
        needed: usize,
        available: usize,
    },

    /// An offset in the descriptor header points outside the buffer
    #[error("{field} offset {offset} is outside the {len}-byte descriptor")]
    OffsetOutOfRange {
        field: &'static str,
        offset: usize,
        len: usize,
    },

    /// SID revision other than 1
    #[error("unsupported SID revision {0}")]
    UnsupportedRevision(u8),

    /// More sub-authorities than MS-DTYP allows
    #[error("SID declares {0} sub-authorities (maximum 15)")]
    TooManySubAuthorities(u8),

    /// ACE header size smaller than its fixed fields
    #[error("ACE #{index} declares invalid size {size}")]
    InvalidAceSize { index: usize, size: usize },
}

/// What an audit phase does when an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the current phase, keeping whatever was gathered so far
    AbortPhase,
    /// Skip the current object and continue with the next one
    SkipItem,
    /// Drop the single malformed entry
    DropEntry,
}

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// Connection, bind or enumeration failure
    Enumeration,
    /// nTSecurityDescriptor or RBCD bytes failed to decode
    DescriptorDecode,
    /// objectSid failed to parse while building the SID map
    SidParse,
}

impl FailureSource {
    pub const fn policy(self) -> FailurePolicy {
        match self {
            FailureSource::Enumeration => FailurePolicy::AbortPhase,
            FailureSource::DescriptorDecode => FailurePolicy::SkipItem,
            FailureSource::SidParse => FailurePolicy::DropEntry,
        }
    }
}

impl ADError {
    /// Failure source for errors surfaced by the directory or decoder.
    pub fn source_kind(&self) -> FailureSource {
        match self {
            ADError::Decode(_) => FailureSource::DescriptorDecode,
            _ => FailureSource::Enumeration,
        }
    }
}

impl ADError {
    /// Classify an LDAP result code (RFC 4511 4.1.9).
    fn from_result_code(rc: u32, text: &str) -> Self {
        match rc {
            3 => ADError::Timeout(format!("time limit exceeded: {}", text)),
            4 => ADError::QueryError(format!("size limit exceeded: {}", text)),
            8 => ADError::AuthError(format!("strongerAuthRequired: {}", text)),
            10 => ADError::QueryError(format!("referral returned: {}", text)),
            32 => ADError::NotFound(format!("no such object: {}", text)),
            49 => ADError::AuthError(format!("invalid credentials: {}", text)),
            50 | 53 => ADError::PermissionDenied(format!("rc={}: {}", rc, text)),
            51 => ADError::Timeout(format!("server busy: {}", text)),
            52 => ADError::ConnectionError(format!("server unavailable: {}", text)),
            _ => ADError::QueryError(format!("LDAP error code {}: {}", rc, text)),
        }
    }
}

impl From<ldap3::LdapError> for ADError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => {
                ADError::from_result_code(result.rc, &result.text)
            }
            ldap3::LdapError::EndOfStream => {
                ADError::ConnectionError("connection closed by the server".to_string())
            }
            ldap3::LdapError::Io { source } => ADError::ConnectionError(source.to_string()),
            ldap3::LdapError::Timeout { elapsed } => {
                ADError::Timeout(format!("no LDAP response after {:?}", elapsed))
            }
            other => ADError::QueryError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ADError {
    fn from(err: std::io::Error) -> Self {
        ADError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ADError {
    fn from(err: serde_json::Error) -> Self {
        ADError::InternalError(format!("JSON serialization error: {}", err))
    }
}

/// Result type alias for AD operations
pub type Result<T> = std::result::Result<T, ADError>;
