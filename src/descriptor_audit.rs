//! Descriptor Audit
//!
//! Compares the trustees of a decoded security descriptor against the SID
//! map and reports every ACE whose SID is unknown. The same check serves
//! both `nTSecurityDescriptor` and the RBCD attribute
//! (`msDS-AllowedToActOnBehalfOfOtherIdentity`), which is stored as a
//! security descriptor whose DACL lists the principals allowed to delegate.
//!
//! The functions here are pure: no I/O, no logging.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::security_descriptor::{AceEntry, AclKind, SecurityDescriptor};
use crate::sid_map::SidKnowledgeBase;

/// LDAP attribute holding the object's security descriptor
pub const NT_SECURITY_DESCRIPTOR: &str = "nTSecurityDescriptor";
/// LDAP attribute holding the RBCD security descriptor
pub const ALLOWED_TO_ACT_ON_BEHALF: &str = "msDS-AllowedToActOnBehalfOfOtherIdentity";

/// The two access-control structures audited on every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditedStructure {
    #[serde(rename = "nTSecurityDescriptor")]
    SecurityDescriptor,
    #[serde(rename = "msDS-AllowedToActOnBehalfOfOtherIdentity")]
    Rbcd,
}

impl AuditedStructure {
    /// Audit order within one object.
    pub const ALL: [AuditedStructure; 2] =
        [AuditedStructure::SecurityDescriptor, AuditedStructure::Rbcd];

    pub fn ldap_attribute(&self) -> &'static str {
        match self {
            AuditedStructure::SecurityDescriptor => NT_SECURITY_DESCRIPTOR,
            AuditedStructure::Rbcd => ALLOWED_TO_ACT_ON_BEHALF,
        }
    }

    /// Name used inside finding messages.
    pub fn structure_name(&self) -> &'static str {
        match self {
            AuditedStructure::SecurityDescriptor => "security descriptor",
            AuditedStructure::Rbcd => "RBCD security descriptor",
        }
    }
}

impl fmt::Display for AuditedStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditedStructure::SecurityDescriptor => write!(f, "security descriptor"),
            AuditedStructure::Rbcd => write!(f, "RBCD list"),
        }
    }
}

/// One ACE whose trustee SID is not in the SID map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub attribute: AuditedStructure,
    pub acl: AclKind,
    /// Index of the ACE in its ACL, as decoded
    pub index: usize,
    pub sid: String,
    pub message: String,
}

impl Finding {
    fn unknown_sid(attribute: AuditedStructure, acl: AclKind, ace: &AceEntry) -> Self {
        Self {
            attribute,
            acl,
            index: ace.index,
            sid: ace.trustee_sid.clone(),
            message: format!(
                "Unknown SID {} in {} entry #{} of the {} structure.",
                ace.trustee_sid,
                acl,
                ace.index,
                attribute.structure_name()
            ),
        }
    }
}

/// Check one ACL, in order, against the SID map.
pub fn audit_entries<'a, I>(
    attribute: AuditedStructure,
    acl: AclKind,
    entries: I,
    sid_map: &SidKnowledgeBase,
) -> Vec<Finding>
where
    I: IntoIterator<Item = &'a AceEntry>,
{
    entries
        .into_iter()
        .filter(|ace| !sid_map.exists(&ace.trustee_sid))
        .map(|ace| Finding::unknown_sid(attribute, acl, ace))
        .collect()
}

/// Check the DACL then the SACL of a decoded descriptor. Absent lists
/// produce no findings.
pub fn audit_descriptor(
    attribute: AuditedStructure,
    descriptor: &SecurityDescriptor,
    sid_map: &SidKnowledgeBase,
) -> Vec<Finding> {
    [AclKind::Discretionary, AclKind::System]
        .into_iter()
        .flat_map(|kind| {
            descriptor
                .acl(kind)
                .map(|aces| audit_entries(attribute, kind, aces, sid_map))
                .unwrap_or_default()
        })
        .collect()
}
