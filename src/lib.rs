//! Stale SID trace audit for Active Directory
//!
//! Builds the set of SIDs that currently exist in a domain, then scans the
//! `nTSecurityDescriptor` and RBCD attribute of every object for ACEs whose
//! trustee is not in that set.
//!
//! - [`sid_map`]: the SID knowledge base
//! - [`descriptor_audit`]: per-ACL unknown-SID check
//! - [`stale_sid_audit`]: the two-phase orchestrator
//! - [`ad_client`], [`directory`], [`ldap_timeout`]: directory access
//! - [`security_descriptor`]: MS-DTYP decoding

pub mod ad_client;
pub mod config;
pub mod descriptor_audit;
pub mod directory;
pub mod errors;
pub mod ldap_timeout;
pub mod observer;
pub mod parallel_executor;
pub mod report;
pub mod secure_types;
pub mod security_descriptor;
pub mod sid_map;
pub mod stale_sid_audit;
pub mod well_known_sids;

pub use errors::{ADError, DecodeError, Result};
pub use report::{AuditReport, ObjectFindings};
pub use sid_map::SidKnowledgeBase;
pub use stale_sid_audit::{AuditOutcome, StaleSidAuditor};
