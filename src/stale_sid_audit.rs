//! Stale SID Audit
//!
//! Finds access-control entries that reference SIDs of principals which no
//! longer exist in the domain, typically left behind by deleted accounts or
//! by SID history from a past migration.
//!
//! # Phases
//!
//! 1. **Build**: collect every SID currently valid in the domain, the
//!    well-known identities plus the `objectSid` of each directory object.
//! 2. **Scan**: read `nTSecurityDescriptor` and
//!    `msDS-AllowedToActOnBehalfOfOtherIdentity` from every object and report
//!    each ACE trustee missing from the SID map.
//!
//! Objects are audited in parallel once the SID map is frozen. Failures
//! follow [`FailureSource::policy`]: an enumeration failure ends the phase,
//! a descriptor that fails to decode skips its object, and a malformed
//! `objectSid` drops that one entry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::descriptor_audit::{
    audit_descriptor, AuditedStructure, ALLOWED_TO_ACT_ON_BEHALF, NT_SECURITY_DESCRIPTOR,
};
use crate::directory::{Directory, DirectoryEntry, ALL_OBJECTS_FILTER, SID_OWNER_FILTER};
use crate::errors::{DecodeError, FailurePolicy, FailureSource};
use crate::observer::{AuditObserver, TracingObserver};
use crate::parallel_executor::{ParallelConfig, ParallelExecutor};
use crate::report::{AuditReport, ObjectFindings};
use crate::security_descriptor::{DescriptorDecoder, MsDtypDecoder};
use crate::sid_map::SidKnowledgeBase;
use crate::well_known_sids::well_known_entries;

const OBJECT_SID: &str = "objectSid";
const DISTINGUISHED_NAME: &str = "distinguishedName";

/// A descriptor on one object that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectScanError {
    pub distinguished_name: String,
    pub structure: AuditedStructure,
    pub error: DecodeError,
}

/// Scan-phase counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub objects_scanned: usize,
    /// Objects that came back with an `nTSecurityDescriptor` value
    pub descriptors_read: usize,
    pub decode_failures: usize,
    /// Worker tasks that panicked; their objects are missing from the report
    pub worker_failures: u32,
    pub peak_concurrency: usize,
    pub affected_objects: usize,
    pub total_findings: usize,
    pub duration_ms: u64,
    /// The enumeration ended early on a directory failure
    pub aborted: bool,
}

/// Everything one audit run produced.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub known_sids: usize,
    pub dropped_sids: usize,
    pub report: AuditReport,
    pub stats: ScanStats,
}

/// Audit one object: decode each present structure and check its ACLs.
///
/// Only the first value of each attribute is considered. If either
/// structure fails to decode the whole object is rejected, including
/// findings already gathered from the other one.
pub fn scan_object(
    entry: &DirectoryEntry,
    output_attribute: &str,
    sid_map: &SidKnowledgeBase,
    decoder: &dyn DescriptorDecoder,
) -> Result<ObjectFindings, ObjectScanError> {
    let distinguished_name = entry.distinguished_name().to_string();
    let mut findings = Vec::new();

    for structure in AuditedStructure::ALL {
        let Some(raw) = entry.first_raw(structure.ldap_attribute()) else {
            continue;
        };
        let descriptor =
            decoder
                .decode_security_descriptor(raw)
                .map_err(|error| ObjectScanError {
                    distinguished_name: distinguished_name.clone(),
                    structure,
                    error,
                })?;
        findings.extend(audit_descriptor(structure, &descriptor, sid_map));
    }

    let label = entry
        .first_value(output_attribute)
        .filter(|value| !value.is_empty())
        .unwrap_or(distinguished_name.as_str())
        .to_string();

    Ok(ObjectFindings {
        distinguished_name,
        label,
        findings,
    })
}

pub struct StaleSidAuditor {
    directory: Arc<dyn Directory>,
    decoder: Arc<dyn DescriptorDecoder>,
    observer: Arc<dyn AuditObserver>,
    domain: String,
    config: ScanConfig,
}

impl StaleSidAuditor {
    pub fn new(directory: Arc<dyn Directory>, domain: impl Into<String>, config: ScanConfig) -> Self {
        Self {
            directory,
            decoder: Arc::new(MsDtypDecoder),
            observer: Arc::new(TracingObserver),
            domain: domain.into(),
            config,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn DescriptorDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AuditObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Report a failure according to its policy and return that policy.
    fn handle_failure(&self, source: FailureSource, message: &str) -> FailurePolicy {
        let policy = source.policy();
        match policy {
            FailurePolicy::AbortPhase | FailurePolicy::SkipItem => self.observer.on_warning(message),
            FailurePolicy::DropEntry => debug!("{}", message),
        }
        policy
    }

    /// Build and scan.
    pub async fn run(&self) -> AuditOutcome {
        let sid_map = Arc::new(self.build_sid_map().await);
        let (report, stats) = self.scan(Arc::clone(&sid_map)).await;
        AuditOutcome {
            known_sids: sid_map.len(),
            dropped_sids: sid_map.dropped(),
            report,
            stats,
        }
    }

    /// Build phase. A directory failure leaves a partial map.
    pub async fn build_sid_map(&self) -> SidKnowledgeBase {
        self.observer
            .on_info(&format!("Populating known SIDs map for {}", self.domain));
        let mut builder = SidKnowledgeBase::builder(well_known_entries());

        match self
            .directory
            .enumerate(SID_OWNER_FILTER, &[DISTINGUISHED_NAME, OBJECT_SID])
            .await
        {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Ok(Some(entry)) => {
                        let Some(raw_sid) = entry.first_raw(OBJECT_SID) else {
                            continue;
                        };
                        if let Err(e) =
                            builder.insert_raw(entry.distinguished_name(), raw_sid, self.decoder.as_ref())
                        {
                            self.handle_failure(
                                FailureSource::SidParse,
                                &format!("Error parsing SID of {}: {}", entry.distinguished_name(), e),
                            );
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let policy = self.handle_failure(
                            e.source_kind(),
                            &format!("Error performing LDAP search: {}", e),
                        );
                        if policy == FailurePolicy::AbortPhase {
                            break;
                        }
                    }
                }
            },
            Err(e) => {
                self.handle_failure(
                    FailureSource::Enumeration,
                    &format!("Error connecting to LDAP: {}", e),
                );
            }
        }

        let sid_map = builder.finish();
        self.observer
            .on_info(&format!("Found {} known SIDs", sid_map.len()));
        if sid_map.dropped() > 0 {
            info!("Dropped {} objects with malformed objectSid", sid_map.dropped());
        }
        sid_map
    }

    /// Attributes requested by the scan: the audited structures plus the
    /// output attribute.
    pub fn scan_attributes(&self) -> Vec<&str> {
        let mut attributes = vec![DISTINGUISHED_NAME, NT_SECURITY_DESCRIPTOR, ALLOWED_TO_ACT_ON_BEHALF];
        let output = self.config.output_attribute.as_str();
        if !attributes.iter().any(|a| a.eq_ignore_ascii_case(output)) {
            attributes.push(output);
        }
        attributes
    }

    /// Scan phase. Objects audited before a directory failure stay in the
    /// report.
    pub async fn scan(&self, sid_map: Arc<SidKnowledgeBase>) -> (AuditReport, ScanStats) {
        let start = Instant::now();
        let mut report = AuditReport::new();
        let mut stats = ScanStats::default();

        self.observer
            .on_info(&format!("Searching for old SID traces on {}", self.domain));

        match self
            .directory
            .enumerate(ALL_OBJECTS_FILTER, &self.scan_attributes())
            .await
        {
            Ok(mut stream) => {
                let executor = ParallelExecutor::new(ParallelConfig {
                    max_concurrency: self.config.workers,
                });
                let decoder = Arc::clone(&self.decoder);
                let output_attribute = self.config.output_attribute.clone();
                let worker_map = Arc::clone(&sid_map);

                let (execution, result) = executor
                    .execute_stream(
                        &mut stream,
                        move |entry| {
                            let has_descriptor = entry.first_raw(NT_SECURITY_DESCRIPTOR).is_some();
                            let outcome =
                                scan_object(&entry, &output_attribute, &worker_map, decoder.as_ref());
                            (has_descriptor, outcome)
                        },
                        |(has_descriptor, outcome)| {
                            stats.objects_scanned += 1;
                            if has_descriptor {
                                stats.descriptors_read += 1;
                            }
                            match outcome {
                                Ok(object) => {
                                    if !object.findings.is_empty() {
                                        self.observer.on_object(&object);
                                        report.record(object);
                                    }
                                }
                                Err(failure) => {
                                    stats.decode_failures += 1;
                                    self.handle_failure(
                                        FailureSource::DescriptorDecode,
                                        &format!(
                                            "Error checking {} of {}: {}",
                                            failure.structure.ldap_attribute(),
                                            failure.distinguished_name,
                                            failure.error
                                        ),
                                    );
                                }
                            }
                        },
                        "scan",
                    )
                    .await;

                stats.worker_failures = execution.failed;
                stats.peak_concurrency = execution.peak_in_flight;
                if execution.failed > 0 {
                    self.observer.on_warning(&format!(
                        "{} objects could not be audited: worker task failed",
                        execution.failed
                    ));
                }
                if let Err(e) = result {
                    stats.aborted = self.handle_failure(
                        e.source_kind(),
                        &format!("Error performing LDAP search: {}", e),
                    ) == FailurePolicy::AbortPhase;
                }
            }
            Err(e) => {
                self.handle_failure(
                    FailureSource::Enumeration,
                    &format!("Error connecting to LDAP: {}", e),
                );
                stats.aborted = true;
            }
        }

        if stats.objects_scanned > 0 && stats.descriptors_read == 0 {
            self.observer.on_warning(&format!(
                "None of the {} objects returned {}; the account may not be allowed to read security descriptors",
                stats.objects_scanned, NT_SECURITY_DESCRIPTOR
            ));
        }

        stats.affected_objects = report.affected_objects();
        stats.total_findings = report.total_findings();
        stats.duration_ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;

        self.observer.on_info(&format!(
            "Found {} old SID traces",
            report.affected_objects()
        ));
        info!(
            "Scan statistics: {} objects scanned, {} descriptors read, {} decode failures, {} worker failures, {} affected objects, {} findings in {} ms",
            stats.objects_scanned,
            stats.descriptors_read,
            stats.decode_failures,
            stats.worker_failures,
            stats.affected_objects,
            stats.total_findings,
            stats.duration_ms
        );

        (report, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::observer::RecordingObserver;
    use crate::security_descriptor::tests::{acl, ace, descriptor, sid_bytes};
    use crate::security_descriptor::AclKind;

    const DOMAIN_SID: &str = "S-1-5-21-1004336348-1177238915-682003330";

    fn user(rid: u32) -> DirectoryEntry {
        let dn = format!("CN=user{},CN=Users,DC=corp,DC=local", rid);
        DirectoryEntry::new(dn.clone())
            .with_attr("distinguishedName", dn)
            .with_attr("sAMAccountName", format!("user{}", rid))
            .with_bin_attr("objectSid", sid_bytes(&format!("{}-{}", DOMAIN_SID, rid)))
    }

    fn with_sd(entry: DirectoryEntry, trustees: &[&str]) -> DirectoryEntry {
        let aces: Vec<Vec<u8>> = trustees.iter().map(|sid| ace(0x00, sid)).collect();
        entry.with_bin_attr("nTSecurityDescriptor", descriptor(Some(acl(&aces)), None))
    }

    fn auditor(directory: InMemoryDirectory, observer: Arc<RecordingObserver>) -> StaleSidAuditor {
        StaleSidAuditor::new(Arc::new(directory), "corp.local", ScanConfig::default())
            .with_observer(observer)
    }

    #[test]
    fn test_scan_object_reports_unknown_trustee() {
        let kb = SidKnowledgeBase::build(
            well_known_entries(),
            vec![Ok((format!("{}-500", DOMAIN_SID), "CN=Administrator".to_string()))],
        );
        let stale = format!("{}-9999", DOMAIN_SID);
        let entry = with_sd(user(1104), &["S-1-5-32-544", &stale]);

        let object = scan_object(&entry, "distinguishedName", &kb, &MsDtypDecoder).unwrap();
        assert_eq!(object.findings.len(), 1);
        assert_eq!(object.findings[0].acl, AclKind::Discretionary);
        assert_eq!(object.findings[0].index, 1);
        assert_eq!(object.findings[0].sid, stale);
        assert_eq!(object.label, "CN=user1104,CN=Users,DC=corp,DC=local");
    }

    #[test]
    fn test_scan_object_orders_descriptor_before_rbcd() {
        let kb = SidKnowledgeBase::build(well_known_entries(), Vec::new());
        let entry = DirectoryEntry::new("CN=srv")
            .with_bin_attr(
                "msDS-AllowedToActOnBehalfOfOtherIdentity",
                descriptor(Some(acl(&[ace(0x00, &format!("{}-7001", DOMAIN_SID))])), None),
            )
            .with_bin_attr(
                "nTSecurityDescriptor",
                descriptor(
                    Some(acl(&[ace(0x00, &format!("{}-7002", DOMAIN_SID))])),
                    Some(acl(&[ace(0x02, &format!("{}-7003", DOMAIN_SID))])),
                ),
            );

        let object = scan_object(&entry, "sAMAccountName", &kb, &MsDtypDecoder).unwrap();
        let order: Vec<(AuditedStructure, AclKind)> =
            object.findings.iter().map(|f| (f.attribute, f.acl)).collect();
        assert_eq!(
            order,
            vec![
                (AuditedStructure::SecurityDescriptor, AclKind::Discretionary),
                (AuditedStructure::SecurityDescriptor, AclKind::System),
                (AuditedStructure::Rbcd, AclKind::Discretionary),
            ]
        );
        // No sAMAccountName and no distinguishedName attribute: entry DN
        assert_eq!(object.label, "CN=srv");
    }

    #[test]
    fn test_scan_object_decode_failure_rejects_whole_object() {
        let kb = SidKnowledgeBase::build(well_known_entries(), Vec::new());
        let entry = with_sd(user(1), &[&format!("{}-4242", DOMAIN_SID)])
            .with_bin_attr("msDS-AllowedToActOnBehalfOfOtherIdentity", vec![1, 0, 4]);

        let error = scan_object(&entry, "distinguishedName", &kb, &MsDtypDecoder).unwrap_err();
        assert_eq!(error.structure, AuditedStructure::Rbcd);
        assert_eq!(error.distinguished_name, "CN=user1,CN=Users,DC=corp,DC=local");
    }

    #[test]
    fn test_clean_object_without_rbcd_has_no_findings() {
        let kb = SidKnowledgeBase::build(well_known_entries(), Vec::new());
        let entry = with_sd(DirectoryEntry::new("CN=clean"), &["S-1-5-18", "S-1-5-32-544"]);
        let object = scan_object(&entry, "distinguishedName", &kb, &MsDtypDecoder).unwrap();
        assert!(object.findings.is_empty());
    }

    #[tokio::test]
    async fn test_build_sid_map_collects_object_sids() {
        let observer = Arc::new(RecordingObserver::new());
        let directory = InMemoryDirectory::new(vec![
            user(500),
            user(1104),
            DirectoryEntry::new("CN=broken").with_bin_attr("objectSid", vec![9, 9]),
            DirectoryEntry::new("OU=NoSid,DC=corp,DC=local"),
        ]);

        let kb = auditor(directory, observer.clone()).build_sid_map().await;
        assert!(kb.exists(&format!("{}-1104", DOMAIN_SID)));
        assert!(kb.exists("S-1-5-32-544"));
        assert_eq!(kb.dropped(), 1);
        assert!(observer
            .infos()
            .contains(&format!("Found {} known SIDs", kb.len())));
        assert!(observer.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_build_failure_leaves_well_known_map() {
        let observer = Arc::new(RecordingObserver::new());
        let directory =
            InMemoryDirectory::new(vec![user(500)]).with_failure(SID_OWNER_FILTER, 0, "refused");

        let kb = auditor(directory, observer.clone()).build_sid_map().await;
        assert_eq!(kb.len(), well_known_entries().count());
        assert_eq!(observer.warnings().len(), 1);
        assert!(observer.warnings()[0].contains("refused"));
    }

    #[tokio::test]
    async fn test_run_reports_only_affected_objects() {
        let observer = Arc::new(RecordingObserver::new());
        let alice = format!("{}-1104", DOMAIN_SID);
        let deleted = format!("{}-1999", DOMAIN_SID);
        let directory = InMemoryDirectory::new(vec![
            with_sd(user(1104), &["S-1-5-32-544", &alice]),
            with_sd(user(1105), &[&deleted, &alice, &deleted]),
        ]);

        let outcome = auditor(directory, observer.clone()).run().await;
        assert_eq!(outcome.report.affected_objects(), 1);
        let object = outcome
            .report
            .get("CN=user1105,CN=Users,DC=corp,DC=local")
            .unwrap();
        let indices: Vec<usize> = object.findings.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 2]);

        assert_eq!(outcome.stats.objects_scanned, 2);
        assert_eq!(outcome.stats.descriptors_read, 2);
        assert_eq!(outcome.stats.worker_failures, 0);
        assert!(outcome.stats.peak_concurrency >= 1);
        assert!(outcome.stats.peak_concurrency <= ScanConfig::default().workers);
        assert!(!outcome.stats.aborted);
        assert!(observer.warnings().is_empty());
        assert_eq!(observer.objects(), vec!["CN=user1105,CN=Users,DC=corp,DC=local"]);
        assert!(observer.infos().contains(&"Found 1 old SID traces".to_string()));
    }

    #[tokio::test]
    async fn test_scan_failure_aborts_phase_only() {
        let observer = Arc::new(RecordingObserver::new());
        let directory = InMemoryDirectory::new(vec![user(1)])
            .with_failure(ALL_OBJECTS_FILTER, 0, "connection reset");

        let outcome = auditor(directory, observer.clone()).run().await;
        assert!(outcome.report.is_empty());
        assert!(outcome.stats.aborted);
        assert!(outcome.known_sids > well_known_entries().count());
        assert!(observer.infos().contains(&"Found 0 old SID traces".to_string()));
    }

    #[test]
    fn test_scan_attributes_include_output_attribute_once() {
        let directory = InMemoryDirectory::new(Vec::new());
        let mut config = ScanConfig::default();
        let default = StaleSidAuditor::new(Arc::new(directory.clone()), "corp.local", config.clone());
        assert_eq!(default.scan_attributes().len(), 3);

        config.output_attribute = "sAMAccountName".to_string();
        let custom = StaleSidAuditor::new(Arc::new(directory), "corp.local", config);
        assert_eq!(custom.scan_attributes().last(), Some(&"sAMAccountName"));
    }

    #[tokio::test]
    async fn test_missing_descriptors_raise_warning() {
        let observer = Arc::new(RecordingObserver::new());
        let directory = InMemoryDirectory::new(vec![user(1104), user(1105)]);

        let outcome = auditor(directory, observer.clone()).run().await;
        assert!(outcome.report.is_empty());
        assert_eq!(outcome.stats.objects_scanned, 2);
        assert_eq!(outcome.stats.descriptors_read, 0);
        let warnings = observer.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("None of the 2 objects returned nTSecurityDescriptor"));
    }

    /// Panics on any DACL with more than one ACE.
    struct FragileDecoder;

    impl DescriptorDecoder for FragileDecoder {
        fn decode_security_descriptor(
            &self,
            bytes: &[u8],
        ) -> Result<crate::security_descriptor::SecurityDescriptor, DecodeError> {
            let descriptor = MsDtypDecoder.decode_security_descriptor(bytes)?;
            if descriptor.dacl.as_ref().map_or(0, |aces| aces.len()) > 1 {
                panic!("decoder bug");
            }
            Ok(descriptor)
        }

        fn decode_sid(&self, bytes: &[u8]) -> Result<String, DecodeError> {
            MsDtypDecoder.decode_sid(bytes)
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_counted_in_scan_stats() {
        let observer = Arc::new(RecordingObserver::new());
        let deleted = format!("{}-1999", DOMAIN_SID);
        let directory = InMemoryDirectory::new(vec![
            with_sd(user(1104), &[&deleted]),
            with_sd(user(1105), &["S-1-5-18", &deleted]),
        ]);

        let outcome = auditor(directory, observer.clone())
            .with_decoder(Arc::new(FragileDecoder))
            .run()
            .await;
        assert_eq!(outcome.stats.worker_failures, 1);
        assert_eq!(outcome.stats.objects_scanned, 1);
        assert_eq!(outcome.report.affected_objects(), 1);
        assert!(outcome
            .report
            .get("CN=user1104,CN=Users,DC=corp,DC=local")
            .is_some());
        assert!(observer
            .warnings()
            .contains(&"1 objects could not be audited: worker task failed".to_string()));
    }
}
