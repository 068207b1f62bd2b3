//! Audit report
//!
//! Findings grouped by object. An object is only ever inserted whole, with
//! at least one finding, so the report never shows a partially audited
//! object or an object with nothing to say.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::descriptor_audit::{AuditedStructure, Finding};
use crate::errors::{ADError, Result};

/// Every finding of one object, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFindings {
    pub distinguished_name: String,
    /// Value of the configured output attribute, the DN when absent
    pub label: String,
    pub findings: Vec<Finding>,
}

impl ObjectFindings {
    /// Findings of one audited structure, in order.
    pub fn for_structure(&self, structure: AuditedStructure) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.attribute == structure)
    }

    /// Console block for this object:
    ///
    /// ```text
    /// [>] CN=host,DC=corp,DC=local
    ///   | Attribute nTSecurityDescriptor:
    ///   |   | Unknown SID ... in DACL entry #3 of the security descriptor structure.
    /// ```
    ///
    /// Colors follow the global `colored` switch.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("[>] {}", self.label.bright_blue())];
        for structure in AuditedStructure::ALL {
            let mut findings = self.for_structure(structure).peekable();
            if findings.peek().is_none() {
                continue;
            }
            lines.push(format!(
                "  | {}",
                format!("Attribute {}:", structure.ldap_attribute()).bright_cyan()
            ));
            for finding in findings {
                lines.push(format!("  |   | {}", finding.message.bright_yellow()));
            }
        }
        lines.join("\n")
    }
}

/// Distinguished name -> findings. Ordered by DN for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    objects: BTreeMap<String, ObjectFindings>,
}

impl AuditReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one object's findings. Objects without findings are ignored.
    ///
    /// Returns whether the object was recorded.
    pub fn record(&mut self, object: ObjectFindings) -> bool {
        if object.findings.is_empty() {
            return false;
        }
        self.objects
            .insert(object.distinguished_name.clone(), object);
        true
    }

    pub fn get(&self, distinguished_name: &str) -> Option<&ObjectFindings> {
        self.objects.get(distinguished_name)
    }

    /// Number of objects with at least one finding.
    pub fn affected_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn total_findings(&self) -> usize {
        self.objects.values().map(|o| o.findings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectFindings> {
        self.objects.values()
    }

    pub fn distinguished_names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn to_document(&self, domain: &str) -> ReportDocument {
        ReportDocument {
            generated_at: Utc::now(),
            domain: domain.to_string(),
            affected_objects: self.affected_objects(),
            total_findings: self.total_findings(),
            objects: self.objects.values().cloned().collect(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path, domain: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_document(domain))?;
        fs::write(path, json)
            .map_err(|e| ADError::IoError(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// On-disk form of a completed report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub generated_at: DateTime<Utc>,
    pub domain: String,
    pub affected_objects: usize,
    pub total_findings: usize,
    pub objects: Vec<ObjectFindings>,
}
