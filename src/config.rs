//! Command-line configuration
//!
//! [`Cli`] is the raw clap surface. [`Cli::into_config`] validates it into
//! an [`AuditConfig`], which is all the rest of the crate sees.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ADError, Result};
use crate::ldap_timeout::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PAGE_SIZE, PAGED_SEARCH_TIMEOUT};
use crate::secure_types::Credentials;

pub const DEFAULT_LDAP_PORT: u16 = 389;
pub const DEFAULT_LDAPS_PORT: u16 = 636;
pub const DEFAULT_OUTPUT_ATTRIBUTE: &str = "distinguishedName";
pub const DEFAULT_WORKERS: usize = 8;

/// Find references to SIDs of deleted principals in Active Directory ACLs
#[derive(Parser, Debug, Clone)]
#[command(name = "find-old-sid-traces")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show no information at all
    #[arg(short, long, help_heading = "Configuration")]
    pub quiet: bool,

    /// Debug mode
    #[arg(long, help_heading = "Configuration")]
    pub debug: bool,

    /// No colors mode
    #[arg(long = "no-colors", help_heading = "Configuration")]
    pub no_colors: bool,

    /// Output attribute
    #[arg(short, long, default_value = DEFAULT_OUTPUT_ATTRIBUTE, help_heading = "Configuration")]
    pub attribute: String,

    /// Output file to write results to (JSON)
    #[arg(short, long, help_heading = "Configuration")]
    pub output_file: Option<PathBuf>,

    /// IP address or FQDN of the domain controller
    #[arg(long = "dc-ip", env = "SID_TRACE_DC", help_heading = "LDAP Connection Settings")]
    pub dc_ip: Option<String>,

    /// Port number to connect to LDAP server [default: 389, or 636 with LDAPS]
    #[arg(long = "ldap-port", help_heading = "LDAP Connection Settings")]
    pub ldap_port: Option<u16>,

    /// Use LDAPS instead of LDAP
    #[arg(short = 'L', long, help_heading = "LDAP Connection Settings")]
    pub use_ldaps: bool,

    /// Seconds allowed for connecting and binding
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs(), help_heading = "LDAP Connection Settings")]
    pub connect_timeout: u64,

    /// Seconds to wait for the next directory entry before giving up
    #[arg(long, default_value_t = PAGED_SEARCH_TIMEOUT.as_secs(), help_heading = "LDAP Connection Settings")]
    pub timeout: u64,

    /// Entries requested per LDAP page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help_heading = "LDAP Connection Settings")]
    pub page_size: i32,

    /// Objects audited concurrently during the scan
    #[arg(long, default_value_t = DEFAULT_WORKERS, help_heading = "LDAP Connection Settings")]
    pub workers: usize,

    /// Also read SACLs (the account needs SeSecurityPrivilege, or no descriptor is returned at all)
    #[arg(long, help_heading = "LDAP Connection Settings")]
    pub include_sacl: bool,

    /// Active Directory domain to authenticate to
    #[arg(short, long, help_heading = "Authentication")]
    pub domain: String,

    /// User to authenticate as
    #[arg(short, long, help_heading = "Authentication")]
    pub username: String,

    /// Password to authenticate with
    #[arg(short, long, env = "SID_TRACE_PASSWORD", hide_env_values = true, help_heading = "Authentication")]
    pub password: Option<String>,

    /// NT/LM hashes, format is LMhash:NThash
    #[arg(short = 'H', long, env = "SID_TRACE_HASHES", hide_env_values = true, help_heading = "Authentication")]
    pub hashes: Option<String>,
}

/// Where and how to reach the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub server: String,
    pub port: u16,
    pub use_ldaps: bool,
    pub page_size: i32,
    pub connect_timeout: Duration,
    pub enumeration_timeout: Duration,
    /// Request the SACL along with owner, group and DACL
    pub include_sacl: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_LDAP_PORT,
            use_ldaps: false,
            page_size: DEFAULT_PAGE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            enumeration_timeout: PAGED_SEARCH_TIMEOUT,
            include_sacl: false,
        }
    }
}

/// Scan-phase tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Attribute whose first value labels an object in the report
    pub output_attribute: String,
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            output_attribute: DEFAULT_OUTPUT_ATTRIBUTE.to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Presentation settings for the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub quiet: bool,
    pub debug: bool,
    pub colors: bool,
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub domain: String,
    pub connection: ConnectionSettings,
    pub scan: ScanConfig,
    pub output: OutputSettings,
}

/// Port to use when none (or 0) was given.
pub fn resolve_port(port: Option<u16>, use_ldaps: bool) -> u16 {
    match port {
        Some(port) if port != 0 => port,
        _ if use_ldaps => DEFAULT_LDAPS_PORT,
        _ => DEFAULT_LDAP_PORT,
    }
}

impl Cli {
    /// True when no domain controller was given.
    pub fn missing_dc(&self) -> bool {
        self.dc_ip.as_deref().map_or(true, |dc| dc.trim().is_empty())
    }

    /// Default `tracing` filter directive for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Credentials::new(
            self.domain.clone(),
            self.username.clone(),
            self.password.clone(),
            self.hashes.clone(),
        )
    }

    pub fn into_config(self) -> Result<AuditConfig> {
        let server = match self.dc_ip.as_deref().map(str::trim) {
            Some(dc) if !dc.is_empty() => dc.to_string(),
            _ => {
                return Err(ADError::ConfigError(
                    "a domain controller (--dc-ip) is required".to_string(),
                ))
            }
        };
        if self.timeout == 0 {
            return Err(ADError::ConfigError("--timeout must be at least 1 second".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(ADError::ConfigError(
                "--connect-timeout must be at least 1 second".to_string(),
            ));
        }
        if self.page_size < 1 {
            return Err(ADError::ConfigError("--page-size must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(ADError::ConfigError("--workers must be at least 1".to_string()));
        }
        if self.attribute.trim().is_empty() {
            return Err(ADError::ConfigError("--attribute must not be empty".to_string()));
        }

        Ok(AuditConfig {
            domain: self.domain,
            connection: ConnectionSettings {
                server,
                port: resolve_port(self.ldap_port, self.use_ldaps),
                use_ldaps: self.use_ldaps,
                page_size: self.page_size,
                connect_timeout: Duration::from_secs(self.connect_timeout),
                enumeration_timeout: Duration::from_secs(self.timeout),
                include_sacl: self.include_sacl,
            },
            scan: ScanConfig {
                output_attribute: self.attribute,
                workers: self.workers,
            },
            output: OutputSettings {
                quiet: self.quiet,
                debug: self.debug,
                colors: !self.no_colors,
                output_file: self.output_file,
            },
        })
    }
}
