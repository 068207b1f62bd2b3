//! Timeout wrappers for synchronous LDAP operations
//!
//! The ldap3 crate's `LdapConn` is blocking and can hang indefinitely if the
//! server stops answering. Connection, bind and RootDSE lookups run inside
//! `tokio::task::spawn_blocking` under a `tokio::time::timeout`; the paged
//! subtree search runs on a blocking thread and pushes each page into an
//! [`EntrySender`], with a per-request timeout set on the connection.

use ldap3::controls::{ControlParser, PagedResults, RawControl};
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry, SearchResult};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::directory::EntrySender;
use crate::errors::{ADError, Result};

/// Default connection timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default search timeout (30 seconds)
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default page size for paged searches
pub const DEFAULT_PAGE_SIZE: i32 = 500;

/// Extended timeout for paged searches (2 minutes)
pub const PAGED_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Simple Paged Results control
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// LDAP_SERVER_SD_FLAGS_OID
pub const SD_FLAGS_OID: &str = "1.2.840.113556.1.4.801";

/// OWNER | GROUP | DACL
///
/// Readable by any account with READ_CONTROL. The server default (all four
/// parts) withholds the whole attribute from binds lacking
/// SeSecurityPrivilege.
pub const SD_FLAGS_NO_SACL: u8 = 0x07;

/// SACL_SECURITY_INFORMATION
pub const SD_FLAGS_SACL: u8 = 0x08;

/// Builds the SD_FLAGS control: `SEQUENCE { INTEGER flags }`.
pub fn sd_flags_control(flags: u8) -> RawControl {
    RawControl {
        ctype: SD_FLAGS_OID.to_string(),
        crit: true,
        val: Some(vec![0x30, 0x03, 0x02, 0x01, flags]),
    }
}

fn join_error(e: tokio::task::JoinError) -> ADError {
    ADError::InternalError(format!("Task join error: {}", e))
}

/// Attempts to create an LDAP connection with a timeout.
///
/// TLS certificate verification is disabled to support enterprise
/// environments with self-signed or internal CA certificates.
pub async fn ldap_connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<LdapConn> {
    let url = url.to_string();

    let result = timeout(connect_timeout, async {
        tokio::task::spawn_blocking(move || {
            let settings = LdapConnSettings::new()
                .set_conn_timeout(connect_timeout)
                .set_no_tls_verify(true);

            LdapConn::with_settings(settings, &url)
        })
        .await
        .map_err(join_error)?
        .map_err(|e| ADError::ConnectionError(e.to_string()))
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ADError::Timeout(format!(
            "Server did not respond within {} seconds. \
             Please verify the server address and network connectivity.",
            connect_timeout.as_secs()
        ))),
    }
}

/// Performs a simple bind with a timeout.
///
/// Takes ownership of the LdapConn to move it into the blocking task,
/// then returns it after a successful bind.
pub async fn ldap_bind_with_timeout(
    ldap: LdapConn,
    bind_dn: &str,
    password: &str,
    bind_timeout: Duration,
) -> Result<LdapConn> {
    let bind_dn = bind_dn.to_string();
    let password = zeroize::Zeroizing::new(password.to_string());

    let result = timeout(bind_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.simple_bind(&bind_dn, &password)?.success()?;
            Ok::<LdapConn, ADError>(ldap)
        })
        .await
        .map_err(join_error)?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ADError::Timeout(format!(
            "Bind operation did not complete within {} seconds.",
            bind_timeout.as_secs()
        ))),
    }
}

/// Unbinds from LDAP connection with a timeout.
///
/// A timed-out unbind is not an error: the connection is dropped anyway.
pub async fn ldap_unbind_with_timeout(ldap: LdapConn, unbind_timeout: Duration) {
    let result = timeout(
        unbind_timeout,
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.unbind()
        }),
    )
    .await;

    match result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => debug!("Unbind failed: {}", e),
        Ok(Err(e)) => warn!("Unbind task error: {}", e),
        Err(_) => warn!("Unbind timed out (connection will be dropped)"),
    }
}

/// Reads `namingContexts` from the RootDSE.
pub async fn ldap_naming_contexts_with_timeout(
    ldap: LdapConn,
    search_timeout: Duration,
) -> Result<(Vec<String>, LdapConn)> {
    let result = timeout(search_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            let (entries, _) = ldap
                .search("", Scope::Base, "(objectClass=*)", vec!["namingContexts"])?
                .success()?;
            let contexts = entries
                .into_iter()
                .next()
                .map(|entry| {
                    let entry = SearchEntry::construct(entry);
                    entry
                        .attrs
                        .into_iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case("namingContexts"))
                        .map(|(_, values)| values)
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            Ok::<_, ADError>((contexts, ldap))
        })
        .await
        .map_err(join_error)?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ADError::Timeout(format!(
            "RootDSE query did not complete within {} seconds.",
            search_timeout.as_secs()
        ))),
    }
}

/// Settings for [`ldap_paged_search_into`].
#[derive(Debug, Clone)]
pub struct PagedSearchOptions {
    pub page_size: i32,
    /// Timeout applied to every page request
    pub page_timeout: Duration,
    /// Attach the SD_FLAGS control with these flags
    pub sd_flags: Option<u8>,
}

impl Default for PagedSearchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_timeout: DEFAULT_SEARCH_TIMEOUT,
            sd_flags: None,
        }
    }
}

/// How a paged search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagedSearchOutcome {
    /// Every page was fetched
    Completed { entries: usize, pages: usize },
    /// The server hit its size limit (rc=4); entries so far were delivered
    SizeLimited { entries: usize, pages: usize },
    /// The consumer went away before the last page
    Cancelled { entries: usize, pages: usize },
}

/// Performs a paged whole-subtree search, streaming entries into `sink`.
///
/// Blocking: call from `spawn_blocking`. Uses the Simple Paged Results
/// control so result sets larger than AD's 1000-entry limit are returned in
/// full. Stops between pages, or mid-page, as soon as `sink` is cancelled
/// and releases the server-side paging state.
pub fn ldap_paged_search_into(
    ldap: &mut LdapConn,
    base_dn: &str,
    filter: &str,
    attrs: &[String],
    options: &PagedSearchOptions,
    sink: &EntrySender,
) -> Result<PagedSearchOutcome> {
    info!(
        "ldap_paged_search: Starting paged search in {} with filter {} (page_size: {})",
        base_dn, filter, options.page_size
    );

    let attrs_refs: Vec<&str> = attrs.iter().map(|s| s.as_str()).collect();
    let mut cookie: Vec<u8> = Vec::new();
    let mut entries = 0usize;
    let mut pages = 0usize;

    loop {
        if sink.is_cancelled() {
            abandon_paged_search(ldap, base_dn, filter, &cookie);
            return Ok(PagedSearchOutcome::Cancelled { entries, pages });
        }

        pages += 1;
        let mut controls: Vec<RawControl> = vec![PagedResults {
            size: options.page_size,
            cookie: cookie.clone(),
        }
        .into()];
        if let Some(flags) = options.sd_flags {
            controls.push(sd_flags_control(flags));
        }

        let SearchResult(page, ldap_result) = ldap
            .with_controls(controls)
            .with_timeout(options.page_timeout)
            .search(base_dn, Scope::Subtree, filter, attrs_refs.clone())
            .map_err(|e| {
                error!("ldap_paged_search: Search failed: {}", e);
                ADError::from(e)
            })?;

        debug!(
            "ldap_paged_search: Page {} returned {} entries (total so far: {})",
            pages,
            page.len(),
            entries
        );

        for raw in page {
            if !sink.blocking_send(Ok(SearchEntry::construct(raw).into())) {
                abandon_paged_search(ldap, base_dn, filter, &cookie);
                return Ok(PagedSearchOutcome::Cancelled { entries, pages });
            }
            entries += 1;
        }

        match ldap_result.rc {
            0 => {}
            4 => {
                warn!(
                    "ldap_paged_search: Size limit exceeded (rc=4) in {}, returning {} partial entries",
                    base_dn, entries
                );
                return Ok(PagedSearchOutcome::SizeLimited { entries, pages });
            }
            rc => {
                error!(
                    "ldap_paged_search: Search failed with rc={}: {}",
                    rc, ldap_result.text
                );
                return Err(ldap3::LdapError::LdapResult {
                    result: ldap_result,
                }
                .into());
            }
        }

        cookie = ldap_result
            .ctrls
            .iter()
            .find(|ctrl| ctrl.1.ctype == PAGED_RESULTS_OID)
            .and_then(|ctrl| ctrl.1.val.as_ref())
            .map(|val| PagedResults::parse(val).cookie)
            .unwrap_or_default();

        if cookie.is_empty() {
            info!(
                "ldap_paged_search: Completed {} pages, {} total entries in {}",
                pages, entries, base_dn
            );
            return Ok(PagedSearchOutcome::Completed { entries, pages });
        }
    }
}

/// A zero-size page request with the current cookie discards the server's
/// paging state (RFC 2696).
fn abandon_paged_search(ldap: &mut LdapConn, base_dn: &str, filter: &str, cookie: &[u8]) {
    if cookie.is_empty() {
        return;
    }
    let control: RawControl = PagedResults {
        size: 0,
        cookie: cookie.to_vec(),
    }
    .into();
    if let Err(e) = ldap
        .with_controls(vec![control])
        .search(base_dn, Scope::Subtree, filter, vec!["1.1"])
    {
        debug!("ldap_paged_search: Releasing paged search failed: {}", e);
    }
}
