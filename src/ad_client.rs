//! LDAP-backed [`Directory`]
//!
//! Every enumeration opens its own connection, binds, reads the naming
//! contexts from the RootDSE and then walks each context with a paged
//! subtree search on a blocking thread. Entries reach the caller through an
//! [`EntryStream`]; dropping the stream stops the walk between requests.

use async_trait::async_trait;
use ldap3::LdapConn;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionSettings;
use crate::descriptor_audit::NT_SECURITY_DESCRIPTOR;
use crate::directory::{Directory, EntryStream, DEFAULT_STREAM_BUFFER};
use crate::errors::{ADError, Result};
use crate::ldap_timeout::{
    ldap_bind_with_timeout, ldap_connect_with_timeout, ldap_naming_contexts_with_timeout,
    ldap_paged_search_into, ldap_unbind_with_timeout, PagedSearchOptions, PagedSearchOutcome,
    SD_FLAGS_NO_SACL, SD_FLAGS_SACL,
};
use crate::secure_types::Credentials;

pub struct ActiveDirectoryClient {
    server: String,
    port: u16,
    use_ldaps: bool,
    credentials: Credentials,
    search: PagedSearchOptions,
    include_sacl: bool,
    connect_timeout: Duration,
    /// Longest wait for the next entry of an enumeration
    enumeration_timeout: Duration,
}

impl ActiveDirectoryClient {
    pub fn new(settings: &ConnectionSettings, credentials: Credentials) -> Self {
        Self {
            server: settings.server.clone(),
            port: settings.port,
            use_ldaps: settings.use_ldaps,
            credentials,
            search: PagedSearchOptions {
                page_size: settings.page_size,
                page_timeout: settings.enumeration_timeout,
                sd_flags: None,
            },
            include_sacl: settings.include_sacl,
            connect_timeout: settings.connect_timeout,
            enumeration_timeout: settings.enumeration_timeout,
        }
    }

    pub fn ldap_url(&self) -> String {
        let host = self
            .server
            .trim_start_matches("ldaps://")
            .trim_start_matches("ldap://");
        let scheme = if self.use_ldaps { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, host, self.port)
    }

    /// Paging options for a search returning `attributes`.
    ///
    /// Without the SD_FLAGS control the server asks for the SACL too and
    /// returns no `nTSecurityDescriptor` to a bind lacking
    /// SeSecurityPrivilege. Descriptor searches therefore ask for owner,
    /// group and DACL only, unless SACLs were requested.
    fn search_options_for(&self, attributes: &[&str]) -> PagedSearchOptions {
        let mut options = self.search.clone();
        if attributes
            .iter()
            .any(|attr| attr.eq_ignore_ascii_case(NT_SECURITY_DESCRIPTOR))
        {
            let flags = if self.include_sacl {
                SD_FLAGS_NO_SACL | SD_FLAGS_SACL
            } else {
                SD_FLAGS_NO_SACL
            };
            options.sd_flags = Some(flags);
        }
        options
    }

    async fn get_connection(&self) -> Result<LdapConn> {
        let password = self.credentials.password().ok_or_else(|| {
            ADError::AuthError(
                "NT/LM hashes cannot be used for an LDAP simple bind; supply a password"
                    .to_string(),
            )
        })?;

        let ldap_url = self.ldap_url();
        info!("get_connection: Connecting to {}...", ldap_url);

        let ldap = ldap_connect_with_timeout(&ldap_url, self.connect_timeout).await?;
        debug!("get_connection: TCP connection established");

        let bind_identity = self.credentials.bind_identity();
        let ldap = match ldap_bind_with_timeout(ldap, &bind_identity, password, self.connect_timeout)
            .await
        {
            Ok(ldap) => ldap,
            Err(e) => {
                let error_msg = e.to_string();
                error!("LDAP bind as {} failed: {}", bind_identity, error_msg);
                if !self.use_ldaps && error_msg.contains("strongerAuthRequired") {
                    return Err(ADError::AuthError(format!(
                        "LDAP signing is required by this domain controller. \
                         Use LDAPS (--use-ldaps) instead of plain LDAP. Original error: {}",
                        error_msg
                    )));
                }
                return Err(e);
            }
        };
        info!("get_connection: LDAP bind successful as {}", bind_identity);

        Ok(ldap)
    }
}

#[async_trait]
impl Directory for ActiveDirectoryClient {
    async fn enumerate(&self, filter: &str, attributes: &[&str]) -> Result<EntryStream> {
        let ldap = self.get_connection().await?;
        let (contexts, ldap) = ldap_naming_contexts_with_timeout(ldap, self.connect_timeout).await?;
        if contexts.is_empty() {
            ldap_unbind_with_timeout(ldap, self.connect_timeout).await;
            return Err(ADError::NotFound(
                "RootDSE did not return any namingContexts".to_string(),
            ));
        }
        debug!("enumerate: naming contexts {:?}", contexts);

        let options = self.search_options_for(attributes);
        let attrs: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
        let filter = filter.to_string();
        let (sink, stream) = EntryStream::channel(DEFAULT_STREAM_BUFFER, self.enumeration_timeout);

        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            for base_dn in &contexts {
                match ldap_paged_search_into(&mut ldap, base_dn, &filter, &attrs, &options, &sink) {
                    Ok(PagedSearchOutcome::Completed { .. }) => {}
                    Ok(PagedSearchOutcome::SizeLimited { entries, .. }) => {
                        warn!(
                            "Naming context {} truncated by the server size limit after {} entries",
                            base_dn, entries
                        );
                    }
                    Ok(PagedSearchOutcome::Cancelled { entries, .. }) => {
                        debug!("Enumeration of {} cancelled after {} entries", base_dn, entries);
                        break;
                    }
                    Err(e) => {
                        sink.blocking_send(Err(e));
                        break;
                    }
                }
            }
            if let Err(e) = ldap.unbind() {
                debug!("Unbind failed: {}", e);
            }
        });

        Ok(stream)
    }
}
