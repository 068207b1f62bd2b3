//! Directory access abstraction
//!
//! The audit only needs one capability from the directory: "run this filter
//! over every naming context and hand me the entries lazily". [`Directory`]
//! captures that, [`crate::ad_client::ActiveDirectoryClient`] implements it
//! over LDAP, and [`InMemoryDirectory`] serves a fixed entry set.
//!
//! Entries flow through a bounded channel so a slow consumer applies
//! back-pressure to the producer, and dropping the [`EntryStream`] tells the
//! producer to stop issuing requests.

use async_trait::async_trait;
use ldap3::SearchEntry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::errors::{ADError, Result};

/// Default number of entries buffered between producer and consumer
pub const DEFAULT_STREAM_BUFFER: usize = 1024;

/// Filter used to discover every object carrying a SID
pub const SID_OWNER_FILTER: &str = "(&(objectClass=*)(objectSid=*))";
/// Filter used to scan every object
pub const ALL_OBJECTS_FILTER: &str = "(objectClass=*)";

#[async_trait]
pub trait Directory: Send + Sync {
    /// Whole-subtree search of every naming context.
    async fn enumerate(&self, filter: &str, attributes: &[&str]) -> Result<EntryStream>;
}

/// One object returned by a directory search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs
            .entry(name.to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_bin_attr(mut self, name: &str, value: Vec<u8>) -> Self {
        self.bin_attrs.entry(name.to_string()).or_default().push(value);
        self
    }

    /// String values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Raw values of `name`, matched case-insensitively.
    ///
    /// ldap3 files a value under `attrs` when it happens to be valid UTF-8,
    /// which short binary SIDs often are, so string values are returned as
    /// bytes when no binary value exists.
    pub fn raw_values(&self, name: &str) -> Vec<&[u8]> {
        let binary = self
            .bin_attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.iter().map(Vec::as_slice).collect::<Vec<_>>())
            .unwrap_or_default();
        if !binary.is_empty() {
            return binary;
        }
        self.values(name).iter().map(|v| v.as_bytes()).collect()
    }

    pub fn first_raw(&self, name: &str) -> Option<&[u8]> {
        self.raw_values(name).into_iter().next()
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// `distinguishedName` attribute when present, the entry DN otherwise.
    pub fn distinguished_name(&self) -> &str {
        self.first_value("distinguishedName").unwrap_or(&self.dn)
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
            bin_attrs: entry.bin_attrs,
        }
    }
}

/// Producer half of an [`EntryStream`].
#[derive(Debug, Clone)]
pub struct EntrySender {
    tx: mpsc::Sender<Result<DirectoryEntry>>,
}

impl EntrySender {
    /// Send from async code. Returns `false` once the consumer is gone.
    pub async fn send(&self, item: Result<DirectoryEntry>) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Send from a blocking thread. Returns `false` once the consumer is gone.
    pub fn blocking_send(&self, item: Result<DirectoryEntry>) -> bool {
        self.tx.blocking_send(item).is_ok()
    }

    /// True once the [`EntryStream`] has been dropped.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lazy sequence of directory entries with a per-item deadline.
#[derive(Debug)]
pub struct EntryStream {
    rx: mpsc::Receiver<Result<DirectoryEntry>>,
    item_timeout: Duration,
    yielded: usize,
    failed: bool,
}

impl EntryStream {
    /// Create a connected sender/stream pair.
    pub fn channel(buffer: usize, item_timeout: Duration) -> (EntrySender, EntryStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            EntrySender { tx },
            EntryStream {
                rx,
                item_timeout,
                yielded: 0,
                failed: false,
            },
        )
    }

    /// Stream over a fixed set of entries.
    pub fn from_entries(entries: Vec<DirectoryEntry>, item_timeout: Duration) -> EntryStream {
        let (tx, stream) = Self::channel(entries.len(), item_timeout);
        for entry in entries {
            // Capacity matches the entry count, so this never blocks
            let _ = tx.tx.try_send(Ok(entry));
        }
        stream
    }

    /// Next entry, `Ok(None)` at the end of the enumeration.
    ///
    /// Waiting longer than the item timeout closes the stream (which
    /// cancels the producer) and returns [`ADError::Timeout`]. After an
    /// error the stream is finished.
    pub async fn next(&mut self) -> Result<Option<DirectoryEntry>> {
        if self.failed {
            return Ok(None);
        }
        match timeout(self.item_timeout, self.rx.recv()).await {
            Ok(Some(Ok(entry))) => {
                self.yielded += 1;
                Ok(Some(entry))
            }
            Ok(Some(Err(err))) => {
                self.abort();
                Err(err)
            }
            Ok(None) => Ok(None),
            Err(_) => {
                self.abort();
                Err(ADError::Timeout(format!(
                    "no directory entry received within {} seconds",
                    self.item_timeout.as_secs()
                )))
            }
        }
    }

    /// Stop the producer; buffered entries are discarded.
    pub fn abort(&mut self) {
        self.failed = true;
        self.rx.close();
    }

    /// Entries handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }
}

/// [`Directory`] over a fixed set of entries.
///
/// `SID_OWNER_FILTER` selects entries carrying an `objectSid`; every other
/// filter selects all entries. Only the requested attributes are returned.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    entries: Vec<DirectoryEntry>,
    /// filter -> (entries delivered before failing, error message)
    failures: HashMap<String, (usize, String)>,
    item_timeout: Duration,
}

impl InMemoryDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries,
            failures: HashMap::new(),
            item_timeout: Duration::from_secs(5),
        }
    }

    /// Make enumerations of `filter` fail with a connection error after
    /// `after` entries (0 fails the enumerate call itself).
    pub fn with_failure(mut self, filter: &str, after: usize, message: &str) -> Self {
        self.failures
            .insert(filter.to_string(), (after, message.to_string()));
        self
    }

    fn project(entry: &DirectoryEntry, attributes: &[&str]) -> DirectoryEntry {
        let wanted = |name: &String| attributes.iter().any(|a| a.eq_ignore_ascii_case(name));
        DirectoryEntry {
            dn: entry.dn.clone(),
            attrs: entry
                .attrs
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
            bin_attrs: entry
                .bin_attrs
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn enumerate(&self, filter: &str, attributes: &[&str]) -> Result<EntryStream> {
        let failure = self.failures.get(filter);
        if let Some((0, message)) = failure {
            return Err(ADError::ConnectionError(message.clone()));
        }

        let selected: Vec<DirectoryEntry> = self
            .entries
            .iter()
            .filter(|e| filter != SID_OWNER_FILTER || !e.raw_values("objectSid").is_empty())
            .map(|e| Self::project(e, attributes))
            .collect();

        let (sink, stream) = EntryStream::channel(selected.len() + 1, self.item_timeout);
        for (delivered, entry) in selected.into_iter().enumerate() {
            if let Some((after, message)) = failure {
                if delivered == *after {
                    sink.send(Err(ADError::ConnectionError(message.clone()))).await;
                    return Ok(stream);
                }
            }
            sink.send(Ok(entry)).await;
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let entry = DirectoryEntry::new("CN=host,DC=corp,DC=local")
            .with_attr("distinguishedName", "CN=host,DC=corp,DC=local")
            .with_bin_attr("nTSecurityDescriptor", vec![1, 2, 3]);

        assert_eq!(entry.first_value("DISTINGUISHEDNAME"), Some("CN=host,DC=corp,DC=local"));
        assert_eq!(entry.first_raw("ntsecuritydescriptor"), Some(&[1u8, 2, 3][..]));
        assert!(entry.first_raw("msDS-AllowedToActOnBehalfOfOtherIdentity").is_none());
    }

    #[test]
    fn test_raw_values_fall_back_to_string_values() {
        let entry = DirectoryEntry::new("CN=x").with_attr("objectSid", "\u{1}\u{2}");
        assert_eq!(entry.raw_values("objectSid"), vec![&[1u8, 2][..]]);
    }

    #[test]
    fn test_distinguished_name_falls_back_to_entry_dn() {
        let entry = DirectoryEntry::new("CN=only-dn");
        assert_eq!(entry.distinguished_name(), "CN=only-dn");
    }

    #[tokio::test]
    async fn test_stream_yields_entries_then_ends() {
        let mut stream = EntryStream::from_entries(
            vec![DirectoryEntry::new("CN=a"), DirectoryEntry::new("CN=b")],
            Duration::from_secs(5),
        );
        assert_eq!(stream.next().await.unwrap().unwrap().dn, "CN=a");
        assert_eq!(stream.next().await.unwrap().unwrap().dn, "CN=b");
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(stream.yielded(), 2);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut stream = EntryStream::from_entries(Vec::new(), Duration::from_secs(5));
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_producer_error_finishes_stream() {
        let (tx, mut stream) = EntryStream::channel(4, Duration::from_secs(5));
        assert!(tx.send(Ok(DirectoryEntry::new("CN=a"))).await);
        assert!(tx.send(Err(ADError::QueryError("rejected".to_string()))).await);
        assert!(tx.send(Ok(DirectoryEntry::new("CN=never"))).await);

        assert!(stream.next().await.unwrap().is_some());
        assert!(matches!(stream.next().await, Err(ADError::QueryError(_))));
        assert!(stream.next().await.unwrap().is_none());
        assert!(tx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_producer_times_out_and_is_cancelled() {
        let (tx, mut stream) = EntryStream::channel(4, Duration::from_secs(30));
        let result = stream.next().await;
        assert!(matches!(result, Err(ADError::Timeout(_))));
        assert!(tx.is_cancelled());
        assert!(!tx.send(Ok(DirectoryEntry::new("CN=late"))).await);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_sender() {
        let (tx, stream) = EntryStream::channel(1, Duration::from_secs(5));
        assert!(!tx.is_cancelled());
        drop(stream);
        assert!(tx.is_cancelled());
    }

    #[tokio::test]
    async fn test_in_memory_directory_filters_and_projects() {
        let directory = InMemoryDirectory::new(vec![
            DirectoryEntry::new("CN=user")
                .with_attr("distinguishedName", "CN=user")
                .with_bin_attr("objectSid", vec![1, 0, 0, 0, 0, 0, 0, 5])
                .with_attr("description", "ignored"),
            DirectoryEntry::new("CN=container").with_attr("distinguishedName", "CN=container"),
        ]);

        let mut sids = directory
            .enumerate(SID_OWNER_FILTER, &["distinguishedName", "objectSid"])
            .await
            .unwrap();
        let user = sids.next().await.unwrap().unwrap();
        assert_eq!(user.dn, "CN=user");
        assert!(user.values("description").is_empty());
        assert!(sids.next().await.unwrap().is_none());

        let mut all = directory
            .enumerate(ALL_OBJECTS_FILTER, &["distinguishedName"])
            .await
            .unwrap();
        assert!(all.next().await.unwrap().is_some());
        assert!(all.next().await.unwrap().is_some());
        assert!(all.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_directory_failures() {
        let directory = InMemoryDirectory::new(vec![
            DirectoryEntry::new("CN=a"),
            DirectoryEntry::new("CN=b"),
        ])
        .with_failure(ALL_OBJECTS_FILTER, 1, "connection reset")
        .with_failure(SID_OWNER_FILTER, 0, "unreachable");

        assert!(directory.enumerate(SID_OWNER_FILTER, &[]).await.is_err());

        let mut stream = directory.enumerate(ALL_OBJECTS_FILTER, &[]).await.unwrap();
        assert!(stream.next().await.unwrap().is_some());
        assert!(matches!(stream.next().await, Err(ADError::ConnectionError(_))));
    }
}
