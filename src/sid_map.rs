//! SID Map
//!
//! The authoritative set of SIDs that currently mean something in the
//! domain: the well-known identities plus the `objectSid` of every object
//! the directory returns. Anything referenced by an ACL but absent from
//! this map is a trace of a principal that no longer exists.
//!
//! The map is filled once through [`SidMapBuilder`] and is read-only
//! afterwards, so it can be shared across scan workers behind an `Arc`.

use std::collections::HashMap;

use crate::errors::DecodeError;
use crate::security_descriptor::DescriptorDecoder;

/// Immutable SID -> origin label lookup.
///
/// The label is either a well-known identity name or the distinguished
/// name of the object owning the SID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidKnowledgeBase {
    sids: HashMap<String, String>,
    dropped: usize,
}

impl SidKnowledgeBase {
    /// Start a build seeded with `well_known`.
    pub fn builder<W>(well_known: W) -> SidMapBuilder
    where
        W: IntoIterator<Item = (String, String)>,
    {
        SidMapBuilder {
            sids: well_known.into_iter().collect(),
            dropped: 0,
        }
    }

    /// Build from the well-known set and a discovered sequence in one pass.
    ///
    /// Discovered entries overwrite well-known ones with the same SID.
    /// Entries whose SID failed to parse are dropped.
    pub fn build<W, D>(well_known: W, discovered: D) -> Self
    where
        W: IntoIterator<Item = (String, String)>,
        D: IntoIterator<Item = Result<(String, String), DecodeError>>,
    {
        let mut builder = Self::builder(well_known);
        for entry in discovered {
            match entry {
                Ok((sid, label)) => builder.insert(sid, label),
                Err(_) => builder.drop_entry(),
            }
        }
        builder.finish()
    }

    pub fn exists(&self, sid: &str) -> bool {
        self.sids.contains_key(sid)
    }

    /// Origin label for `sid`, `None` when the SID is unknown.
    pub fn label(&self, sid: &str) -> Option<&str> {
        self.sids.get(sid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    /// Number of discovered entries dropped because their SID was malformed.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Write phase of a [`SidKnowledgeBase`].
#[derive(Debug, Default)]
pub struct SidMapBuilder {
    sids: HashMap<String, String>,
    dropped: usize,
}

impl SidMapBuilder {
    /// Insert or overwrite (last write wins).
    pub fn insert(&mut self, sid: String, label: String) {
        self.sids.insert(sid, label);
    }

    /// Decode a binary `objectSid` and insert it under `distinguished_name`.
    ///
    /// A malformed SID is dropped and the error handed back so the caller
    /// can count or log it; the map is left untouched.
    pub fn insert_raw(
        &mut self,
        distinguished_name: &str,
        raw_sid: &[u8],
        decoder: &dyn DescriptorDecoder,
    ) -> Result<(), DecodeError> {
        match decoder.decode_sid(raw_sid) {
            Ok(sid) => {
                self.insert(sid, distinguished_name.to_string());
                Ok(())
            }
            Err(err) => {
                self.drop_entry();
                Err(err)
            }
        }
    }

    fn drop_entry(&mut self) {
        self.dropped += 1;
    }

    pub fn len(&self) -> usize {
        self.sids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    pub fn finish(self) -> SidKnowledgeBase {
        SidKnowledgeBase {
            sids: self.sids,
            dropped: self.dropped,
        }
    }
}
