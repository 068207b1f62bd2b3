//! Security Descriptor Decoding (MS-DTYP)
//!
//! Turns the raw bytes of `nTSecurityDescriptor`,
//! `msDS-AllowedToActOnBehalfOfOtherIdentity` and `objectSid` into the
//! structures the auditors consume. Only the parts needed to locate trustee
//! SIDs are decoded; access masks and flags are kept for context.
//!
//! Every ACE carries the ordinal index it had in its ACL so findings can
//! point at the exact position in the original structure.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::DecodeError;

/// SE_DACL_PRESENT control bit
pub const SE_DACL_PRESENT: u16 = 0x0004;
/// SE_SACL_PRESENT control bit
pub const SE_SACL_PRESENT: u16 = 0x0010;
/// SE_SELF_RELATIVE control bit
pub const SE_SELF_RELATIVE: u16 = 0x8000;

/// ACE Type constants (MS-DTYP 2.4.4.1)
pub mod ace_types {
    pub const ACCESS_ALLOWED: u8 = 0x00;
    pub const ACCESS_DENIED: u8 = 0x01;
    pub const SYSTEM_AUDIT: u8 = 0x02;
    pub const SYSTEM_ALARM: u8 = 0x03;
    pub const ACCESS_ALLOWED_OBJECT: u8 = 0x05;
    pub const ACCESS_DENIED_OBJECT: u8 = 0x06;
    pub const SYSTEM_AUDIT_OBJECT: u8 = 0x07;
    pub const SYSTEM_ALARM_OBJECT: u8 = 0x08;
    pub const ACCESS_ALLOWED_CALLBACK_OBJECT: u8 = 0x0B;
    pub const ACCESS_DENIED_CALLBACK_OBJECT: u8 = 0x0C;
    pub const SYSTEM_AUDIT_CALLBACK_OBJECT: u8 = 0x0F;
    pub const SYSTEM_ALARM_CALLBACK_OBJECT: u8 = 0x10;

    /// Object ACEs carry a flags field and optional GUIDs before the SID.
    pub fn is_object_ace(ace_type: u8) -> bool {
        matches!(
            ace_type,
            ACCESS_ALLOWED_OBJECT
                | ACCESS_DENIED_OBJECT
                | SYSTEM_AUDIT_OBJECT
                | SYSTEM_ALARM_OBJECT
                | ACCESS_ALLOWED_CALLBACK_OBJECT
                | ACCESS_DENIED_CALLBACK_OBJECT
                | SYSTEM_AUDIT_CALLBACK_OBJECT
                | SYSTEM_ALARM_CALLBACK_OBJECT
        )
    }
}

const ACE_OBJECT_TYPE_PRESENT: u32 = 0x01;
const ACE_INHERITED_OBJECT_TYPE_PRESENT: u32 = 0x02;

/// Which access-control list an ACE belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AclKind {
    Discretionary,
    System,
}

impl fmt::Display for AclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclKind::Discretionary => write!(f, "DACL"),
            AclKind::System => write!(f, "SACL"),
        }
    }
}

/// Decoded self-relative security descriptor (MS-DTYP 2.4.6)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    pub revision: u8,
    pub control_flags: u16,
    pub owner_sid: Option<String>,
    pub group_sid: Option<String>,
    /// `None` when the descriptor carries no DACL
    pub dacl: Option<Vec<AceEntry>>,
    /// `None` when the descriptor carries no SACL
    pub sacl: Option<Vec<AceEntry>>,
}

impl SecurityDescriptor {
    pub fn acl(&self, kind: AclKind) -> Option<&[AceEntry]> {
        match kind {
            AclKind::Discretionary => self.dacl.as_deref(),
            AclKind::System => self.sacl.as_deref(),
        }
    }
}

/// One Access Control Entry in a DACL or SACL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceEntry {
    /// Position of the ACE within its ACL, starting at 0
    pub index: usize,
    pub ace_type: u8,
    pub ace_flags: u8,
    pub access_mask: u32,
    pub trustee_sid: String,
}

/// Decoder for the binary structures found on directory objects.
///
/// Implementations must be pure: the scan calls them from several workers
/// at once.
pub trait DescriptorDecoder: Send + Sync {
    /// Decode a self-relative security descriptor.
    fn decode_security_descriptor(&self, bytes: &[u8]) -> Result<SecurityDescriptor, DecodeError>;

    /// Decode a binary SID into its `S-1-...` form.
    fn decode_sid(&self, bytes: &[u8]) -> Result<String, DecodeError>;
}

/// [`DescriptorDecoder`] following the MS-DTYP wire layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsDtypDecoder;

impl DescriptorDecoder for MsDtypDecoder {
    fn decode_security_descriptor(&self, bytes: &[u8]) -> Result<SecurityDescriptor, DecodeError> {
        parse_security_descriptor(bytes)
    }

    fn decode_sid(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        sid_to_string(bytes)
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Resolve a header offset; 0 means the component is absent.
fn component_at<'a>(
    bytes: &'a [u8],
    offset: usize,
    field: &'static str,
) -> Result<Option<&'a [u8]>, DecodeError> {
    if offset == 0 {
        return Ok(None);
    }
    if offset >= bytes.len() {
        return Err(DecodeError::OffsetOutOfRange {
            field,
            offset,
            len: bytes.len(),
        });
    }
    Ok(Some(&bytes[offset..]))
}

/// Parse a Windows Security Descriptor from binary format
///
/// # Format (MS-DTYP 2.4.6):
/// ```text
/// Offset  Size  Field
/// 0       1     Revision
/// 1       1     Sbz1 (padding)
/// 2       2     Control flags
/// 4       4     Owner SID offset
/// 8       4     Group SID offset
/// 12      4     SACL offset
/// 16      4     DACL offset
/// ```
pub fn parse_security_descriptor(bytes: &[u8]) -> Result<SecurityDescriptor, DecodeError> {
    if bytes.len() < 20 {
        return Err(DecodeError::Truncated {
            structure: "security descriptor",
            needed: 20,
            available: bytes.len(),
        });
    }

    let revision = bytes[0];
    let control_flags = read_u16(bytes, 2);
    let owner_offset = read_u32(bytes, 4) as usize;
    let group_offset = read_u32(bytes, 8) as usize;
    let sacl_offset = read_u32(bytes, 12) as usize;
    let dacl_offset = read_u32(bytes, 16) as usize;

    let owner_sid = component_at(bytes, owner_offset, "owner SID")?
        .map(sid_to_string)
        .transpose()?;
    let group_sid = component_at(bytes, group_offset, "group SID")?
        .map(sid_to_string)
        .transpose()?;

    let dacl = component_at(bytes, dacl_offset, "DACL")?
        .map(parse_acl)
        .transpose()?;
    let sacl = component_at(bytes, sacl_offset, "SACL")?
        .map(parse_acl)
        .transpose()?;

    Ok(SecurityDescriptor {
        revision,
        control_flags,
        owner_sid,
        group_sid,
        dacl,
        sacl,
    })
}

/// Parse an Access Control List (ACL) from binary format
///
/// # Format (MS-DTYP 2.4.5):
/// ```text
/// Offset  Size  Field
/// 0       1     Revision
/// 1       1     Sbz1 (padding)
/// 2       2     ACL size
/// 4       2     ACE count
/// 6       2     Sbz2 (padding)
/// 8       ...   ACE entries
/// ```
fn parse_acl(bytes: &[u8]) -> Result<Vec<AceEntry>, DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::Truncated {
            structure: "ACL",
            needed: 8,
            available: bytes.len(),
        });
    }

    let acl_size = read_u16(bytes, 2) as usize;
    let ace_count = read_u16(bytes, 4) as usize;
    if acl_size < 8 || acl_size > bytes.len() {
        return Err(DecodeError::Truncated {
            structure: "ACL",
            needed: acl_size.max(8),
            available: bytes.len(),
        });
    }

    let acl = &bytes[..acl_size];
    let mut aces = Vec::with_capacity(ace_count);
    let mut offset = 8;

    for index in 0..ace_count {
        if offset + 4 > acl.len() {
            return Err(DecodeError::Truncated {
                structure: "ACE header",
                needed: offset + 4,
                available: acl.len(),
            });
        }

        let ace_size = read_u16(acl, offset + 2) as usize;
        if ace_size < 8 {
            return Err(DecodeError::InvalidAceSize { index, size: ace_size });
        }
        if offset + ace_size > acl.len() {
            return Err(DecodeError::Truncated {
                structure: "ACE",
                needed: offset + ace_size,
                available: acl.len(),
            });
        }

        aces.push(parse_ace(index, &acl[offset..offset + ace_size])?);
        offset += ace_size;
    }

    Ok(aces)
}

/// Parse a single ACE: header(4) + access_mask(4) + [object fields] + SID
fn parse_ace(index: usize, data: &[u8]) -> Result<AceEntry, DecodeError> {
    let ace_type = data[0];
    let ace_flags = data[1];
    let access_mask = read_u32(data, 4);

    let sid_offset = if ace_types::is_object_ace(ace_type) {
        if data.len() < 12 {
            return Err(DecodeError::Truncated {
                structure: "object ACE",
                needed: 12,
                available: data.len(),
            });
        }
        let object_flags = read_u32(data, 8);
        let mut sid_offset = 12;
        if object_flags & ACE_OBJECT_TYPE_PRESENT != 0 {
            sid_offset += 16;
        }
        if object_flags & ACE_INHERITED_OBJECT_TYPE_PRESENT != 0 {
            sid_offset += 16;
        }
        sid_offset
    } else {
        8
    };

    if sid_offset >= data.len() {
        return Err(DecodeError::Truncated {
            structure: "SID",
            needed: sid_offset + 8,
            available: data.len(),
        });
    }

    Ok(AceEntry {
        index,
        ace_type,
        ace_flags,
        access_mask,
        trustee_sid: sid_to_string(&data[sid_offset..])?,
    })
}

/// Convert a binary SID to string format (S-1-5-21-...)
///
/// # Format (MS-DTYP 2.4.2):
/// ```text
/// Offset  Size  Field
/// 0       1     Revision
/// 1       1     SubAuthorityCount
/// 2       6     IdentifierAuthority
/// 8       4*N   SubAuthorities (N = SubAuthorityCount)
/// ```
pub fn sid_to_string(bytes: &[u8]) -> Result<String, DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::Truncated {
            structure: "SID",
            needed: 8,
            available: bytes.len(),
        });
    }

    let revision = bytes[0];
    if revision != 1 {
        return Err(DecodeError::UnsupportedRevision(revision));
    }

    let sub_auth_count = bytes[1];
    if sub_auth_count > 15 {
        return Err(DecodeError::TooManySubAuthorities(sub_auth_count));
    }

    let needed = 8 + sub_auth_count as usize * 4;
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            structure: "SID",
            needed,
            available: bytes.len(),
        });
    }

    // 48-bit identifier authority (big-endian)
    let id_auth = u64::from_be_bytes([
        0, 0, bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);

    let mut sid = if id_auth >= 1 << 32 {
        format!("S-{}-0x{:012X}", revision, id_auth)
    } else {
        format!("S-{}-{}", revision, id_auth)
    };

    for i in 0..sub_auth_count as usize {
        sid.push_str(&format!("-{}", read_u32(bytes, 8 + i * 4)));
    }

    Ok(sid)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode an `S-1-...` string as a binary SID.
    pub(crate) fn sid_bytes(sid: &str) -> Vec<u8> {
        let parts: Vec<&str> = sid.split('-').collect();
        let authority: u64 = parts[2].parse().unwrap();
        let subs: Vec<u32> = parts[3..].iter().map(|p| p.parse().unwrap()).collect();

        let mut out = vec![1u8, subs.len() as u8];
        out.extend_from_slice(&authority.to_be_bytes()[2..]);
        for sub in subs {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    pub(crate) fn ace(ace_type: u8, sid: &str) -> Vec<u8> {
        let sid = sid_bytes(sid);
        let size = 8 + sid.len();
        let mut out = vec![ace_type, 0];
        out.extend_from_slice(&(size as u16).to_le_bytes());
        out.extend_from_slice(&0x000F_01FFu32.to_le_bytes());
        out.extend(sid);
        out
    }

    pub(crate) fn object_ace(ace_type: u8, object_flags: u32, sid: &str) -> Vec<u8> {
        let sid = sid_bytes(sid);
        let guids = [ACE_OBJECT_TYPE_PRESENT, ACE_INHERITED_OBJECT_TYPE_PRESENT]
            .iter()
            .filter(|bit| object_flags & **bit != 0)
            .count();
        let size = 12 + guids * 16 + sid.len();
        let mut out = vec![ace_type, 0];
        out.extend_from_slice(&(size as u16).to_le_bytes());
        out.extend_from_slice(&0x0000_0100u32.to_le_bytes());
        out.extend_from_slice(&object_flags.to_le_bytes());
        out.extend(std::iter::repeat(0xAB).take(guids * 16));
        out.extend(sid);
        out
    }

    pub(crate) fn acl(aces: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = aces.concat();
        let size = 8 + body.len();
        let mut out = vec![2u8, 0];
        out.extend_from_slice(&(size as u16).to_le_bytes());
        out.extend_from_slice(&(aces.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend(body);
        out
    }

    pub(crate) fn descriptor(dacl: Option<Vec<u8>>, sacl: Option<Vec<u8>>) -> Vec<u8> {
        let owner = sid_bytes("S-1-5-32-544");
        let mut control = SE_SELF_RELATIVE;
        let mut out = vec![0u8; 20];
        out[0] = 1;

        let owner_offset = out.len() as u32;
        out.extend(&owner);

        let mut sacl_offset = 0u32;
        if let Some(sacl) = sacl {
            control |= SE_SACL_PRESENT;
            sacl_offset = out.len() as u32;
            out.extend(sacl);
        }
        let mut dacl_offset = 0u32;
        if let Some(dacl) = dacl {
            control |= SE_DACL_PRESENT;
            dacl_offset = out.len() as u32;
            out.extend(dacl);
        }

        out[2..4].copy_from_slice(&control.to_le_bytes());
        out[4..8].copy_from_slice(&owner_offset.to_le_bytes());
        out[12..16].copy_from_slice(&sacl_offset.to_le_bytes());
        out[16..20].copy_from_slice(&dacl_offset.to_le_bytes());
        out
    }

    #[test]
    fn test_sid_to_string_builtin_admins() {
        let bytes = sid_bytes("S-1-5-32-544");
        assert_eq!(sid_to_string(&bytes).unwrap(), "S-1-5-32-544");
    }

    #[test]
    fn test_sid_to_string_domain_sid() {
        let sid = "S-1-5-21-3623811015-3361044348-30300820-1013";
        assert_eq!(sid_to_string(&sid_bytes(sid)).unwrap(), sid);
    }

    #[test]
    fn test_sid_to_string_large_authority_is_hex() {
        let mut bytes = vec![1u8, 1, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(sid_to_string(&bytes).unwrap(), "S-1-0x010000000000-7");
    }

    #[test]
    fn test_sid_to_string_rejects_short_input() {
        assert_eq!(
            sid_to_string(&[1, 2, 0, 0]),
            Err(DecodeError::Truncated {
                structure: "SID",
                needed: 8,
                available: 4
            })
        );

        let mut bytes = sid_bytes("S-1-5-32-544");
        bytes.truncate(12);
        assert!(matches!(
            sid_to_string(&bytes),
            Err(DecodeError::Truncated { needed: 16, .. })
        ));
    }

    #[test]
    fn test_sid_to_string_rejects_bad_revision() {
        let mut bytes = sid_bytes("S-1-5-18");
        bytes[0] = 2;
        assert_eq!(sid_to_string(&bytes), Err(DecodeError::UnsupportedRevision(2)));
    }

    #[test]
    fn test_sid_to_string_rejects_too_many_sub_authorities() {
        let mut bytes = sid_bytes("S-1-5-18");
        bytes[1] = 16;
        bytes.extend(vec![0u8; 64]);
        assert_eq!(sid_to_string(&bytes), Err(DecodeError::TooManySubAuthorities(16)));
    }

    #[test]
    fn test_parse_descriptor_with_dacl_and_sacl() {
        let dacl = acl(&[
            ace(ace_types::ACCESS_ALLOWED, "S-1-5-18"),
            ace(ace_types::ACCESS_DENIED, "S-1-5-21-1-2-3-1104"),
        ]);
        let sacl = acl(&[ace(ace_types::SYSTEM_AUDIT, "S-1-1-0")]);
        let sd = parse_security_descriptor(&descriptor(Some(dacl), Some(sacl))).unwrap();

        assert_eq!(sd.revision, 1);
        assert_eq!(sd.owner_sid.as_deref(), Some("S-1-5-32-544"));
        assert_eq!(sd.group_sid, None);

        let dacl = sd.acl(AclKind::Discretionary).unwrap();
        assert_eq!(dacl.len(), 2);
        assert_eq!(dacl[0].index, 0);
        assert_eq!(dacl[0].trustee_sid, "S-1-5-18");
        assert_eq!(dacl[1].index, 1);
        assert_eq!(dacl[1].ace_type, ace_types::ACCESS_DENIED);
        assert_eq!(dacl[1].trustee_sid, "S-1-5-21-1-2-3-1104");

        let sacl = sd.acl(AclKind::System).unwrap();
        assert_eq!(sacl.len(), 1);
        assert_eq!(sacl[0].trustee_sid, "S-1-1-0");
    }

    #[test]
    fn test_parse_descriptor_without_sacl() {
        let dacl = acl(&[ace(ace_types::ACCESS_ALLOWED, "S-1-5-11")]);
        let sd = parse_security_descriptor(&descriptor(Some(dacl), None)).unwrap();
        assert!(sd.sacl.is_none());
        assert!(sd.acl(AclKind::System).is_none());
        assert_eq!(sd.dacl.unwrap().len(), 1);
    }

    #[test]
    fn test_parse_object_ace_skips_guids() {
        let dacl = acl(&[
            object_ace(ace_types::ACCESS_ALLOWED_OBJECT, 0x03, "S-1-5-21-9-9-9-500"),
            object_ace(ace_types::ACCESS_ALLOWED_OBJECT, 0x00, "S-1-5-9"),
            object_ace(ace_types::SYSTEM_AUDIT_OBJECT, 0x02, "S-1-5-10"),
        ]);
        let sd = parse_security_descriptor(&descriptor(Some(dacl), None)).unwrap();
        let sids: Vec<&str> = sd
            .dacl
            .as_ref()
            .unwrap()
            .iter()
            .map(|a| a.trustee_sid.as_str())
            .collect();
        assert_eq!(sids, vec!["S-1-5-21-9-9-9-500", "S-1-5-9", "S-1-5-10"]);
    }

    #[test]
    fn test_parse_descriptor_too_short() {
        assert!(matches!(
            parse_security_descriptor(&[1, 0, 4, 0x80]),
            Err(DecodeError::Truncated { structure: "security descriptor", .. })
        ));
    }

    #[test]
    fn test_parse_descriptor_offset_out_of_range() {
        let mut bytes = descriptor(None, None);
        bytes[16..20].copy_from_slice(&4096u32.to_le_bytes());
        assert!(matches!(
            parse_security_descriptor(&bytes),
            Err(DecodeError::OffsetOutOfRange { field: "DACL", offset: 4096, .. })
        ));
    }

    #[test]
    fn test_parse_acl_with_overrunning_ace() {
        let mut dacl = acl(&[ace(ace_types::ACCESS_ALLOWED, "S-1-5-18")]);
        // Claim a second ACE that is not there
        dacl[4..6].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            parse_security_descriptor(&descriptor(Some(dacl), None)),
            Err(DecodeError::Truncated { structure: "ACE header", .. })
        ));
    }

    #[test]
    fn test_parse_acl_with_zero_sized_ace() {
        let mut dacl = acl(&[ace(ace_types::ACCESS_ALLOWED, "S-1-5-18")]);
        dacl[10..12].copy_from_slice(&0u16.to_le_bytes());
        assert_eq!(
            parse_security_descriptor(&descriptor(Some(dacl), None)),
            Err(DecodeError::InvalidAceSize { index: 0, size: 0 })
        );
    }

    #[test]
    fn test_empty_acl_is_present_but_empty() {
        let sd = parse_security_descriptor(&descriptor(Some(acl(&[])), None)).unwrap();
        assert_eq!(sd.dacl, Some(Vec::new()));
    }

    #[test]
    fn test_decoder_trait_delegates() {
        let decoder = MsDtypDecoder;
        assert_eq!(decoder.decode_sid(&sid_bytes("S-1-5-7")).unwrap(), "S-1-5-7");
        assert!(decoder.decode_security_descriptor(&[]).is_err());
    }

    #[test]
    fn test_acl_kind_display() {
        assert_eq!(AclKind::Discretionary.to_string(), "DACL");
        assert_eq!(AclKind::System.to_string(), "SACL");
    }
}
