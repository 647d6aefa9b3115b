//! Decompose and recompose `OP_MSG` messages with a single-document first section.

use super::{CHECKSUM_PRESENT, HEADER_LEN, OP_MSG, SECTION_SINGLE_DOCUMENT};

/// Offset of the section kind byte (header + flag bits).
const SECTION_KIND_OFFSET: usize = HEADER_LEN + 4;
/// Smallest valid BSON document: length prefix plus terminator.
const MIN_DOCUMENT_LEN: usize = 5;

/// Standard 16-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MsgHeader {
    /// Parse the header at the start of `raw`.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            length: read_i32(raw, 0),
            request_id: read_i32(raw, 4),
            response_to: read_i32(raw, 8),
            op_code: read_i32(raw, 12),
        })
    }
}

/// Borrowed view of an `OP_MSG` whose first section is a single document.
///
/// `trailing` holds every byte after that document: further sections and
/// the optional checksum, kept opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMsg<'a> {
    pub header: MsgHeader,
    pub flags: u32,
    pub section_kind: u8,
    pub document: &'a [u8],
    pub trailing: &'a [u8],
}

impl<'a> OpMsg<'a> {
    /// Split `raw` into its parts, or `None` if it is not the rewritable shape.
    ///
    /// Anything that is not an `OP_MSG`, whose declared length disagrees with
    /// the buffer, or whose first section is not a well-bounded single
    /// document is left for opaque passthrough.
    pub fn decompose(raw: &'a [u8]) -> Option<Self> {
        let header = MsgHeader::parse(raw)?;
        if header.op_code != OP_MSG || header.length as usize != raw.len() {
            return None;
        }
        if raw.len() < SECTION_KIND_OFFSET + 1 + MIN_DOCUMENT_LEN {
            return None;
        }

        let flags = u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]);
        let section_kind = raw[SECTION_KIND_OFFSET];
        if section_kind != SECTION_SINGLE_DOCUMENT {
            return None;
        }

        let doc_start = SECTION_KIND_OFFSET + 1;
        let doc_len = read_i32(raw, doc_start);
        if doc_len < MIN_DOCUMENT_LEN as i32 {
            return None;
        }
        let doc_end = doc_start.checked_add(doc_len as usize)?;
        if doc_end > raw.len() {
            return None;
        }

        Some(Self {
            header,
            flags,
            section_kind,
            document: &raw[doc_start..doc_end],
            trailing: &raw[doc_end..],
        })
    }

    /// Same message carrying a different document.
    pub fn with_document<'b>(&self, document: &'b [u8]) -> OpMsg<'b>
    where
        'a: 'b,
    {
        OpMsg {
            header: self.header,
            flags: self.flags,
            section_kind: self.section_kind,
            document,
            trailing: self.trailing,
        }
    }

    /// Drop a trailing checksum that no longer matches rewritten content.
    pub fn without_checksum(mut self) -> Self {
        if self.flags & CHECKSUM_PRESENT != 0 && self.trailing.len() >= 4 {
            self.trailing = &self.trailing[..self.trailing.len() - 4];
            self.flags &= !CHECKSUM_PRESENT;
        }
        self
    }

    /// Serialize back to bytes with a freshly computed length.
    pub fn to_bytes(&self) -> Vec<u8> {
        recompose(
            &self.header,
            self.flags,
            self.section_kind,
            self.document,
            self.trailing,
        )
    }

    /// Encode a plain command (`flags = 0`, one document, no trailer).
    pub fn command(request_id: i32, document: &[u8]) -> Vec<u8> {
        let header = MsgHeader {
            length: 0,
            request_id,
            response_to: 0,
            op_code: OP_MSG,
        };
        recompose(&header, 0, SECTION_SINGLE_DOCUMENT, document, &[])
    }
}

/// Build an `OP_MSG` from its parts. `header.length` is ignored and recomputed.
pub fn recompose(
    header: &MsgHeader,
    flags: u32,
    section_kind: u8,
    document: &[u8],
    trailing: &[u8],
) -> Vec<u8> {
    let total = HEADER_LEN + 4 + 1 + document.len() + trailing.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as i32).to_le_bytes());
    buf.extend_from_slice(&header.request_id.to_le_bytes());
    buf.extend_from_slice(&header.response_to.to_le_bytes());
    buf.extend_from_slice(&header.op_code.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.push(section_kind);
    buf.extend_from_slice(document);
    buf.extend_from_slice(trailing);
    buf
}

fn read_i32(raw: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}
