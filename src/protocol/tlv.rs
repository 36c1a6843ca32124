//! PPP configuration option lists
//!
//! An option list is a concatenation of `(tag: u8, total_len: u8, value)`
//! where `total_len` counts the two header bytes. Any structural violation
//! rejects the whole list.

use crate::{Error, Result};

/// One decoded option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// Option tag
    pub tag: u8,
    /// Option value (excluding tag and length bytes)
    pub data: &'a [u8],
}

/// Iterator over an option list, yielding an error on malformed input.
pub struct TlvReader<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Result<Tlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset == self.data.len() {
            return None;
        }

        if self.offset + 2 > self.data.len() {
            self.failed = true;
            return Some(Err(Error::Parse("truncated option header".into())));
        }

        let tag = self.data[self.offset];
        let total_len = self.data[self.offset + 1] as usize;

        if total_len < 2 || self.offset + total_len > self.data.len() {
            self.failed = true;
            return Some(Err(Error::Parse(format!(
                "bad option length {} (tag {})",
                total_len, tag
            ))));
        }

        let data = &self.data[self.offset + 2..self.offset + total_len];
        self.offset += total_len;
        Some(Ok(Tlv { tag, data }))
    }
}

/// Append one option to an option list under construction.
pub fn append_tlv(buf: &mut Vec<u8>, tag: u8, data: &[u8]) {
    buf.push(tag);
    buf.push((data.len() + 2) as u8);
    buf.extend_from_slice(data);
}

/// Append an option with a 16-bit big-endian value.
pub fn append_tlv_be16(buf: &mut Vec<u8>, tag: u8, value: u16) {
    append_tlv(buf, tag, &value.to_be_bytes());
}

/// Append an option with a 32-bit big-endian value.
pub fn append_tlv_be32(buf: &mut Vec<u8>, tag: u8, value: u32) {
    append_tlv(buf, tag, &value.to_be_bytes());
}
