//! Extra fields attached to local and central headers.
//!
//! Each record is `id (2) | length (2) | payload`. The local and central
//! copies of a record may differ, so every field exposes both forms.

use std::borrow::Cow;

use crate::error::{Result, ZipError};

use super::codec::{get_u16, get_u64};

/// Header id of the Zip64 extended information record.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Zip64 extended information: the 64-bit values behind saturated header fields.
///
/// Only present values are encoded, always in the order size, compressed
/// size, header offset. The local form never carries the header offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    pub size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
}

impl Zip64ExtendedInfo {
    /// All three values present.
    pub fn full(size: u64, compressed_size: u64, header_offset: u64) -> Self {
        Self {
            size: Some(size),
            compressed_size: Some(compressed_size),
            header_offset: Some(header_offset),
        }
    }

    pub fn local_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        for value in [self.size, self.compressed_size].into_iter().flatten() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn central_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        for value in [self.size, self.compressed_size, self.header_offset]
            .into_iter()
            .flatten()
        {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Decode the local-header form. Both sizes are mandatory.
    pub fn parse_local(payload: &[u8]) -> Result<Self> {
        if payload.len() < 16 {
            return Err(ZipError::format(format!(
                "Zip64 extra field in local header has {} bytes, sizes need 16",
                payload.len()
            )));
        }
        Ok(Self {
            size: Some(get_u64(payload, 0)),
            compressed_size: Some(get_u64(payload, 8)),
            header_offset: (payload.len() >= 24).then(|| get_u64(payload, 16)),
        })
    }

    /// Decode the central-directory form.
    ///
    /// A payload of 24 bytes or more carries all three values. Shorter
    /// payloads hold only the values whose 32-bit header field is saturated,
    /// as flagged by `saturated` (size, compressed size, header offset).
    pub fn parse_central(payload: &[u8], saturated: [bool; 3]) -> Result<Self> {
        if payload.len() >= 24 {
            return Ok(Self::full(
                get_u64(payload, 0),
                get_u64(payload, 8),
                get_u64(payload, 16),
            ));
        }

        let mut values = [None; 3];
        let mut at = 0;
        for (slot, needed) in values.iter_mut().zip(saturated) {
            if !needed {
                continue;
            }
            if at + 8 > payload.len() {
                return Err(ZipError::format(
                    "Zip64 extra field is missing a saturated value",
                ));
            }
            *slot = Some(get_u64(payload, at));
            at += 8;
        }
        let [size, compressed_size, header_offset] = values;
        Ok(Self {
            size,
            compressed_size,
            header_offset,
        })
    }
}

/// A record with an id this crate does not interpret, kept byte for byte.
///
/// Local and central payloads are independent; an unset form reads as the other one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedExtraField {
    id: u16,
    local: Option<Vec<u8>>,
    central: Option<Vec<u8>>,
}

impl UnrecognizedExtraField {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            local: None,
            central: None,
        }
    }

    pub fn with_local(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.local = Some(data.into());
        self
    }

    pub fn with_central(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.central = Some(data.into());
        self
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn local_data(&self) -> &[u8] {
        self.local
            .as_deref()
            .or(self.central.as_deref())
            .unwrap_or_default()
    }

    pub fn central_data(&self) -> &[u8] {
        self.central
            .as_deref()
            .or(self.local.as_deref())
            .unwrap_or_default()
    }
}

/// One extra-field record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64ExtendedInfo),
    Unrecognized(UnrecognizedExtraField),
}

impl ExtraField {
    pub fn header_id(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => ZIP64_EXTRA_ID,
            ExtraField::Unrecognized(field) => field.id,
        }
    }

    pub fn local_data(&self) -> Cow<'_, [u8]> {
        match self {
            ExtraField::Zip64(info) => Cow::Owned(info.local_data()),
            ExtraField::Unrecognized(field) => Cow::Borrowed(field.local_data()),
        }
    }

    pub fn central_data(&self) -> Cow<'_, [u8]> {
        match self {
            ExtraField::Zip64(info) => Cow::Owned(info.central_data()),
            ExtraField::Unrecognized(field) => Cow::Borrowed(field.central_data()),
        }
    }

    pub fn local_length(&self) -> usize {
        self.local_data().len()
    }

    pub fn central_length(&self) -> usize {
        self.central_data().len()
    }
}

/// The extra fields of one entry: insertion ordered, at most one per id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    fields: Vec<ExtraField>,
}

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `field`, replacing (in place) any record with the same id.
    pub fn add(&mut self, field: ExtraField) {
        let id = field.header_id();
        match self.fields.iter_mut().find(|f| f.header_id() == id) {
            Some(slot) => *slot = field,
            None => self.fields.push(field),
        }
    }

    pub fn get(&self, id: u16) -> Option<&ExtraField> {
        self.fields.iter().find(|f| f.header_id() == id)
    }

    pub fn remove(&mut self, id: u16) -> Option<ExtraField> {
        let index = self.fields.iter().position(|f| f.header_id() == id)?;
        Some(self.fields.remove(index))
    }

    pub fn zip64(&self) -> Option<&Zip64ExtendedInfo> {
        self.fields.iter().find_map(|f| match f {
            ExtraField::Zip64(info) => Some(info),
            ExtraField::Unrecognized(_) => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtraField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of these fields with the Zip64 record dropped.
    pub fn without_zip64(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|f| f.header_id() != ZIP64_EXTRA_ID)
                .cloned()
                .collect(),
        }
    }

    /// Serialized local-header extra block.
    pub fn local_bytes(&self) -> Result<Vec<u8>> {
        serialize(self.fields.iter().map(|f| (f.header_id(), f.local_data())))
    }

    /// Serialized central-directory extra block.
    ///
    /// When `zip64` is given it replaces the payload of the stored Zip64 record.
    pub fn central_bytes(&self, zip64: Option<&Zip64ExtendedInfo>) -> Result<Vec<u8>> {
        serialize(self.fields.iter().map(|f| match (f, zip64) {
            (ExtraField::Zip64(_), Some(info)) => (ZIP64_EXTRA_ID, Cow::Owned(info.central_data())),
            _ => (f.header_id(), f.central_data()),
        }))
    }

    /// Parse a local-header extra block.
    pub fn parse_local(data: &[u8]) -> Result<Self> {
        let mut fields = Self::new();
        for (id, payload) in records(data)? {
            let field = match id {
                ZIP64_EXTRA_ID => ExtraField::Zip64(Zip64ExtendedInfo::parse_local(payload)?),
                _ => ExtraField::Unrecognized(UnrecognizedExtraField::new(id).with_local(payload)),
            };
            fields.add(field);
        }
        Ok(fields)
    }

    /// Parse a central-directory extra block. `saturated` flags which of
    /// size, compressed size and header offset hold the Zip64 sentinel.
    pub fn parse_central(data: &[u8], saturated: [bool; 3]) -> Result<Self> {
        let mut fields = Self::new();
        for (id, payload) in records(data)? {
            let field = match id {
                ZIP64_EXTRA_ID => {
                    ExtraField::Zip64(Zip64ExtendedInfo::parse_central(payload, saturated)?)
                }
                _ => {
                    ExtraField::Unrecognized(UnrecognizedExtraField::new(id).with_central(payload))
                }
            };
            fields.add(field);
        }
        Ok(fields)
    }
}

fn records(data: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    let mut out = Vec::new();
    let mut at = 0;
    while at + 4 <= data.len() {
        let id = get_u16(data, at);
        let len = get_u16(data, at + 2) as usize;
        let start = at + 4;
        if start + len > data.len() {
            return Err(ZipError::format(format!(
                "extra field {id:#06x} declares {len} bytes but only {} remain",
                data.len() - start
            )));
        }
        out.push((id, &data[start..start + len]));
        at = start + len;
    }
    if at < data.len() {
        tracing::warn!(trailing = data.len() - at, "ignoring padding after extra fields");
    }
    Ok(out)
}

fn serialize<'a>(fields: impl Iterator<Item = (u16, Cow<'a, [u8]>)>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (id, payload) in fields {
        let len = u16::try_from(payload.len()).map_err(|_| {
            ZipError::format(format!("extra field {id:#06x} payload exceeds 65535 bytes"))
        })?;
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);
    }
    if out.len() > usize::from(u16::MAX) {
        return Err(ZipError::format("extra fields exceed 65535 bytes"));
    }
    Ok(out)
}
