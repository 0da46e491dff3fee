//! Minimal EXIF writer for provenance tags.
//!
//! Builds a little-endian TIFF structure holding IFD0 and an Exif sub-IFD,
//! wraps it in an APP1 segment and splices it into an encoded JPEG. Only
//! the handful of tags the finalizer writes are supported.

use crate::error::ExifError;

pub const TAG_SOFTWARE: u16 = 0x0131;
pub const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
pub const TAG_USER_COMMENT: u16 = 0x9286;
pub const TAG_XP_COMMENT: u16 = 0x9C9C;
pub const TAG_XP_AUTHOR: u16 = 0x9C9D;

const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";
const TIFF_HEADER_LEN: u32 = 8;
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize;

const MARKER_SOI: [u8; 2] = [0xFF, 0xD8];
const MARKER_APP0: [u8; 2] = [0xFF, 0xE0];
const MARKER_APP1: [u8; 2] = [0xFF, 0xE1];

/// Provenance strings to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifTags {
    /// Written to `Software`.
    pub software: String,
    /// Written to both `UserComment` and `XPComment`.
    pub comment: String,
    /// Written to `XPAuthor`.
    pub author: String,
}

#[derive(Debug, Clone)]
enum Value {
    Ascii(String),
    Byte(Vec<u8>),
    Long(u32),
    Undefined(Vec<u8>),
}

impl Value {
    fn type_code(&self) -> u16 {
        match self {
            Self::Byte(_) => 1,
            Self::Ascii(_) => 2,
            Self::Long(_) => 4,
            Self::Undefined(_) => 7,
        }
    }

    fn count(&self) -> u32 {
        match self {
            Self::Ascii(s) => s.len() as u32 + 1,
            Self::Byte(b) | Self::Undefined(b) => b.len() as u32,
            Self::Long(_) => 1,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Ascii(s) => {
                let mut out = s.as_bytes().to_vec();
                out.push(0);
                out
            }
            Self::Byte(b) | Self::Undefined(b) => b.clone(),
            Self::Long(v) => v.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    value: Value,
}

/// Bytes an IFD occupies including its out-of-line values.
fn ifd_len(entries: &[Entry]) -> u32 {
    let table = 2 + 12 * entries.len() as u32 + 4;
    let data: u32 = entries
        .iter()
        .map(|e| e.value.bytes().len() as u32)
        .filter(|&len| len > 4)
        .map(|len| len + (len & 1))
        .sum();
    table + data
}

/// Append an IFD at the current end of `buf`. Offsets are relative to the
/// start of `buf`, which must be the TIFF header.
fn write_ifd(buf: &mut Vec<u8>, entries: &[Entry], next_ifd: u32) {
    let start = buf.len() as u32;
    let data_start = start + 2 + 12 * entries.len() as u32 + 4;
    let mut data = Vec::new();

    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.tag.to_le_bytes());
        buf.extend_from_slice(&entry.value.type_code().to_le_bytes());
        buf.extend_from_slice(&entry.value.count().to_le_bytes());

        let bytes = entry.value.bytes();
        if bytes.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..bytes.len()].copy_from_slice(&bytes);
            buf.extend_from_slice(&inline);
        } else {
            let offset = data_start + data.len() as u32;
            buf.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&bytes);
            if data.len() % 2 == 1 {
                data.push(0);
            }
        }
    }
    buf.extend_from_slice(&next_ifd.to_le_bytes());
    buf.extend_from_slice(&data);
}

/// UTF-16LE with a terminating NUL, as Windows `XP*` tags expect.
fn utf16_le(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// `UserComment` payload: 8-byte character code followed by the text.
fn user_comment(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        let mut out = b"ASCII\0\0\0".to_vec();
        out.extend_from_slice(text.as_bytes());
        out
    } else {
        let mut out = b"UNICODE\0".to_vec();
        out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        out
    }
}

/// Serialize `tags` into a TIFF structure (without the `Exif` header).
pub fn build_tiff(tags: &ExifTags) -> Vec<u8> {
    let exif_entries = vec![Entry {
        tag: TAG_USER_COMMENT,
        value: Value::Undefined(user_comment(&tags.comment)),
    }];

    let mut ifd0 = vec![
        Entry {
            tag: TAG_SOFTWARE,
            value: Value::Ascii(tags.software.clone()),
        },
        Entry {
            tag: TAG_EXIF_IFD_POINTER,
            value: Value::Long(0),
        },
        Entry {
            tag: TAG_XP_COMMENT,
            value: Value::Byte(utf16_le(&tags.comment)),
        },
        Entry {
            tag: TAG_XP_AUTHOR,
            value: Value::Byte(utf16_le(&tags.author)),
        },
    ];
    ifd0.sort_by_key(|e| e.tag);

    let exif_offset = TIFF_HEADER_LEN + ifd_len(&ifd0);
    for entry in &mut ifd0 {
        if entry.tag == TAG_EXIF_IFD_POINTER {
            entry.value = Value::Long(exif_offset);
        }
    }

    let mut buf = Vec::with_capacity((exif_offset + ifd_len(&exif_entries)) as usize);
    buf.extend_from_slice(b"II");
    buf.extend_from_slice(&42u16.to_le_bytes());
    buf.extend_from_slice(&TIFF_HEADER_LEN.to_le_bytes());
    write_ifd(&mut buf, &ifd0, 0);
    write_ifd(&mut buf, &exif_entries, 0);
    buf
}

fn payload_len(tiff: &[u8]) -> usize {
    2 + EXIF_HEADER.len() + tiff.len()
}

/// Shorten the comment so the segment fits, keeping whole characters.
/// Returns `None` when the other tags alone are too large.
fn fit_comment(tags: &ExifTags) -> Option<ExifTags> {
    let empty = ExifTags {
        comment: String::new(),
        ..tags.clone()
    };
    // An empty XPComment is stored inline; a non-empty one adds its NUL
    // terminator and up to two pad bytes.
    let budget = MAX_SEGMENT_PAYLOAD.checked_sub(payload_len(&build_tiff(&empty)) + 4)?;

    // Bytes per UTF-16 unit: two in XPComment plus one (ASCII) or two
    // (UNICODE) in UserComment.
    let per_unit = if tags.comment.is_ascii() { 3 } else { 4 };
    let mut used = 0;
    let end = tags
        .comment
        .char_indices()
        .find_map(|(at, c)| {
            used += per_unit * c.len_utf16();
            (used > budget).then_some(at)
        })
        .unwrap_or(tags.comment.len());

    Some(ExifTags {
        comment: tags.comment[..end].to_string(),
        ..tags.clone()
    })
}

/// Build the complete APP1 segment, marker included.
///
/// A comment too long for one segment is truncated.
pub fn build_app1(tags: &ExifTags) -> Result<Vec<u8>, ExifError> {
    let mut tiff = build_tiff(tags);
    if payload_len(&tiff) > MAX_SEGMENT_PAYLOAD {
        if let Some(fitted) = fit_comment(tags) {
            tracing::warn!(
                comment_len = tags.comment.len(),
                kept = fitted.comment.len(),
                "Provenance comment truncated to fit the EXIF segment",
            );
            tiff = build_tiff(&fitted);
        }
    }

    let payload_len = payload_len(&tiff);
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(ExifError::TooLarge(payload_len));
    }

    let mut segment = Vec::with_capacity(payload_len + 2);
    segment.extend_from_slice(&MARKER_APP1);
    segment.extend_from_slice(&(payload_len as u16).to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(&tiff);
    Ok(segment)
}

/// Insert an EXIF segment into `jpeg`, after SOI and any JFIF APP0 segment.
pub fn embed(jpeg: &[u8], tags: &ExifTags) -> Result<Vec<u8>, ExifError> {
    if !jpeg.starts_with(&MARKER_SOI) {
        return Err(ExifError::NotJpeg);
    }

    let mut insert_at = MARKER_SOI.len();
    if jpeg.get(2..4) == Some(&MARKER_APP0[..]) {
        if let Some(len) = jpeg.get(4..6) {
            let app0_len = u16::from_be_bytes([len[0], len[1]]) as usize;
            insert_at = (4 + app0_len).min(jpeg.len());
        }
    }

    let segment = build_app1(tags)?;
    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&segment);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
