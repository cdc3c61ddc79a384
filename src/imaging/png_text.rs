//! PNG text chunks.
//!
//! Chunk layout (all integers big-endian):
//!
//! ```text
//! length:u32  type:[u8;4]  data:[u8; length]  crc:u32 (over type + data)
//! ```
//!
//! `tEXt` data is `keyword NUL text`, both Latin-1. `iTXt` data is
//! `keyword NUL flag:u8 method:u8 language NUL translated NUL text` with UTF-8
//! text; only the uncompressed form (flag 0) is written.
//!
//! Text chunks are inserted directly after `IHDR`, which is always the first
//! chunk of a valid PNG.

use super::encoder::EncodeError;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Longest keyword the PNG format allows, in bytes.
pub const MAX_KEYWORD_LEN: usize = 79;

/// One chunk borrowed from a PNG byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

/// Iterate the chunks after the signature. Stops at the first truncated chunk.
pub fn chunks(png: &[u8]) -> impl Iterator<Item = Chunk<'_>> {
    let mut pos = PNG_SIGNATURE.len();
    std::iter::from_fn(move || {
        if pos + 8 > png.len() {
            return None;
        }
        let len = u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        let kind = [png[pos + 4], png[pos + 5], png[pos + 6], png[pos + 7]];
        let data_start = pos + 8;
        let data_end = data_start.checked_add(len)?;
        if data_end + 4 > png.len() {
            return None;
        }
        pos = data_end + 4;
        Some(Chunk {
            kind,
            data: &png[data_start..data_end],
        })
    })
}

/// Serialize one chunk including length and CRC.
pub fn encode_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

fn latin1(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

/// Build a `tEXt` chunk when the text is Latin-1, `iTXt` otherwise.
pub fn text_chunk(keyword: &str, text: &str) -> Result<Vec<u8>, EncodeError> {
    let key = latin1(keyword)
        .filter(|k| !k.is_empty() && k.len() <= MAX_KEYWORD_LEN && !k.contains(&0))
        .ok_or_else(|| EncodeError::Metadata(format!("invalid PNG text keyword: {keyword:?}")))?;

    let mut data = key;
    data.push(0);
    match latin1(text) {
        Some(bytes) => {
            data.extend_from_slice(&bytes);
            Ok(encode_chunk(b"tEXt", &data))
        }
        None => {
            // flag, method, empty language tag, empty translated keyword
            data.extend_from_slice(&[0, 0, 0, 0]);
            data.extend_from_slice(text.as_bytes());
            Ok(encode_chunk(b"iTXt", &data))
        }
    }
}

/// Insert one text chunk per entry directly after `IHDR`.
pub fn insert_text_chunks(png: &[u8], entries: &[(String, String)]) -> Result<Vec<u8>, EncodeError> {
    if png.len() < PNG_SIGNATURE.len() || png[..8] != PNG_SIGNATURE {
        return Err(EncodeError::Metadata("not a PNG stream".into()));
    }
    let ihdr = chunks(png)
        .next()
        .filter(|c| &c.kind == b"IHDR")
        .ok_or_else(|| EncodeError::Metadata("PNG stream does not start with IHDR".into()))?;
    let insert_at = PNG_SIGNATURE.len() + 12 + ihdr.data.len();

    let mut text = Vec::new();
    for (keyword, value) in entries {
        text.extend(text_chunk(keyword, value)?);
    }

    let mut out = Vec::with_capacity(png.len() + text.len());
    out.extend_from_slice(&png[..insert_at]);
    out.extend(text);
    out.extend_from_slice(&png[insert_at..]);
    Ok(out)
}

/// Read every `tEXt` and uncompressed `iTXt` entry back out.
pub fn read_text_chunks(png: &[u8]) -> Vec<(String, String)> {
    chunks(png)
        .filter_map(|chunk| {
            let nul = chunk.data.iter().position(|&b| b == 0)?;
            let keyword: String = chunk.data[..nul].iter().map(|&b| b as char).collect();
            let rest = &chunk.data[nul + 1..];
            match &chunk.kind {
                b"tEXt" => Some((keyword, rest.iter().map(|&b| b as char).collect())),
                b"iTXt" => {
                    if rest.len() < 2 || rest[0] != 0 {
                        return None;
                    }
                    let rest = &rest[2..];
                    let lang_end = rest.iter().position(|&b| b == 0)?;
                    let rest = &rest[lang_end + 1..];
                    let tk_end = rest.iter().position(|&b| b == 0)?;
                    let text = String::from_utf8(rest[tk_end + 1..].to_vec()).ok()?;
                    Some((keyword, text))
                }
                _ => None,
            }
        })
        .collect()
}
