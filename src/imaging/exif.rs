//! Minimal EXIF writer for JPEG and WebP.
//!
//! Only IFD0 ASCII tags are written; that is all the generation metadata
//! needs. The TIFF block is little-endian:
//!
//! ```text
//! "II" 42:u16 ifd0_offset:u32=8
//! count:u16  { tag:u16 type:u16=2 count:u32 value_or_offset:u32 } * count  next_ifd:u32=0
//! string data, NUL-terminated, referenced by offset
//! ```
//!
//! JPEG carries the block in an `APP1` segment prefixed with `Exif\0\0`.
//! WebP carries it raw in an `EXIF` chunk, which requires the extended
//! (`VP8X`) file layout.

use super::encoder::EncodeError;

pub const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
pub const TAG_MAKE: u16 = 0x010F;
pub const TAG_SOFTWARE: u16 = 0x0131;

const TYPE_ASCII: u16 = 2;

/// Largest payload one JPEG segment can hold.
pub const MAX_APP1_PAYLOAD: usize = 65533;

const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

/// VP8X flag for an `EXIF` chunk.
const VP8X_EXIF: u8 = 0x08;
/// VP8X flag for an alpha channel.
const VP8X_ALPHA: u8 = 0x10;

/// ASCII tags for IFD0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifFields {
    /// `Make`, used for `Prompt: {json}`.
    pub make: Option<String>,
    /// `ImageDescription`, used for `Workflow: {json}`.
    pub image_description: Option<String>,
    /// `Software`, `{name} v{version}`.
    pub software: Option<String>,
}

impl ExifFields {
    fn tags(&self) -> Vec<(u16, &str)> {
        // IFD entries must be sorted by tag
        [
            (TAG_IMAGE_DESCRIPTION, &self.image_description),
            (TAG_MAKE, &self.make),
            (TAG_SOFTWARE, &self.software),
        ]
        .into_iter()
        .filter_map(|(tag, v)| v.as_deref().map(|s| (tag, s)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tags().is_empty()
    }
}

/// Serialize `fields` as a little-endian TIFF block.
pub fn tiff_block(fields: &ExifFields) -> Vec<u8> {
    let tags = fields.tags();
    let ifd_len = 2 + tags.len() * 12 + 4;
    let mut data_offset = 8 + ifd_len;

    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(tags.len() as u16).to_le_bytes());

    let mut data = Vec::new();
    for (tag, value) in &tags {
        // Callers escape JSON to ASCII first; stray bytes become '?'
        let mut bytes: Vec<u8> = value
            .chars()
            .map(|c| if c.is_ascii() && c != '\0' { c as u8 } else { b'?' })
            .collect();
        bytes.push(0);

        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&TYPE_ASCII.to_le_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        if bytes.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..bytes.len()].copy_from_slice(&bytes);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&(data_offset as u32).to_le_bytes());
            data_offset += bytes.len();
            data.extend_from_slice(&bytes);
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend(data);
    out
}

/// Read the ASCII tags of IFD0 back out of a little-endian TIFF block.
pub fn read_ascii_tags(tiff: &[u8]) -> Vec<(u16, String)> {
    let u16_at = |p: usize| tiff.get(p..p + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let u32_at = |p: usize| {
        tiff.get(p..p + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
    };

    if tiff.get(..2) != Some(&b"II"[..]) {
        return Vec::new();
    }
    let Some(ifd) = u32_at(4) else {
        return Vec::new();
    };
    let count = u16_at(ifd).unwrap_or(0) as usize;

    (0..count)
        .filter_map(|i| {
            let entry = ifd + 2 + i * 12;
            let tag = u16_at(entry)?;
            if u16_at(entry + 2)? != TYPE_ASCII {
                return None;
            }
            let len = u32_at(entry + 4)?;
            let start = if len <= 4 { entry + 8 } else { u32_at(entry + 8)? };
            let bytes = tiff.get(start..start + len)?;
            let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
            Some((tag, String::from_utf8_lossy(text).into_owned()))
        })
        .collect()
}

/// Insert an `APP1` EXIF segment after SOI, or after a leading JFIF `APP0`.
pub fn insert_jpeg_exif(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if jpeg.get(..2) != Some(&[0xFF, 0xD8][..]) {
        return Err(EncodeError::Metadata("not a JPEG stream".into()));
    }
    let payload_len = EXIF_HEADER.len() + tiff.len();
    if payload_len > MAX_APP1_PAYLOAD {
        return Err(EncodeError::Metadata(format!(
            "EXIF payload of {payload_len} bytes exceeds one JPEG segment"
        )));
    }

    let mut insert_at = 2;
    if jpeg.get(2..4) == Some(&[0xFF, 0xE0][..])
        && let Some(len) = jpeg.get(4..6).map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        && 4 + len <= jpeg.len()
    {
        insert_at = 4 + len;
    }

    let mut out = Vec::with_capacity(jpeg.len() + payload_len + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

/// TIFF block from the first EXIF `APP1` segment of a JPEG.
pub fn find_jpeg_exif(jpeg: &[u8]) -> Option<&[u8]> {
    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let body = jpeg.get(pos + 4..pos + 2 + len)?;
        if marker == 0xE1 && body.starts_with(EXIF_HEADER) {
            return Some(&body[EXIF_HEADER.len()..]);
        }
        pos += 2 + len;
    }
    None
}

fn riff_chunk(fourcc: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 9);
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn riff_chunks(body: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let header = body.get(pos..pos + 8)?;
        let fourcc = [header[0], header[1], header[2], header[3]];
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let data = body.get(pos + 8..pos + 8 + len)?;
        pos += 8 + len + len % 2;
        Some((fourcc, data))
    })
}

/// Append an `EXIF` chunk to a WebP file, converting it to the VP8X layout.
///
/// `width`, `height` and `has_alpha` describe the encoded image and fill the
/// `VP8X` header when the file does not have one yet.
pub fn insert_webp_exif(
    webp: &[u8],
    tiff: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
) -> Result<Vec<u8>, EncodeError> {
    if webp.len() < 12 || &webp[..4] != b"RIFF" || &webp[8..12] != b"WEBP" {
        return Err(EncodeError::Metadata("not a WebP stream".into()));
    }
    if width == 0 || height == 0 || width > 1 << 24 || height > 1 << 24 {
        return Err(EncodeError::Metadata(format!(
            "cannot describe a {width}x{height} canvas in VP8X"
        )));
    }

    let mut body = Vec::new();
    let mut has_vp8x = false;
    for (fourcc, data) in riff_chunks(&webp[12..]) {
        match &fourcc {
            b"VP8X" => {
                has_vp8x = true;
                let mut header = data.to_vec();
                if let Some(flags) = header.first_mut() {
                    *flags |= VP8X_EXIF;
                }
                body.extend(riff_chunk(&fourcc, &header));
            }
            b"EXIF" => {}
            _ => body.extend(riff_chunk(&fourcc, data)),
        }
    }

    if !has_vp8x {
        let mut header = Vec::with_capacity(10);
        header.push(VP8X_EXIF | if has_alpha { VP8X_ALPHA } else { 0 });
        header.extend_from_slice(&[0, 0, 0]);
        header.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
        header.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
        let mut with_header = riff_chunk(b"VP8X", &header);
        with_header.extend(body);
        body = with_header;
    }
    body.extend(riff_chunk(b"EXIF", tiff));

    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend(body);
    Ok(out)
}

/// Contents of the `EXIF` chunk of a WebP file.
pub fn find_webp_exif(webp: &[u8]) -> Option<&[u8]> {
    riff_chunks(webp.get(12..)?)
        .find(|(fourcc, _)| fourcc == b"EXIF")
        .map(|(_, data)| data)
}
