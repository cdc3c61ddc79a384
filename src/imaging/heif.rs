//! EXIF for AVIF files.
//!
//! AVIF is a HEIF image stored in ISO base media boxes. Metadata is a second
//! item of type `Exif` that describes (`cdsc`) the primary image:
//!
//! ```text
//! ftyp
//! meta ── pitm   primary item id
//!      ├─ iinf   item infos        + infe "Exif"
//!      ├─ iloc   item locations    + extent of the Exif payload
//!      └─ iref   item references   + cdsc Exif -> primary
//! mdat           coded image
//! mdat           u32 offset to the TIFF header (0), TIFF block   <- appended
//! ```
//!
//! Rewriting `meta` makes it longer and moves every byte after it, so the
//! `iloc` offsets that point past the old `meta` are shifted by the growth.

use super::encoder::EncodeError;

const EXIF_ITEM: &[u8; 4] = b"Exif";

fn malformed(what: &str) -> EncodeError {
    EncodeError::Metadata(format!("malformed AVIF: {what}"))
}

/// Big-endian unsigned integer of `size` bytes (0 to 8). A zero size reads 0.
fn read_be(bytes: &[u8], pos: usize, size: usize) -> Option<u64> {
    let field = bytes.get(pos..pos.checked_add(size)?)?;
    Some(field.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn write_be(out: &mut Vec<u8>, value: u64, size: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - size..]);
}

fn fits(value: u64, size: usize) -> bool {
    size >= 8 || value >> (size * 8) == 0
}

/// A box located in the file: four-character type plus absolute ranges.
#[derive(Debug, Clone, Copy)]
struct IsoBox {
    kind: [u8; 4],
    start: usize,
    body: usize,
    end: usize,
    /// Size field was 0: the box runs to the end of its parent.
    open_ended: bool,
}

fn parse_boxes(buf: &[u8], mut pos: usize, end: usize) -> Result<Vec<IsoBox>, EncodeError> {
    let mut boxes = Vec::new();
    while pos < end {
        let size = read_be(buf, pos, 4).ok_or_else(|| malformed("truncated box header"))?;
        let kind = buf
            .get(pos + 4..pos + 8)
            .and_then(|k| <[u8; 4]>::try_from(k).ok())
            .ok_or_else(|| malformed("truncated box header"))?;
        let (body, box_end, open_ended) = match size {
            0 => (pos + 8, end, true),
            1 => {
                let large = read_be(buf, pos + 8, 8).ok_or_else(|| malformed("truncated box size"))?;
                (pos + 16, pos.saturating_add(large as usize), false)
            }
            n => (pos + 8, pos + n as usize, false),
        };
        if box_end < body || box_end > end {
            return Err(malformed("box overruns its parent"));
        }
        boxes.push(IsoBox {
            kind,
            start: pos,
            body,
            end: box_end,
            open_ended,
        });
        pos = box_end;
    }
    Ok(boxes)
}

fn find<'b>(boxes: &'b [IsoBox], kind: &[u8; 4]) -> Option<&'b IsoBox> {
    boxes.iter().find(|b| &b.kind == kind)
}

fn make_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    let len = body.len() as u64 + 8;
    if fits(len, 4) {
        write_be(&mut out, len, 4);
        out.extend_from_slice(kind);
    } else {
        write_be(&mut out, 1, 4);
        out.extend_from_slice(kind);
        write_be(&mut out, len + 8, 8);
    }
    out.extend_from_slice(body);
    out
}

/// Raw bytes of a box, with an explicit size if it had none.
fn copy_box(buf: &[u8], b: &IsoBox) -> Vec<u8> {
    if b.open_ended {
        make_box(&b.kind, &buf[b.body..b.end])
    } else {
        buf[b.start..b.end].to_vec()
    }
}

/// Sequential reader over a box body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn uint(&mut self, size: usize) -> Result<u64, EncodeError> {
        let value = read_be(self.data, self.pos, size).ok_or_else(|| malformed("truncated box"))?;
        self.pos += size;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Extent {
    index: u64,
    offset: u64,
    length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IlocItem {
    id: u32,
    construction_method: u64,
    data_reference: u64,
    base_offset: u64,
    extents: Vec<Extent>,
}

/// The item location box, versions 0 to 2.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Iloc {
    version: u8,
    flags: u64,
    offset_size: usize,
    length_size: usize,
    base_offset_size: usize,
    index_size: usize,
    items: Vec<IlocItem>,
}

impl Iloc {
    fn parse(body: &[u8]) -> Result<Self, EncodeError> {
        let mut r = Reader::new(body);
        let version = r.uint(1)? as u8;
        if version > 2 {
            return Err(malformed("unknown iloc version"));
        }
        let flags = r.uint(3)?;
        let sizes = r.uint(1)? as usize;
        let (offset_size, length_size) = (sizes >> 4, sizes & 0xF);
        let sizes = r.uint(1)? as usize;
        let base_offset_size = sizes >> 4;
        let index_size = if version >= 1 { sizes & 0xF } else { 0 };
        for size in [offset_size, length_size, base_offset_size, index_size] {
            if ![0, 4, 8].contains(&size) {
                return Err(malformed("iloc field size"));
            }
        }

        let id_size = if version < 2 { 2 } else { 4 };
        let count = r.uint(id_size)?;
        let mut items = Vec::new();
        for _ in 0..count {
            let id = r.uint(id_size)? as u32;
            let construction_method = if version >= 1 { r.uint(2)? & 0xF } else { 0 };
            let data_reference = r.uint(2)?;
            let base_offset = r.uint(base_offset_size)?;
            let extent_count = r.uint(2)?;
            let mut extents = Vec::new();
            for _ in 0..extent_count {
                let index = if version >= 1 { r.uint(index_size)? } else { 0 };
                extents.push(Extent {
                    index,
                    offset: r.uint(offset_size)?,
                    length: r.uint(length_size)?,
                });
            }
            items.push(IlocItem {
                id,
                construction_method,
                data_reference,
                base_offset,
                extents,
            });
        }
        Ok(Self {
            version,
            flags,
            offset_size,
            length_size,
            base_offset_size,
            index_size,
            items,
        })
    }

    fn id_size(&self) -> usize {
        if self.version < 2 { 2 } else { 4 }
    }

    fn body(&self) -> Vec<u8> {
        let mut out = vec![self.version];
        write_be(&mut out, self.flags, 3);
        out.push(((self.offset_size << 4) | self.length_size) as u8);
        let index_size = if self.version >= 1 { self.index_size } else { 0 };
        out.push(((self.base_offset_size << 4) | index_size) as u8);

        let id_size = self.id_size();
        write_be(&mut out, self.items.len() as u64, id_size);
        for item in &self.items {
            write_be(&mut out, u64::from(item.id), id_size);
            if self.version >= 1 {
                write_be(&mut out, item.construction_method, 2);
            }
            write_be(&mut out, item.data_reference, 2);
            write_be(&mut out, item.base_offset, self.base_offset_size);
            write_be(&mut out, item.extents.len() as u64, 2);
            for extent in &item.extents {
                if self.version >= 1 {
                    write_be(&mut out, extent.index, index_size);
                }
                write_be(&mut out, extent.offset, self.offset_size);
                write_be(&mut out, extent.length, self.length_size);
            }
        }
        out
    }

    /// Move every in-file offset at or past `from` by `by` bytes.
    fn shift(&mut self, from: u64, by: u64) -> Result<(), EncodeError> {
        let too_far = || EncodeError::Metadata("AVIF offsets overflow their iloc fields".into());
        for item in &mut self.items {
            if item.construction_method != 0 || item.data_reference != 0 {
                continue;
            }
            if item.base_offset >= from && item.base_offset > 0 {
                item.base_offset += by;
                if !fits(item.base_offset, self.base_offset_size) {
                    return Err(too_far());
                }
                continue;
            }
            for extent in &mut item.extents {
                if item.base_offset + extent.offset >= from {
                    extent.offset += by;
                    if !fits(extent.offset, self.offset_size) {
                        return Err(too_far());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parsed top-level layout with the children of `meta`.
struct Layout {
    top: Vec<IsoBox>,
    meta: IsoBox,
    children: Vec<IsoBox>,
}

impl Layout {
    fn parse(avif: &[u8]) -> Result<Self, EncodeError> {
        if avif.get(4..8) != Some(&b"ftyp"[..]) {
            return Err(EncodeError::Metadata("not an AVIF stream".into()));
        }
        let top = parse_boxes(avif, 0, avif.len())?;
        let meta = *find(&top, b"meta").ok_or_else(|| malformed("no meta box"))?;
        // meta is a full box: version and flags precede the children
        let children = parse_boxes(avif, meta.body + 4, meta.end)?;
        Ok(Self {
            top,
            meta,
            children,
        })
    }

    fn child(&self, kind: &[u8; 4]) -> Result<&IsoBox, EncodeError> {
        find(&self.children, kind)
            .ok_or_else(|| malformed(&format!("no {} box", String::from_utf8_lossy(kind))))
    }

    fn primary_item(&self, avif: &[u8]) -> Result<u32, EncodeError> {
        let pitm = self.child(b"pitm")?;
        let version = read_be(avif, pitm.body, 1).ok_or_else(|| malformed("empty pitm"))?;
        let size = if version == 0 { 2 } else { 4 };
        read_be(avif, pitm.body + 4, size)
            .map(|id| id as u32)
            .ok_or_else(|| malformed("truncated pitm"))
    }

    fn iloc(&self, avif: &[u8]) -> Result<Iloc, EncodeError> {
        let b = self.child(b"iloc")?;
        Iloc::parse(&avif[b.body..b.end])
    }

    /// `(item id, item type)` of every version 2 or 3 `infe`.
    fn item_infos(&self, avif: &[u8]) -> Result<Vec<(u32, [u8; 4])>, EncodeError> {
        let iinf = self.child(b"iinf")?;
        let count_size = iinf_count_size(avif, iinf)?;
        let entries = parse_boxes(avif, iinf.body + 4 + count_size, iinf.end)?;
        Ok(entries
            .iter()
            .filter(|e| &e.kind == b"infe")
            .filter_map(|e| {
                let version = read_be(avif, e.body, 1)?;
                let id_size = match version {
                    2 => 2,
                    3 => 4,
                    _ => return None,
                };
                let id = read_be(avif, e.body + 4, id_size)? as u32;
                let kind_at = e.body + 4 + id_size + 2;
                let kind = <[u8; 4]>::try_from(avif.get(kind_at..kind_at + 4)?).ok()?;
                Some((id, kind))
            })
            .collect())
    }
}

fn iinf_count_size(avif: &[u8], iinf: &IsoBox) -> Result<usize, EncodeError> {
    let version = read_be(avif, iinf.body, 1).ok_or_else(|| malformed("empty iinf"))?;
    Ok(if version == 0 { 2 } else { 4 })
}

fn grow_iinf(avif: &[u8], iinf: &IsoBox, exif_id: u32) -> Result<Vec<u8>, EncodeError> {
    let count_size = iinf_count_size(avif, iinf)?;
    let count = read_be(avif, iinf.body + 4, count_size).ok_or_else(|| malformed("truncated iinf"))?;
    if !fits(count + 1, count_size) {
        return Err(malformed("too many items"));
    }
    let mut body = avif[iinf.body..iinf.body + 4].to_vec();
    write_be(&mut body, count + 1, count_size);
    body.extend_from_slice(&avif[iinf.body + 4 + count_size..iinf.end]);

    let mut infe = vec![2, 0, 0, 0];
    write_be(&mut infe, u64::from(exif_id), 2);
    infe.extend_from_slice(&[0, 0]);
    infe.extend_from_slice(EXIF_ITEM);
    infe.push(0);
    body.extend(make_box(b"infe", &infe));
    Ok(make_box(b"iinf", &body))
}

fn grow_iref(avif: &[u8], iref: Option<&IsoBox>, from: u32, to: u32) -> Result<Vec<u8>, EncodeError> {
    let (mut body, id_size) = match iref {
        Some(b) => {
            let version = read_be(avif, b.body, 1).ok_or_else(|| malformed("empty iref"))?;
            (avif[b.body..b.end].to_vec(), if version == 0 { 2 } else { 4 })
        }
        None => (vec![0, 0, 0, 0], 2),
    };
    if !fits(u64::from(to), id_size) {
        return Err(malformed("primary item id too large"));
    }
    let mut reference = Vec::new();
    write_be(&mut reference, u64::from(from), id_size);
    write_be(&mut reference, 1, 2);
    write_be(&mut reference, u64::from(to), id_size);
    body.extend(make_box(b"cdsc", &reference));
    Ok(make_box(b"iref", &body))
}

fn build_meta(avif: &[u8], layout: &Layout, iinf: &[u8], iloc: &Iloc, iref: &[u8]) -> Vec<u8> {
    let meta = &layout.meta;
    let mut body = avif[meta.body..meta.body + 4].to_vec();
    let mut wrote_iref = false;
    for child in &layout.children {
        match &child.kind {
            b"iinf" => body.extend_from_slice(iinf),
            b"iloc" => body.extend(make_box(b"iloc", &iloc.body())),
            b"iref" => {
                wrote_iref = true;
                body.extend_from_slice(iref);
            }
            _ => body.extend(copy_box(avif, child)),
        }
    }
    if !wrote_iref {
        body.extend_from_slice(iref);
    }
    make_box(b"meta", &body)
}

/// Add `tiff` to an AVIF file as an `Exif` item describing the primary image.
pub fn insert_avif_exif(avif: &[u8], tiff: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let layout = Layout::parse(avif)?;
    let primary = layout.primary_item(avif)?;
    let infos = layout.item_infos(avif)?;
    if infos.iter().any(|(_, kind)| kind == EXIF_ITEM) {
        return Err(EncodeError::Metadata("AVIF already has an Exif item".into()));
    }
    let mut iloc = layout.iloc(avif)?;

    let exif_id = infos
        .iter()
        .map(|(id, _)| *id)
        .chain(iloc.items.iter().map(|i| i.id))
        .chain([primary])
        .max()
        .unwrap_or(0)
        + 1;
    if exif_id > u32::from(u16::MAX) {
        return Err(malformed("no free item id"));
    }
    if iloc.items.len() + 1 > usize::from(u16::MAX) && iloc.id_size() == 2 {
        return Err(malformed("too many items"));
    }
    if layout
        .top
        .iter()
        .any(|b| b.open_ended && !fits((b.end - b.start) as u64, 4))
    {
        return Err(malformed("open-ended box too large to close"));
    }

    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(tiff);

    // Explicit offsets and lengths of at least 32 bits, so the new extent fits
    iloc.offset_size = iloc.offset_size.max(4);
    iloc.length_size = iloc.length_size.max(4);
    iloc.items.push(IlocItem {
        id: exif_id,
        construction_method: 0,
        data_reference: 0,
        base_offset: 0,
        extents: vec![Extent {
            index: 0,
            offset: 0,
            length: payload.len() as u64,
        }],
    });

    let iinf = grow_iinf(avif, layout.child(b"iinf")?, exif_id)?;
    let iref = grow_iref(avif, find(&layout.children, b"iref"), exif_id, primary)?;

    // Offsets have fixed widths, so a first build gives the final meta size
    let old_meta_len = layout.meta.end - layout.meta.start;
    let new_meta_len = build_meta(avif, &layout, &iinf, &iloc, &iref).len();
    let growth = new_meta_len
        .checked_sub(old_meta_len)
        .ok_or_else(|| malformed("meta box shrank"))?;

    let exif_index = iloc.items.len() - 1;
    let (existing, _) = iloc.items.split_at(exif_index);
    let mut shifted = Iloc {
        items: existing.to_vec(),
        ..iloc.clone()
    };
    shifted.shift(layout.meta.end as u64, growth as u64)?;

    let exif_offset = (avif.len() + growth + 8) as u64;
    if !fits(exif_offset, shifted.offset_size) || !fits(payload.len() as u64, shifted.length_size) {
        return Err(EncodeError::Metadata("AVIF offsets overflow their iloc fields".into()));
    }
    let mut exif_item = iloc.items[exif_index].clone();
    exif_item.extents[0].offset = exif_offset;
    shifted.items.push(exif_item);

    let meta = build_meta(avif, &layout, &iinf, &shifted, &iref);
    let mut out = Vec::with_capacity(avif.len() + growth + payload.len() + 8);
    for b in &layout.top {
        if b.start == layout.meta.start {
            out.extend_from_slice(&meta);
        } else {
            out.extend(copy_box(avif, b));
        }
    }
    out.extend(make_box(b"mdat", &payload));
    Ok(out)
}

/// Bytes of a single-extent item stored in the file itself.
fn item_data(avif: &[u8], id: u32) -> Option<&[u8]> {
    let layout = Layout::parse(avif).ok()?;
    let iloc = layout.iloc(avif).ok()?;
    let item = iloc.items.iter().find(|i| i.id == id)?;
    if item.construction_method != 0 || item.data_reference != 0 {
        return None;
    }
    let [extent] = item.extents.as_slice() else {
        return None;
    };
    let start = usize::try_from(item.base_offset + extent.offset).ok()?;
    let len = usize::try_from(extent.length).ok()?;
    avif.get(start..start.checked_add(len)?)
}

/// TIFF block of the `Exif` item of an AVIF file.
pub fn find_avif_exif(avif: &[u8]) -> Option<&[u8]> {
    let layout = Layout::parse(avif).ok()?;
    let (id, _) = layout
        .item_infos(avif)
        .ok()?
        .into_iter()
        .find(|(_, kind)| kind == EXIF_ITEM)?;
    let payload = item_data(avif, id)?;
    let header_offset = usize::try_from(read_be(payload, 0, 4)?).ok()?;
    payload.get(4usize.checked_add(header_offset)?..)
}
