//! Content type sniffing from magic bytes
//!
//! Looks only at the first [`SNIFF_LEN`] bytes of a file. The rules follow
//! the WHATWG MIME sniffing table closely enough that browsers and this
//! store agree on the common web formats.

/// Number of leading bytes considered when sniffing.
pub const SNIFF_LEN: usize = 512;

/// Fallback for content that is neither a known format nor text.
pub const OCTET_STREAM: &str = "application/octet-stream";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";

/// Tags that mark a document as HTML when they start the content
/// (after whitespace) and are followed by a space or `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Exact prefixes, checked in order.
const PREFIXES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"BM", "image/bmp"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"ID3", "audio/mpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"MThd\x00\x00\x00\x06", "audio/midi"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00asm", "application/wasm"),
];

/// Detect the MIME type of `data`, which should be the leading bytes of
/// a file. Never fails: unknown binary content maps to [`OCTET_STREAM`].
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let text = trim_leading_whitespace(data);
    if HTML_TAGS.iter().any(|tag| is_html_tag(text, tag)) {
        return TEXT_HTML;
    }
    if text.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some((_, mime)) = PREFIXES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return *mime;
    }

    if let Some(mime) = container_type(data) {
        return mime;
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

/// RIFF/FORM/ISO-BMFF containers, identified by a type tag at an offset.
fn container_type(data: &[u8]) -> Option<&'static str> {
    match (data.get(0..4), data.get(8..12)) {
        (Some(b"RIFF"), Some(b"WAVE")) => return Some("audio/wave"),
        (Some(b"RIFF"), Some(b"AVI ")) => return Some("video/avi"),
        (Some(b"RIFF"), Some(b"WEBP")) => return Some("image/webp"),
        (Some(b"FORM"), Some(b"AIFF")) => return Some("audio/aiff"),
        _ => {}
    }

    // ftyp box: 4-byte big-endian box size, then "ftyp", then brands.
    let size = u32::from_be_bytes(data.get(0..4)?.try_into().ok()?) as usize;
    if size < 12 || size % 4 != 0 || data.len() < size || data.get(4..8)? != b"ftyp" {
        return None;
    }
    let major = data.get(8..11)?;
    let mut compatible = data[16.min(size)..size].chunks_exact(4).map(|c| &c[..3]);
    if major == b"mp4" || compatible.any(|brand| brand == b"mp4") {
        return Some("video/mp4");
    }
    None
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|&b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn is_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    if !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
