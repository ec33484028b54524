//! Upload scanning: magic-number detection, filename hygiene and content checks.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::database::DatabaseError;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("File is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("File type is not allowed")]
    UnknownType,
    #[error("File type does not match: {0}")]
    TypeMismatch(String),
    #[error("Invalid filename: {0}")]
    BadFilename(String),
    #[error("File rejected: {0}")]
    DangerousContent(String),
    #[error("Storage error: {0}")]
    Io(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Pdf,
}

impl FileKind {
    /// Identify a file by its leading bytes
    pub fn detect(bytes: &[u8]) -> Option<FileKind> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(FileKind::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(FileKind::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(FileKind::Gif)
        } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(FileKind::Webp)
        } else if bytes.starts_with(b"%PDF-") {
            Some(FileKind::Pdf)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Jpeg => "jpg",
            FileKind::Png => "png",
            FileKind::Gif => "gif",
            FileKind::Webp => "webp",
            FileKind::Pdf => "pdf",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileKind::Jpeg => "image/jpeg",
            FileKind::Png => "image/png",
            FileKind::Gif => "image/gif",
            FileKind::Webp => "image/webp",
            FileKind::Pdf => "application/pdf",
        }
    }

    fn accepts_extension(&self, ext: &str) -> bool {
        match self {
            FileKind::Jpeg => ext == "jpg" || ext == "jpeg",
            other => ext == other.extension(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }
}

/// A file that passed every check
#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    pub safe_name: String,
    pub kind: FileKind,
    pub size: usize,
    pub sha256: String,
}

impl ScannedFile {
    /// Content-addressed name used on disk
    pub fn stored_name(&self) -> String {
        format!("{}.{}", self.sha256, self.kind.extension())
    }
}

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "php", "phtml", "asp", "aspx", "jsp", "exe", "dll", "bat", "cmd", "sh", "js", "html", "htm", "svg", "cgi", "pl", "py",
];

/// Markers long enough to search for anywhere in a binary body
const SCRIPT_MARKERS: &[&[u8]] = &[b"<script", b"<?php", b"<html"];

/// Short markers only checked inside text metadata; random image data hits them
const METADATA_MARKERS: &[&[u8]] = &[b"<script", b"<?php", b"<html", b"<%", b"#!/"];

const PNG_TEXT_CHUNKS: &[&[u8]] = &[b"tEXt", b"iTXt"];

const XMP_NAMESPACE: &[u8] = b"http://ns.adobe.com/xap/1.0/";

const PDF_ACTIVE_NAMES: &[&[u8]] = &[b"JavaScript", b"JS", b"Launch", b"EmbeddedFile", b"EmbeddedFiles"];

const PDF_DELIMITERS: &[u8] = b"()<>[]{}/%";

/// Validate the client-supplied filename and return a safe display version
pub fn sanitize_filename(raw: &str) -> Result<String, UploadError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(UploadError::BadFilename("filename is required".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(UploadError::BadFilename("path components are not allowed".to_string()));
    }
    if name.chars().count() > 100 {
        return Err(UploadError::BadFilename("filename is longer than 100 characters".to_string()));
    }

    let lowered = name.to_ascii_lowercase();
    let segments: Vec<&str> = lowered.split('.').collect();
    if segments.len() < 2 || segments.last().map_or(true, |ext| ext.is_empty()) {
        return Err(UploadError::BadFilename("filename needs an extension".to_string()));
    }
    // Catch double extensions such as `menu.php.jpg`
    if segments[1..].iter().any(|seg| EXECUTABLE_EXTENSIONS.contains(seg)) {
        return Err(UploadError::BadFilename("executable extensions are not allowed".to_string()));
    }

    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Ok(safe)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w.eq_ignore_ascii_case(needle))
}

/// Payloads of PNG text chunks
fn png_text_chunks(bytes: &[u8]) -> Vec<&[u8]> {
    let mut found = Vec::new();
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let start = pos + 8;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        if PNG_TEXT_CHUNKS.contains(&kind) {
            found.push(&bytes[start..end]);
        }
        if kind == b"IEND" {
            break;
        }
        // skip the CRC
        pos = end + 4;
    }
    found
}

/// Payloads of JPEG comment and XMP segments ahead of the image data
fn jpeg_text_segments(bytes: &[u8]) -> Vec<&[u8]> {
    let mut found = Vec::new();
    let mut pos = 2;
    while pos + 4 <= bytes.len() && bytes[pos] == 0xFF {
        let marker = bytes[pos + 1];
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD8 => {
                pos += 2;
                continue;
            }
            // start of scan: entropy-coded data follows
            0xD9 | 0xDA => break,
            _ => {}
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > bytes.len() {
            break;
        }
        let payload = &bytes[pos + 4..end];
        if marker == 0xFE || (marker == 0xE1 && payload.starts_with(XMP_NAMESPACE)) {
            found.push(payload);
        }
        pos = end;
    }
    found
}

fn is_pdf_regular(byte: u8) -> bool {
    byte != 0 && !byte.is_ascii_whitespace() && !PDF_DELIMITERS.contains(&byte)
}

/// Resolve `#xx` escapes in a PDF name
fn decode_pdf_name(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' {
            if let Some(Ok(decoded)) = raw.get(i + 1..i + 3).map(hex::decode) {
                out.extend(decoded);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

/// Every `/Name` token in a PDF body, decoded
fn pdf_names(bytes: &[u8]) -> impl Iterator<Item = Vec<u8>> + '_ {
    bytes.iter().enumerate().filter(|(_, b)| **b == b'/').map(move |(i, _)| {
        let rest = &bytes[i + 1..];
        let len = rest.iter().position(|b| !is_pdf_regular(*b)).unwrap_or(rest.len());
        decode_pdf_name(&rest[..len])
    })
}

fn find_marker<'m>(haystack: &[u8], markers: &[&'m [u8]]) -> Option<&'m [u8]> {
    markers.iter().copied().find(|m| contains_subslice(haystack, m))
}

/// Run every upload check and fingerprint the content
pub fn scan(
    filename: &str,
    declared_content_type: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<ScannedFile, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    let safe_name = sanitize_filename(filename)?;
    let kind = FileKind::detect(bytes).ok_or(UploadError::UnknownType)?;

    let ext = safe_name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    if !kind.accepts_extension(&ext) {
        return Err(UploadError::TypeMismatch(format!(
            "content is {} but the extension is .{}",
            kind.mime(),
            ext
        )));
    }

    if let Some(declared) = declared_content_type {
        let declared = declared.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        let declared_ok = declared == kind.mime() || (kind == FileKind::Jpeg && declared == "image/jpg");
        if !declared.is_empty() && declared != "application/octet-stream" && !declared_ok {
            return Err(UploadError::TypeMismatch(format!(
                "content is {} but was declared as {}",
                kind.mime(),
                declared
            )));
        }
    }

    let metadata = match kind {
        FileKind::Png => png_text_chunks(bytes),
        FileKind::Jpeg => jpeg_text_segments(bytes),
        _ => Vec::new(),
    };
    let marker = find_marker(bytes, SCRIPT_MARKERS)
        .or_else(|| metadata.iter().find_map(|text| find_marker(text, METADATA_MARKERS)));
    if let Some(marker) = marker {
        return Err(UploadError::DangerousContent(format!(
            "embedded script marker {}",
            String::from_utf8_lossy(marker)
        )));
    }
    if kind == FileKind::Pdf {
        if let Some(name) = pdf_names(bytes).find(|name| PDF_ACTIVE_NAMES.contains(&name.as_slice())) {
            return Err(UploadError::DangerousContent(format!(
                "PDF contains active content /{}",
                String::from_utf8_lossy(&name)
            )));
        }
    }

    let sha256 = hex::encode(Sha256::digest(bytes));

    Ok(ScannedFile {
        safe_name,
        kind,
        size: bytes.len(),
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    fn noise(len: usize, mut state: u64) -> Vec<u8> {
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    fn png_chunk(kind: &[u8], data: &[u8]) -> Vec<u8> {
        let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
        chunk.extend_from_slice(kind);
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(&[0, 0, 0, 0]);
        chunk
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    #[test]
    fn detects_kinds_by_magic_number() {
        assert_eq!(FileKind::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(FileKind::Jpeg));
        assert_eq!(FileKind::detect(&png_bytes()), Some(FileKind::Png));
        assert_eq!(FileKind::detect(b"GIF89a...."), Some(FileKind::Gif));
        assert_eq!(FileKind::detect(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some(FileKind::Webp));
        assert_eq!(FileKind::detect(b"%PDF-1.7\n"), Some(FileKind::Pdf));
        assert_eq!(FileKind::detect(b"MZ\x90\x00"), None);
    }

    #[test]
    fn accepts_clean_png() {
        let scanned = scan("Event Layout.png", Some("image/png"), &png_bytes(), 1024).unwrap();
        assert_eq!(scanned.kind, FileKind::Png);
        assert_eq!(scanned.safe_name, "Event_Layout.png");
        assert_eq!(scanned.sha256.len(), 64);
        assert!(scanned.stored_name().ends_with(".png"));
    }

    #[test]
    fn rejects_size_and_emptiness() {
        assert!(matches!(scan("a.png", None, &[], 10), Err(UploadError::Empty)));
        assert!(matches!(scan("a.png", None, &png_bytes(), 10), Err(UploadError::TooLarge { .. })));
    }

    #[test]
    fn rejects_extension_mismatch() {
        let err = scan("photo.jpg", None, &png_bytes(), 1024).unwrap_err();
        assert!(matches!(err, UploadError::TypeMismatch(_)));
    }

    #[test]
    fn rejects_declared_type_mismatch() {
        let err = scan("photo.png", Some("application/pdf"), &png_bytes(), 1024).unwrap_err();
        assert!(matches!(err, UploadError::TypeMismatch(_)));
        assert!(scan("photo.png", Some("application/octet-stream"), &png_bytes(), 1024).is_ok());
    }

    #[test]
    fn rejects_double_extensions_and_paths() {
        assert!(matches!(sanitize_filename("shell.php.png"), Err(UploadError::BadFilename(_))));
        assert!(matches!(sanitize_filename("../../etc/passwd.png"), Err(UploadError::BadFilename(_))));
        assert!(matches!(sanitize_filename("noext"), Err(UploadError::BadFilename(_))));
        assert!(sanitize_filename("menu-v2.final.pdf").is_ok());
    }

    #[test]
    fn rejects_polyglot_with_script() {
        let mut bytes = png_bytes();
        bytes.extend_from_slice(b"<?php system($_GET['c']); ?>");
        assert!(matches!(scan("x.png", None, &bytes, 4096), Err(UploadError::DangerousContent(_))));
    }

    #[test]
    fn rejects_pdf_with_javascript() {
        let pdf = b"%PDF-1.4\n1 0 obj << /Type /Catalog /OpenAction << /S /JavaScript /JS (app.alert(1)) >> >>";
        assert!(matches!(scan("menu.pdf", Some("application/pdf"), pdf, 4096), Err(UploadError::DangerousContent(_))));
        assert!(scan("menu.pdf", Some("application/pdf"), b"%PDF-1.4\n% plain menu\n%%EOF", 4096).is_ok());
    }

    #[test]
    fn accepts_large_image_with_noisy_pixel_data() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend(noise(300 * 1024, 0x9E37_79B9_7F4A_7C15));
        let scanned = scan("photo.png", Some("image/png"), &bytes, 5 * 1024 * 1024).unwrap();
        assert_eq!(scanned.size, bytes.len());

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x08];
        jpeg.extend(noise(300 * 1024, 42));
        assert!(scan("photo.jpg", Some("image/jpeg"), &jpeg, 5 * 1024 * 1024).is_ok());
    }

    #[test]
    fn rejects_script_in_image_text_metadata() {
        let mut bytes = PNG_HEADER[..8].to_vec();
        bytes.extend(png_chunk(b"IHDR", &[0u8; 13]));
        bytes.extend(png_chunk(b"tEXt", b"Comment\0<% Response.Write(1) %>"));
        bytes.extend(png_chunk(b"IEND", &[]));
        assert!(matches!(scan("x.png", None, &bytes, 4096), Err(UploadError::DangerousContent(_))));

        let comment = b"#!/bin/sh";
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xFE, 0x00, (comment.len() + 2) as u8];
        jpeg.extend_from_slice(comment);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        assert!(matches!(scan("x.jpg", None, &jpeg, 4096), Err(UploadError::DangerousContent(_))));
    }

    #[test]
    fn pdf_names_must_match_whole_tokens() {
        let mut pdf = b"%PDF-1.7\n1 0 obj << /Type /Metadata /Subtype /JSON /Length 4096 >>\nstream\n".to_vec();
        pdf.extend(noise(64 * 1024, 7));
        pdf.extend_from_slice(b"\nendstream\nendobj\n%%EOF");
        assert!(scan("menu.pdf", Some("application/pdf"), &pdf, 1024 * 1024).is_ok());

        let open = b"%PDF-1.7\n<< /S /JavaScript /JS (app.alert(1)) >>";
        assert!(matches!(scan("menu.pdf", None, open, 4096), Err(UploadError::DangerousContent(_))));
        let escaped = b"%PDF-1.7\n<< /J#53 (app.alert(1)) >>";
        assert!(matches!(scan("menu.pdf", None, escaped, 4096), Err(UploadError::DangerousContent(_))));
    }
}
