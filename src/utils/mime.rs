//! MIME detection and categorisation for uploaded evidence.

/// Broad categories for uploaded files. Quote and contract submissions
/// accept images and PDFs; acceptance photos accept images only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCategory {
    Image,
    Pdf,
    Other,
}

impl UploadCategory {
    /// Get the category ID as a string.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Other => "other",
        }
    }
}

/// Categorise a MIME type.
pub fn upload_category(mime: &str) -> UploadCategory {
    let mime = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
    if mime.starts_with("image/") {
        UploadCategory::Image
    } else if mime == "application/pdf" {
        UploadCategory::Pdf
    } else {
        UploadCategory::Other
    }
}

/// Detect the MIME type of uploaded bytes, preferring content sniffing
/// over the client-declared type. Mobile clients routinely upload JPEGs
/// labelled `application/octet-stream`.
pub fn detect_mime(bytes: &[u8], declared: Option<&str>) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| {
            declared
                .map(|d| d.split(';').next().unwrap_or(d).trim().to_lowercase())
                .unwrap_or_else(|| "application/octet-stream".to_string())
        })
}

/// File extension used when persisting a blob of the given MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tif",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_category() {
        assert_eq!(upload_category("image/png"), UploadCategory::Image);
        assert_eq!(upload_category("image/jpeg; charset=binary"), UploadCategory::Image);
        assert_eq!(upload_category("application/pdf"), UploadCategory::Pdf);
        assert_eq!(upload_category("text/html"), UploadCategory::Other);
    }

    #[test]
    fn test_detect_mime_sniffs_content() {
        // PNG magic bytes win over a bogus declared type.
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime(&png, Some("application/octet-stream")), "image/png");
    }

    #[test]
    fn test_detect_mime_falls_back_to_declared() {
        assert_eq!(detect_mime(b"plain text", Some("text/plain; charset=utf-8")), "text/plain");
        assert_eq!(detect_mime(b"??", None), "application/octet-stream");
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("application/pdf"), "pdf");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/unknown"), "bin");
    }
}
