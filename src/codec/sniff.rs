/// Image type detection for decrypted payloads.
use image::ImageFormat;

/// Extension used when the payload matches no known signature
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Detect the image extension (without dot) from magic bytes.
/// Only the formats the chat client produces are recognized.
pub fn sniff_extension(data: &[u8]) -> Option<&'static str> {
    match image::guess_format(data).ok()? {
        ImageFormat::Gif => Some("gif"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

/// MIME type for a sniffed extension
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniffs_supported_formats() {
        assert_eq!(sniff_extension(b"GIF89a\x01\x00\x01\x00"), Some("gif"));
        assert_eq!(
            sniff_extension(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]),
            Some("png")
        );
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some("jpg"));
        assert_eq!(sniff_extension(b"RIFF\x24\x00\x00\x00WEBPVP8 "), Some("webp"));
    }

    #[test]
    fn test_unknown_payload_is_none() {
        assert_eq!(sniff_extension(b"not an image at all"), None);
        assert_eq!(sniff_extension(&[]), None);
    }

    #[test]
    fn test_mime_defaults_to_jpeg() {
        assert_eq!(mime_for_extension("PNG"), "image/png");
        assert_eq!(mime_for_extension("jpeg"), "image/jpeg");
        assert_eq!(mime_for_extension("bin"), "image/jpeg");
    }
}
