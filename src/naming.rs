/// Filename heuristics for the vendor's container naming convention.
///
/// Containers are named `<base>[._]<variant>.dat` or bare `<hash>.dat`. None
/// of this is documented by the vendor, so every function here is a heuristic
/// over names only; file contents are never consulted.

/// Extension of on-disk containers (without dot)
pub const CONTAINER_EXTENSION: &str = "dat";

/// Extensions the output cache accepts as decoded images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Variant letter marking a thumbnail rendition
const THUMBNAIL_VARIANT: char = 't';

/// Long-form markers stripped during normalization
const LONG_MARKERS: [&str; 2] = ["_thumb", "_hd"];

/// Whether `ext` (without dot) is a decoded image extension
pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Strip a trailing `.dat`, case-insensitively
pub fn strip_container_extension(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".dat") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Whether the file name carries the container extension
pub fn has_container_extension(name: &str) -> bool {
    strip_container_extension(name).len() != name.len()
}

/// One-letter variant marker at the end of a stem (`abc_t` -> `t`, `abc.c` -> `c`)
pub fn variant_suffix(stem: &str) -> Option<char> {
    let bytes = stem.as_bytes();
    let len = bytes.len();
    if len < 3 {
        return None;
    }
    let sep = bytes[len - 2];
    let letter = bytes[len - 1];
    if (sep == b'_' || sep == b'.') && letter.is_ascii_alphabetic() {
        Some(letter.to_ascii_lowercase() as char)
    } else {
        None
    }
}

/// Stems that look like a content hash: 6 to 64 ASCII alphanumerics
pub fn is_hash_like(stem: &str) -> bool {
    (6..=64).contains(&stem.len()) && stem.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A genuine image container carries a variant suffix or a hash-shaped base
pub fn is_genuine_container(stem: &str) -> bool {
    variant_suffix(stem).is_some() || is_hash_like(stem)
}

/// Thumbnail classification, purely from the suffix
pub fn is_thumbnail_name(stem: &str) -> bool {
    let lower = stem.to_ascii_lowercase();
    variant_suffix(&lower) == Some(THUMBNAIL_VARIANT) || lower.ends_with("_thumb")
}

/// Canonical base used for matching and cache-key folding.
///
/// Lowercases, strips `.dat`, then repeatedly strips trailing variant
/// suffixes: `ABC_t.dat` -> `abc`, `abc.c_t` -> `abc`.
pub fn normalize_base(name: &str) -> String {
    let mut base = strip_container_extension(name.trim()).to_ascii_lowercase();
    loop {
        if let Some(marker) = LONG_MARKERS.iter().find(|m| base.len() > m.len() && base.ends_with(*m)) {
            base.truncate(base.len() - marker.len());
        } else if variant_suffix(&base).is_some() {
            base.truncate(base.len() - 2);
        } else {
            break;
        }
    }
    base
}

/// How strongly a candidate file name matched the requested name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameMatch {
    /// Target appears somewhere inside the candidate
    Substring,
    /// Candidate is the target followed only by short suffix segments
    Pattern,
    /// Normalized bases are equal
    Exact,
}

impl NameMatch {
    pub fn score(self) -> i32 {
        match self {
            NameMatch::Exact => 100,
            NameMatch::Pattern => 80,
            NameMatch::Substring => 40,
        }
    }
}

/// Match a candidate stem against an already normalized target
pub fn match_name(candidate_stem: &str, normalized_target: &str) -> Option<NameMatch> {
    if normalized_target.is_empty() {
        return None;
    }

    let lower = candidate_stem.to_ascii_lowercase();
    if normalize_base(&lower) == normalized_target {
        return Some(NameMatch::Exact);
    }

    if let Some(rest) = lower.strip_prefix(normalized_target) {
        if is_suffix_chain(rest) {
            return Some(NameMatch::Pattern);
        }
    }

    if lower.contains(normalized_target) {
        return Some(NameMatch::Substring);
    }

    None
}

/// `_hd`, `.c_t`, `_w1280`: one or more separators each followed by 1-6 alphanumerics
fn is_suffix_chain(rest: &str) -> bool {
    if rest.is_empty() {
        return false;
    }
    rest.split(|c: char| c == '_' || c == '.')
        .skip(1)
        .all(|seg| (1..=6).contains(&seg.len()) && seg.bytes().all(|b| b.is_ascii_alphanumeric()))
        && (rest.starts_with('_') || rest.starts_with('.'))
}

/// Classification of one on-disk container by its file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerName {
    /// File name without `.dat`
    pub stem: String,
    pub normalized: String,
    pub variant: Option<char>,
    pub is_thumbnail: bool,
}

impl ContainerName {
    /// Parse a container file name. Returns None for non-containers and for
    /// stems that fail the genuine-container check.
    pub fn parse(file_name: &str) -> Option<Self> {
        if !has_container_extension(file_name) {
            return None;
        }
        let stem = strip_container_extension(file_name);
        if !is_genuine_container(stem) {
            return None;
        }
        Some(Self {
            stem: stem.to_string(),
            normalized: normalize_base(stem),
            variant: variant_suffix(stem),
            is_thumbnail: is_thumbnail_name(stem),
        })
    }

    /// An original the update watcher may offer: non-thumbnail and variant-suffixed
    pub fn is_upgrade_candidate(&self) -> bool {
        !self.is_thumbnail && self.variant.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_suffix_detection() {
        assert_eq!(variant_suffix("abc123_t"), Some('t'));
        assert_eq!(variant_suffix("abc123.c"), Some('c'));
        assert_eq!(variant_suffix("ABC_H"), Some('h'));
        assert_eq!(variant_suffix("abc123"), None);
        assert_eq!(variant_suffix("abc_1"), None);
        assert_eq!(variant_suffix("_t"), None);
    }

    #[test]
    fn test_hash_like_shape() {
        assert!(is_hash_like("00112233445566778899aabbccddeeff"));
        assert!(is_hash_like("abc123"));
        assert!(!is_hash_like("abc"));
        assert!(!is_hash_like("abc-123"));
    }

    #[test]
    fn test_thumbnail_is_syntactic() {
        assert!(is_thumbnail_name("deadbeef_t"));
        assert!(is_thumbnail_name("deadbeef.T"));
        assert!(is_thumbnail_name("deadbeef_thumb"));
        assert!(!is_thumbnail_name("deadbeef_h"));
        assert!(!is_thumbnail_name("deadbeef"));
    }

    #[test]
    fn test_normalize_strips_repeated_suffixes() {
        assert_eq!(normalize_base("ABC123_t.dat"), "abc123");
        assert_eq!(normalize_base("abc123.c_t"), "abc123");
        assert_eq!(normalize_base("abc123_thumb.dat"), "abc123");
        assert_eq!(normalize_base("abc123_hd"), "abc123");
        assert_eq!(normalize_base("abc123"), "abc123");
    }

    #[test]
    fn test_match_tiers() {
        assert_eq!(match_name("abc123", "abc123"), Some(NameMatch::Exact));
        assert_eq!(match_name("abc123_t", "abc123"), Some(NameMatch::Exact));
        assert_eq!(match_name("abc123.c", "abc123"), Some(NameMatch::Exact));
        assert_eq!(match_name("abc123_w1280", "abc123"), Some(NameMatch::Pattern));
        assert_eq!(match_name("xabc123y", "abc123"), Some(NameMatch::Substring));
        assert_eq!(match_name("fff000", "abc123"), None);
        assert!(NameMatch::Exact > NameMatch::Pattern);
        assert!(NameMatch::Pattern > NameMatch::Substring);
    }

    #[test]
    fn test_parse_container_names() {
        let thumb = ContainerName::parse("00112233445566778899aabbccddeeff_t.dat").unwrap();
        assert!(thumb.is_thumbnail);
        assert_eq!(thumb.normalized, "00112233445566778899aabbccddeeff");
        assert!(!thumb.is_upgrade_candidate());

        let original = ContainerName::parse("abc123_h.DAT").unwrap();
        assert!(original.is_upgrade_candidate());

        assert!(ContainerName::parse("abc123.jpg").is_none());
        assert!(ContainerName::parse("a-b.dat").is_none());
    }

    #[test]
    fn test_image_extensions() {
        assert!(is_image_extension("PNG"));
        assert!(is_image_extension("jpeg"));
        assert!(!is_image_extension("dat"));
    }
}
