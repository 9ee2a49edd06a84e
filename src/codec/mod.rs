/// Container decryption engine
///
/// This module is a pure byte-in/byte-out codec:
/// - Version detection from the 6-byte signature (version.rs)
/// - Legacy single-byte XOR (xor.rs)
/// - Hybrid AES-128-ECB + XOR with strict PKCS7 (hybrid.rs)
/// - Image type sniffing of the plaintext (sniff.rs)
///
/// Nothing here touches the filesystem; every failure is a returned error.

pub mod hybrid;
pub mod sniff;
pub mod version;
pub mod xor;

pub use hybrid::decode_hybrid;
pub use sniff::{sniff_extension, DEFAULT_EXTENSION};
pub use version::{detect_version, ContainerVersion};
pub use xor::decode_legacy_plain;

use crate::error::{ImageError, Result};

/// AES key compiled into the client for fixed-key containers
pub const FIXED_AES_KEY: &[u8; 16] = b"cfcd208495d565ef";

/// Plaintext produced from one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedArtifact {
    pub data: Vec<u8>,
    /// Extension without the dot, e.g. "png"
    pub extension: &'static str,
}

/// Decode a container, dispatching strictly on its signature.
///
/// Fixed-key containers always use the built-in key, even when `aes_key` is
/// given. Configurable-key containers fail without one.
pub fn decode_auto(data: &[u8], xor_key: u8, aes_key: Option<&[u8; 16]>) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(ImageError::MalformedContainer("container is empty".into()));
    }

    match detect_version(data) {
        ContainerVersion::LegacyPlain => Ok(decode_legacy_plain(data, xor_key)),
        ContainerVersion::FixedKeyVariant => decode_hybrid(data, xor_key, FIXED_AES_KEY),
        ContainerVersion::ConfigurableKeyVariant => match aes_key {
            Some(key) => decode_hybrid(data, xor_key, key),
            None => Err(ImageError::UnsupportedVersion(
                "container requires an image AES key".into(),
            )),
        },
    }
}

/// Decode a container and sniff the resulting image type.
/// Unrecognized plaintext keeps the default `.jpg` extension.
pub fn decrypt_container(
    data: &[u8],
    xor_key: u8,
    aes_key: Option<&[u8; 16]>,
) -> Result<DecryptedArtifact> {
    let data = decode_auto(data, xor_key, aes_key)?;
    let extension = sniff_extension(&data).unwrap_or(DEFAULT_EXTENSION);
    Ok(DecryptedArtifact { data, extension })
}

#[cfg(test)]
mod tests {
    use super::hybrid::test_support::encode_hybrid;
    use super::version::{CONFIGURABLE_KEY_MAGIC, FIXED_KEY_MAGIC};
    use super::*;

    const USER_KEY: &[u8; 16] = b"user-key-16bytes";

    fn png_bytes() -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend((0..120u8).collect::<Vec<_>>());
        data
    }

    #[test]
    fn test_fixed_key_ignores_caller_key() {
        let plain = png_bytes();
        let container = encode_hybrid(FIXED_KEY_MAGIC, &plain, 64, 16, 0x21, FIXED_AES_KEY);

        assert_eq!(decode_auto(&container, 0x21, None).unwrap(), plain);
        assert_eq!(decode_auto(&container, 0x21, Some(USER_KEY)).unwrap(), plain);
    }

    #[test]
    fn test_configurable_key_requires_caller_key() {
        let plain = png_bytes();
        let container = encode_hybrid(CONFIGURABLE_KEY_MAGIC, &plain, 64, 16, 0x21, USER_KEY);

        let err = decode_auto(&container, 0x21, None).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedVersion(_)));
        assert_eq!(decode_auto(&container, 0x21, Some(USER_KEY)).unwrap(), plain);
    }

    #[test]
    fn test_unknown_signature_takes_legacy_path() {
        let plain = png_bytes();
        let container = decode_legacy_plain(&plain, 0x77);
        assert_eq!(decode_auto(&container, 0x77, Some(USER_KEY)).unwrap(), plain);
    }

    #[test]
    fn test_empty_container_is_malformed() {
        assert!(matches!(
            decode_auto(&[], 0x10, None),
            Err(ImageError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_decrypt_container_sniffs_extension() {
        let container = decode_legacy_plain(&png_bytes(), 0x42);
        let artifact = decrypt_container(&container, 0x42, None).unwrap();
        assert_eq!(artifact.extension, "png");

        let container = decode_legacy_plain(b"opaque bytes", 0x42);
        let artifact = decrypt_container(&container, 0x42, None).unwrap();
        assert_eq!(artifact.extension, DEFAULT_EXTENSION);
    }
}
