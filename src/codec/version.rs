/// Wire version detection for image containers.
///
/// The first six bytes of a container identify its layout. Anything that does
/// not match one of the two hybrid signatures is treated as the legacy
/// single-byte XOR format.

/// Signature of hybrid containers encrypted with the built-in AES key
pub const FIXED_KEY_MAGIC: [u8; 6] = [0x07, 0x08, b'V', b'1', 0x08, 0x07];

/// Signature of hybrid containers encrypted with the per-account AES key
pub const CONFIGURABLE_KEY_MAGIC: [u8; 6] = [0x07, 0x08, b'V', b'2', 0x08, 0x07];

/// Length of the version signature
pub const MAGIC_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerVersion {
    /// Whole file XORed with one key byte
    LegacyPlain,
    /// Hybrid AES+XOR layout, AES key baked into the client
    FixedKeyVariant,
    /// Hybrid AES+XOR layout, AES key supplied by configuration
    ConfigurableKeyVariant,
}

impl ContainerVersion {
    /// Whether decoding this version needs the caller's AES key
    pub fn needs_aes_key(self) -> bool {
        self == ContainerVersion::ConfigurableKeyVariant
    }
}

/// Detect the container version from its leading bytes.
/// Inputs shorter than the signature are legacy containers.
pub fn detect_version(data: &[u8]) -> ContainerVersion {
    match data.get(..MAGIC_LEN) {
        Some(head) if head == FIXED_KEY_MAGIC => ContainerVersion::FixedKeyVariant,
        Some(head) if head == CONFIGURABLE_KEY_MAGIC => ContainerVersion::ConfigurableKeyVariant,
        _ => ContainerVersion::LegacyPlain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_both_hybrid_signatures() {
        let mut data = FIXED_KEY_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 20]);
        assert_eq!(detect_version(&data), ContainerVersion::FixedKeyVariant);

        let mut data = CONFIGURABLE_KEY_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 20]);
        assert_eq!(detect_version(&data), ContainerVersion::ConfigurableKeyVariant);
        assert!(ContainerVersion::ConfigurableKeyVariant.needs_aes_key());
    }

    #[test]
    fn test_short_or_unknown_input_is_legacy() {
        assert_eq!(detect_version(&[]), ContainerVersion::LegacyPlain);
        assert_eq!(detect_version(&FIXED_KEY_MAGIC[..5]), ContainerVersion::LegacyPlain);
        assert_eq!(
            detect_version(&[0x07, 0x08, b'V', b'3', 0x08, 0x07, 0x00]),
            ContainerVersion::LegacyPlain
        );
    }
}
