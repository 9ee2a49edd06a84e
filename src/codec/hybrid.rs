/// Hybrid AES-128-ECB + XOR container layout.
///
/// ```text
/// +--------+----------+----------+------+----------------------------------+
/// | magic  | aes_size | xor_size | pad  | payload                          |
/// | 6 B    | u32 LE   | i32 LE   | 1 B  | aes segment | raw | xor segment  |
/// +--------+----------+----------+------+----------------------------------+
/// ```
///
/// The AES segment holds `aes_size` plaintext bytes PKCS7-padded to the next
/// block, so an already aligned size still gains a whole padding block.

use super::xor::xor_in_place;
use crate::error::{ImageError, Result};
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::{Aes128, Block as AesBlock};

/// Header length preceding the payload
pub const HEADER_LEN: usize = 15;

/// AES block size in bytes
pub const BLOCK_LEN: usize = 16;

const AES_SIZE_OFFSET: usize = 6;
const XOR_SIZE_OFFSET: usize = 10;

fn read_le_bytes(header: &[u8], offset: usize) -> [u8; 4] {
    [
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ]
}

/// Length of the AES segment on disk for a given plaintext size
pub fn aligned_aes_size(aes_size: u32) -> u64 {
    let aes_size = u64::from(aes_size);
    aes_size + (BLOCK_LEN as u64 - aes_size % BLOCK_LEN as u64)
}

/// Decode a hybrid container with the given XOR byte and AES key.
pub fn decode_hybrid(data: &[u8], xor_key: u8, aes_key: &[u8; 16]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(ImageError::MalformedContainer(format!(
            "container is {} bytes, header needs {}",
            data.len(),
            HEADER_LEN
        )));
    }

    let (header, payload) = data.split_at(HEADER_LEN);
    let aes_size = u32::from_le_bytes(read_le_bytes(header, AES_SIZE_OFFSET));
    let xor_size = i32::from_le_bytes(read_le_bytes(header, XOR_SIZE_OFFSET));

    let aligned = aligned_aes_size(aes_size);
    if aligned > payload.len() as u64 {
        return Err(ImageError::MalformedContainer(format!(
            "AES segment of {} bytes exceeds payload of {} bytes",
            aligned,
            payload.len()
        )));
    }
    // Bounded by payload.len() above
    let aligned = aligned as usize;

    let (aes_segment, remainder) = payload.split_at(aligned);

    let mut plaintext = Vec::with_capacity(payload.len());
    if !aes_segment.is_empty() {
        let decrypted = decrypt_ecb(aes_segment, aes_key);
        let unpadded = strip_pkcs7(&decrypted)?;
        plaintext.extend_from_slice(unpadded);
    }

    if xor_size < 0 {
        return Err(ImageError::MalformedContainer(format!(
            "negative XOR segment length {}",
            xor_size
        )));
    }
    let xor_size = xor_size as usize;
    if xor_size > remainder.len() {
        return Err(ImageError::MalformedContainer(format!(
            "XOR segment of {} bytes exceeds remaining {} bytes",
            xor_size,
            remainder.len()
        )));
    }

    let (raw_region, xor_region) = remainder.split_at(remainder.len() - xor_size);
    plaintext.extend_from_slice(raw_region);

    let start = plaintext.len();
    plaintext.extend_from_slice(xor_region);
    xor_in_place(&mut plaintext[start..], xor_key);

    Ok(plaintext)
}

/// AES-128-ECB decrypt without library padding. `data` must be block aligned.
fn decrypt_ecb(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let cipher = Aes128::new(key.into());
    let mut out = data.to_vec();
    for chunk in out.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(AesBlock::from_mut_slice(chunk));
    }
    out
}

/// Strictly validate and strip PKCS7 padding.
pub fn strip_pkcs7(data: &[u8]) -> Result<&[u8]> {
    let pad_len = match data.last() {
        Some(&last) => last as usize,
        None => return Err(ImageError::PaddingInvalid("empty AES segment".into())),
    };

    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > data.len() {
        return Err(ImageError::PaddingInvalid(format!(
            "padding length {} out of range",
            pad_len
        )));
    }

    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b as usize != pad_len) {
        return Err(ImageError::PaddingInvalid(
            "padding bytes do not match padding length".into(),
        ));
    }

    Ok(body)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Reference encoder producing hybrid containers for tests.

    use super::*;
    use aes::cipher::BlockEncrypt;

    pub fn encode_hybrid(
        magic: [u8; 6],
        plaintext: &[u8],
        aes_len: usize,
        xor_len: usize,
        xor_key: u8,
        aes_key: &[u8; 16],
    ) -> Vec<u8> {
        assert!(aes_len + xor_len <= plaintext.len());
        let (aes_part, rest) = plaintext.split_at(aes_len);

        let pad = BLOCK_LEN - aes_len % BLOCK_LEN;
        let mut padded = aes_part.to_vec();
        padded.extend(std::iter::repeat(pad as u8).take(pad));

        let cipher = Aes128::new(aes_key.into());
        for chunk in padded.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block(AesBlock::from_mut_slice(chunk));
        }

        let mut out = magic.to_vec();
        out.extend_from_slice(&(aes_len as u32).to_le_bytes());
        out.extend_from_slice(&(xor_len as i32).to_le_bytes());
        out.push(0x01);
        out.extend_from_slice(&padded);

        let (raw, xored) = rest.split_at(rest.len() - xor_len);
        out.extend_from_slice(raw);
        out.extend(xored.iter().map(|b| b ^ xor_key));
        out
    }
}
