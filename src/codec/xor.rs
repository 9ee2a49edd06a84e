/// Single-byte XOR used by legacy containers and the tail of hybrid ones.

/// XOR every byte of `data` with `key`.
pub fn decode_legacy_plain(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

/// XOR `data` with `key` in place
pub fn xor_in_place(data: &mut [u8], key: u8) {
    for byte in data.iter_mut() {
        *byte ^= key;
    }
}
