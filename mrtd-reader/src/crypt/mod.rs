//! Cryptographic functionality.


pub mod cipher_mac;


/// A failure of a cryptographic primitive.
///
/// These indicate a programming error or corrupted input, never a wrong key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
pub enum CryptError {
    #[error("key has length {obtained}, expected {expected}")]
    KeyLength { obtained: usize, expected: usize },

    #[error("initialization vector has length {obtained}, expected {expected}")]
    IvLength { obtained: usize, expected: usize },

    #[error("data length {length} is not a multiple of the block size {block_size}")]
    Unaligned { length: usize, block_size: usize },

    #[error("padding is missing or invalid")]
    InvalidPadding,
}


/// Appends ISO/IEC 7816-4 padding: the byte `0x80`, then zero bytes up to the next multiple of
/// `block_size`.
///
/// Padding is always added, even if the data is already aligned.
pub fn pad_iso7816(data: &mut Vec<u8>, block_size: usize) {
    data.push(0x80);
    while data.len() % block_size != 0 {
        data.push(0x00);
    }
}

/// Strips ISO/IEC 7816-4 padding in place.
pub fn unpad_iso7816(data: &mut Vec<u8>) -> Result<(), CryptError> {
    let marker = data.iter()
        .rposition(|b| *b != 0x00)
        .ok_or(CryptError::InvalidPadding)?;
    if data[marker] != 0x80 {
        return Err(CryptError::InvalidPadding);
    }
    data.truncate(marker);
    Ok(())
}

/// Adjusts the least significant bit of every byte so that each byte has odd parity, as DES keys
/// require.
pub fn set_odd_parity(key: &mut [u8]) {
    for b in key.iter_mut() {
        let upper_ones = (*b & 0xFE).count_ones();
        *b = (*b & 0xFE) | u8::from(upper_ones % 2 == 0);
    }
}

/// XORs two equal-length byte strings.
pub fn xor_into(target: &mut [u8], other: &[u8]) {
    for (t, o) in target.iter_mut().zip(other.iter()) {
        *t ^= *o;
    }
}
