//! Cipher and MAC (message authentication code) combinations.


use cipher::block_padding::NoPadding;
use cipher::{Block, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use des::{Des, TdesEde2};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypt::{set_odd_parity, CryptError};


/// A combination of cipher, MAC and KDF (key derivation function) usable during authentication and
/// Secure Messaging.
pub trait CipherAndMac {
    /// Size of the cipher key in bytes.
    fn cipher_key_size(&self) -> usize;

    /// Block size of the cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// Block size of the MAC in bytes.
    fn mac_block_size(&self) -> usize;

    /// The key derivation function.
    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>>;

    /// The key derivation function for encryption purposes.
    fn derive_encryption_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, 1)
    }

    /// The key derivation function for message authentication purposes.
    fn derive_mac_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, 2)
    }

    /// Decrypts data in-place using the given key and CBC IV.
    ///
    /// Does not strip padding.
    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptError>;

    /// Encrypts pre-padded data in-place using the given key and CBC IV.
    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptError>;

    /// Generates a MAC (message authentication code) for the given pre-padded data and key.
    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError>;

    /// Verifies in constant time whether the given data fits the given MAC.
    fn verify_mac_padded_data(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> Result<bool, CryptError> {
        let computed_mac = self.mac_padded_data(data, key)?;
        Ok(computed_mac.ct_eq(expected_mac).into())
    }
}


/// 3DES-based cipher and MAC.
///
/// 3DES is used in EDE two-key mode:
/// ```plain
/// encrypt((K1, K2), D) = encrypt(K1, decrypt(K2, encrypt(K1, D)))
/// ```
/// The block mode of operation is Cipher Block Chaining (CBC).
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = odd_parity(sha1(key || counter)[0..16])
/// ```
/// whereupon
/// ```plain
/// K1 = keydata[0..8]
/// K2 = keydata[8..16]
/// ```
///
/// The MAC is Retail MAC (ISO/IEC 9797-1 algorithm 3) with DES and zero IV: every block is chained
/// through single DES under K1, and the final block is additionally decrypted under K2 and
/// encrypted under K1 again. Callers apply padding method 2 beforehand.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Cam3Des;
impl Cam3Des {
    const KEY_SIZE: usize = 16;
    const BLOCK_SIZE: usize = 8;

    fn check_aligned(data: &[u8]) -> Result<(), CryptError> {
        if data.len() % Self::BLOCK_SIZE != 0 {
            Err(CryptError::Unaligned { length: data.len(), block_size: Self::BLOCK_SIZE })
        } else {
            Ok(())
        }
    }

    fn check_key(key: &[u8]) -> Result<(), CryptError> {
        if key.len() != Self::KEY_SIZE {
            Err(CryptError::KeyLength { obtained: key.len(), expected: Self::KEY_SIZE })
        } else {
            Ok(())
        }
    }

    fn check_iv(iv: &[u8]) -> Result<(), CryptError> {
        if iv.len() != Self::BLOCK_SIZE {
            Err(CryptError::IvLength { obtained: iv.len(), expected: Self::BLOCK_SIZE })
        } else {
            Ok(())
        }
    }

    /// Encrypts a single block in ECB mode.
    ///
    /// Used to derive an IV from the send sequence counter.
    pub fn encrypt_block(&self, block: &mut [u8], key: &[u8]) -> Result<(), CryptError> {
        Self::check_key(key)?;
        Self::check_iv(block)?;
        let cipher = TdesEde2::new_from_slice(key)
            .map_err(|_| CryptError::KeyLength { obtained: key.len(), expected: Self::KEY_SIZE })?;
        cipher.encrypt_block(Block::<TdesEde2>::from_mut_slice(block));
        Ok(())
    }
}
impl CipherAndMac for Cam3Des {
    fn cipher_key_size(&self) -> usize { Self::KEY_SIZE }
    fn cipher_block_size(&self) -> usize { Self::BLOCK_SIZE }
    fn mac_block_size(&self) -> usize { Self::BLOCK_SIZE }

    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        let mut hasher = Sha1::new();
        hasher.update(key_seed);
        hasher.update(counter.to_be_bytes());
        let result = hasher.finalize();

        let mut key = Zeroizing::new(result[0..Self::KEY_SIZE].to_vec());
        set_odd_parity(&mut key);
        key
    }

    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptError> {
        Self::check_aligned(data)?;
        Self::check_key(key)?;
        Self::check_iv(iv)?;
        let decryptor = cbc::Decryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| CryptError::KeyLength { obtained: key.len(), expected: Self::KEY_SIZE })?;
        decryptor.decrypt_padded_mut::<NoPadding>(data)
            .map_err(|_| CryptError::InvalidPadding)?;
        Ok(())
    }

    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptError> {
        Self::check_aligned(data)?;
        Self::check_key(key)?;
        Self::check_iv(iv)?;
        let encryptor = cbc::Encryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| CryptError::KeyLength { obtained: key.len(), expected: Self::KEY_SIZE })?;
        let data_len = data.len();
        encryptor.encrypt_padded_mut::<NoPadding>(data, data_len)
            .map_err(|_| CryptError::Unaligned { length: data_len, block_size: Self::BLOCK_SIZE })?;
        Ok(())
    }

    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        Self::check_aligned(data)?;
        Self::check_key(key)?;
        let key_length_error = |_| CryptError::KeyLength { obtained: key.len(), expected: Self::KEY_SIZE };
        let k1 = Des::new_from_slice(&key[0..8]).map_err(key_length_error)?;
        let k2 = Des::new_from_slice(&key[8..16]).map_err(key_length_error)?;

        let mut state = Zeroizing::new([0u8; 8]);
        for chunk in data.chunks_exact(Self::BLOCK_SIZE) {
            super::xor_into(state.as_mut_slice(), chunk);
            k1.encrypt_block(Block::<Des>::from_mut_slice(state.as_mut_slice()));
        }
        // output transformation 3: decrypt with K2, encrypt with K1
        k2.decrypt_block(Block::<Des>::from_mut_slice(state.as_mut_slice()));
        k1.encrypt_block(Block::<Des>::from_mut_slice(state.as_mut_slice()));

        Ok(Zeroizing::new(state.to_vec()))
    }
}


#[cfg(test)]
mod tests {
    use super::{Cam3Des, CipherAndMac};
    use crate::crypt::CryptError;
    use hex_literal::hex;

    #[test]
    fn test_key_derivation() {
        let seed = hex!("239AB9CB282DAF66231DC5A4DF6BFBAE");
        assert_eq!(Cam3Des.derive_encryption_key(&seed).as_slice(), &hex!("AB94FDECF2674FDFB9B391F85D7F76F2"));
        assert_eq!(Cam3Des.derive_mac_key(&seed).as_slice(), &hex!("7962D9ECE03D1ACD4C76089DCE131543"));
    }

    #[test]
    fn test_encryption() {
        let key = hex!("AB94FDECF2674FDFB9B391F85D7F76F2");
        let mut data = hex!("781723860C06C2264608F919887022120B795240CB7049B01C19B33E32804F0B");
        Cam3Des.encrypt_padded_data(&mut data, &key, &[0u8; 8]).unwrap();
        assert_eq!(data, hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2"));

        Cam3Des.decrypt_padded_data(&mut data, &key, &[0u8; 8]).unwrap();
        assert_eq!(data, hex!("781723860C06C2264608F919887022120B795240CB7049B01C19B33E32804F0B"));

        let session_key = hex!("979EC13B1CBFE9DCD01AB0FED307EAE5");
        let mut command_data = hex!("011E800000000000");
        Cam3Des.encrypt_padded_data(&mut command_data, &session_key, &[0u8; 8]).unwrap();
        assert_eq!(command_data, hex!("6375432908C044F6"));
    }

    #[test]
    fn test_retail_mac() {
        let key = hex!("7962D9ECE03D1ACD4C76089DCE131543");
        let data = hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2 8000000000000000");
        let mac = Cam3Des.mac_padded_data(&data, &key).unwrap();
        assert_eq!(mac.as_slice(), &hex!("5F1448EEA8AD90A7"));
        assert!(Cam3Des.verify_mac_padded_data(&data, &key, &hex!("5F1448EEA8AD90A7")).unwrap());
        assert!(!Cam3Des.verify_mac_padded_data(&data, &key, &hex!("5F1448EEA8AD90A6")).unwrap());

        let data = hex!("46B9342A41396CD7386BF5803104D7CEDC122B9132139BAF2EEDC94EE178534F 8000000000000000");
        let mac = Cam3Des.mac_padded_data(&data, &key).unwrap();
        assert_eq!(mac.as_slice(), &hex!("2F2D235D074D7449"));

        let session_key = hex!("F1CB1F1FB5ADF208806B89DC579DC1F8");
        let data = hex!("887022120C06C227 0CA4020C80000000 8709016375432908 C044F68000000000");
        let mac = Cam3Des.mac_padded_data(&data, &session_key).unwrap();
        assert_eq!(mac.as_slice(), &hex!("BF8B92D635FF24F8"));
    }

    #[test]
    fn test_misuse_is_reported() {
        let key = hex!("AB94FDECF2674FDFB9B391F85D7F76F2");
        let mut data = [0u8; 7];
        assert_eq!(
            Cam3Des.encrypt_padded_data(&mut data, &key, &[0u8; 8]),
            Err(CryptError::Unaligned { length: 7, block_size: 8 }),
        );
        assert_eq!(
            Cam3Des.mac_padded_data(&[0u8; 8], &key[0..8]),
            Err(CryptError::KeyLength { obtained: 8, expected: 16 }),
        );
    }
}
