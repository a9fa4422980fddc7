// title/crypto.rs from rustctr (c) 2025 NinjaCheetah & Contributors
// https://github.com/NinjaCheetah/rustctr
//
// Implements the title key crypto used to encrypt and decrypt 3DS title content.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::cipher::block_padding::NoPadding;
use log::debug;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;
/// The key slot that title keys are loaded into.
pub const TITLE_KEY_SLOT: u8 = 0x11;
pub const KEY_SLOT_COUNT: usize = 0x40;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("data length {0} is not a multiple of the AES block size")]
    MisalignedInput(usize),
    #[error("no key has been set up in key slot {0:#04X}")]
    KeyNotSet(u8),
    #[error("key slot {0:#04X} does not exist")]
    InvalidKeySlot(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CryptDirection {
    Encrypt,
    Decrypt,
}

/// An AES engine with numbered key slots that can run AES-128-CBC using the key in a slot. After
/// each call the IV must hold the chaining value, so that passing it to the next call continues
/// the same CBC stream.
pub trait AesEngine {
    fn setup_key(&mut self, slot: u8, key: [u8; 16]) -> Result<(), CryptoError>;
    fn cbc_crypt(&mut self, slot: u8, direction: CryptDirection, iv: &mut [u8; 16], data: &mut [u8]) -> Result<(), CryptoError>;
}

/// AES engine implemented in software.
#[derive(Debug, Clone)]
pub struct SoftwareAes {
    slots: [Option<[u8; 16]>; KEY_SLOT_COUNT],
}

impl Default for SoftwareAes {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareAes {
    pub fn new() -> Self {
        SoftwareAes { slots: [None; KEY_SLOT_COUNT] }
    }
}

impl AesEngine for SoftwareAes {
    fn setup_key(&mut self, slot: u8, key: [u8; 16]) -> Result<(), CryptoError> {
        let entry = self.slots.get_mut(slot as usize).ok_or(CryptoError::InvalidKeySlot(slot))?;
        *entry = Some(key);
        Ok(())
    }

    fn cbc_crypt(&mut self, slot: u8, direction: CryptDirection, iv: &mut [u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
        let len = data.len();
        if len % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::MisalignedInput(len));
        }
        let key = self.slots.get(slot as usize).copied().flatten().ok_or(CryptoError::KeyNotSet(slot))?;
        if len == 0 {
            return Ok(());
        }
        let mut next_iv = [0u8; 16];
        match direction {
            CryptDirection::Encrypt => {
                Aes128CbcEnc::new(&key.into(), &(*iv).into())
                    .encrypt_padded_mut::<NoPadding>(data, len)
                    .map_err(|_| CryptoError::MisalignedInput(len))?;
                next_iv.copy_from_slice(&data[len - AES_BLOCK_SIZE..]);
            },
            CryptDirection::Decrypt => {
                // The chaining value is the last ciphertext block, so grab it before it's gone.
                next_iv.copy_from_slice(&data[len - AES_BLOCK_SIZE..]);
                Aes128CbcDec::new(&key.into(), &(*iv).into())
                    .decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| CryptoError::MisalignedInput(len))?;
            },
        }
        *iv = next_iv;
        Ok(())
    }
}

/// Gets the IV used for content with the specified index, which is the index in big endian
/// followed by zeroes.
pub fn content_iv(index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..2].copy_from_slice(&index.to_be_bytes());
    iv
}

/// An in-progress encryption or decryption of a single content. The data can be passed in over as
/// many calls to update() as needed, as long as each piece is a multiple of 16 bytes. The engine
/// stays borrowed for as long as this exists, so nothing else can touch the title key slot.
pub struct ContentCrypt<'a, E: AesEngine> {
    engine: &'a mut E,
    direction: CryptDirection,
    iv: [u8; 16],
}

impl<'a, E: AesEngine> ContentCrypt<'a, E> {
    /// Loads the title key into the engine and prepares the IV for the content with the specified
    /// index.
    pub fn new(engine: &'a mut E, direction: CryptDirection, title_key: [u8; 16], index: u16) -> Result<Self, CryptoError> {
        engine.setup_key(TITLE_KEY_SLOT, title_key)?;
        debug!("starting content {:?} for index {}", direction, index);
        Ok(ContentCrypt {
            engine,
            direction,
            iv: content_iv(index),
        })
    }

    /// Encrypts or decrypts the next piece of the content in place.
    pub fn update(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::MisalignedInput(data.len()));
        }
        self.engine.cbc_crypt(TITLE_KEY_SLOT, self.direction, &mut self.iv, data)
    }

    pub fn direction(&self) -> CryptDirection {
        self.direction
    }
}

/// Encrypts or decrypts an entire content in place.
pub fn transform_content<E: AesEngine>(engine: &mut E, direction: CryptDirection, data: &mut [u8], index: u16,
                                       title_key: [u8; 16]) -> Result<(), CryptoError> {
    ContentCrypt::new(engine, direction, title_key, index)?.update(data)
}

/// Decrypt content using the corresponding Title Key and content index.
pub fn decrypt_content(data: &[u8], title_key: [u8; 16], index: u16) -> Result<Vec<u8>, CryptoError> {
    let mut buf = data.to_owned();
    transform_content(&mut SoftwareAes::new(), CryptDirection::Decrypt, &mut buf, index, title_key)?;
    Ok(buf)
}

/// Encrypt content using the corresponding Title Key and content index. The content is padded with
/// zeroes up to the nearest multiple of 16 first.
pub fn encrypt_content(data: &[u8], title_key: [u8; 16], index: u16) -> Result<Vec<u8>, CryptoError> {
    let mut buf = data.to_owned();
    buf.resize(data.len().next_multiple_of(AES_BLOCK_SIZE), 0);
    transform_content(&mut SoftwareAes::new(), CryptDirection::Encrypt, &mut buf, index, title_key)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE_KEY: [u8; 16] = [
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
    ];

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_content_iv() {
        assert_eq!(content_iv(0), [0; 16]);
        let iv = content_iv(0x0102);
        assert_eq!(&iv[..2], &[0x01, 0x02]);
        assert!(iv[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_engine_known_answer() {
        // NIST SP 800-38A, F.2.1 CBC-AES128.Encrypt.
        let mut engine = SoftwareAes::new();
        engine.setup_key(TITLE_KEY_SLOT, TITLE_KEY).unwrap();
        let mut iv: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap().try_into().unwrap();
        let mut data = hex::decode("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51").unwrap();
        engine.cbc_crypt(TITLE_KEY_SLOT, CryptDirection::Encrypt, &mut iv, &mut data).unwrap();
        assert_eq!(hex::encode(&data), "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2");
        assert_eq!(hex::encode(iv), "5086cb9b507219ee95db113a917678b2");
    }

    #[test]
    fn test_round_trip() {
        for (len, index) in [(0usize, 0u16), (16, 1), (0x400, 0x2C), (0x1230, 0xFFFF)] {
            let original = sample_data(len);
            let mut data = original.clone();
            let mut engine = SoftwareAes::new();
            transform_content(&mut engine, CryptDirection::Encrypt, &mut data, index, TITLE_KEY).unwrap();
            if len > 0 {
                assert_ne!(data, original);
            }
            transform_content(&mut engine, CryptDirection::Decrypt, &mut data, index, TITLE_KEY).unwrap();
            assert_eq!(data, original);
        }
    }

    #[test]
    fn test_streamed_matches_single_call() {
        let original = sample_data(0x300);
        let mut single = original.clone();
        transform_content(&mut SoftwareAes::new(), CryptDirection::Encrypt, &mut single, 3, TITLE_KEY).unwrap();
        let mut engine = SoftwareAes::new();
        let mut streamed = original.clone();
        let mut crypt = ContentCrypt::new(&mut engine, CryptDirection::Encrypt, TITLE_KEY, 3).unwrap();
        for piece in streamed.chunks_mut(0x70) {
            crypt.update(piece).unwrap();
        }
        assert_eq!(streamed, single);
        // And back again, with different piece sizes.
        let mut crypt = ContentCrypt::new(&mut engine, CryptDirection::Decrypt, TITLE_KEY, 3).unwrap();
        for piece in streamed.chunks_mut(0x100) {
            crypt.update(piece).unwrap();
        }
        assert_eq!(streamed, original);
    }

    #[test]
    fn test_index_changes_first_block_only() {
        let original = sample_data(0x40);
        let encrypted = encrypt_content(&original, TITLE_KEY, 1).unwrap();
        let decrypted = decrypt_content(&encrypted, TITLE_KEY, 2).unwrap();
        assert_ne!(decrypted[..16], original[..16]);
        assert_eq!(decrypted[16..], original[16..]);
    }

    #[test]
    fn test_encrypt_content_pads() {
        let original = sample_data(20);
        let encrypted = encrypt_content(&original, TITLE_KEY, 0).unwrap();
        assert_eq!(encrypted.len(), 32);
        let decrypted = decrypt_content(&encrypted, TITLE_KEY, 0).unwrap();
        assert_eq!(decrypted[..20], original[..]);
        assert_eq!(decrypted[20..], [0u8; 12]);
    }

    #[test]
    fn test_misaligned_input() {
        let mut data = vec![0u8; 17];
        let result = transform_content(&mut SoftwareAes::new(), CryptDirection::Decrypt, &mut data, 0, TITLE_KEY);
        assert!(matches!(result, Err(CryptoError::MisalignedInput(17))));
        assert!(matches!(decrypt_content(&[0u8; 8], TITLE_KEY, 0), Err(CryptoError::MisalignedInput(8))));
    }

    #[test]
    fn test_key_slots() {
        let mut engine = SoftwareAes::new();
        let mut iv = [0u8; 16];
        let mut data = [0u8; 16];
        assert!(matches!(engine.cbc_crypt(0x2C, CryptDirection::Encrypt, &mut iv, &mut data), Err(CryptoError::KeyNotSet(0x2C))));
        assert!(matches!(engine.setup_key(0x40, TITLE_KEY), Err(CryptoError::InvalidKeySlot(0x40))));
    }
}
