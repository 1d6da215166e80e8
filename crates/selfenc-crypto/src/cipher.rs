//! Per-chunk XOR pad + ChaCha20 encryption/decryption
//!
//! Encrypted chunk format: raw ChaCha20 output, same length as the plaintext.
//! No nonce or tag is stored; both key and IV are re-derived from the data
//! map's pre-hashes at decryption time.
//!
//! Decryption cannot fail cryptographically. A wrong key or corrupted
//! ciphertext yields garbage whose hash will not match the chunk's pre-hash.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use selfenc_chunks::{hash_bytes, Hash};
use selfenc_core::{SelfEncError, SelfEncResult};

use crate::keys::KeyMaterial;

/// Encrypt a single chunk: XOR with the pad, then apply the ChaCha20 keystream.
pub fn encrypt_chunk(plaintext: &[u8], km: &KeyMaterial) -> SelfEncResult<Vec<u8>> {
    check_len(plaintext.len(), km)?;
    let mut buf = plaintext.to_vec();
    xor_in_place(&mut buf, km.pad());
    apply_keystream(&mut buf, km);
    Ok(buf)
}

/// Decrypt a single chunk: remove the ChaCha20 keystream, then the pad.
pub fn decrypt_chunk(ciphertext: &[u8], km: &KeyMaterial) -> SelfEncResult<Vec<u8>> {
    check_len(ciphertext.len(), km)?;
    let mut buf = ciphertext.to_vec();
    apply_keystream(&mut buf, km);
    xor_in_place(&mut buf, km.pad());
    Ok(buf)
}

/// Content address of an encrypted chunk
pub fn post_hash(ciphertext: &[u8]) -> Hash {
    hash_bytes(ciphertext)
}

fn check_len(len: usize, km: &KeyMaterial) -> SelfEncResult<()> {
    if len != km.pad().len() {
        return Err(SelfEncError::CipherInput(format!(
            "pad length {} does not match chunk length {len}",
            km.pad().len()
        )));
    }
    Ok(())
}

fn apply_keystream(buf: &mut [u8], km: &KeyMaterial) {
    let mut cipher = ChaCha20::new(km.key().into(), km.iv().into());
    cipher.apply_keystream(buf);
}

fn xor_in_place(buf: &mut [u8], pad: &[u8]) {
    for (b, p) in buf.iter_mut().zip(pad) {
        *b ^= p;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_key_material;
    use proptest::prelude::*;

    fn material(len: usize) -> KeyMaterial {
        let hashes: Vec<Hash> = (0u8..3).map(|i| hash_bytes(&[i; 32])).collect();
        derive_key_material(0, &hashes, len).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = b"hello, self-encrypted world!";
        let km = material(plaintext.len());

        let encrypted = encrypt_chunk(plaintext, &km).unwrap();
        let decrypted = decrypt_chunk(&encrypted, &km).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypted_size_matches_plaintext() {
        let plaintext = vec![0u8; 1000];
        let km = material(plaintext.len());

        let encrypted = encrypt_chunk(&plaintext, &km).unwrap();

        assert_eq!(encrypted.len(), 1000);
        assert_ne!(encrypted, plaintext, "zeros must not survive encryption");
    }

    #[test]
    fn test_decrypt_wrong_material_gives_garbage() {
        let plaintext = b"secret data";
        let km = material(plaintext.len());
        let other: Vec<Hash> = (10u8..13).map(|i| hash_bytes(&[i; 32])).collect();
        let wrong = derive_key_material(0, &other, plaintext.len()).unwrap();

        let encrypted = encrypt_chunk(plaintext, &km).unwrap();
        let result = decrypt_chunk(&encrypted, &wrong).unwrap();

        assert_ne!(&result, plaintext);
        assert_ne!(hash_bytes(&result), hash_bytes(plaintext));
    }

    #[test]
    fn test_tampered_ciphertext_changes_plaintext_hash() {
        let plaintext = b"secret data";
        let km = material(plaintext.len());

        let mut encrypted = encrypt_chunk(plaintext, &km).unwrap();
        encrypted[3] ^= 0x01;

        let result = decrypt_chunk(&encrypted, &km).unwrap();
        assert_ne!(hash_bytes(&result), hash_bytes(plaintext));
    }

    #[test]
    fn test_pad_length_mismatch_is_rejected() {
        let km = material(8);
        let err = encrypt_chunk(b"longer than eight bytes", &km).unwrap_err();
        assert!(matches!(err, SelfEncError::CipherInput(_)));
    }

    #[test]
    fn test_post_hash_is_ciphertext_hash() {
        let km = material(4);
        let encrypted = encrypt_chunk(b"abcd", &km).unwrap();
        assert_eq!(post_hash(&encrypted), hash_bytes(&encrypted));
    }

    proptest! {
        #[test]
        fn roundtrip_any_chunk(data in proptest::collection::vec(any::<u8>(), 0..=8192)) {
            let km = material(data.len());
            let encrypted = encrypt_chunk(&data, &km).unwrap();
            prop_assert_eq!(encrypted.len(), data.len());
            let decrypted = decrypt_chunk(&encrypted, &km).unwrap();
            prop_assert_eq!(decrypted, data);
        }
    }
}
