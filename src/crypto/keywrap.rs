//! EAPOL-Key key data confidentiality
//!
//! - AES key wrap (RFC 3394) with the KEK for the HMAC-SHA1/AES descriptor
//! - RC4 with the first 256 keystream bytes discarded for the legacy
//!   HMAC-MD5/RC4 descriptor

use aes_kw::KekAes128;
use rc4::{consts::U32, KeyInit, Rc4, StreamCipher};

use crate::error::CryptoError;

/// Extra bytes added by AES key wrap (the integrity check block)
pub const AES_WRAP_OVERHEAD: usize = 8;

/// Keystream bytes discarded before RC4 encryption of key data
pub const RC4_SKIP: usize = 256;

/// First padding byte appended to key data before wrapping
const PAD_MARKER: u8 = 0xdd;

/// Pad key data to a multiple of 8 bytes (and at least 16) for AES key wrap
///
/// Padding is a single 0xdd followed by zeros.
pub fn pad_key_data(data: &mut Vec<u8>) {
    let mut target = data.len().max(16);
    if target % 8 != 0 {
        target += 8 - target % 8;
    }
    if target > data.len() {
        data.push(PAD_MARKER);
        data.resize(target, 0);
    }
}

fn kek_array(kek: &[u8]) -> Result<[u8; 16], CryptoError> {
    kek.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 16,
        got: kek.len(),
    })
}

/// Wrap padded key data with a 128-bit KEK
pub fn aes_wrap(kek: &[u8], plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plain.len() % 8 != 0 || plain.len() < 16 {
        return Err(CryptoError::KeyDataAlignment { len: plain.len() });
    }
    let kek = KekAes128::from(kek_array(kek)?);
    let mut out = vec![0u8; plain.len() + AES_WRAP_OVERHEAD];
    kek.wrap(plain, &mut out).map_err(|_| CryptoError::KeyWrap)?;
    Ok(out)
}

/// Unwrap AES-wrapped key data, checking the integrity block
pub fn aes_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped.len() % 8 != 0 || wrapped.len() < 24 {
        return Err(CryptoError::KeyDataAlignment { len: wrapped.len() });
    }
    let kek = KekAes128::from(kek_array(kek)?);
    let mut out = vec![0u8; wrapped.len() - AES_WRAP_OVERHEAD];
    kek.unwrap(wrapped, &mut out)
        .map_err(|_| CryptoError::KeyUnwrap)?;
    Ok(out)
}

/// RC4-encrypt (or decrypt) `data` in place with `key = IV || KEK`,
/// discarding the first `skip` keystream bytes
pub fn rc4_skip(key: &[u8; 32], skip: usize, data: &mut [u8]) -> Result<(), CryptoError> {
    let mut cipher = Rc4::<U32>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        got: key.len(),
    })?;
    let mut discard = [0u8; 64];
    let mut remaining = skip;
    while remaining > 0 {
        let n = remaining.min(discard.len());
        cipher.apply_keystream(&mut discard[..n]);
        remaining -= n;
    }
    cipher.apply_keystream(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3394_vector() {
        // RFC 3394 section 4.1: wrap 128 bits of key data with a 128-bit KEK
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let plain = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let wrapped = aes_wrap(&kek, &plain).unwrap();
        assert_eq!(
            hex::encode_upper(&wrapped),
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5"
        );
        assert_eq!(aes_unwrap(&kek, &wrapped).unwrap(), plain);
    }

    #[test]
    fn test_unwrap_detects_tamper() {
        let kek = [0x11u8; 16];
        let mut wrapped = aes_wrap(&kek, &[0x22u8; 24]).unwrap();
        wrapped[5] ^= 0x80;
        assert!(matches!(
            aes_unwrap(&kek, &wrapped),
            Err(CryptoError::KeyUnwrap)
        ));
    }

    #[test]
    fn test_wrap_rejects_unaligned() {
        assert!(matches!(
            aes_wrap(&[0u8; 16], &[0u8; 20]),
            Err(CryptoError::KeyDataAlignment { len: 20 })
        ));
        assert!(aes_wrap(&[0u8; 15], &[0u8; 16]).is_err());
    }

    #[test]
    fn test_padding() {
        let mut data = vec![1u8; 22];
        pad_key_data(&mut data);
        assert_eq!(data.len(), 24);
        assert_eq!(data[22], 0xdd);
        assert_eq!(data[23], 0x00);

        let mut aligned = vec![1u8; 24];
        pad_key_data(&mut aligned);
        assert_eq!(aligned.len(), 24);

        let mut short = vec![1u8; 6];
        pad_key_data(&mut short);
        assert_eq!(short.len(), 16);
        assert_eq!(short[6], 0xdd);
    }

    #[test]
    fn test_rc4_round_trip() {
        let key = [0x5cu8; 32];
        let plain = b"group temporal key material 1234".to_vec();
        let mut data = plain.clone();
        rc4_skip(&key, RC4_SKIP, &mut data).unwrap();
        assert_ne!(data, plain);
        rc4_skip(&key, RC4_SKIP, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn test_rc4_skip_changes_keystream() {
        let key = [0x01u8; 32];
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        rc4_skip(&key, 0, &mut a).unwrap();
        rc4_skip(&key, RC4_SKIP, &mut b).unwrap();
        assert_ne!(a, b);
    }
}
