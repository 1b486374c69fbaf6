//! Outgoing EAPOL-Key frame construction
//!
//! Applies the per-frame rules every authenticator message shares: key
//! descriptor version from the pairwise cipher, key length from the cipher
//! being delivered, a fresh replay counter, key data confidentiality and the
//! MIC over the finished frame.

use crate::crypto::keywrap::{self, RC4_SKIP};
use crate::crypto::mic::DescriptorVersion;
use crate::crypto::prf::{increment_be, Ptk, NONCE_LEN};
use crate::error::CryptoError;
use crate::protocol::eapol::{
    sign_frame, EapolKeyFrame, KeyInfo, DESC_TYPE_RSN, DESC_TYPE_WPA,
};
use crate::protocol::replay::KeyReplayCounter;
use crate::protocol::suites::{Cipher, WpaVersion};

/// Station-level parameters that shape every frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub eapol_version: u8,
    pub wpa: WpaVersion,
    pub pairwise: Cipher,
    pub group: Cipher,
    /// Valid PTK, if any
    pub ptk: Option<&'a Ptk>,
}

/// What a single message carries
#[derive(Debug, Clone, Copy)]
pub struct KeyFrameRequest<'a> {
    /// Flag bits (ACK, MIC, INSTALL, ...) without descriptor version
    pub key_info: u16,
    pub key_rsc: Option<&'a [u8; 8]>,
    pub nonce: Option<&'a [u8; NONCE_LEN]>,
    pub key_data: Option<&'a [u8]>,
    /// Group key index (legacy WPA only; carried in key_info)
    pub keyidx: u8,
    pub encrypt: bool,
}

/// Build a serialized EAPOL-Key frame
///
/// The replay counter advances even if the frame is later dropped because
/// no PTK is available for the MIC. `group_counter` supplies the RC4 key IV
/// and is advanced each time one is used.
pub fn build_key_frame(
    ctx: &FrameContext<'_>,
    req: &KeyFrameRequest<'_>,
    replay: &mut KeyReplayCounter,
    group_counter: &mut [u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let version = DescriptorVersion::for_pairwise(ctx.pairwise);
    let pairwise = req.key_info & KeyInfo::KEY_TYPE != 0;

    let mut key_info = req.key_info | version.bits();
    if req.encrypt && ctx.wpa == WpaVersion::Rsn {
        key_info |= KeyInfo::ENCR_KEY_DATA;
    }
    if ctx.wpa != WpaVersion::Rsn {
        key_info |= u16::from(req.keyidx) << KeyInfo::KEY_INDEX_SHIFT;
    }

    let descriptor = match ctx.wpa {
        WpaVersion::Rsn => DESC_TYPE_RSN,
        WpaVersion::Wpa => DESC_TYPE_WPA,
    };
    let mut frame = EapolKeyFrame::new(ctx.eapol_version, descriptor, KeyInfo(key_info));

    let alg = if pairwise { ctx.pairwise } else { ctx.group };
    frame.key_length = alg.key_len() as u16;
    frame.replay_counter = replay.next();

    if let Some(nonce) = req.nonce {
        frame.key_nonce = *nonce;
    }
    if let Some(rsc) = req.key_rsc {
        frame.key_rsc = *rsc;
    }

    if let Some(data) = req.key_data {
        if req.encrypt {
            let ptk = ctx.ptk.ok_or(CryptoError::MissingPtk)?;
            frame.key_data = match version {
                DescriptorVersion::HmacSha1Aes => {
                    let mut plain = data.to_vec();
                    keywrap::pad_key_data(&mut plain);
                    keywrap::aes_wrap(ptk.kek(), &plain)?
                }
                DescriptorVersion::HmacMd5Rc4 => {
                    frame
                        .key_iv
                        .copy_from_slice(&group_counter[NONCE_LEN - 16..]);
                    increment_be(group_counter);

                    let mut ek = [0u8; 32];
                    ek[..16].copy_from_slice(&frame.key_iv);
                    ek[16..].copy_from_slice(ptk.kek());
                    let mut cipher_text = data.to_vec();
                    keywrap::rc4_skip(&ek, RC4_SKIP, &mut cipher_text)?;
                    cipher_text
                }
            };
        } else {
            frame.key_data = data.to_vec();
        }
    }

    let mut bytes = frame.to_bytes();
    if key_info & KeyInfo::MIC != 0 {
        let ptk = ctx.ptk.ok_or(CryptoError::MissingPtk)?;
        sign_frame(&mut bytes, version, ptk.kck());
    }

    Ok(bytes)
}
