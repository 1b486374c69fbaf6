//! Simulated supplicant
//!
//! Answers the authenticator's side of the 4-way and group key handshakes
//! the way a station would: derives the PTK from message 1, checks the MIC
//! of message 3 and group message 1, unwraps the GTK and signs each reply.
//! Used by the tests and by `wpa-authd simulate`.

use crate::crypto::keywrap::{self, RC4_SKIP};
use crate::crypto::mic::DescriptorVersion;
use crate::crypto::prf::{Pmkid, Ptk, NONCE_LEN, PMK_LEN};
use crate::error::{AuthError, CryptoError, FrameError, IeError};
use crate::protocol::eapol::{
    sign_frame, verify_mic, EapolKeyFrame, KeyInfo, DESC_TYPE_RSN, DESC_TYPE_WPA,
};
use crate::protocol::ie::{encode_rsn_ie, encode_wpa_ie, IeData};
use crate::protocol::kde::parse_key_data;
use crate::protocol::suites::{Akm, AkmSet, Cipher, CipherSet, MacAddr, WpaVersion};

/// One station's supplicant key state
pub struct Supplicant {
    addr: MacAddr,
    aa: MacAddr,
    pmk: [u8; PMK_LEN],
    version: WpaVersion,
    pairwise: Cipher,
    ie: Vec<u8>,
    snonce: [u8; NONCE_LEN],
    anonce: Option<[u8; NONCE_LEN]>,
    ptk: Option<Ptk>,
    gtk: Option<(u8, Vec<u8>)>,
    request_counter: u64,
    eapol_version: u8,
}

impl Supplicant {
    /// Build a supplicant whose (Re)Association Request IE selects exactly
    /// one pairwise cipher and one AKM
    pub fn new(
        addr: MacAddr,
        aa: MacAddr,
        pmk: [u8; PMK_LEN],
        version: WpaVersion,
        pairwise: Cipher,
        group: Cipher,
        akm: Akm,
    ) -> Result<Self, IeError> {
        let ie = sta_ie(version, pairwise, group, akm, &[])?;
        let mut snonce = [0u8; NONCE_LEN];
        snonce[..6].copy_from_slice(&addr);
        snonce[NONCE_LEN - 1] = 1;

        Ok(Self {
            addr,
            aa,
            pmk,
            version,
            pairwise,
            ie,
            snonce,
            anonce: None,
            ptk: None,
            gtk: None,
            request_counter: 0,
            eapol_version: 2,
        })
    }

    pub fn with_snonce(mut self, snonce: [u8; NONCE_LEN]) -> Self {
        self.snonce = snonce;
        self
    }

    pub fn addr(&self) -> MacAddr {
        self.addr
    }

    pub fn ie(&self) -> &[u8] {
        &self.ie
    }

    /// Replace the IE sent in message 2 (and on the next association)
    pub fn set_ie(&mut self, ie: Vec<u8>) {
        self.ie = ie;
    }

    pub fn ptk(&self) -> Option<&Ptk> {
        self.ptk.as_ref()
    }

    pub fn gtk(&self) -> Option<&[u8]> {
        self.gtk.as_ref().map(|(_, gtk)| gtk.as_slice())
    }

    pub fn gtk_index(&self) -> Option<u8> {
        self.gtk.as_ref().map(|(idx, _)| *idx)
    }

    /// Answer one authenticator frame
    pub fn handle(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let frame = EapolKeyFrame::parse(data)?;
        let info = frame.key_info;
        if !info.contains(KeyInfo::ACK) {
            return Err(FrameError::WrongState {
                message: "frame without Ack",
            }
            .into());
        }
        match (info.is_pairwise(), info.contains(KeyInfo::MIC)) {
            (true, false) => self.pairwise_msg1(&frame),
            (true, true) => self.pairwise_msg3(&frame, data),
            (false, _) => self.group_msg1(&frame, data),
        }
    }

    /// Build an EAPOL-Key request carrying `flags` (ERROR, KEY_TYPE, ...)
    pub fn request(&mut self, flags: u16) -> Result<Vec<u8>, AuthError> {
        self.request_counter += 1;
        let counter = self.request_counter;
        self.reply(KeyInfo::REQUEST | KeyInfo::MIC | flags, counter, None, Vec::new())
    }

    fn descriptor_version(&self) -> DescriptorVersion {
        DescriptorVersion::for_pairwise(self.pairwise)
    }

    fn pairwise_msg1(&mut self, frame: &EapolKeyFrame) -> Result<Vec<u8>, AuthError> {
        let anonce = frame.key_nonce;
        self.anonce = Some(anonce);
        self.ptk = Some(Ptk::derive(
            &self.pmk,
            &self.aa,
            &self.addr,
            &anonce,
            &self.snonce,
            self.pairwise,
        ));

        let snonce = self.snonce;
        let ie = self.ie.clone();
        self.reply(
            KeyInfo::KEY_TYPE | KeyInfo::MIC,
            frame.replay_counter,
            Some(&snonce),
            ie,
        )
    }

    fn pairwise_msg3(&mut self, frame: &EapolKeyFrame, raw: &[u8]) -> Result<Vec<u8>, AuthError> {
        self.check_mic(raw)?;
        if self.anonce != Some(frame.key_nonce) {
            return Err(FrameError::WrongState {
                message: "message 3 with a different ANonce",
            }
            .into());
        }

        if frame.key_info.contains(KeyInfo::ENCR_KEY_DATA) {
            let plain = self.decrypt_key_data(frame)?;
            let kd = parse_key_data(&plain)?;
            if let Some(gtk) = kd.gtk {
                self.gtk = Some((gtk.keyidx, gtk.key.to_vec()));
            }
        }

        let secure = match self.version {
            WpaVersion::Rsn => KeyInfo::SECURE,
            WpaVersion::Wpa => 0,
        };
        self.reply(
            KeyInfo::KEY_TYPE | KeyInfo::MIC | secure,
            frame.replay_counter,
            None,
            Vec::new(),
        )
    }

    fn group_msg1(&mut self, frame: &EapolKeyFrame, raw: &[u8]) -> Result<Vec<u8>, AuthError> {
        self.check_mic(raw)?;
        let plain = self.decrypt_key_data(frame)?;

        let gtk = match self.version {
            WpaVersion::Rsn => {
                let kd = parse_key_data(&plain)?;
                let gtk = kd.gtk.ok_or(IeError::Truncated)?;
                (gtk.keyidx, gtk.key.to_vec())
            }
            WpaVersion::Wpa => {
                let len = usize::from(frame.key_length).min(plain.len());
                (frame.key_info.key_index(), plain[..len].to_vec())
            }
        };
        let keyidx = gtk.0;
        self.gtk = Some(gtk);

        let index_bits = match self.version {
            WpaVersion::Wpa => u16::from(keyidx) << KeyInfo::KEY_INDEX_SHIFT,
            WpaVersion::Rsn => 0,
        };
        self.reply(
            KeyInfo::MIC | KeyInfo::SECURE | index_bits,
            frame.replay_counter,
            None,
            Vec::new(),
        )
    }

    fn check_mic(&self, raw: &[u8]) -> Result<(), AuthError> {
        let ptk = self.ptk.as_ref().ok_or(CryptoError::MissingPtk)?;
        if !verify_mic(ptk, raw) {
            return Err(FrameError::MicMismatch.into());
        }
        Ok(())
    }

    fn decrypt_key_data(&self, frame: &EapolKeyFrame) -> Result<Vec<u8>, AuthError> {
        let ptk = self.ptk.as_ref().ok_or(CryptoError::MissingPtk)?;
        let version = DescriptorVersion::try_from(frame.key_info.version_bits())?;
        let plain = match version {
            DescriptorVersion::HmacSha1Aes => keywrap::aes_unwrap(ptk.kek(), &frame.key_data)?,
            DescriptorVersion::HmacMd5Rc4 => {
                let mut ek = [0u8; 32];
                ek[..16].copy_from_slice(&frame.key_iv);
                ek[16..].copy_from_slice(ptk.kek());
                let mut data = frame.key_data.clone();
                keywrap::rc4_skip(&ek, RC4_SKIP, &mut data)?;
                data
            }
        };
        Ok(plain)
    }

    fn reply(
        &self,
        flags: u16,
        replay_counter: u64,
        nonce: Option<&[u8; NONCE_LEN]>,
        key_data: Vec<u8>,
    ) -> Result<Vec<u8>, AuthError> {
        let version = self.descriptor_version();
        let descriptor = match self.version {
            WpaVersion::Rsn => DESC_TYPE_RSN,
            WpaVersion::Wpa => DESC_TYPE_WPA,
        };
        let mut frame =
            EapolKeyFrame::new(self.eapol_version, descriptor, KeyInfo(flags | version.bits()));
        frame.replay_counter = replay_counter;
        if let Some(nonce) = nonce {
            frame.key_nonce = *nonce;
        }
        frame.key_data = key_data;

        let mut bytes = frame.to_bytes();
        if flags & KeyInfo::MIC != 0 {
            let ptk = self.ptk.as_ref().ok_or(CryptoError::MissingPtk)?;
            sign_frame(&mut bytes, version, ptk.kck());
        }
        Ok(bytes)
    }
}

/// Encode a station IE selecting one pairwise cipher and one AKM
pub fn sta_ie(
    version: WpaVersion,
    pairwise: Cipher,
    group: Cipher,
    akm: Akm,
    pmkids: &[Pmkid],
) -> Result<Vec<u8>, IeError> {
    let data = IeData {
        group_cipher: Some(group),
        pairwise_ciphers: CipherSet::single(pairwise),
        akm_suites: AkmSet::single(akm),
        capabilities: 0,
        pmkids: pmkids.to_vec(),
    };
    match version {
        WpaVersion::Rsn => encode_rsn_ie(&data),
        WpaVersion::Wpa => encode_wpa_ie(&data),
    }
}
