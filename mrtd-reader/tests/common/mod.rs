//! A simulated eMRTD chip speaking BAC and Secure Messaging, plus sample data groups.

#![allow(dead_code)]


use std::collections::HashMap;

use mrtd_reader::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use mrtd_reader::crypt::{pad_iso7816, unpad_iso7816, xor_into};
use mrtd_reader::files::{DataGroupId, EMRTD_APPLICATION_ID};
use mrtd_reader::iso7816::apdu::{Apdu, Response};
use mrtd_reader::iso7816::card::{CommunicationError, SmartCard, TransportError};
use mrtd_reader::iso7816::status::StatusWord;
use mrtd_reader::kdf::{KeyPair, KeySeed};
use mrtd_reader::mrz::MrzIdentity;
use mrtd_reader::secure_messaging::{derive_iv, ResponseCounter, SecureMessagingProfile, SequenceCounter};
use mrtd_reader::tlv::{write_tlv, Tag, TlvReader};
use mrtd_reader::CancelToken;


pub const JPEG: [u8; 16] = [
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0xFF, 0xD9,
];

pub fn identity() -> MrzIdentity {
    MrzIdentity::new("L898902C<", '3', "690806", '1', "940623", '6').unwrap()
}

/// DG2 holding one JPEG face of 240 by 320 pixels, padded to span several READ BINARY chunks.
pub fn sample_dg2() -> Vec<u8> {
    let mut image = JPEG.to_vec();
    image.resize(600, 0x00);

    let mut record = Vec::new();
    record.extend(b"FAC\0010\0");
    record.extend(((14 + 20 + 12 + image.len()) as u32).to_be_bytes());
    record.extend(1u16.to_be_bytes());
    record.extend(((20 + 12 + image.len()) as u32).to_be_bytes());
    record.extend([0u8; 16]);
    record.extend([0x01, 0x00]);
    record.extend(240u16.to_be_bytes());
    record.extend(320u16.to_be_bytes());
    record.extend([0x01, 0x02, 0x00, 0x00, 0x00, 0x00]);
    record.extend(&image);

    let mut template = Vec::new();
    write_tlv(&mut template, Tag(0xA1), &[0x80, 0x02, 0x01, 0x01]);
    write_tlv(&mut template, Tag(0x5F2E), &record);
    let mut group = Vec::new();
    write_tlv(&mut group, Tag(0x02), &[0x01]);
    write_tlv(&mut group, Tag(0x7F60), &template);
    let mut inner = Vec::new();
    write_tlv(&mut inner, Tag(0x7F61), &group);
    let mut file = Vec::new();
    write_tlv(&mut file, Tag(0x75), &inner);
    file
}

pub fn sample_dg11() -> Vec<u8> {
    let mut inner = Vec::new();
    write_tlv(&mut inner, Tag(0x5C), &[0x5F, 0x0E, 0x5F, 0x11, 0x5F, 0x42]);
    write_tlv(&mut inner, Tag(0x5F0E), b"ERIKSSON<<ANNA<MARIA");
    write_tlv(&mut inner, Tag(0x5F11), b"ZENITH<UTOPIA");
    write_tlv(&mut inner, Tag(0x5F42), b"123 MAPLE RD<ANYTOWN<UTOPIA");
    let mut file = Vec::new();
    write_tlv(&mut file, Tag(0x6B), &inner);
    file
}


fn status_response(status: StatusWord) -> Response {
    Response::new(Vec::new(), status)
}

fn mac(key: &[u8], counter: Option<&SequenceCounter>, data: &[u8]) -> Vec<u8> {
    let mut input = counter.map(|c| c.as_bytes().to_vec()).unwrap_or_default();
    input.extend(data);
    pad_iso7816(&mut input, 8);
    Cam3Des.mac_padded_data(&input, key).unwrap().to_vec()
}


/// A chip that knows the document's MRZ and serves a set of files.
pub struct SimulatedChip {
    static_keys: KeyPair,
    rnd_icc: [u8; 8],
    challenge_issued: bool,
    session: Option<(KeyPair, SequenceCounter)>,
    profile: SecureMessagingProfile,
    files: HashMap<u16, Vec<u8>>,
    selected: Option<u16>,

    /// Corrupt the MAC of every protected response.
    pub tamper_response_mac: bool,

    /// Answer SELECT of these files with the given status.
    pub select_status: HashMap<u16, StatusWord>,

    /// Answer READ BINARY of these files with the given status, under Secure Messaging.
    pub read_status: HashMap<u16, StatusWord>,

    /// Cancel this token when the first protected command arrives.
    pub cancel_on_protected: Option<CancelToken>,

    /// Fail the transport after this many exchanges.
    pub disconnect_after: Option<usize>,

    /// Instruction bytes received, in order.
    pub instructions: Vec<u8>,
}
impl SimulatedChip {
    pub fn new(identity: &MrzIdentity, profile: SecureMessagingProfile) -> Self {
        let mut files = HashMap::new();
        files.insert(DataGroupId::Dg2.file_id(), sample_dg2());
        files.insert(DataGroupId::Dg11.file_id(), sample_dg11());
        Self {
            static_keys: KeyPair::derive(&KeySeed::from_mrz(identity)),
            rnd_icc: [0x46, 0x08, 0xF9, 0x19, 0x88, 0x70, 0x22, 0x12],
            challenge_issued: false,
            session: None,
            profile,
            files,
            selected: None,
            tamper_response_mac: false,
            select_status: HashMap::new(),
            read_status: HashMap::new(),
            cancel_on_protected: None,
            disconnect_after: None,
            instructions: Vec::new(),
        }
    }

    pub fn remove_file(&mut self, file: DataGroupId) {
        self.files.remove(&file.file_id());
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    fn external_authenticate(&mut self, payload: &[u8]) -> Response {
        if !self.challenge_issued || payload.len() != 40 {
            return status_response(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        let (ciphertext, received_mac) = payload.split_at(32);
        if mac(self.static_keys.k_mac(), None, ciphertext) != received_mac {
            return status_response(StatusWord::AUTHENTICATION_FAILED);
        }
        let mut plaintext = ciphertext.to_vec();
        Cam3Des.decrypt_padded_data(&mut plaintext, self.static_keys.k_enc(), &[0u8; 8]).unwrap();
        if plaintext[8..16] != self.rnd_icc {
            return status_response(StatusWord::AUTHENTICATION_FAILED);
        }
        let mut rnd_ifd = [0u8; 8];
        rnd_ifd.copy_from_slice(&plaintext[0..8]);
        let k_icc = [0x0B, 0x4F, 0x80, 0x32, 0x3E, 0xB3, 0x19, 0x1C, 0xB0, 0x49, 0x70, 0xCB, 0x40, 0x52, 0x79, 0x0B];

        let mut answer = self.rnd_icc.to_vec();
        answer.extend(rnd_ifd);
        answer.extend(k_icc);
        Cam3Des.encrypt_padded_data(&mut answer, self.static_keys.k_enc(), &[0u8; 8]).unwrap();
        let answer_mac = mac(self.static_keys.k_mac(), None, &answer);
        answer.extend(answer_mac);

        let mut seed = [0u8; 16];
        seed.copy_from_slice(&plaintext[16..32]);
        xor_into(&mut seed, &k_icc);
        self.session = Some((
            KeyPair::derive(&KeySeed::from_bytes(seed)),
            SequenceCounter::from_nonces(&self.rnd_icc, &rnd_ifd),
        ));
        Response::new(answer, StatusWord::SUCCESS)
    }

    /// Verifies and decrypts a protected command, returning its data and expected length.
    fn receive(&mut self, command: &Apdu) -> Option<(Vec<u8>, usize)> {
        let profile = self.profile;
        let (keys, counter) = self.session.as_mut()?;
        counter.increment().ok()?;

        let mut mac_input = command.header.to_bytes().to_vec();
        pad_iso7816(&mut mac_input, 8);
        let mut data = Vec::new();
        let mut expected_length = 0;
        let mut mac_ok = false;
        for tlv in TlvReader::new(command.data.request_data()?) {
            let tlv = tlv.ok()?;
            match tlv.tag {
                Tag(0x8E) => {
                    mac_ok = mac(keys.k_mac(), Some(&*counter), &mac_input) == tlv.value;
                    continue;
                },
                Tag(0x87) => {
                    data = tlv.value[1..].to_vec();
                    let iv = derive_iv(profile.iv, keys.k_enc(), counter).ok()?;
                    Cam3Des.decrypt_padded_data(&mut data, keys.k_enc(), &iv).ok()?;
                    unpad_iso7816(&mut data).ok()?;
                },
                Tag(0x97) => {
                    expected_length = tlv.value.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
                    if expected_length == 0 {
                        expected_length = 256;
                    }
                },
                _ => return None,
            }
            mac_input.extend(tlv.header);
            mac_input.extend(tlv.value);
        }
        mac_ok.then_some((data, expected_length))
    }

    fn respond(&mut self, data: &[u8], status: StatusWord) -> Response {
        let profile = self.profile;
        let Some((keys, counter)) = self.session.as_mut() else {
            return status_response(status);
        };
        if profile.response_counter == ResponseCounter::Incremented {
            counter.increment().unwrap();
        }

        let mut body = Vec::new();
        if !data.is_empty() {
            let mut padded = data.to_vec();
            pad_iso7816(&mut padded, 8);
            let iv = derive_iv(profile.iv, keys.k_enc(), counter).unwrap();
            Cam3Des.encrypt_padded_data(&mut padded, keys.k_enc(), &iv).unwrap();
            let mut value = vec![0x01];
            value.extend(padded);
            write_tlv(&mut body, Tag(0x87), &value);
        }
        write_tlv(&mut body, Tag(0x99), &status.to_word().to_be_bytes());
        let mut response_mac = mac(keys.k_mac(), Some(&*counter), &body);
        if self.tamper_response_mac {
            response_mac[7] ^= 0x01;
        }
        write_tlv(&mut body, Tag(0x8E), &response_mac);
        Response::new(body, status)
    }

    fn execute(&mut self, ins: u8, p1: u8, p2: u8, data: &[u8], expected_length: usize) -> (Vec<u8>, StatusWord) {
        match ins {
            0xA4 => {
                let file_id = u16::from_be_bytes([data[0], data[1]]);
                if let Some(status) = self.select_status.get(&file_id) {
                    return (Vec::new(), *status);
                }
                if !self.files.contains_key(&file_id) {
                    return (Vec::new(), StatusWord::FILE_NOT_FOUND);
                }
                self.selected = Some(file_id);
                (Vec::new(), StatusWord::SUCCESS)
            },
            0xB0 => {
                if let Some(status) = self.selected.and_then(|id| self.read_status.get(&id)) {
                    return (Vec::new(), *status);
                }
                let Some(file) = self.selected.and_then(|id| self.files.get(&id)) else {
                    return (Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
                };
                let offset = usize::from(u16::from_be_bytes([p1, p2]));
                if offset > file.len() {
                    return (Vec::new(), StatusWord::WRONG_PARAMETERS);
                }
                let end = (offset + expected_length).min(file.len());
                (file[offset..end].to_vec(), StatusWord::SUCCESS)
            },
            _ => (Vec::new(), StatusWord::INSTRUCTION_NOT_SUPPORTED),
        }
    }
}
impl SmartCard for SimulatedChip {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        if let Some(remaining) = self.disconnect_after.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::ConnectionLost.into());
            }
            *remaining -= 1;
        }
        self.instructions.push(request.header.ins);

        if self.session.is_none() {
            let response = match (request.header.cla, request.header.ins, request.header.p1) {
                (0x00, 0xA4, 0x04) if request.data.request_data() == Some(&EMRTD_APPLICATION_ID[..]) => {
                    status_response(StatusWord::SUCCESS)
                },
                (0x00, 0x84, _) => {
                    self.challenge_issued = true;
                    Response::new(self.rnd_icc.to_vec(), StatusWord::SUCCESS)
                },
                (0x00, 0x82, _) => {
                    let payload = request.data.request_data().unwrap_or(&[]).to_vec();
                    self.external_authenticate(&payload)
                },
                _ => status_response(StatusWord::SECURITY_STATUS_NOT_SATISFIED),
            };
            return Ok(response);
        }

        if let Some(token) = self.cancel_on_protected.take() {
            token.cancel();
        }
        let Some((data, expected_length)) = self.receive(request) else {
            // protection broken; the chip ends Secure Messaging
            self.session = None;
            return Ok(status_response(StatusWord::SM_DATA_OBJECTS_INCORRECT));
        };
        let header = request.header;
        let (data, status) = self.execute(header.ins, header.p1, header.p2, &data, expected_length);
        Ok(self.respond(&data, status))
    }
}
