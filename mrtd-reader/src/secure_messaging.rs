//! Secure Messaging after Basic Access Control.
//!
//! Every command is encrypted and authenticated with the session keys, and every response is
//! verified and decrypted. A send sequence counter is mixed into each MAC; it only ever moves
//! forward, and a command must be answered before the next one may be wrapped.


use std::fmt;

use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::crypt::{pad_iso7816, unpad_iso7816, CryptError};
use crate::iso7816::apdu::{Apdu, Data, Response, MAX_SHORT_LC};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::StatusWord;
use crate::kdf::SessionKeys;
use crate::tlv::{write_tlv, Tag, TlvError, TlvReader};


const TAG_PLAIN_ENCRYPTED: Tag = Tag(0x85);
const TAG_PADDED_ENCRYPTED: Tag = Tag(0x87);
const TAG_EXPECTED_LENGTH: Tag = Tag(0x97);
const TAG_STATUS: Tag = Tag(0x99);
const TAG_MAC: Tag = Tag(0x8E);

/// Padding-content indicator for ISO/IEC 7816-4 padding.
const PADDING_INDICATOR_ISO7816: u8 = 0x01;

/// Secure Messaging marker bits in CLA: command header included in the MAC.
const CLA_SECURE_MESSAGING: u8 = 0b000_0_11_00;


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("send sequence counter is exhausted")]
    CounterExhausted,

    #[error("a command was wrapped while the previous one is still unanswered")]
    CommandOutstanding,

    #[error("response does not belong to the outstanding command")]
    UnexpectedResponse,

    #[error("chip rejected the Secure Messaging data objects with status {status}")]
    RejectedByChip { status: StatusWord },

    #[error("response has an invalid TLV format: {0}")]
    ResponseTlvFormat(#[from] TlvError),

    #[error("response contains unexpected data object with tag {tag}")]
    UnexpectedTag { tag: Tag },

    #[error("response does not contain a MAC")]
    MissingResponseMac,

    #[error("response MAC incorrect")]
    ResponseMac,

    #[error("status has unexpected length {length}")]
    StatusLength { length: usize },

    #[error("response payload has unknown padding mode {padding_mode}")]
    UnknownPadding { padding_mode: u8 },

    #[error("cryptographic failure: {0}")]
    Crypt(#[from] CryptError),
}


/// How the CBC initialization vector is obtained for Secure Messaging payloads.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IvDerivation {
    /// The send sequence counter encrypted with the session encryption key.
    #[default]
    EncryptedCounter,

    /// All zeroes.
    Zero,
}

/// Which counter value authenticates a response.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResponseCounter {
    /// The value consumed by the command; each command/response pair uses one value.
    #[default]
    SharedWithCommand,

    /// The counter is incremented once more before the response is verified.
    Incremented,
}

/// The variant of 3DES Secure Messaging spoken by the chip.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecureMessagingProfile {
    pub iv: IvDerivation,
    pub response_counter: ResponseCounter,
}
impl SecureMessagingProfile {
    /// Zero IV and separate counter values for command and response, as issued passports expect.
    pub const ICAO_9303: Self = Self {
        iv: IvDerivation::Zero,
        response_counter: ResponseCounter::Incremented,
    };

    pub const fn new(iv: IvDerivation, response_counter: ResponseCounter) -> Self {
        Self { iv, response_counter }
    }
}


/// The 8-byte big-endian send sequence counter.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct SequenceCounter([u8; 8]);
impl SequenceCounter {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// The initial value after Basic Access Control: the low halves of both nonces.
    pub fn from_nonces(rnd_icc: &[u8; 8], rnd_ifd: &[u8; 8]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&rnd_icc[4..8]);
        bytes[4..8].copy_from_slice(&rnd_ifd[4..8]);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub const fn value(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Advances the counter by one. A counter that would wrap around is refused.
    pub fn increment(&mut self) -> Result<u64, Error> {
        let next = self.value().checked_add(1)
            .ok_or(Error::CounterExhausted)?;
        self.0 = next.to_be_bytes();
        Ok(next)
    }
}
impl fmt::Debug for SequenceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceCounter(..)")
    }
}


/// A protected command, ready to be sent to the chip.
///
/// Remembers the counter value it consumed so that the response can only be unwrapped against
/// this exact command.
#[derive(Debug)]
#[must_use = "the response to a protected command must be unwrapped"]
pub struct ProtectedCommand {
    apdu: Apdu,
    counter: u64,
}
impl ProtectedCommand {
    pub const fn apdu(&self) -> &Apdu {
        &self.apdu
    }
}


/// The Secure Messaging codec: session keys, send sequence counter and the profile.
#[derive(ZeroizeOnDrop)]
pub struct SecureMessaging {
    keys: SessionKeys,
    counter: SequenceCounter,
    #[zeroize(skip)] profile: SecureMessagingProfile,
    #[zeroize(skip)] outstanding: Option<u64>,
}
impl SecureMessaging {
    pub fn new(keys: SessionKeys, counter: SequenceCounter, profile: SecureMessagingProfile) -> Self {
        Self {
            keys,
            counter,
            profile,
            outstanding: None,
        }
    }

    pub const fn profile(&self) -> SecureMessagingProfile {
        self.profile
    }

    /// The current value of the send sequence counter.
    pub const fn counter_value(&self) -> u64 {
        self.counter.value()
    }

    fn iv(&self) -> Result<[u8; 8], Error> {
        derive_iv(self.profile.iv, self.keys.k_enc(), &self.counter)
    }

    /// Prefixes the counter and pads, yielding the input of a MAC.
    fn mac_input(&self, data: &[u8]) -> Vec<u8> {
        let mut mac_data = Vec::with_capacity(8 + data.len() + 8);
        mac_data.extend(self.counter.as_bytes());
        mac_data.extend(data);
        pad_iso7816(&mut mac_data, Cam3Des.mac_block_size());
        mac_data
    }

    /// Protects a command.
    ///
    /// Consumes one counter value. Fails if the previous command has not been answered.
    pub fn wrap(&mut self, request: &Apdu) -> Result<ProtectedCommand, Error> {
        if self.outstanding.is_some() {
            return Err(Error::CommandOutstanding);
        }
        let counter = self.counter.increment()?;

        let mut header = request.header;
        header.cla |= CLA_SECURE_MESSAGING;

        let mut body = Vec::new();
        if let Some(request_data) = request.data.request_data() {
            let mut padded_data = request_data.to_vec();
            pad_iso7816(&mut padded_data, Cam3Des.cipher_block_size());
            let iv = self.iv()?;
            Cam3Des.encrypt_padded_data(&mut padded_data, self.keys.k_enc(), &iv)?;

            let mut value = Vec::with_capacity(1 + padded_data.len());
            value.push(PADDING_INDICATOR_ISO7816);
            value.extend(&padded_data);
            write_tlv(&mut body, TAG_PADDED_ENCRYPTED, &value);
        }

        // are we expecting something in return?
        match &request.data {
            Data::NoData|Data::RequestDataShort { .. }|Data::RequestDataExtended { .. } => {},
            Data::ResponseDataShort { response_data_length }|Data::BothDataShort { response_data_length, .. } => {
                write_tlv(&mut body, TAG_EXPECTED_LENGTH, &[*response_data_length]);
            },
            Data::ResponseDataExtended { response_data_length }|Data::BothDataExtended { response_data_length, .. } => {
                write_tlv(&mut body, TAG_EXPECTED_LENGTH, &response_data_length.to_be_bytes());
            },
        }

        // the MAC covers the padded header followed by the data objects
        let mut mac_input = header.to_bytes().to_vec();
        pad_iso7816(&mut mac_input, Cam3Des.mac_block_size());
        mac_input.extend(&body);
        let mac = Cam3Des.mac_padded_data(&self.mac_input(&mac_input), self.keys.k_mac())?;
        write_tlv(&mut body, TAG_MAC, &mac);

        let data = if body.len() > MAX_SHORT_LC || request.data.is_extended() {
            Data::BothDataExtended { request_data: body, response_data_length: 0 }
        } else {
            Data::BothDataShort { request_data: body, response_data_length: 0 }
        };

        trace!(ins = header.ins, "wrapped command");
        self.outstanding = Some(counter);
        Ok(ProtectedCommand {
            apdu: Apdu { header, data },
            counter,
        })
    }

    /// Verifies and decrypts the response to a protected command.
    pub fn unwrap(&mut self, command: ProtectedCommand, response: Response) -> Result<Response, Error> {
        match self.outstanding.take() {
            Some(outstanding) if outstanding == command.counter && outstanding == self.counter.value() => {},
            _ => return Err(Error::UnexpectedResponse),
        }
        if self.profile.response_counter == ResponseCounter::Incremented {
            self.counter.increment()?;
        }

        let status = response.status();
        if status.is_secure_messaging_error() {
            return Err(Error::RejectedByChip { status });
        }
        if response.data.is_empty() && !status.is_success() {
            // the chip answered in plain; a protected status would have been authenticated
            debug!(%status, "unprotected error status");
            return Ok(response);
        }

        let mut mac_input_length = 0;
        let mut received_mac = None;
        let mut payload = None;
        let mut protected_status = None;
        for tlv in TlvReader::new(&response.data) {
            let tlv = tlv?;
            if received_mac.is_some() {
                // nothing may follow the MAC
                return Err(Error::UnexpectedTag { tag: tlv.tag });
            }
            match tlv.tag {
                TAG_MAC => {
                    received_mac = Some(tlv.value);
                    continue;
                },
                TAG_PADDED_ENCRYPTED|TAG_PLAIN_ENCRYPTED => payload = Some(tlv),
                TAG_STATUS => protected_status = Some(tlv.value),
                other => return Err(Error::UnexpectedTag { tag: other }),
            }
            mac_input_length += tlv.encoded_len();
        }

        let received_mac = received_mac.ok_or(Error::MissingResponseMac)?;
        let mac_input = self.mac_input(&response.data[..mac_input_length]);
        if !Cam3Des.verify_mac_padded_data(&mac_input, self.keys.k_mac(), received_mac)? {
            return Err(Error::ResponseMac);
        }

        let status = match protected_status {
            Some([sw1, sw2]) => StatusWord::new(u16::from_be_bytes([*sw1, *sw2])),
            Some(other) => return Err(Error::StatusLength { length: other.len() }),
            None => status,
        };

        let data = match payload {
            None => Vec::new(),
            Some(tlv) => {
                let ciphertext = if tlv.tag == TAG_PADDED_ENCRYPTED {
                    match tlv.value.split_first() {
                        Some((&PADDING_INDICATOR_ISO7816, rest)) => rest,
                        Some((&padding_mode, _)) => return Err(Error::UnknownPadding { padding_mode }),
                        None => return Err(Error::UnknownPadding { padding_mode: 0x00 }),
                    }
                } else {
                    tlv.value
                };
                let mut plaintext = ciphertext.to_vec();
                let iv = self.iv()?;
                Cam3Des.decrypt_padded_data(&mut plaintext, self.keys.k_enc(), &iv)?;
                unpad_iso7816(&mut plaintext)?;
                plaintext
            },
        };

        Ok(Response::new(data, status))
    }
}
impl fmt::Debug for SecureMessaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMessaging")
            .field("profile", &self.profile)
            .field("outstanding", &self.outstanding.is_some())
            .finish_non_exhaustive()
    }
}

/// Derives the CBC initialization vector for the current counter value.
pub fn derive_iv(derivation: IvDerivation, k_enc: &[u8; 16], counter: &SequenceCounter) -> Result<[u8; 8], Error> {
    let mut iv = [0u8; 8];
    if derivation == IvDerivation::EncryptedCounter {
        iv.copy_from_slice(counter.as_bytes());
        Cam3Des.encrypt_block(&mut iv, k_enc)?;
    }
    Ok(iv)
}


/// A card whose traffic is protected by Secure Messaging.
///
/// Keys and counter are zeroized when the channel is dropped.
#[derive(Debug)]
pub struct SecureChannel<SC> {
    card: SC,
    messaging: SecureMessaging,
}
impl<SC: SmartCard> SecureChannel<SC> {
    pub fn new(card: SC, messaging: SecureMessaging) -> Self {
        Self { card, messaging }
    }

    pub const fn messaging(&self) -> &SecureMessaging {
        &self.messaging
    }

    /// Tears down Secure Messaging, returning the underlying card.
    pub fn into_inner(self) -> SC {
        self.card
    }
}
impl<SC: SmartCard> SmartCard for SecureChannel<SC> {
    fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
        let protected = self.messaging.wrap(request)?;
        let response = self.card.communicate(protected.apdu())?;
        Ok(self.messaging.unwrap(protected, response)?)
    }
}
