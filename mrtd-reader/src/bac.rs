//! Basic Access Control.


use std::fmt;

use rand::{CryptoRng, RngCore};
use tracing::{debug, instrument};
use zeroize::{Zeroize, Zeroizing};

use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::crypt::{pad_iso7816, xor_into, CryptError};
use crate::iso7816::apdu::Apdu;
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::StatusWord;
use crate::kdf::{KeyPair, KeySeed, SessionKeys, StaticKeys};
use crate::mrz::MrzIdentity;
use crate::secure_messaging::{SecureChannel, SecureMessaging, SecureMessagingProfile, SequenceCounter};


const CHALLENGE_LENGTH: usize = 8;
const AUTHENTICATION_PAYLOAD_LENGTH: usize = 32;
const AUTHENTICATION_RESPONSE_LENGTH: usize = AUTHENTICATION_PAYLOAD_LENGTH + 8;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    GetChallenge,
    ExternalAuthenticate,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetChallenge => write!(f, "GET CHALLENGE"),
            Self::ExternalAuthenticate => write!(f, "EXTERNAL AUTHENTICATE"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MismatchedValue {
    RndIcc,
    RndIfd,
}


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{operation} failed with status {status}")]
    OperationFailed { operation: Operation, status: StatusWord },

    #[error("{operation} response has length {obtained}, expected {expected}")]
    LengthMismatch { operation: Operation, obtained: usize, expected: usize },

    #[error("response MAC incorrect")]
    ResponseMac,

    #[error("{value:?} mismatched")]
    ValueMismatch { value: MismatchedValue },

    #[error("handshake cannot proceed from state {state:?}")]
    InvalidState { state: HandshakeState },

    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),

    #[error("cryptographic failure: {0}")]
    Crypt(#[from] CryptError),
}


/// The progress of a handshake.
///
/// `Authenticated` and `Failed` are terminal; a failed handshake is never resumed.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HandshakeState {
    Idle,
    ChallengeRequested,
    ChallengeReceived,
    AuthenticationSent,
    Authenticated,
    Failed,
}


/// The outcome of a successful handshake: session keys and the initial send sequence counter.
#[derive(Debug)]
pub struct EstablishedKeys {
    pub keys: SessionKeys,
    pub counter: SequenceCounter,
}
impl EstablishedKeys {
    pub fn into_secure_messaging(self, profile: SecureMessagingProfile) -> SecureMessaging {
        SecureMessaging::new(self.keys, self.counter, profile)
    }
}


/// The two command exchanges of Basic Access Control.
///
/// GET CHALLENGE obtains the chip's nonce; EXTERNAL AUTHENTICATE proves knowledge of the static
/// keys to the chip and receives the chip's proof and key share in return.
#[derive(Debug)]
pub struct BacHandshake {
    keys: StaticKeys,
    state: HandshakeState,
    rnd_icc: [u8; CHALLENGE_LENGTH],
}
impl BacHandshake {
    pub fn new(identity: &MrzIdentity) -> Self {
        Self::from_key_seed(&KeySeed::from_mrz(identity))
    }

    pub fn from_key_seed(seed: &KeySeed) -> Self {
        Self {
            keys: KeyPair::derive(seed),
            state: HandshakeState::Idle,
            rnd_icc: [0u8; CHALLENGE_LENGTH],
        }
    }

    /// Starts from a challenge that has already been obtained.
    pub fn from_challenge(seed: &KeySeed, rnd_icc: [u8; CHALLENGE_LENGTH]) -> Self {
        Self {
            keys: KeyPair::derive(seed),
            state: HandshakeState::ChallengeReceived,
            rnd_icc,
        }
    }

    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    fn expect_state(&self, expected: HandshakeState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { state: self.state })
        }
    }

    /// Records the outcome of a step; any error is terminal.
    fn conclude<T>(&mut self, result: Result<T, Error>, success: HandshakeState) -> Result<T, Error> {
        match &result {
            Ok(_) => self.state = success,
            Err(_) => self.state = HandshakeState::Failed,
        }
        if matches!(self.state, HandshakeState::Authenticated | HandshakeState::Failed) {
            self.keys.zeroize();
        }
        result
    }

    /// Sends GET CHALLENGE and stores the chip's nonce.
    #[instrument(skip_all)]
    pub fn request_challenge<SC: SmartCard>(&mut self, card: &mut SC) -> Result<(), Error> {
        self.expect_state(HandshakeState::Idle)?;
        self.state = HandshakeState::ChallengeRequested;
        let result = get_challenge(card);
        let rnd_icc = self.conclude(result, HandshakeState::ChallengeReceived)?;
        debug!("challenge received");
        self.rnd_icc = rnd_icc;
        Ok(())
    }

    /// Generates the terminal's nonce and key share and performs EXTERNAL AUTHENTICATE.
    pub fn authenticate<SC: SmartCard, R: RngCore + CryptoRng>(
        &mut self,
        card: &mut SC,
        rng: &mut R,
    ) -> Result<EstablishedKeys, Error> {
        let mut rnd_ifd = Zeroizing::new([0u8; 8]);
        let mut k_ifd = Zeroizing::new([0u8; 16]);
        rng.fill_bytes(rnd_ifd.as_mut_slice());
        rng.fill_bytes(k_ifd.as_mut_slice());
        self.authenticate_with_values(card, &rnd_ifd, &k_ifd)
    }

    /// Performs EXTERNAL AUTHENTICATE with the given terminal nonce and key share.
    #[instrument(skip_all)]
    pub fn authenticate_with_values<SC: SmartCard>(
        &mut self,
        card: &mut SC,
        rnd_ifd: &[u8; 8],
        k_ifd: &[u8; 16],
    ) -> Result<EstablishedKeys, Error> {
        self.expect_state(HandshakeState::ChallengeReceived)?;
        self.state = HandshakeState::AuthenticationSent;
        let result = self.mutual_authenticate(card, rnd_ifd, k_ifd);
        let established = self.conclude(result, HandshakeState::Authenticated)?;
        debug!("mutual authentication succeeded");
        Ok(established)
    }

    fn mutual_authenticate<SC: SmartCard>(
        &self,
        card: &mut SC,
        rnd_ifd: &[u8; 8],
        k_ifd: &[u8; 16],
    ) -> Result<EstablishedKeys, Error> {
        // concatenate the three values
        let mut ext_auth_data = Zeroizing::new(Vec::with_capacity(AUTHENTICATION_RESPONSE_LENGTH + 8));
        ext_auth_data.extend(rnd_ifd);
        ext_auth_data.extend(&self.rnd_icc);
        ext_auth_data.extend(k_ifd);

        // encrypt with an all-zeroes IV; the payload is block-aligned
        Cam3Des.encrypt_padded_data(&mut ext_auth_data, self.keys.k_enc(), &[0u8; 8])?;

        // pad according to ISO 7816, then generate MAC
        pad_iso7816(&mut ext_auth_data, Cam3Des.mac_block_size());
        let mac = Cam3Des.mac_padded_data(&ext_auth_data, self.keys.k_mac())?;
        // MAC fits right where the padding was
        ext_auth_data.truncate(AUTHENTICATION_PAYLOAD_LENGTH);
        ext_auth_data.extend(mac.iter());

        let request = Apdu::external_authenticate(ext_auth_data.to_vec(), AUTHENTICATION_RESPONSE_LENGTH as u8);
        let response = card.communicate(&request)?;
        if response.status() != StatusWord::SUCCESS {
            return Err(Error::OperationFailed {
                operation: Operation::ExternalAuthenticate,
                status: response.status(),
            });
        }
        if response.data.len() != AUTHENTICATION_RESPONSE_LENGTH {
            return Err(Error::LengthMismatch {
                operation: Operation::ExternalAuthenticate,
                obtained: response.data.len(),
                expected: AUTHENTICATION_RESPONSE_LENGTH,
            });
        }

        // verify MAC of what we obtained
        let (ciphertext, received_mac) = response.data.split_at(AUTHENTICATION_PAYLOAD_LENGTH);
        let mut mac_input = ciphertext.to_vec();
        pad_iso7816(&mut mac_input, Cam3Des.mac_block_size());
        if !Cam3Des.verify_mac_padded_data(&mac_input, self.keys.k_mac(), received_mac)? {
            return Err(Error::ResponseMac);
        }

        // decrypt to RND.ICC || RND.IFD || K.ICC
        let mut decrypted = Zeroizing::new(ciphertext.to_vec());
        Cam3Des.decrypt_padded_data(&mut decrypted, self.keys.k_enc(), &[0u8; 8])?;
        if decrypted[0..8] != self.rnd_icc {
            return Err(Error::ValueMismatch { value: MismatchedValue::RndIcc });
        }
        if decrypted[8..16] != rnd_ifd[..] {
            return Err(Error::ValueMismatch { value: MismatchedValue::RndIfd });
        }

        let mut k_session_seed = Zeroizing::new([0u8; 16]);
        k_session_seed.copy_from_slice(k_ifd);
        xor_into(k_session_seed.as_mut_slice(), &decrypted[16..32]);

        Ok(EstablishedKeys {
            keys: KeyPair::derive(&KeySeed::from_bytes(*k_session_seed)),
            counter: SequenceCounter::from_nonces(&self.rnd_icc, rnd_ifd),
        })
    }
}


#[instrument(skip_all)]
fn get_challenge<SC: SmartCard>(card: &mut SC) -> Result<[u8; CHALLENGE_LENGTH], Error> {
    let response = card.communicate(&Apdu::get_challenge())?;
    if response.status() != StatusWord::SUCCESS {
        return Err(Error::OperationFailed { operation: Operation::GetChallenge, status: response.status() });
    }
    if response.data.len() != CHALLENGE_LENGTH {
        return Err(Error::LengthMismatch {
            operation: Operation::GetChallenge,
            obtained: response.data.len(),
            expected: CHALLENGE_LENGTH,
        });
    }
    let mut ret = [0u8; CHALLENGE_LENGTH];
    ret.copy_from_slice(response.data.as_slice());
    Ok(ret)
}


/// Performs Basic Access Control with fixed nonces and wraps the card in Secure Messaging.
#[instrument(skip_all)]
pub fn establish_from_values<SC: SmartCard>(
    mut card: SC,
    k_seed: &KeySeed,
    rnd_icc: &[u8; 8],
    rnd_ifd: &[u8; 8],
    k_ifd: &[u8; 16],
    profile: SecureMessagingProfile,
) -> Result<SecureChannel<SC>, Error> {
    let mut handshake = BacHandshake::from_challenge(k_seed, *rnd_icc);
    let established = handshake.authenticate_with_values(&mut card, rnd_ifd, k_ifd)?;
    Ok(SecureChannel::new(card, established.into_secure_messaging(profile)))
}

/// Performs Basic Access Control and wraps the card in Secure Messaging.
#[instrument(skip_all)]
pub fn establish<SC: SmartCard, R: RngCore + CryptoRng>(
    mut card: SC,
    identity: &MrzIdentity,
    rng: &mut R,
    profile: SecureMessagingProfile,
) -> Result<SecureChannel<SC>, Error> {
    let mut handshake = BacHandshake::new(identity);
    handshake.request_challenge(&mut card)?;
    let established = handshake.authenticate(&mut card, rng)?;
    Ok(SecureChannel::new(card, established.into_secure_messaging(profile)))
}
