//! The crate-wide error type.


use std::fmt;

use crate::bac;
use crate::dg11;
use crate::dg2;
use crate::files::ReadError;
use crate::iso7816::card::CommunicationError;
use crate::mrz::MrzError;
use crate::session::Step;


/// The broad class of a failure, as reported to observers of a session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    InvalidInput,
    TransportError,
    AuthenticationFailure,
    SecureChannelIntegrityFailure,
    ProtocolStatusError,
    MalformedData,
    Cancelled,
}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::InvalidInput => "invalid input",
            Self::TransportError => "transport error",
            Self::AuthenticationFailure => "authentication failure",
            Self::SecureChannelIntegrityFailure => "secure channel integrity failure",
            Self::ProtocolStatusError => "protocol status error",
            Self::MalformedData => "malformed data",
            Self::Cancelled => "cancelled",
        };
        f.write_str(description)
    }
}


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid MRZ: {0}")]
    Mrz(#[from] MrzError),

    #[error("Basic Access Control failed: {0}")]
    Bac(#[from] bac::Error),

    #[error("{0}")]
    Read(#[from] ReadError),

    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),

    #[error("malformed DG2: {0}")]
    FacialImage(#[from] dg2::Error),

    #[error("malformed DG11: {0}")]
    PersonalDetails(#[from] dg11::Error),

    #[error("step {step} cannot run at this point")]
    StepOutOfOrder { step: Step },

    #[error("session cancelled")]
    Cancelled,
}
impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Mrz(_) => ErrorKind::InvalidInput,
            Self::Bac(e) => bac_kind(e),
            Self::Read(e) => read_kind(e),
            Self::Communication(e) => communication_kind(e),
            Self::FacialImage(_)|Self::PersonalDetails(_) => ErrorKind::MalformedData,
            Self::StepOutOfOrder { .. } => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}


fn communication_kind(error: &CommunicationError) -> ErrorKind {
    match error {
        CommunicationError::Transport(_) => ErrorKind::TransportError,
        CommunicationError::SecureMessaging(_) => ErrorKind::SecureChannelIntegrityFailure,
    }
}

fn bac_kind(error: &bac::Error) -> ErrorKind {
    match error {
        bac::Error::OperationFailed { operation: bac::Operation::GetChallenge, .. } => ErrorKind::ProtocolStatusError,
        bac::Error::OperationFailed { operation: bac::Operation::ExternalAuthenticate, .. }
            |bac::Error::LengthMismatch { .. }
            |bac::Error::ResponseMac
            |bac::Error::ValueMismatch { .. }
            |bac::Error::Crypt(_) => ErrorKind::AuthenticationFailure,
        bac::Error::InvalidState { .. } => ErrorKind::InvalidInput,
        bac::Error::Communication(e) => communication_kind(e),
    }
}

fn read_kind(error: &ReadError) -> ErrorKind {
    match error {
        ReadError::ApplicationStatus { .. }
            |ReadError::FileNotFound { .. }
            |ReadError::Status { .. } => ErrorKind::ProtocolStatusError,
        ReadError::ShortRead { .. }
            |ReadError::Header { .. }
            |ReadError::UnexpectedTag { .. }
            |ReadError::TooLarge { .. } => ErrorKind::MalformedData,
        ReadError::Communication(e) => communication_kind(e),
    }
}
