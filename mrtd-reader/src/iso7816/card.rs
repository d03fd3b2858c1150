use tracing::trace;

use crate::iso7816::apdu;
use crate::secure_messaging;


/// A failure of the underlying link to the chip.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("APDU write error: {0}")]
    Write(#[from] apdu::WriteError),

    #[cfg(feature = "pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("response too short")]
    ShortResponse,

    #[error("connection to the chip was lost")]
    ConnectionLost,
}


#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Secure Messaging error: {0}")]
    SecureMessaging(#[from] secure_messaging::Error),
}
impl From<apdu::WriteError> for CommunicationError {
    fn from(value: apdu::WriteError) -> Self { Self::Transport(value.into()) }
}


/// A smart card compatible with ISO/IEC 7816.
///
/// Each call exchanges exactly one command for one response; implementations must not retry.
pub trait SmartCard {
    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError>;
}
impl<SC: SmartCard + ?Sized> SmartCard for &mut SC {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}
impl<SC: SmartCard + ?Sized> SmartCard for Box<SC> {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        (**self).communicate(request)
    }
}

#[cfg(feature = "pcsc")]
impl SmartCard for pcsc::Card {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        let out_buf = request.to_bytes()?;
        let mut in_buf = vec![0u8; request.data.response_data_length().unwrap_or(0) + 2];
        let in_slice = self.transmit(&out_buf, &mut in_buf)
            .map_err(TransportError::from)?;

        apdu::Response::from_slice(in_slice)
            .ok_or(TransportError::ShortResponse.into())
    }
}

/// Logs every exchange of the wrapped card at `trace` level.
#[derive(Debug)]
pub struct TracingCard<SC> {
    inner: SC,
}
impl<SC: SmartCard> TracingCard<SC> {
    pub const fn new(inner: SC) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> SC {
        self.inner
    }
}
impl<SC: SmartCard> SmartCard for TracingCard<SC> {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        trace!(header = ?request.header, "command data:\n{}", crate::hexdump(request.data.request_data().unwrap_or(&[])));
        let response = self.inner.communicate(request)?;
        trace!(status = %response.status(), "response data:\n{}", crate::hexdump(&response.data));
        Ok(response)
    }
}
