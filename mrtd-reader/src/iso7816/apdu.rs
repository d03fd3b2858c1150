//! Structures related to application protocol data units (APDUs).


use std::fmt;
use std::io::{self, Write};

use crate::iso7816::status::StatusWord;


/// The most command data a short APDU can carry.
pub const MAX_SHORT_LC: usize = 255;

/// The most command data an extended APDU can carry.
pub const MAX_EXTENDED_LC: usize = 65535;


#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("data is, but must not be, empty")]
    EmptyData,

    #[error("too much data: obtained {obtained} bytes, expected maximum {maximum} bytes")]
    DataTooLong { maximum: usize, obtained: usize },
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}

#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub const fn status(&self) -> StatusWord {
        StatusWord::new(self.to_word())
    }
}
impl From<StatusWord> for ResponseTrailer {
    fn from(value: StatusWord) -> Self {
        let [sw1, sw2] = value.to_word().to_be_bytes();
        Self { sw1, sw2 }
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}


/// The body of a command APDU.
///
/// A short `response_data_length` of 0 requests 256 bytes; an extended one of 0 requests 65536
/// bytes.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    RequestDataExtended {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u8,
    },
    ResponseDataExtended {
        response_data_length: u16,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u8,
    },
    BothDataExtended {
        request_data: Vec<u8>,
        response_data_length: u16,
    },
}
impl Data {
    /// The number of response bytes the command asks for, if it asks for any.
    pub fn response_data_length(&self) -> Option<usize> {
        fn short(le: u8) -> usize {
            if le == 0 { 256 } else { le.into() }
        }
        fn extended(le: u16) -> usize {
            if le == 0 { 65536 } else { le.into() }
        }

        match self {
            Self::NoData => None,
            Self::RequestDataShort { .. } => None,
            Self::RequestDataExtended { .. } => None,
            Self::ResponseDataShort { response_data_length } => Some(short(*response_data_length)),
            Self::ResponseDataExtended { response_data_length } => Some(extended(*response_data_length)),
            Self::BothDataShort { response_data_length, .. } => Some(short(*response_data_length)),
            Self::BothDataExtended { response_data_length, .. } => Some(extended(*response_data_length)),
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { request_data } => Some(request_data.as_slice()),
            Self::RequestDataExtended { request_data } => Some(request_data.as_slice()),
            Self::ResponseDataShort { .. } => None,
            Self::ResponseDataExtended { .. } => None,
            Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
            Self::BothDataExtended { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    pub const fn is_extended(&self) -> bool {
        matches!(
            self,
            Self::RequestDataExtended { .. } | Self::ResponseDataExtended { .. } | Self::BothDataExtended { .. }
        )
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        fn check_request_data(request_data: &[u8], max_length: usize) -> Result<(), WriteError> {
            if request_data.is_empty() {
                Err(WriteError::EmptyData)
            } else if request_data.len() > max_length {
                Err(WriteError::DataTooLong { maximum: max_length, obtained: request_data.len() })
            } else {
                Ok(())
            }
        }

        // lengths were checked against the maximum beforehand
        fn short_lc(request_data: &[u8]) -> u8 {
            request_data.len() as u8
        }
        fn extended_lc(request_data: &[u8]) -> [u8; 2] {
            (request_data.len() as u16).to_be_bytes()
        }

        match self {
            // "case" refers to the cases in ISO/IEC 7816-3:2006 § 12.1.3
            Data::NoData => {
                // case 1
                Ok(())
            },
            Data::RequestDataShort { request_data } => {
                // case 3S: [Lc] [Data]
                check_request_data(request_data, MAX_SHORT_LC)?;
                writer.write_all(&[short_lc(request_data)])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::RequestDataExtended { request_data } => {
                // case 3E: [0x00] [LcMSB] [LcLSB] [Data]
                check_request_data(request_data, MAX_EXTENDED_LC)?;
                let lc = extended_lc(request_data);
                writer.write_all(&[0x00, lc[0], lc[1]])?;
                writer.write_all(request_data)?;
                Ok(())
            },
            Data::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::ResponseDataExtended { response_data_length } => {
                // case 2E: [0x00] [LeMSB] [LeLSB]
                let le = response_data_length.to_be_bytes();
                writer.write_all(&[0x00, le[0], le[1]])?;
                Ok(())
            },
            Data::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                check_request_data(request_data, MAX_SHORT_LC)?;
                writer.write_all(&[short_lc(request_data)])?;
                writer.write_all(request_data)?;
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Data::BothDataExtended { request_data, response_data_length } => {
                // case 4E: [0x00] [LcMSB] [LcLSB] [Data] [LeMSB] [LeLSB]
                check_request_data(request_data, MAX_EXTENDED_LC)?;
                let lc = extended_lc(request_data);
                writer.write_all(&[0x00, lc[0], lc[1]])?;
                writer.write_all(request_data)?;
                writer.write_all(&response_data_length.to_be_bytes())?;
                Ok(())
            },
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    /// SELECT of an application by its identifier, without returned metadata.
    pub fn select_application(aid: &[u8]) -> Self {
        Self {
            header: CommandHeader::new(0x00, 0xA4, 0x04, 0x0C),
            data: Data::RequestDataShort { request_data: aid.to_vec() },
        }
    }

    /// SELECT of an elementary file under the current DF by its file identifier.
    pub fn select_elementary_file(file_id: u16) -> Self {
        Self {
            header: CommandHeader::new(0x00, 0xA4, 0x02, 0x0C),
            data: Data::RequestDataShort { request_data: file_id.to_be_bytes().to_vec() },
        }
    }

    /// READ BINARY from the currently selected file.
    ///
    /// Returns `None` if the offset does not fit into the 15 bits available in P1-P2.
    pub fn read_binary(offset: u16, length: u8) -> Option<Self> {
        if offset > 0x7FFF {
            return None;
        }
        let [p1, p2] = offset.to_be_bytes();
        Some(Self {
            header: CommandHeader::new(0x00, 0xB0, p1, p2),
            data: Data::ResponseDataShort { response_data_length: length },
        })
    }

    pub fn get_challenge() -> Self {
        Self {
            header: CommandHeader::new(0x00, 0x84, 0x00, 0x00),
            data: Data::ResponseDataShort { response_data_length: 8 },
        }
    }

    pub fn external_authenticate(payload: Vec<u8>, response_data_length: u8) -> Self {
        Self {
            header: CommandHeader::new(0x00, 0x82, 0x00, 0x00),
            data: Data::BothDataShort {
                request_data: payload,
                response_data_length,
            },
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.header.write_bytes(writer)?;
        self.data.write_bytes(writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        let mut buf = Vec::new();
        self.write_bytes(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: ResponseTrailer,
}
impl Response {
    pub fn new(data: Vec<u8>, status: StatusWord) -> Self {
        Self {
            data,
            trailer: status.into(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let (data, trailer) = bytes.split_at(bytes.len().checked_sub(2)?);
        Some(Self {
            data: data.to_vec(),
            trailer: ResponseTrailer::new(trailer[0], trailer[1]),
        })
    }

    pub const fn status(&self) -> StatusWord {
        self.trailer.status()
    }
}
