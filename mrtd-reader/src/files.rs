//! Elementary files of the eMRTD application and reading them in chunks.


use std::fmt;

use tracing::{debug, instrument, trace};

use crate::iso7816::apdu::Apdu;
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::iso7816::status::StatusWord;
use crate::tlv::{decode_header, Tag, TlvError};


/// The number of bytes read first to learn a file's length.
const HEADER_READ_LENGTH: u8 = 4;

/// The default maximum chunk size, leaving room for the Secure Messaging overhead in a short
/// response.
pub const DEFAULT_MAX_READ_LENGTH: u8 = 0xDF;


/// Application identifier of the eMRTD LDS1 application.
pub const EMRTD_APPLICATION_ID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FileOperation {
    Select,
    ReadBinary,
}
impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::ReadBinary => write!(f, "READ BINARY"),
        }
    }
}


#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("selecting the eMRTD application failed with status {status}")]
    ApplicationStatus { status: StatusWord },

    #[error("{file} not found on the chip")]
    FileNotFound { file: DataGroupId },

    #[error("{operation} of {file} failed with status {status}")]
    Status { file: DataGroupId, operation: FileOperation, status: StatusWord },

    #[error("{file} returned {obtained} bytes at offset {offset}, expected {expected}")]
    ShortRead { file: DataGroupId, offset: usize, expected: usize, obtained: usize },

    #[error("{file} has a malformed header: {source}")]
    Header { file: DataGroupId, source: TlvError },

    #[error("{file} starts with tag {obtained}, expected {expected}")]
    UnexpectedTag { file: DataGroupId, expected: Tag, obtained: Tag },

    #[error("{file} declares {length} bytes, more than READ BINARY can address")]
    TooLarge { file: DataGroupId, length: usize },

    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),
}


/// The files of the eMRTD application that this crate knows about.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DataGroupId {
    Com,
    Dg1,
    Dg2,
    Dg3,
    Dg4,
    Dg5,
    Dg6,
    Dg7,
    Dg8,
    Dg9,
    Dg10,
    Dg11,
    Dg12,
    Dg13,
    Dg14,
    Dg15,
    Dg16,
    Sod,
}
impl DataGroupId {
    pub const ALL: [Self; 18] = [
        Self::Com, Self::Dg1, Self::Dg2, Self::Dg3, Self::Dg4, Self::Dg5, Self::Dg6, Self::Dg7,
        Self::Dg8, Self::Dg9, Self::Dg10, Self::Dg11, Self::Dg12, Self::Dg13, Self::Dg14,
        Self::Dg15, Self::Dg16, Self::Sod,
    ];

    /// The number of the data group, or `None` for EF.COM and EF.SOD.
    pub const fn number(self) -> Option<u8> {
        match self {
            Self::Com|Self::Sod => None,
            Self::Dg1 => Some(1),
            Self::Dg2 => Some(2),
            Self::Dg3 => Some(3),
            Self::Dg4 => Some(4),
            Self::Dg5 => Some(5),
            Self::Dg6 => Some(6),
            Self::Dg7 => Some(7),
            Self::Dg8 => Some(8),
            Self::Dg9 => Some(9),
            Self::Dg10 => Some(10),
            Self::Dg11 => Some(11),
            Self::Dg12 => Some(12),
            Self::Dg13 => Some(13),
            Self::Dg14 => Some(14),
            Self::Dg15 => Some(15),
            Self::Dg16 => Some(16),
        }
    }

    /// The short EF identifier.
    pub const fn short_file_id(self) -> u8 {
        match self {
            Self::Com => 0x1E,
            Self::Sod => 0x1D,
            other => match other.number() {
                Some(n) => n,
                None => 0x00,
            },
        }
    }

    /// The file identifier used with SELECT.
    pub const fn file_id(self) -> u16 {
        0x0100 | self.short_file_id() as u16
    }

    /// The tag of the data object that makes up the whole file.
    pub const fn tag(self) -> Tag {
        Tag(match self {
            Self::Com => 0x60,
            Self::Dg1 => 0x61,
            Self::Dg2 => 0x75,
            Self::Dg3 => 0x63,
            Self::Dg4 => 0x76,
            Self::Dg5 => 0x65,
            Self::Dg6 => 0x66,
            Self::Dg7 => 0x67,
            Self::Dg8 => 0x68,
            Self::Dg9 => 0x69,
            Self::Dg10 => 0x6A,
            Self::Dg11 => 0x6B,
            Self::Dg12 => 0x6C,
            Self::Dg13 => 0x6D,
            Self::Dg14 => 0x6E,
            Self::Dg15 => 0x6F,
            Self::Dg16 => 0x70,
            Self::Sod => 0x77,
        })
    }

    pub fn from_tag(tag: Tag) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.tag() == tag)
    }

    pub fn from_file_id(file_id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.file_id() == file_id)
    }
}
impl fmt::Display for DataGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Com => write!(f, "EF.COM"),
            Self::Sod => write!(f, "EF.SOD"),
            other => write!(f, "DG{}", other.number().unwrap_or(0)),
        }
    }
}


/// The complete contents of a file as read from the chip.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DataGroupFile {
    id: DataGroupId,
    data: Vec<u8>,
    header_length: usize,
}
impl DataGroupFile {
    pub const fn id(&self) -> DataGroupId { self.id }
    pub fn data(&self) -> &[u8] { &self.data }
    pub fn into_data(self) -> Vec<u8> { self.data }

    /// The total length declared by the file's own header, including the header.
    pub fn declared_length(&self) -> usize { self.data.len() }

    /// The value of the outer data object.
    pub fn value(&self) -> &[u8] { &self.data[self.header_length..] }
}
impl fmt::Debug for DataGroupFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataGroupFile")
            .field("id", &self.id)
            .field("length", &self.data.len())
            .finish()
    }
}


/// Selects the eMRTD application.
#[instrument(skip_all)]
pub fn select_application<SC: SmartCard>(card: &mut SC) -> Result<(), ReadError> {
    let response = card.communicate(&Apdu::select_application(&EMRTD_APPLICATION_ID))?;
    if response.status() != StatusWord::SUCCESS {
        return Err(ReadError::ApplicationStatus { status: response.status() });
    }
    debug!("selected eMRTD application");
    Ok(())
}

/// Selects an elementary file by its file identifier.
#[instrument(skip(card))]
pub fn select_file<SC: SmartCard>(card: &mut SC, file: DataGroupId) -> Result<(), ReadError> {
    let response = card.communicate(&Apdu::select_elementary_file(file.file_id()))?;
    match response.status() {
        StatusWord::SUCCESS => Ok(()),
        StatusWord::FILE_NOT_FOUND => Err(ReadError::FileNotFound { file }),
        status => Err(ReadError::Status { file, operation: FileOperation::Select, status }),
    }
}

fn read_chunk<SC: SmartCard>(card: &mut SC, file: DataGroupId, offset: usize, length: u8) -> Result<Vec<u8>, ReadError> {
    let apdu = u16::try_from(offset).ok()
        .and_then(|offset| Apdu::read_binary(offset, length))
        .ok_or(ReadError::TooLarge { file, length: offset + usize::from(length) })?;
    let response = card.communicate(&apdu)?;
    if !response.status().is_success() {
        return Err(ReadError::Status { file, operation: FileOperation::ReadBinary, status: response.status() });
    }
    trace!(offset, obtained = response.data.len(), "read chunk");
    Ok(response.data)
}

/// Reads the currently selected file in chunks of at most `max_chunk` bytes.
///
/// The first four bytes reveal the length of the file, gathered over several reads if the chunks
/// are smaller than that; the rest is read in order.
#[instrument(skip(card))]
pub fn read_selected<SC: SmartCard>(card: &mut SC, file: DataGroupId, max_chunk: u8) -> Result<DataGroupFile, ReadError> {
    let max_chunk = max_chunk.max(1);
    let mut data = Vec::with_capacity(usize::from(HEADER_READ_LENGTH));
    let mut header_read = 0u8;
    let (tag, header_length, value_length) = loop {
        let length = (HEADER_READ_LENGTH - header_read).min(max_chunk);
        let chunk = read_chunk(card, file, usize::from(header_read), length)?;
        let taken = chunk.len().min(usize::from(length));
        data.extend(&chunk[..taken]);
        header_read += length;
        // a short answer means the file ended
        let exhausted = taken < usize::from(length) || header_read >= HEADER_READ_LENGTH;

        match decode_header(&data) {
            Ok(header) => break header,
            Err(TlvError::TruncatedTag { .. }|TlvError::TruncatedLength { .. }) if !exhausted => {},
            Err(TlvError::TruncatedTag { .. }|TlvError::TruncatedLength { .. }) => return Err(ReadError::ShortRead {
                file,
                offset: 0,
                expected: usize::from(HEADER_READ_LENGTH),
                obtained: data.len(),
            }),
            Err(source) => return Err(ReadError::Header { file, source }),
        }
    };
    if tag != file.tag() {
        return Err(ReadError::UnexpectedTag { file, expected: file.tag(), obtained: tag });
    }
    let total_length = header_length + value_length;
    debug!(total_length, "reading file");

    // a tiny file may already be complete
    data.truncate(total_length);
    while data.len() < total_length {
        let offset = data.len();
        let remaining = total_length - offset;
        let chunk_length = u8::try_from(remaining).map_or(max_chunk, |r| r.min(max_chunk));
        let chunk = read_chunk(card, file, offset, chunk_length)?;
        if chunk.len() < usize::from(chunk_length) {
            return Err(ReadError::ShortRead {
                file,
                offset,
                expected: usize::from(chunk_length),
                obtained: chunk.len(),
            });
        }
        data.extend(&chunk[..usize::from(chunk_length)]);
    }

    Ok(DataGroupFile { id: file, data, header_length })
}

/// Selects and reads a whole file.
pub fn read_data_group<SC: SmartCard>(card: &mut SC, file: DataGroupId, max_chunk: u8) -> Result<DataGroupFile, ReadError> {
    select_file(card, file)?;
    read_selected(card, file, max_chunk)
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{read_data_group, DataGroupId, ReadError};
    use crate::iso7816::apdu::{Apdu, Response};
    use crate::iso7816::card::{CommunicationError, SmartCard};
    use crate::iso7816::status::StatusWord;
    use crate::tlv::{write_tlv, Tag};

    /// Serves files without Secure Messaging.
    struct FileCard {
        files: HashMap<u16, Vec<u8>>,
        selected: Option<u16>,
        reads: Vec<(usize, usize)>,
        truncate_reads_to: Option<usize>,
        read_status: StatusWord,
    }
    impl FileCard {
        fn new(files: &[(DataGroupId, Vec<u8>)]) -> Self {
            Self {
                files: files.iter().map(|(id, data)| (id.file_id(), data.clone())).collect(),
                selected: None,
                reads: Vec::new(),
                truncate_reads_to: None,
                read_status: StatusWord::SUCCESS,
            }
        }
    }
    impl SmartCard for FileCard {
        fn communicate(&mut self, request: &Apdu) -> Result<Response, CommunicationError> {
            match request.header.ins {
                0xA4 => {
                    let data = request.data.request_data().unwrap();
                    let file_id = u16::from_be_bytes([data[0], data[1]]);
                    if self.files.contains_key(&file_id) {
                        self.selected = Some(file_id);
                        Ok(Response::new(Vec::new(), StatusWord::SUCCESS))
                    } else {
                        Ok(Response::new(Vec::new(), StatusWord::FILE_NOT_FOUND))
                    }
                },
                0xB0 => {
                    let file = &self.files[&self.selected.unwrap()];
                    let offset = usize::from(u16::from_be_bytes([request.header.p1, request.header.p2]));
                    let length = request.data.response_data_length().unwrap();
                    self.reads.push((offset, length));
                    if self.read_status != StatusWord::SUCCESS && offset > 0 {
                        return Ok(Response::new(Vec::new(), self.read_status));
                    }
                    let mut end = (offset + length).min(file.len());
                    if let Some(limit) = self.truncate_reads_to {
                        end = end.min(offset + limit);
                    }
                    Ok(Response::new(file[offset..end].to_vec(), StatusWord::SUCCESS))
                },
                _ => Ok(Response::new(Vec::new(), StatusWord::INSTRUCTION_NOT_SUPPORTED)),
            }
        }
    }

    fn dg11_of_length(value_length: usize) -> Vec<u8> {
        let mut file = Vec::new();
        write_tlv(&mut file, Tag(0x6B), &vec![0x5A; value_length]);
        file
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(DataGroupId::Dg2.file_id(), 0x0102);
        assert_eq!(DataGroupId::Dg2.short_file_id(), 0x02);
        assert_eq!(DataGroupId::Dg11.file_id(), 0x010B);
        assert_eq!(DataGroupId::Com.file_id(), 0x011E);
        assert_eq!(DataGroupId::Sod.file_id(), 0x011D);
        assert_eq!(DataGroupId::from_tag(Tag(0x75)), Some(DataGroupId::Dg2));
        assert_eq!(DataGroupId::from_file_id(0x010B), Some(DataGroupId::Dg11));
        assert_eq!(DataGroupId::Dg11.to_string(), "DG11");
        assert_eq!(DataGroupId::Com.to_string(), "EF.COM");
    }

    #[test]
    fn test_read_in_chunks() {
        let contents = dg11_of_length(0x1F0);
        let mut card = FileCard::new(&[(DataGroupId::Dg11, contents.clone())]);
        let file = read_data_group(&mut card, DataGroupId::Dg11, 0xDF).unwrap();

        assert_eq!(file.data(), contents.as_slice());
        assert_eq!(file.declared_length(), 4 + 0x1F0);
        assert_eq!(file.value().len(), 0x1F0);
        assert_eq!(card.reads, vec![(0, 4), (4, 0xDF), (4 + 0xDF, 0xDF), (4 + 2 * 0xDF, 0x1F0 - 2 * 0xDF)]);
    }

    #[test]
    fn test_header_over_small_chunks() {
        let contents = dg11_of_length(0x1F0);
        for max_chunk in 1..=3u8 {
            let mut card = FileCard::new(&[(DataGroupId::Dg11, contents.clone())]);
            let file = read_data_group(&mut card, DataGroupId::Dg11, max_chunk).unwrap();
            assert_eq!(file.data(), contents.as_slice());
            assert_eq!(card.reads.iter().map(|(_, length)| length).sum::<usize>(), contents.len());
        }

        let mut card = FileCard::new(&[(DataGroupId::Dg11, contents.clone())]);
        read_data_group(&mut card, DataGroupId::Dg11, 3).unwrap();
        assert_eq!(&card.reads[..3], &[(0, 3), (3, 1), (4, 3)]);
    }

    #[test]
    fn test_tiny_file() {
        let contents = vec![0x6B, 0x01, 0x00];
        let mut card = FileCard::new(&[(DataGroupId::Dg11, contents.clone())]);
        let file = read_data_group(&mut card, DataGroupId::Dg11, 0xDF).unwrap();
        assert_eq!(file.data(), contents.as_slice());
        assert_eq!(card.reads.len(), 1);
    }

    #[test]
    fn test_read_failures() {
        let mut card = FileCard::new(&[(DataGroupId::Dg11, dg11_of_length(0x100))]);
        assert!(matches!(
            read_data_group(&mut card, DataGroupId::Dg2, 0xDF),
            Err(ReadError::FileNotFound { file: DataGroupId::Dg2 }),
        ));

        let mut card = FileCard::new(&[(DataGroupId::Dg2, dg11_of_length(0x10))]);
        assert!(matches!(
            read_data_group(&mut card, DataGroupId::Dg2, 0xDF),
            Err(ReadError::UnexpectedTag { expected: Tag(0x75), obtained: Tag(0x6B), .. }),
        ));

        let mut card = FileCard::new(&[(DataGroupId::Dg11, dg11_of_length(0x100))]);
        card.truncate_reads_to = Some(0x20);
        assert!(matches!(
            read_data_group(&mut card, DataGroupId::Dg11, 0xDF),
            Err(ReadError::ShortRead { offset: 4, expected: 0xDF, obtained: 0x20, .. }),
        ));

        let mut card = FileCard::new(&[(DataGroupId::Dg11, dg11_of_length(0x100))]);
        card.read_status = StatusWord::SECURITY_STATUS_NOT_SATISFIED;
        assert!(matches!(
            read_data_group(&mut card, DataGroupId::Dg11, 0xDF),
            Err(ReadError::Status { status: StatusWord::SECURITY_STATUS_NOT_SATISFIED, .. }),
        ));
    }
}
