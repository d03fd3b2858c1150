//! Data Group 2: the encoded face.
//!
//! The file nests as follows:
//! ```plain
//! 75                      DG2
//!   7F61                  biometric information group template
//!     02                  number of instances
//!     7F60                biometric information template (one per instance)
//!       A1                biometric header template
//!       5F2E or 7F2E      biometric data block (ISO/IEC 19794-5 facial record)
//! ```
//!
//! Only the first instance is decoded.


use std::fmt;

use tracing::trace;

use crate::tlv::{read_first, Tag, TlvError};


const TAG_DG2: Tag = Tag(0x75);
const TAG_GROUP_TEMPLATE: Tag = Tag(0x7F61);
const TAG_INSTANCE_COUNT: Tag = Tag(0x02);
const TAG_INFORMATION_TEMPLATE: Tag = Tag(0x7F60);
const TAG_HEADER_TEMPLATE: Tag = Tag(0xA1);
const TAG_DATA_BLOCK: Tag = Tag(0x5F2E);
const TAG_DATA_BLOCK_ENCIPHERED: Tag = Tag(0x7F2E);

const FACIAL_RECORD_MAGIC: &[u8; 4] = b"FAC\0";
const FACIAL_RECORD_HEADER_LENGTH: usize = 14;
const FACIAL_INFORMATION_LENGTH: usize = 20;
const FEATURE_POINT_LENGTH: usize = 8;
const IMAGE_INFORMATION_LENGTH: usize = 12;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
pub enum Error {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    #[error("file starts with tag {obtained}, expected 0x75")]
    OuterTag { obtained: Tag },

    #[error("required element {tag} is missing")]
    MissingElement { tag: Tag },

    #[error("facial record does not start with \"FAC\\0\"")]
    RecordMagic,

    #[error("facial record contains no faces")]
    NoFaces,

    #[error("{part} needs {needed} bytes at offset {offset}, but the record has {available}")]
    Truncated { part: RecordPart, offset: usize, needed: usize, available: usize },
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RecordPart {
    RecordHeader,
    FacialInformation,
    FeaturePoints,
    ImageInformation,
}
impl fmt::Display for RecordPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordHeader => write!(f, "record header"),
            Self::FacialInformation => write!(f, "facial information"),
            Self::FeaturePoints => write!(f, "feature points"),
            Self::ImageInformation => write!(f, "image information"),
        }
    }
}


/// The encoding of the image data.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
    Unknown(u8),
}
impl ImageFormat {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Jpeg,
            0x01 => Self::Jpeg2000,
            other => Self::Unknown(other),
        }
    }

    /// The customary file extension.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Jpeg2000 => "jp2",
            Self::Unknown(_) => "bin",
        }
    }
}
impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "JPEG"),
            Self::Jpeg2000 => write!(f, "JPEG 2000"),
            Self::Unknown(code) => write!(f, "unknown (0x{:02X})", code),
        }
    }
}


/// The face image stored in DG2.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FacialImage {
    pub format: ImageFormat,
    pub width: u16,
    pub height: u16,

    /// The number of biometric templates stored in the data group.
    pub instance_count: u8,

    pub image_data: Vec<u8>,
}
impl fmt::Debug for FacialImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacialImage")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("instance_count", &self.instance_count)
            .field("image_data", &format_args!("[{} bytes]", self.image_data.len()))
            .finish()
    }
}


fn take<'d>(record: &'d [u8], offset: usize, needed: usize, part: RecordPart) -> Result<&'d [u8], Error> {
    record.get(offset..offset + needed)
        .ok_or(Error::Truncated { part, offset, needed, available: record.len() })
}

/// Decodes the first face of an ISO/IEC 19794-5 facial record.
fn parse_facial_record(record: &[u8], instance_count: u8) -> Result<FacialImage, Error> {
    let header = take(record, 0, FACIAL_RECORD_HEADER_LENGTH, RecordPart::RecordHeader)?;
    if &header[0..4] != FACIAL_RECORD_MAGIC {
        return Err(Error::RecordMagic);
    }
    // 4..8 is the version, 8..12 the record length
    let face_count = u16::from_be_bytes([header[12], header[13]]);
    if face_count == 0 {
        return Err(Error::NoFaces);
    }

    let mut offset = FACIAL_RECORD_HEADER_LENGTH;
    let information = take(record, offset, FACIAL_INFORMATION_LENGTH, RecordPart::FacialInformation)?;
    let feature_point_count = usize::from(u16::from_be_bytes([information[4], information[5]]));
    offset += FACIAL_INFORMATION_LENGTH;

    take(record, offset, feature_point_count * FEATURE_POINT_LENGTH, RecordPart::FeaturePoints)?;
    offset += feature_point_count * FEATURE_POINT_LENGTH;

    // face image type, image data type, width, height, colour space, source type, device type, quality
    let image_information = take(record, offset, IMAGE_INFORMATION_LENGTH, RecordPart::ImageInformation)?;
    let format = ImageFormat::from_code(image_information[1]);
    let width = u16::from_be_bytes([image_information[2], image_information[3]]);
    let height = u16::from_be_bytes([image_information[4], image_information[5]]);
    offset += IMAGE_INFORMATION_LENGTH;

    // the image extends to the end of the enclosing data object
    let image_data = record[offset..].to_vec();
    trace!(%format, width, height, length = image_data.len(), "decoded facial image");

    Ok(FacialImage { format, width, height, instance_count, image_data })
}

/// Parses the contents of DG2.
pub fn parse(data: &[u8]) -> Result<FacialImage, Error> {
    let outer = read_first(data)?;
    if outer.tag != TAG_DG2 {
        return Err(Error::OuterTag { obtained: outer.tag });
    }

    let group = outer.children().find(TAG_GROUP_TEMPLATE)?
        .ok_or(Error::MissingElement { tag: TAG_GROUP_TEMPLATE })?;

    let mut instance_count = 1;
    let mut information = None;
    for tlv in group.children() {
        let tlv = tlv?;
        match tlv.tag {
            TAG_INSTANCE_COUNT => instance_count = tlv.value.first().copied().unwrap_or(0),
            TAG_INFORMATION_TEMPLATE => {
                information = Some(tlv);
                break;
            },
            _ => {},
        }
    }
    let information = information
        .ok_or(Error::MissingElement { tag: TAG_INFORMATION_TEMPLATE })?;

    let mut block = None;
    for tlv in information.children() {
        let tlv = tlv?;
        match tlv.tag {
            TAG_HEADER_TEMPLATE => {},
            TAG_DATA_BLOCK|TAG_DATA_BLOCK_ENCIPHERED => {
                block = Some(tlv);
                break;
            },
            other => trace!(tag = %other, "skipping unknown element"),
        }
    }
    let block = block.ok_or(Error::MissingElement { tag: TAG_DATA_BLOCK })?;

    parse_facial_record(block.value, instance_count)
}


#[cfg(test)]
mod tests {
    use super::{parse, Error, ImageFormat, RecordPart};
    use crate::tlv::{write_tlv, Tag};
    use hex_literal::hex;

    const JPEG: [u8; 12] = hex!("FFD8FFE000104A4649460001");

    fn facial_record(feature_points: u16, image_type: u8, image: &[u8]) -> Vec<u8> {
        let mut record = Vec::new();
        record.extend(b"FAC\0");
        record.extend(b"010\0");
        let total = 14 + 20 + 8 * usize::from(feature_points) + 12 + image.len();
        record.extend((total as u32).to_be_bytes());
        record.extend(1u16.to_be_bytes());

        // facial information
        record.extend(((20 + 8 * usize::from(feature_points) + 12 + image.len()) as u32).to_be_bytes());
        record.extend(feature_points.to_be_bytes());
        record.extend([0x01, 0x02, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for i in 0..feature_points {
            record.extend([0x01, i as u8, 0x00, 0x10, 0x00, 0x20, 0x00, 0x00]);
        }

        // image information
        record.extend([0x01, image_type]);
        record.extend(480u16.to_be_bytes());
        record.extend(640u16.to_be_bytes());
        record.extend([0x01, 0x02, 0x00, 0x00, 0x00, 0x00]);
        record.extend(image);
        record
    }

    fn dg2(block_tag: u32, record: &[u8], extra: &[u8]) -> Vec<u8> {
        let mut template = Vec::new();
        write_tlv(&mut template, Tag(0xA1), &hex!("800201018102000887020101"));
        template.extend(extra);
        write_tlv(&mut template, Tag(block_tag), record);

        let mut group = Vec::new();
        write_tlv(&mut group, Tag(0x02), &[0x01]);
        write_tlv(&mut group, Tag(0x7F60), &template);

        let mut inner = Vec::new();
        write_tlv(&mut inner, Tag(0x7F61), &group);

        let mut file = Vec::new();
        write_tlv(&mut file, Tag(0x75), &inner);
        file
    }

    #[test]
    fn test_parse_jpeg() {
        let file = dg2(0x5F2E, &facial_record(2, 0x00, &JPEG), &[]);
        let image = parse(&file).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.width, 480);
        assert_eq!(image.height, 640);
        assert_eq!(image.instance_count, 1);
        assert_eq!(image.image_data, JPEG);
    }

    #[test]
    fn test_parse_jpeg2000_with_unknown_sibling() {
        let image_bytes = vec![0x5A; 300];
        let mut unknown = Vec::new();
        write_tlv(&mut unknown, Tag(0x53), &[0xAA, 0xBB]);
        let file = dg2(0x7F2E, &facial_record(0, 0x01, &image_bytes), &unknown);
        let image = parse(&file).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg2000);
        assert_eq!(image.image_data.len(), 300);
        assert_eq!(ImageFormat::Jpeg2000.extension(), "jp2");
    }

    #[test]
    fn test_malformed() {
        let mut not_a_face = facial_record(0, 0x00, &JPEG);
        not_a_face[0] = b'X';
        assert_eq!(parse(&dg2(0x5F2E, &not_a_face, &[])), Err(Error::RecordMagic));

        // claims three feature points but carries none
        let mut record = facial_record(0, 0x00, &[]);
        record[19] = 0x03;
        record.truncate(14 + 20 + 4);
        assert!(matches!(
            parse(&dg2(0x5F2E, &record, &[])),
            Err(Error::Truncated { part: RecordPart::FeaturePoints, .. }),
        ));

        assert_eq!(parse(&hex!("6B 00")), Err(Error::OuterTag { obtained: Tag(0x6B) }));
        assert_eq!(parse(&hex!("75 03 7F6100")), Err(Error::MissingElement { tag: Tag(0x7F60) }));
        assert!(matches!(parse(&hex!("75 10 7F61")), Err(Error::Tlv(_))));
    }
}
