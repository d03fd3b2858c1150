//! Data Group 11: additional personal details.
//!
//! DG11 (tag 0x6B) opens with a tag list (0x5C) naming the fields present, followed by one
//! data object per field. Other names may appear bare or wrapped in a template (0xA0) that also
//! carries their count. Multi-part fields separate their parts with `<`.


use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace, warn};

use crate::tlv::{decode_tag, read_first, Tag, TlvError};


const TAG_DG11: Tag = Tag(0x6B);
const TAG_TAG_LIST: Tag = Tag(0x5C);
const TAG_OTHER_NAMES_TEMPLATE: Tag = Tag(0xA0);
const TAG_OTHER_NAMES_COUNT: Tag = Tag(0x02);
const TAG_OTHER_NAME: Tag = Tag(0x5F0F);


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
pub enum Error {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    #[error("file starts with tag {obtained}, expected 0x6B")]
    OuterTag { obtained: Tag },

    #[error("field {tag} is not valid UTF-8")]
    Encoding { tag: Tag },

    #[error("no recognised fields")]
    NoFields,
}


/// The fields DG11 may contain.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PersonalDetailField {
    FullName,
    OtherNames,
    PersonalNumber,
    FullDateOfBirth,
    PlaceOfBirth,
    Address,
    Telephone,
    Profession,
    Title,
    PersonalSummary,
    ProofOfCitizenship,
    OtherTravelDocumentNumbers,
    CustodyInformation,
}
impl PersonalDetailField {
    pub const ALL: [Self; 13] = [
        Self::FullName, Self::OtherNames, Self::PersonalNumber, Self::FullDateOfBirth,
        Self::PlaceOfBirth, Self::Address, Self::Telephone, Self::Profession, Self::Title,
        Self::PersonalSummary, Self::ProofOfCitizenship, Self::OtherTravelDocumentNumbers,
        Self::CustodyInformation,
    ];

    pub const fn tag(&self) -> Tag {
        match self {
            Self::FullName => Tag(0x5F0E),
            Self::OtherNames => TAG_OTHER_NAME,
            Self::PersonalNumber => Tag(0x5F10),
            Self::FullDateOfBirth => Tag(0x5F2B),
            Self::PlaceOfBirth => Tag(0x5F11),
            Self::Address => Tag(0x5F42),
            Self::Telephone => Tag(0x5F12),
            Self::Profession => Tag(0x5F13),
            Self::Title => Tag(0x5F14),
            Self::PersonalSummary => Tag(0x5F15),
            Self::ProofOfCitizenship => Tag(0x5F16),
            Self::OtherTravelDocumentNumbers => Tag(0x5F17),
            Self::CustodyInformation => Tag(0x5F18),
        }
    }

    pub fn from_tag(tag: Tag) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.tag() == tag)
    }

    /// Whether the value consists of `<`-separated parts.
    pub const fn is_multi_part(&self) -> bool {
        matches!(self, Self::PlaceOfBirth | Self::Address | Self::OtherTravelDocumentNumbers)
    }
}
impl fmt::Display for PersonalDetailField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FullName => "full name",
            Self::OtherNames => "other names",
            Self::PersonalNumber => "personal number",
            Self::FullDateOfBirth => "full date of birth",
            Self::PlaceOfBirth => "place of birth",
            Self::Address => "address",
            Self::Telephone => "telephone",
            Self::Profession => "profession",
            Self::Title => "title",
            Self::PersonalSummary => "personal summary",
            Self::ProofOfCitizenship => "proof of citizenship",
            Self::OtherTravelDocumentNumbers => "other travel document numbers",
            Self::CustodyInformation => "custody information",
        };
        f.write_str(name)
    }
}


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FieldValue {
    Text(String),
    Lines(Vec<String>),

    /// Proof of citizenship is an image, not text.
    Binary(Vec<u8>),
}
impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_lines(&self) -> Option<&[String]> {
        match self {
            Self::Lines(lines) => Some(lines),
            _ => None,
        }
    }
}
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Lines(lines) => f.write_str(&lines.join(", ")),
            Self::Binary(data) => write!(f, "[{} bytes]", data.len()),
        }
    }
}


/// A name in MRZ notation, `PRIMARY<<SECONDARY<PARTS`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NameParts {
    pub primary: String,
    pub secondary: String,
}
impl NameParts {
    pub fn parse(name: &str) -> Self {
        let (primary, secondary) = name.split_once("<<").unwrap_or((name, ""));
        let clean = |part: &str| part.split('<')
            .filter(|piece| !piece.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self { primary: clean(primary), secondary: clean(secondary) }
    }
}
impl fmt::Display for NameParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secondary.is_empty() {
            f.write_str(&self.primary)
        } else {
            write!(f, "{}, {}", self.primary, self.secondary)
        }
    }
}


/// The decoded contents of DG11.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersonalDetails {
    fields: BTreeMap<PersonalDetailField, FieldValue>,
    tag_list: Vec<Tag>,
}
impl PersonalDetails {
    pub fn get(&self, field: PersonalDetailField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (PersonalDetailField, &FieldValue)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The tags the document claims to contain.
    pub fn tag_list(&self) -> &[Tag] {
        &self.tag_list
    }

    pub fn full_name(&self) -> Option<NameParts> {
        self.get(PersonalDetailField::FullName)
            .and_then(FieldValue::as_text)
            .map(NameParts::parse)
    }

    pub fn other_names(&self) -> Vec<NameParts> {
        self.get(PersonalDetailField::OtherNames)
            .and_then(FieldValue::as_lines)
            .map(|names| names.iter().map(|name| NameParts::parse(name)).collect())
            .unwrap_or_default()
    }
}


fn decode_text(tag: Tag, value: &[u8]) -> Result<String, Error> {
    std::str::from_utf8(value)
        .map(|text| text.trim_end().to_owned())
        .map_err(|_| Error::Encoding { tag })
}

/// Every field is optional, so one that cannot be decoded is left out rather than failing the file.
fn decode_or_skip<T>(decoded: Result<T, Error>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("skipping field: {}", e);
            None
        },
    }
}

fn split_parts(text: &str) -> Vec<String> {
    text.split('<')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Some issuers store the full date of birth as four packed BCD bytes.
fn decode_date_of_birth(value: &[u8]) -> Result<String, Error> {
    if value.len() == 4 && !value.iter().all(u8::is_ascii_digit) {
        let mut date = String::with_capacity(8);
        for b in value {
            date.push_str(&format!("{:02X}", b));
        }
        return Ok(date);
    }
    decode_text(PersonalDetailField::FullDateOfBirth.tag(), value)
}

fn parse_tag_list(value: &[u8]) -> Result<Vec<Tag>, Error> {
    let mut tags = Vec::new();
    let mut offset = 0;
    while offset < value.len() {
        let (tag, consumed) = decode_tag(&value[offset..], offset)?;
        tags.push(tag);
        offset += consumed;
    }
    Ok(tags)
}

/// Parses the contents of DG11.
pub fn parse(data: &[u8]) -> Result<PersonalDetails, Error> {
    let outer = read_first(data)?;
    if outer.tag != TAG_DG11 {
        return Err(Error::OuterTag { obtained: outer.tag });
    }

    let mut details = PersonalDetails::default();
    let mut other_names = Vec::new();
    for tlv in outer.children() {
        let tlv = tlv?;
        match tlv.tag {
            TAG_TAG_LIST => details.tag_list = parse_tag_list(tlv.value)?,
            TAG_OTHER_NAMES_TEMPLATE => {
                for child in tlv.children() {
                    let child = child?;
                    match child.tag {
                        TAG_OTHER_NAMES_COUNT => {},
                        TAG_OTHER_NAME => other_names.extend(decode_or_skip(decode_text(child.tag, child.value))),
                        other => trace!(tag = %other, "skipping unknown element in other names"),
                    }
                }
            },
            TAG_OTHER_NAME => other_names.extend(decode_or_skip(decode_text(tlv.tag, tlv.value))),
            tag => {
                let Some(field) = PersonalDetailField::from_tag(tag) else {
                    trace!(%tag, "skipping unknown element");
                    continue;
                };
                let value = match field {
                    PersonalDetailField::ProofOfCitizenship => Ok(FieldValue::Binary(tlv.value.to_vec())),
                    PersonalDetailField::FullDateOfBirth => decode_date_of_birth(tlv.value).map(FieldValue::Text),
                    field if field.is_multi_part() => decode_text(tag, tlv.value)
                        .map(|text| FieldValue::Lines(split_parts(&text))),
                    _ => decode_text(tag, tlv.value).map(FieldValue::Text),
                };
                if let Some(value) = decode_or_skip(value) {
                    details.fields.insert(field, value);
                }
            },
        }
    }
    if !other_names.is_empty() {
        details.fields.insert(PersonalDetailField::OtherNames, FieldValue::Lines(other_names));
    }

    if details.fields.is_empty() {
        return Err(Error::NoFields);
    }
    for tag in &details.tag_list {
        let present = PersonalDetailField::from_tag(*tag)
            .map(|field| details.fields.contains_key(&field))
            .unwrap_or(false);
        if !present {
            debug!(%tag, "tag list names a field that is absent");
        }
    }
    Ok(details)
}


#[cfg(test)]
mod tests {
    use super::{parse, Error, FieldValue, NameParts, PersonalDetailField};
    use crate::tlv::{write_tlv, Tag};
    use hex_literal::hex;

    fn dg11(fields: &[(u32, &[u8])]) -> Vec<u8> {
        let mut inner = Vec::new();
        let mut tag_list = Vec::new();
        for (tag, _) in fields {
            tag_list.extend(Tag(*tag).to_bytes());
        }
        write_tlv(&mut inner, Tag(0x5C), &tag_list);
        for (tag, value) in fields {
            write_tlv(&mut inner, Tag(*tag), value);
        }
        let mut file = Vec::new();
        write_tlv(&mut file, Tag(0x6B), &inner);
        file
    }

    #[test]
    fn test_parse_fields() {
        let file = dg11(&[
            (0x5F0E, b"ERIKSSON<<ANNA<MARIA"),
            (0x5F2B, b"19740812"),
            (0x5F11, b"ZENITH<UTOPIA"),
            (0x5F42, b"123 MAPLE RD<<ANYTOWN<UTOPIA"),
            (0x5F13, b"TRAVEL AGENT"),
        ]);
        let details = parse(&file).unwrap();
        assert_eq!(details.len(), 5);
        assert_eq!(details.tag_list(), &[Tag(0x5F0E), Tag(0x5F2B), Tag(0x5F11), Tag(0x5F42), Tag(0x5F13)]);

        let name = details.full_name().unwrap();
        assert_eq!(name, NameParts { primary: "ERIKSSON".into(), secondary: "ANNA MARIA".into() });
        assert_eq!(name.to_string(), "ERIKSSON, ANNA MARIA");

        assert_eq!(
            details.get(PersonalDetailField::FullDateOfBirth).and_then(FieldValue::as_text),
            Some("19740812"),
        );
        assert_eq!(
            details.get(PersonalDetailField::PlaceOfBirth),
            Some(&FieldValue::Lines(vec!["ZENITH".into(), "UTOPIA".into()])),
        );
        assert_eq!(
            details.get(PersonalDetailField::Address).unwrap().to_string(),
            "123 MAPLE RD, ANYTOWN, UTOPIA",
        );
        assert!(details.get(PersonalDetailField::Telephone).is_none());
    }

    #[test]
    fn test_other_names_and_bcd_date() {
        let mut template = Vec::new();
        write_tlv(&mut template, Tag(0x02), &[0x02]);
        write_tlv(&mut template, Tag(0x5F0F), b"SMITH<<JOHN");
        write_tlv(&mut template, Tag(0x5F0F), b"DOE<<JANE");

        let mut inner = Vec::new();
        write_tlv(&mut inner, Tag(0x5C), &hex!("5F2B A0"));
        write_tlv(&mut inner, Tag(0x5F2B), &hex!("19740812"));
        write_tlv(&mut inner, Tag(0xA0), &template);
        write_tlv(&mut inner, Tag(0x5F99), b"ignored");
        let mut file = Vec::new();
        write_tlv(&mut file, Tag(0x6B), &inner);

        let details = parse(&file).unwrap();
        assert_eq!(
            details.get(PersonalDetailField::FullDateOfBirth).and_then(FieldValue::as_text),
            Some("19740812"),
        );
        let others = details.other_names();
        assert_eq!(others.len(), 2);
        assert_eq!(others[1].primary, "DOE");
        assert_eq!(others[1].secondary, "JANE");
    }

    #[test]
    fn test_malformed() {
        assert_eq!(parse(&dg11(&[])), Err(Error::NoFields));
        assert_eq!(parse(&hex!("75 00")), Err(Error::OuterTag { obtained: Tag(0x75) }));
        assert_eq!(parse(&dg11(&[(0x5F10, &[0xFF, 0xFE])])), Err(Error::NoFields));
        assert!(matches!(parse(&hex!("6B 05 5F0E 09 41")), Err(Error::Tlv(_))));
    }

    #[test]
    fn test_undecodable_field_is_skipped() {
        let details = parse(&dg11(&[
            (0x5F0E, b"ERIKSSON<<ANNA<MARIA"),
            (0x5F10, &[0xFF, 0xFE]),
            (0x5F12, b"+46 8 123 456"),
        ])).unwrap();
        assert_eq!(details.len(), 2);
        assert!(details.get(PersonalDetailField::PersonalNumber).is_none());
        assert_eq!(
            details.get(PersonalDetailField::Telephone).and_then(FieldValue::as_text),
            Some("+46 8 123 456"),
        );
        assert_eq!(details.tag_list().len(), 3);
    }
}
