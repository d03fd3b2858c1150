//! The document data printed in the machine-readable zone (MRZ) that keys Basic Access Control.
//!
//! Three form factors are defined: TD1 (credit-card size, three lines of 30 characters), TD2
//! (two lines of 36 characters) and TD3 (passport, two lines of 44 characters). Only the fields
//! that go into the access key are extracted:
//! * the document number (nine characters, right-padded with `<`, or longer with TD1/TD2 when the
//!   check digit position holds `<` and the number continues in the optional data),
//! * the date of birth as YYMMDD,
//! * the date of expiry as YYMMDD,
//!
//! each followed by its check digit.
//!
//! The TD1 layout is:
//! ```plain
//! TTSSSNNNNNNNNNCOOOOOOOOOOOOOOO
//! BBBBBBDXEEEEEEFAAAPPPPPPPPPPPG
//! IIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! ```
//!
//! The TD2 layout is:
//! ```plain
//! TTSSSIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! NNNNNNNNNCAAABBBBBBDXEEEEEEFOOOOOOOG
//! ```
//!
//! The TD3 layout is:
//! ```plain
//! TTSSSIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII
//! NNNNNNNNNCAAABBBBBBDXEEEEEEFOOOOOOOOOOOOOOQG
//! ```


use std::fmt;
use std::str::FromStr;

use smallstr::SmallString;


/// Length of the document number field in the MRZ, excluding any TD1/TD2 overflow.
const DOCUMENT_NUMBER_FIELD_LENGTH: usize = 9;

/// Longest document number we accept (TD1 overflow into the optional data).
const MAX_DOCUMENT_NUMBER_LENGTH: usize = 22;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MrzField {
    DocumentNumber,
    DateOfBirth,
    DateOfExpiry,
}
impl fmt::Display for MrzField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentNumber => write!(f, "document number"),
            Self::DateOfBirth => write!(f, "date of birth"),
            Self::DateOfExpiry => write!(f, "date of expiry"),
        }
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, thiserror::Error)]
pub enum MrzError {
    #[error("{field} contains invalid character {character:?}")]
    InvalidCharacter { field: MrzField, character: char },

    #[error("{field} has length {obtained}, expected {expected}")]
    InvalidLength { field: MrzField, obtained: usize, expected: String },

    #[error("{field} is not a valid YYMMDD date")]
    InvalidDate { field: MrzField },

    #[error("check digit {obtained:?} of {field} is wrong, expected '{expected}'")]
    CheckDigitMismatch { field: MrzField, obtained: char, expected: u8 },

    #[error("machine-readable zone has {obtained} characters, which matches no known layout")]
    UnknownLayout { obtained: usize },
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Variant {
    Td1,
    Td2,
    Td3,
}
impl Variant {
    const fn from_total_length(length: usize) -> Option<Self> {
        match length {
            90 => Some(Self::Td1),
            72 => Some(Self::Td2),
            88 => Some(Self::Td3),
            _ => None,
        }
    }
}


/// The document number, date of birth and date of expiry with their check digits.
///
/// Every check digit has been verified at construction time.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MrzIdentity {
    document_number: SmallString<[u8; 24]>,
    document_number_check: u8,
    date_of_birth: SmallString<[u8; 6]>,
    date_of_birth_check: u8,
    date_of_expiry: SmallString<[u8; 6]>,
    date_of_expiry_check: u8,
}
impl MrzIdentity {
    /// Creates an identity from fields and check digits as printed.
    ///
    /// Document numbers shorter than nine characters are padded with `<`.
    pub fn new(
        document_number: &str,
        document_number_check: char,
        date_of_birth: &str,
        date_of_birth_check: char,
        date_of_expiry: &str,
        date_of_expiry_check: char,
    ) -> Result<Self, MrzError> {
        let document_number = normalize_document_number(document_number)?;
        validate_date(MrzField::DateOfBirth, date_of_birth)?;
        validate_date(MrzField::DateOfExpiry, date_of_expiry)?;

        let document_number_check = verify_check_digit(MrzField::DocumentNumber, &document_number, document_number_check)?;
        let date_of_birth_check = verify_check_digit(MrzField::DateOfBirth, date_of_birth, date_of_birth_check)?;
        let date_of_expiry_check = verify_check_digit(MrzField::DateOfExpiry, date_of_expiry, date_of_expiry_check)?;

        Ok(Self {
            document_number,
            document_number_check,
            date_of_birth: SmallString::from(date_of_birth),
            date_of_birth_check,
            date_of_expiry: SmallString::from(date_of_expiry),
            date_of_expiry_check,
        })
    }

    /// Creates an identity from fields alone, computing their check digits.
    pub fn from_fields(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self, MrzError> {
        let padded = normalize_document_number(document_number)?;
        let digit = |data: &str| char::from(b'0' + check_digit(data.as_bytes()));
        Self::new(
            &padded,
            digit(&padded),
            date_of_birth,
            digit(date_of_birth),
            date_of_expiry,
            digit(date_of_expiry),
        )
    }

    pub fn document_number(&self) -> &str { &self.document_number }
    pub fn document_number_check(&self) -> u8 { self.document_number_check }
    pub fn date_of_birth(&self) -> &str { &self.date_of_birth }
    pub fn date_of_birth_check(&self) -> u8 { self.date_of_birth_check }
    pub fn date_of_expiry(&self) -> &str { &self.date_of_expiry }
    pub fn date_of_expiry_check(&self) -> u8 { self.date_of_expiry_check }

    /// The string whose hash seeds the Basic Access Control keys.
    pub fn mrz_key(&self) -> String {
        let mut ret = String::with_capacity(MAX_DOCUMENT_NUMBER_LENGTH + 1 + 6 + 1 + 6 + 1);
        ret.push_str(&self.document_number);
        ret.push(char::from(b'0' + self.document_number_check));
        ret.push_str(&self.date_of_birth);
        ret.push(char::from(b'0' + self.date_of_birth_check));
        ret.push_str(&self.date_of_expiry);
        ret.push(char::from(b'0' + self.date_of_expiry_check));
        ret
    }
}
impl fmt::Debug for MrzIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the MRZ key is the access secret; don't leak it into logs
        f.debug_struct("MrzIdentity")
            .field("document_number", &"<redacted>")
            .finish_non_exhaustive()
    }
}
impl FromStr for MrzIdentity {
    type Err = MrzError;

    /// Parses the full text of a TD1, TD2 or TD3 machine-readable zone.
    ///
    /// Line breaks and other whitespace are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mrz: String = s.chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if let Some(bad) = mrz.chars().find(|c| !is_mrz_char(*c)) {
            return Err(MrzError::InvalidCharacter { field: MrzField::DocumentNumber, character: bad });
        }
        let variant = Variant::from_total_length(mrz.len())
            .ok_or(MrzError::UnknownLayout { obtained: mrz.len() })?;

        // (document number, its check digit, overflow area, birth, expiry) as offsets into the
        // concatenated zone
        let (number_at, overflow, birth_at, expiry_at) = match variant {
            Variant::Td1 => (5, 15..30, 30, 38),
            Variant::Td2 => (36, 64..71, 49, 57),
            Variant::Td3 => (44, 0..0, 57, 65),
        };
        let number_field = &mrz[number_at..number_at + DOCUMENT_NUMBER_FIELD_LENGTH];
        let number_check = char_at(&mrz, number_at + DOCUMENT_NUMBER_FIELD_LENGTH);

        let (document_number, document_number_check) = if number_check == '<' && !overflow.is_empty() {
            // the number continues in the optional data; its last character is the check digit
            let continued = mrz[overflow].split('<').next().unwrap_or("");
            let Some(check) = continued.chars().last() else {
                return Err(MrzError::InvalidLength {
                    field: MrzField::DocumentNumber,
                    obtained: DOCUMENT_NUMBER_FIELD_LENGTH,
                    expected: "a continuation in the optional data".to_owned(),
                });
            };
            let mut full = number_field.to_owned();
            full.push_str(&continued[..continued.len() - 1]);
            (full, check)
        } else {
            (number_field.to_owned(), number_check)
        };

        Self::new(
            &document_number,
            document_number_check,
            &mrz[birth_at..birth_at + 6],
            char_at(&mrz, birth_at + 6),
            &mrz[expiry_at..expiry_at + 6],
            char_at(&mrz, expiry_at + 6),
        )
    }
}


const fn is_mrz_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_uppercase() || c == '<'
}

fn char_at(s: &str, index: usize) -> char {
    char::from(s.as_bytes()[index])
}

fn normalize_document_number(document_number: &str) -> Result<SmallString<[u8; 24]>, MrzError> {
    if let Some(bad) = document_number.chars().find(|c| !is_mrz_char(*c)) {
        return Err(MrzError::InvalidCharacter { field: MrzField::DocumentNumber, character: bad });
    }
    let trimmed_length = document_number.trim_end_matches('<').len();
    if trimmed_length == 0 || document_number.len() > MAX_DOCUMENT_NUMBER_LENGTH {
        return Err(MrzError::InvalidLength {
            field: MrzField::DocumentNumber,
            obtained: document_number.len(),
            expected: format!("1 to {}", MAX_DOCUMENT_NUMBER_LENGTH),
        });
    }

    let mut ret = SmallString::from(document_number);
    while ret.len() < DOCUMENT_NUMBER_FIELD_LENGTH {
        ret.push('<');
    }
    Ok(ret)
}

fn validate_date(field: MrzField, date: &str) -> Result<(), MrzError> {
    if date.len() != 6 {
        return Err(MrzError::InvalidLength { field, obtained: date.len(), expected: "6".to_owned() });
    }
    if let Some(bad) = date.chars().find(|c| !c.is_ascii_digit()) {
        return Err(MrzError::InvalidCharacter { field, character: bad });
    }
    let month: u8 = date[2..4].parse().map_err(|_| MrzError::InvalidDate { field })?;
    let day: u8 = date[4..6].parse().map_err(|_| MrzError::InvalidDate { field })?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(MrzError::InvalidDate { field });
    }
    Ok(())
}

fn verify_check_digit(field: MrzField, data: &str, obtained: char) -> Result<u8, MrzError> {
    let expected = check_digit(data.as_bytes());
    match obtained.to_digit(10) {
        Some(d) if d == u32::from(expected) => Ok(expected),
        _ => Err(MrzError::CheckDigitMismatch { field, obtained, expected }),
    }
}

/// Computes the ICAO 9303 check digit (weights 7, 3, 1 repeating; modulo 10).
pub fn check_digit(data: &[u8]) -> u8 {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let sum: u32 = data.iter()
        .zip(WEIGHTS.iter().cycle())
        .map(|(b, weight)| {
            let value = match b {
                b'0'..=b'9' => u32::from(b - b'0'),
                b'A'..=b'Z' => u32::from(b - b'A') + 10,
                // '<' counts as zero but still consumes a weight
                _ => 0,
            };
            value * weight
        })
        .sum();
    (sum % 10) as u8
}
