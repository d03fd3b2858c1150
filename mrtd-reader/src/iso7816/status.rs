//! Status words (ISO/IEC 7816-4 § 5.6).


use std::fmt;


#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusWord(u16);
impl StatusWord {
    pub const SUCCESS: Self = Self(0x9000);
    pub const END_OF_FILE: Self = Self(0x6282);
    pub const AUTHENTICATION_FAILED: Self = Self(0x6300);
    pub const WRONG_LENGTH: Self = Self(0x6700);
    pub const SECURITY_STATUS_NOT_SATISFIED: Self = Self(0x6982);
    pub const SM_DATA_OBJECTS_MISSING: Self = Self(0x6987);
    pub const SM_DATA_OBJECTS_INCORRECT: Self = Self(0x6988);
    pub const FILE_NOT_FOUND: Self = Self(0x6A82);
    pub const WRONG_PARAMETERS: Self = Self(0x6B00);
    pub const INSTRUCTION_NOT_SUPPORTED: Self = Self(0x6D00);

    pub const fn new(word: u16) -> Self {
        Self(word)
    }

    pub const fn to_word(self) -> u16 {
        self.0
    }

    pub const fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn sw2(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// `9000` or `61XX`.
    pub const fn is_success(self) -> bool {
        matches!(self.0, 0x9000 | 0x6100..=0x61FF)
    }

    /// The number of bytes still available if the status is `61XX`.
    pub const fn data_remaining(self) -> Option<usize> {
        match self.0 {
            0x6100..=0x61FF => Some((self.0 & 0xFF) as usize),
            _ => None,
        }
    }

    pub const fn is_warning(self) -> bool {
        matches!(self.0, 0x6200..=0x63FF)
    }

    /// Whether the card reports that the Secure Messaging data objects were missing or wrong.
    ///
    /// A card that returns one of these has usually dropped its session keys.
    pub const fn is_secure_messaging_error(self) -> bool {
        matches!(self.0, 0x6987 | 0x6988)
    }

    pub const fn description(self) -> &'static str {
        match self.0 {
            0x9000 => "success",
            0x6100..=0x61FF => "success, data remaining",
            0x6282 => "end of file reached before reading Le bytes",
            0x6200..=0x62FF => "non-modifying warning",
            0x6300 => "authentication failed",
            0x63C0..=0x63CF => "counter value",
            0x6300..=0x63FF => "modifying warning",
            0x6400..=0x66FF => "execution error",
            0x6700 => "wrong length",
            0x6982 => "security status not satisfied",
            0x6983 => "authentication method blocked",
            0x6985 => "conditions of use not satisfied",
            0x6986 => "command not allowed (no current EF)",
            0x6987 => "expected secure messaging data objects missing",
            0x6988 => "incorrect secure messaging data objects",
            0x6A82 => "file or application not found",
            0x6A86 => "incorrect parameters P1-P2",
            0x6B00 => "wrong parameters (offset outside the EF)",
            0x6C00..=0x6CFF => "wrong Le field",
            0x6D00 => "instruction not supported",
            0x6E00 => "class not supported",
            0x6700..=0x6FFF => "checking error",
            _ => "unknown status",
        }
    }
}
impl From<u16> for StatusWord {
    fn from(value: u16) -> Self { Self(value) }
}
impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord(0x{:04X})", self.0)
    }
}
impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.description())
    }
}
