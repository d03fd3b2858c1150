//! Reader configuration.


use crate::files::DEFAULT_MAX_READ_LENGTH;
use crate::secure_messaging::SecureMessagingProfile;


/// Settings for a reading session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ReaderConfig {
    /// The largest number of bytes requested by a single READ BINARY.
    pub max_read_length: u8,

    /// The Secure Messaging variant spoken by the chip.
    pub secure_messaging: SecureMessagingProfile,

    /// Leave a data group unset instead of failing if the chip does not have it.
    pub skip_missing_files: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_read_length: DEFAULT_MAX_READ_LENGTH,
            secure_messaging: SecureMessagingProfile::default(),
            skip_missing_files: false,
        }
    }
}

impl ReaderConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the READ BINARY chunk size; zero is treated as one.
    pub const fn with_max_read_length(mut self, length: u8) -> Self {
        self.max_read_length = if length == 0 { 1 } else { length };
        self
    }

    pub const fn with_secure_messaging(mut self, profile: SecureMessagingProfile) -> Self {
        self.secure_messaging = profile;
        self
    }

    pub const fn with_skip_missing_files(mut self, skip: bool) -> Self {
        self.skip_missing_files = skip;
        self
    }
}
