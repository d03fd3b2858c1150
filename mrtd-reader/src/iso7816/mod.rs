//! ISO/IEC 7816 command/response plumbing.


pub mod apdu;
pub mod card;
pub mod status;
