//! Reading electronic Machine Readable Travel Documents (ICAO 9303) over Basic Access Control.


pub mod bac;
pub mod config;
pub mod crypt;
pub mod dg11;
pub mod dg2;
pub mod error;
pub mod files;
pub mod iso7816;
pub mod kdf;
pub mod mrz;
pub mod secure_messaging;
pub mod session;
pub mod tlv;


use std::fmt::Write;

pub use crate::config::ReaderConfig;
pub use crate::error::{Error, ErrorKind};
pub use crate::mrz::MrzIdentity;
pub use crate::session::{CancelToken, PassportReader, SessionEvent, SessionResult, Step};


/// Formats a buffer as a classic hex dump, sixteen bytes per line.
pub(crate) fn hexdump(buf: &[u8]) -> String {
    let mut out = String::new();
    for (line_index, line) in buf.chunks(16).enumerate() {
        let _ = write!(out, "{:08X}  ", line_index * 16);

        for i in 0..16 {
            match line.get(i) {
                Some(b) => { let _ = write!(out, " {:02X}", b); },
                None => out.push_str("   "),
            }
        }

        out.push_str(" |");
        for &b in line {
            if (b' '..=b'~').contains(&b) {
                out.push(char::from(b));
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");
    }
    out
}
