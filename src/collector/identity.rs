//! Identity parsing for Lustre device directory names.
//!
//! Device directories encode the filesystem and, for targets, the server:
//!
//! ```text
//! testfs-OST0000-osc-ffff9dec70092000   server form: fs=testfs id=OST0000 idx=0
//! testfs-OST0003                        server form: fs=testfs id=OST0003 idx=3
//! testfs-ffff9dec70092000               flat form:   fs=testfs
//! ```

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unparsable name '{0}'")]
    UnparsableName(String),
}

/// Structured identity derived from a directory entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    pub fs_name: String,
    pub server_idx: Option<u32>,
    pub server_id: Option<String>,
}

impl Identity {
    /// Identity of a single-source sampler, which has no filesystem.
    pub fn single_source() -> Self {
        Self {
            fs_name: String::new(),
            server_idx: None,
            server_id: None,
        }
    }
}

/// Parses the server form `<fs>-<TAG><index>[-...]`.
///
/// The tag is exactly three ASCII letters and the index a run of decimal
/// digits, terminated by `-` or by the end of the name.
pub fn parse_server_name(name: &str) -> Result<Identity, IdentityError> {
    let fail = || IdentityError::UnparsableName(name.to_string());

    let (fs_name, rest) = name.split_once('-').ok_or_else(fail)?;
    if fs_name.is_empty() {
        return Err(fail());
    }

    let bytes = rest.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_alphabetic) {
        return Err(fail());
    }
    let digits = bytes[3..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(fail());
    }
    let end = 3 + digits;
    if end < bytes.len() && bytes[end] != b'-' {
        return Err(fail());
    }

    let server_idx = rest[3..end].parse::<u32>().map_err(|_| fail())?;
    Ok(Identity {
        fs_name: fs_name.to_string(),
        server_idx: Some(server_idx),
        server_id: Some(rest[..end].to_string()),
    })
}

/// Parses the flat form: everything before the first `-`, or the whole name.
pub fn parse_fs_name(name: &str) -> Identity {
    let fs_name = name.split_once('-').map_or(name, |(fs, _)| fs);
    Identity {
        fs_name: fs_name.to_string(),
        server_idx: None,
        server_id: None,
    }
}
