//! Error type for the DRI2/XFixes protocol client.

use thiserror::Error;

/// Errors produced while talking to the X server.
///
/// A reply that failed half-way has always been drained from the connection
/// by the time one of these is returned, so the next request on the same
/// [`Display`](crate::Display) starts on a clean packet boundary.
#[derive(Debug, Error)]
pub enum Dri2Error {
    /// Reading from or writing to the connection failed.
    #[error("I/O error on the X connection: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered the request with an error packet.
    #[error("X server error {code} (major {major_opcode}, minor {minor_opcode}, sequence {sequence})")]
    Server {
        code: u8,
        major_opcode: u8,
        minor_opcode: u16,
        sequence: u16,
    },

    /// The named extension is not present on this connection.
    #[error("the X server does not support the `{0}` extension")]
    ExtensionMissing(&'static str),

    /// A reply was shorter than its fixed layout or announced an impossible length.
    #[error("malformed reply to {request}: {reason}")]
    MalformedReply {
        request: &'static str,
        reason: String,
    },

    /// `DRI2Connect` returned an empty driver or device name.
    #[error("no DRI2 driver for window {window:#x} (driver name length {driver_len}, device name length {device_len})")]
    NoDriver {
        window: u32,
        driver_len: u32,
        device_len: u32,
    },

    /// The server refused the magic token.
    #[error("DRI2 authentication of window {window:#x} was refused")]
    NotAuthenticated { window: u32 },

    /// The encoded request does not fit the 16-bit length field.
    #[error("request of {0} bytes exceeds the maximum request length")]
    RequestTooLarge(usize),

    /// A thread panicked while holding the connection lock.
    #[error("the X connection lock is poisoned")]
    Poisoned,
}
