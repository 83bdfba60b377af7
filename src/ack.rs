//! Acknowledgment handshake.
//!
//! Every unit is confirmed by a single status byte from the receiving side.
//! These helpers are the only place where that byte is written or read; they
//! do no buffering of their own, so each call maps to exactly one byte (plus
//! the message line for warnings and fatal errors).

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::protocol::ack;
use crate::wire::read_line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

impl Severity {
    fn byte(self) -> u8 {
        match self {
            Severity::Warning => ack::WARNING,
            Severity::Fatal => ack::FATAL,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Severity> {
        match b {
            ack::WARNING => Some(Severity::Warning),
            ack::FATAL => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal error"),
        }
    }
}

pub fn send_ok<W: Write + ?Sized>(w: &mut W) -> Result<()> {
    w.write_all(&[ack::OK])?;
    w.flush()?;
    Ok(())
}

/// Send a warning or fatal acknowledgment carrying `message`.
pub fn send_error<W: Write + ?Sized>(w: &mut W, severity: Severity, message: &str) -> Result<()> {
    // The message is line framed, so it must not contain a newline itself
    let message = message.replace('\n', " ");
    let mut buf = Vec::with_capacity(message.len() + 2);
    buf.push(severity.byte());
    buf.extend_from_slice(message.as_bytes());
    buf.push(b'\n');
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Block for one acknowledgment byte.
///
/// Both warning and fatal replies are returned as [`Error::Peer`]; continuing
/// after either risks writing past a point the peer has already abandoned.
pub fn read_ack<R: Read + ?Sized>(r: &mut R) -> Result<()> {
    let mut byte = [0u8; 1];
    match r.read_exact(&mut byte) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed while waiting for acknowledgment",
            )
            .into())
        }
        Err(e) => return Err(e.into()),
    }
    match byte[0] {
        ack::OK => Ok(()),
        b => match Severity::from_byte(b) {
            Some(severity) => Err(read_peer_error(r, severity)?),
            None => Err(Error::ProtocolSyntax(format!(
                "unexpected acknowledgment byte {:#04x}",
                b
            ))),
        },
    }
}

/// Read the message that follows a warning/fatal byte and turn it into an error.
pub(crate) fn read_peer_error<R: Read + ?Sized>(r: &mut R, severity: Severity) -> Result<Error> {
    let line = read_line(r)?.unwrap_or_default();
    Ok(Error::Peer {
        severity,
        message: String::from_utf8_lossy(&line).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_send_ok_is_one_zero_byte() {
        let mut out = Vec::new();
        send_ok(&mut out).unwrap();
        assert_eq!(out, [0u8]);
    }

    #[test]
    fn test_send_error_frames_message() {
        let mut out = Vec::new();
        send_error(&mut out, Severity::Fatal, "scp: disk\nfull").unwrap();
        assert_eq!(out, b"\x02scp: disk full\n");

        let mut out = Vec::new();
        send_error(&mut out, Severity::Warning, "skipped").unwrap();
        assert_eq!(out, b"\x01skipped\n");
    }

    #[test]
    fn test_read_ack_ok_consumes_one_byte() {
        let mut input = Cursor::new(vec![0u8, b'C']);
        read_ack(&mut input).unwrap();
        assert_eq!(input.position(), 1);
    }

    #[test]
    fn test_read_ack_peer_errors() {
        let mut input = Cursor::new(b"\x01scp: no such file\n".to_vec());
        match read_ack(&mut input) {
            Err(Error::Peer { severity, message }) => {
                assert_eq!(severity, Severity::Warning);
                assert_eq!(message, "scp: no such file");
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut input = Cursor::new(b"\x02permission denied\n".to_vec());
        assert!(matches!(
            read_ack(&mut input),
            Err(Error::Peer {
                severity: Severity::Fatal,
                ..
            })
        ));
    }

    #[test]
    fn test_read_ack_garbage_and_eof() {
        let mut input = Cursor::new(b"C".to_vec());
        assert!(matches!(
            read_ack(&mut input),
            Err(Error::ProtocolSyntax(_))
        ));

        let mut input = Cursor::new(Vec::new());
        assert!(matches!(read_ack(&mut input), Err(Error::Io(_))));
    }
}
