//! Encoding and decoding of SCP control lines.
//!
//! Every unit on the wire starts with one ASCII line:
//!
//! ```text
//! C<mode> <size> <name>\n     file follows, <size> raw bytes then 0x00
//! D<mode> 0 <name>\n          enter directory
//! E\n                         leave directory
//! T<mtime> 0 <atime> 0\n      times for the next C or D line
//! ```
//!
//! Modes are octal, everything else decimal. The codec does not interpret the
//! values; the engines decide what they mean for the filesystem.

use std::io::{self, Read};

use crate::error::{Error, Result};
use crate::protocol::{tag, MAX_LINE_LEN, MODE_MASK};

/// One decoded control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    File { mode: u32, size: u64, name: String },
    Dir { mode: u32, name: String },
    EndDir,
    Times { mtime: i64, atime: i64 },
}

impl Header {
    /// Exact wire bytes for this header, newline included
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Header::File { mode, size, name } => {
                format!("C{:04o} {} {}\n", mode & MODE_MASK, size, name)
            }
            Header::Dir { mode, name } => format!("D{:04o} 0 {}\n", mode & MODE_MASK, name),
            Header::EndDir => "E\n".to_string(),
            Header::Times { mtime, atime } => format!("T{} 0 {} 0\n", mtime, atime),
        }
        .into_bytes()
    }

    /// Parse a single control line with its trailing newline already removed
    pub fn decode(line: &[u8]) -> Result<Header> {
        let (&tag, rest) = line
            .split_first()
            .ok_or_else(|| syntax("empty header line"))?;
        let rest = std::str::from_utf8(rest).map_err(|_| syntax("header is not valid UTF-8"))?;

        match tag {
            tag::FILE => {
                let (mode, size, name) = parse_entry(rest)?;
                Ok(Header::File { mode, size, name })
            }
            tag::DIR => {
                // The size field of a directory line carries no meaning
                let (mode, _, name) = parse_entry(rest)?;
                Ok(Header::Dir { mode, name })
            }
            tag::END_DIR => {
                if !rest.is_empty() {
                    return Err(syntax(format!("trailing data after E: {:?}", rest)));
                }
                Ok(Header::EndDir)
            }
            tag::TIMES => parse_times(rest),
            other => Err(syntax(format!(
                "unrecognized header tag {:?}",
                char::from(other)
            ))),
        }
    }
}

fn syntax(msg: impl Into<String>) -> Error {
    Error::ProtocolSyntax(msg.into())
}

fn parse_entry(rest: &str) -> Result<(u32, u64, String)> {
    let (mode, rest) = rest
        .split_once(' ')
        .ok_or_else(|| syntax("missing size field"))?;
    let (size, name) = rest
        .split_once(' ')
        .ok_or_else(|| syntax("missing name field"))?;

    if !(4..=6).contains(&mode.len()) || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(syntax(format!("bad mode {:?}", mode)));
    }
    let mode = u32::from_str_radix(mode, 8).map_err(|_| syntax(format!("bad mode {:?}", mode)))?;
    let size = parse_decimal(size, "size")?;
    validate_name(name)?;

    Ok((mode, size, name.to_string()))
}

fn parse_times(rest: &str) -> Result<Header> {
    let fields: Vec<&str> = rest.split(' ').collect();
    if fields.len() != 4 {
        return Err(syntax(format!("bad time header {:?}", rest)));
    }
    let mtime = parse_decimal(fields[0], "mtime")?;
    let mtime_usec = parse_decimal(fields[1], "mtime microseconds")?;
    let atime = parse_decimal(fields[2], "atime")?;
    let atime_usec = parse_decimal(fields[3], "atime microseconds")?;
    if mtime_usec > 999_999 || atime_usec > 999_999 {
        return Err(syntax("microseconds out of range"));
    }
    let mtime = i64::try_from(mtime).map_err(|_| syntax("mtime out of range"))?;
    let atime = i64::try_from(atime).map_err(|_| syntax("atime out of range"))?;
    Ok(Header::Times { mtime, atime })
}

// str::parse would accept a leading '+', the wire format does not
fn parse_decimal(field: &str, what: &str) -> Result<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(syntax(format!("bad {} {:?}", what, field)));
    }
    field
        .parse()
        .map_err(|_| syntax(format!("{} out of range: {}", what, field)))
}

/// Reject names that would escape the current directory or break the line framing.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(syntax(format!("unexpected filename {:?}", name)));
    }
    if name.contains('/') || name.contains('\n') || name.contains('\0') {
        return Err(syntax(format!("unexpected filename {:?}", name)));
    }
    Ok(())
}

/// Read one '\n'-terminated line, one byte at a time.
///
/// Never consumes past the newline, so file bodies that follow stay intact.
/// Returns `None` when the stream ends before the first byte.
pub fn read_line<R: Read + ?Sized>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte) {
            Ok(0) if line.is_empty() => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed in the middle of a control line",
                )
                .into())
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if byte[0] == b'\n' {
            return Ok(Some(line));
        }
        if line.len() >= MAX_LINE_LEN {
            return Err(syntax(format!(
                "control line exceeds {} bytes",
                MAX_LINE_LEN
            )));
        }
        line.push(byte[0]);
    }
}
