//! Shared protocol constants for the legacy SCP dialect

// Header tags (first byte of a control line)
pub mod tag {
    pub const FILE: u8 = b'C';
    pub const DIR: u8 = b'D';
    pub const END_DIR: u8 = b'E';
    pub const TIMES: u8 = b'T';
}

// Acknowledgment bytes.
// OK is a bare byte; WARNING and FATAL are followed by a message and '\n'.
pub mod ack {
    pub const OK: u8 = 0x00;
    pub const WARNING: u8 = 0x01;
    pub const FATAL: u8 = 0x02;
}

// Maximum control line length (64KB) - prevents memory exhaustion from a peer
// that never sends a newline
pub const MAX_LINE_LEN: usize = 64 * 1024;

// File bodies are streamed in pieces of this size
pub const CHUNK_SIZE: usize = 64 * 1024;

// Only permission, setuid/setgid and sticky bits travel on the wire
pub const MODE_MASK: u32 = 0o7777;

// Modes used when the local filesystem cannot report one
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;
