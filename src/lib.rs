//! rscp library
//!
//! Legacy SCP wire protocol engine: acts as the source (`scp -f`) or the sink
//! (`scp -t`) over any blocking byte stream, such as an SSH exec channel.
//!
//! ```no_run
//! use rscp::{Config, Engine};
//! # fn run(channel: &mut std::net::TcpStream) -> rscp::Result<()> {
//! let mut engine = Engine::new(Config {
//!     sink: true,
//!     target: "/srv/incoming/".into(),
//!     recursive: true,
//!     ..Default::default()
//! })?;
//! let stats = engine.serve(channel)?;
//! println!("received {} files", stats.files);
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod cli;
pub mod command;
pub mod error;
pub mod fs;
pub mod log;
pub mod logger;
pub mod protocol;
pub mod sink;
pub mod source;
pub mod wire;

pub use command::{Config, Engine, Role, TransferStats};
pub use error::{Error, Result};
