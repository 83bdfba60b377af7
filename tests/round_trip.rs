#![cfg(unix)]

use anyhow::Result;
use rscp::wire::{read_line, Header};
use rscp::{Config, Engine, Error, Role, TransferStats};
use std::io::{self, Cursor, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn source(target: &Path, recursive: bool) -> Config {
    Config {
        source: true,
        target: target.to_path_buf(),
        recursive,
        ..Default::default()
    }
}

fn sink(target: &Path, recursive: bool) -> Config {
    Config {
        sink: true,
        target: target.to_path_buf(),
        recursive,
        ..Default::default()
    }
}

/// Copies every byte written through it, so the session can be inspected afterwards
struct Recorder {
    inner: UnixStream,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Read for Recorder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for Recorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.lock().unwrap().extend_from_slice(&buf[..n]);
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct Session {
    source: rscp::Result<TransferStats>,
    sink: rscp::Result<TransferStats>,
    source_bytes: Vec<u8>,
    sink_bytes: Vec<u8>,
}

/// Run both engines on their own threads over a socket pair and wait for both.
fn transfer(source: Config, sink: Config) -> Session {
    let (a, b) = UnixStream::pair().unwrap();
    let source_bytes = Arc::new(Mutex::new(Vec::new()));
    let sink_bytes = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();

    for (config, inner, written) in [
        (source, a, source_bytes.clone()),
        (sink, b, sink_bytes.clone()),
    ] {
        let tx = tx.clone();
        thread::spawn(move || {
            let mut engine = Engine::new(config).unwrap();
            let role = engine.role();
            let mut stream = Recorder { inner, written };
            let result = engine.serve(&mut stream);
            // Closing our end is what tells the peer we are finished
            drop(stream);
            tx.send((role, result)).unwrap();
        });
    }

    let mut source_result = None;
    let mut sink_result = None;
    for _ in 0..2 {
        let (role, result) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("timeout waiting for session");
        match role {
            Role::Source => source_result = Some(result),
            Role::Sink => sink_result = Some(result),
        }
    }

    let source_bytes = source_bytes.lock().unwrap().clone();
    let sink_bytes = sink_bytes.lock().unwrap().clone();
    Session {
        source: source_result.unwrap(),
        sink: sink_result.unwrap(),
        source_bytes,
        sink_bytes,
    }
}

/// Walk the source's side of a session and return the directory depth after
/// every header, failing if it ever goes below zero.
fn depth_trace(bytes: &[u8]) -> Vec<i64> {
    let mut cursor = Cursor::new(bytes.to_vec());
    let mut depth = 0i64;
    let mut trace = Vec::new();
    while let Some(line) = read_line(&mut cursor).unwrap() {
        match Header::decode(&line).unwrap() {
            Header::Dir { .. } => depth += 1,
            Header::EndDir => depth -= 1,
            Header::File { size, .. } => {
                // body plus end-of-file marker
                cursor.set_position(cursor.position() + size + 1);
            }
            Header::Times { .. } => {}
        }
        assert!(depth >= 0, "directory end without a start");
        trace.push(depth);
    }
    trace
}

#[test]
fn send_single_file() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let target = src.path().join("target");
    write_file(&target, b"hello, send file!")?;

    let session = transfer(source(&target, false), sink(out.path(), false));
    let stats = session.source?;
    session.sink?;

    assert_eq!(std::fs::read(out.path().join("target"))?, b"hello, send file!");
    assert_eq!(stats.files, 1);
    // ready, header, body
    assert_eq!(session.sink_bytes, vec![0u8; 3]);
    Ok(())
}

#[test]
fn receive_into_trailing_separator() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let file = src.path().join("target");
    write_file(&file, b"hello, file contents!")?;

    let dest = PathBuf::from(format!("{}/", out.path().display()));
    let session = transfer(source(&file, false), sink(&dest, false));
    session.source?;
    session.sink?;

    assert_eq!(std::fs::read(out.path().join("target"))?, b"hello, file contents!");
    Ok(())
}

#[test]
fn send_nested_directories() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let root = src.path();
    write_file(&root.join("target_dir").join("target1"), b"file 1")?;
    write_file(&root.join("target2"), b"file 2")?;

    let session = transfer(source(root, true), sink(out.path(), true));
    let sent = session.source?;
    let received = session.sink?;
    assert_eq!(sent, received);
    assert_eq!(received.files, 2);
    assert_eq!(received.dirs, 2);

    let name = root.file_name().unwrap();
    let copy = out.path().join(name);
    assert_eq!(std::fs::read(copy.join("target_dir").join("target1"))?, b"file 1");
    assert_eq!(std::fs::read(copy.join("target2"))?, b"file 2");

    let trace = depth_trace(&session.source_bytes);
    assert_eq!(trace.last(), Some(&0));
    // One OK per header and per body, plus the readiness ack
    assert_eq!(session.sink_bytes, vec![0u8; 1 + 2 * 2 + 2 * 2]);
    Ok(())
}

#[test]
fn deep_tree_stays_balanced() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let mut deepest = src.path().join("tree");
    for _ in 0..100 {
        deepest.push("d");
    }
    write_file(&deepest.join("leaf"), b"bottom")?;

    let session = transfer(source(&src.path().join("tree"), true), sink(out.path(), true));
    session.source?;
    let stats = session.sink?;
    assert_eq!(stats.dirs, 101);

    let copied = deepest.strip_prefix(src.path())?;
    assert_eq!(std::fs::read(out.path().join(copied).join("leaf"))?, b"bottom");

    let trace = depth_trace(&session.source_bytes);
    assert_eq!(trace.iter().max(), Some(&101));
    assert_eq!(trace.last(), Some(&0));
    Ok(())
}

#[test]
fn preserve_times_round_trip() -> Result<()> {
    use filetime::{set_file_times, FileTime};

    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let root = src.path().join("stamped");
    write_file(&root.join("old.txt"), b"from the past")?;
    set_file_times(
        root.join("old.txt"),
        FileTime::from_unix_time(1_300_000_100, 0),
        FileTime::from_unix_time(1_300_000_000, 0),
    )?;

    let mut config = source(&root, true);
    config.preserve_times = true;
    let session = transfer(config, sink(out.path(), true));
    session.source?;
    session.sink?;

    let meta = std::fs::metadata(out.path().join("stamped").join("old.txt"))?;
    assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 1_300_000_000);
    Ok(())
}

#[test]
fn non_recursive_source_rejects_directory() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_file(&src.path().join("inner"), b"x")?;

    let session = transfer(source(src.path(), false), sink(out.path(), true));
    assert!(matches!(session.source, Err(Error::RecursionDisabled { .. })));
    assert!(matches!(session.sink, Err(Error::Peer { .. })));
    assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
    Ok(())
}

#[test]
fn non_recursive_sink_rejects_directory() -> Result<()> {
    let src = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_file(&src.path().join("inner"), b"x")?;

    let session = transfer(source(src.path(), true), sink(out.path(), false));
    assert!(matches!(session.sink, Err(Error::RecursionDisabled { .. })));
    assert!(matches!(session.source, Err(Error::Peer { .. })));
    assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
    Ok(())
}

#[test]
fn closed_stream_fails_instead_of_hanging() -> Result<()> {
    let out = tempfile::tempdir()?;
    let (mut peer, b) = UnixStream::pair()?;
    let dest = out.path().to_path_buf();

    let handle = thread::spawn(move || {
        let mut engine = Engine::new(sink(&dest, false)).unwrap();
        let mut stream = b;
        engine.serve(&mut stream)
    });

    let mut ready = [0u8; 1];
    peer.read_exact(&mut ready)?;
    peer.write_all(b"C0644 10 partial\n")?;
    // Header accepted, file created
    let mut header_ack = [0u8; 1];
    peer.read_exact(&mut header_ack)?;
    assert_eq!(header_ack, [0]);
    peer.write_all(b"abc")?;
    drop(peer);

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(Error::Desync(_))));
    assert!(!out.path().join("partial").exists());
    Ok(())
}
