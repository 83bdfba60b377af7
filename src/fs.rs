use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use walkdir::WalkDir;

use crate::protocol::MODE_MASK;
// Filesystem capability consumed by the engines (local implementation is Unix focused)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    /// Sockets, fifos, devices: nothing the wire format can carry
    Other,
}

/// What the engines need to know about a path
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub kind: FileKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub atime: i64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

pub trait FileSystem: Send + Sync {
    /// Follows symbolic links.
    fn stat(&self, path: &Path) -> io::Result<FileInfo>;
    /// Names directly under `dir`, sorted by name.
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<OsString>>;
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    /// Create or truncate; `mode` applies when the file is created.
    fn open_write(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>>;
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn set_times(&self, path: &Path, atime: i64, mtime: i64) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The process' own filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::metadata(path)?;
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else if meta.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };
        Ok(FileInfo {
            kind,
            size: if kind == FileKind::File { meta.len() } else { 0 },
            mode: mode_of(&meta, kind),
            mtime: FileTime::from_last_modification_time(&meta).unix_seconds(),
            atime: FileTime::from_last_access_time(&meta).unix_seconds(),
        })
    }

    fn list_entries(&self, dir: &Path) -> io::Result<Vec<OsString>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            names.push(entry.file_name().to_os_string());
        }
        Ok(names)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn open_write(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode & MODE_MASK);
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(Box::new(opts.open(path)?))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode & MODE_MASK);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path)
    }

    #[cfg(unix)]
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & MODE_MASK))
    }

    #[cfg(not(unix))]
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, perms)
    }

    fn set_times(&self, path: &Path, atime: i64, mtime: i64) -> io::Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_unix_time(atime, 0),
            FileTime::from_unix_time(mtime, 0),
        )
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata, _kind: FileKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & MODE_MASK
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata, kind: FileKind) -> u32 {
    use crate::protocol::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
    let mode = if kind == FileKind::Directory {
        DEFAULT_DIR_MODE
    } else {
        DEFAULT_FILE_MODE
    };
    if meta.permissions().readonly() {
        mode & !0o222
    } else {
        mode
    }
}
