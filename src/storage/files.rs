//! Durable file replacement.

use std::fs::Permissions;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::Builder;

/// Replaces `path` with `contents` in one step.
///
/// The bytes go to a uniquely named temporary file in the same directory,
/// are fsync'd, and the file is then renamed over `path`, so a reader sees
/// either the old contents or the new ones.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;
    // "pidfile" has an empty parent, meaning the working directory
    let directory = if directory.as_os_str().is_empty() {
        Path::new(".")
    } else {
        directory
    };

    let mut builder = Builder::new();
    builder
        .prefix(path.file_name().and_then(|name| name.to_str()).unwrap_or("btd"))
        .permissions(Permissions::from_mode(0o644));

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
