use std::io;
use std::path::Path;

use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Creates a temporary file next to `path`, in a name that is never listed
/// as an entry.
fn temporary_sibling(path: &Path) -> io::Result<(tokio::fs::File, TempPath)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let (file, temp_path) = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(dir)?
        .into_parts();
    Ok((tokio::fs::File::from_std(file), temp_path))
}

/// Writes `bytes` to `path` through a temporary file renamed in place, so
/// readers never observe a partially written file.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let (mut file, temp_path) = temporary_sibling(path)?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    temp_path.persist(path).map_err(|e| e.error)
}

/// Copies `stream` verbatim into a temporary file next to `path`.
///
/// The returned [`TempPath`] is deleted when dropped; persist it once its
/// content has been validated.
pub(crate) async fn stage_stream<R: AsyncRead + Unpin + ?Sized>(
    path: &Path,
    stream: &mut R,
) -> io::Result<TempPath> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let (mut file, temp_path) = temporary_sibling(path)?;
    tokio::io::copy(stream, &mut file).await?;
    file.sync_all().await?;
    Ok(temp_path)
}
