//! File system utilities.

use crate::Result;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Video extensions accepted into the library.
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "webm", "m4v", "mov", "avi", "flv"];

/// Create a directory and all parent directories.
pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Get file extension in lowercase.
pub fn get_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Check if a file is a video file based on extension.
pub fn is_video_file(path: &Path) -> bool {
    get_extension(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Sniff the first bytes of a file.
///
/// Returns the detected MIME type, or `None` when the content is not
/// recognised.
pub fn sniff_mime(path: &Path) -> Result<Option<&'static str>> {
    const BUFFER_SIZE: usize = 8192;

    let mut file = fs::File::open(path)?;
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let bytes_read = file.read(&mut buffer)?;
    buffer.truncate(bytes_read);

    Ok(infer::get(&buffer).map(|t| t.mime_type()))
}

/// Find a video file named `<stem>.<video ext>` in `dir`.
pub fn find_video_with_stem(dir: &Path, stem: &str) -> Option<PathBuf> {
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|p| p.is_file())
}

/// Move `from` to `to` so that `to` never holds a partial file.
///
/// Same filesystem: a plain rename. Across filesystems the data is copied to
/// a hidden temporary file beside `to`, synced, then renamed over `to`.
pub fn place_atomically(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    match fs::rename(from, to) {
        Ok(()) => {
            tracing::debug!("Moved (rename): {:?} -> {:?}", from, to);
            return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tracing::debug!("Cross-filesystem move detected, using copy+rename");
        }
        Err(e) => return Err(e.into()),
    }

    let file_name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = to.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4().simple()));

    let result = (|| -> Result<()> {
        let mut src = fs::File::open(from)?;
        let mut dst = fs::File::create(&temp)?;
        std::io::copy(&mut src, &mut dst)?;
        dst.flush()?;
        dst.sync_all()?;
        fs::rename(&temp, to)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
        return result;
    }

    fs::remove_file(from)?;
    tracing::debug!("Moved (copy+rename): {:?} -> {:?}", from, to);
    Ok(())
}
