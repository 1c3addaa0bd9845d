use std::fs::{self, File};
use std::io::{self, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::Path;

use fs2::FileExt;

/// Read the whole file under a shared lock.
pub(crate) fn read_locked(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    FileExt::lock_shared(&file)?;
    let mut data = String::new();
    let read = (&file).read_to_string(&mut data);
    FileExt::unlock(&file).ok();
    read.map(|_| data)
}

/// Replace the file's contents under an exclusive lock.
///
/// The file is truncated only once the lock is held, so a reader holding the
/// shared lock never sees it empty.
pub(crate) fn write_locked(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    FileExt::lock_exclusive(&file)?;
    let written = replace_contents(&file, contents);
    FileExt::unlock(&file)?;
    written
}

fn replace_contents(mut file: &File, contents: &[u8]) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(contents)?;
    file.flush()
}
