//! Durable file moves for published artifacts and archival.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copy `source` into `<dir>/.<final_name>.<tag>.tmp` and fsync it.
/// The caller renames the temp file into place.
pub fn stage_durable_copy(source: &Path, dir: &Path, final_name: &str, tag: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let temp = dir.join(format!(".{}.{}.tmp", final_name, tag));
    if let Err(e) = copy_and_sync(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(temp)
}

fn copy_and_sync(source: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(source, dest)?;
    File::open(dest)?.sync_all()
}

/// Flush a directory entry change (rename) to disk. No-op where
/// directories cannot be opened.
pub fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Owner read/write only.
pub fn restrict_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
    }
}

/// Move a directory tree, copying across filesystems when rename fails.
///
/// A failed copy removes whatever it wrote, so the move can simply be
/// retried. Symlinks are recreated, not followed.
pub fn move_dir(source: &Path, dest: &Path) -> io::Result<()> {
    move_dir_with(source, dest, |from, to| fs::rename(from, to))
}

fn move_dir_with(
    source: &Path,
    dest: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", dest.display()),
        ));
    }
    let rename_err = match rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(
        source = %source.display(),
        dest = %dest.display(),
        "rename failed ({}); copying tree",
        rename_err
    );

    if let Err(e) = copy_tree(source, dest) {
        if let Err(cleanup) = fs::remove_dir_all(dest) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(dest = %dest.display(), "Partial copy not removed: {}", cleanup);
            }
        }
        return Err(e);
    }
    sync_dir(dest);

    // The copy is complete; a leftover source is only wasted space.
    if let Err(e) = fs::remove_dir_all(source) {
        warn!(source = %source.display(), "Copied tree left behind: {}", e);
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    // No portable symlink creation; keep the contents when they exist.
    match fs::metadata(link) {
        Ok(_) => fs::copy(link, target).map(|_| ()),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn staged_copy_is_hidden_and_complete() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("model.glb");
        fs::write(&source, b"glTF").unwrap();

        let dir = tmp.path().join("published");
        let temp = stage_durable_copy(&source, &dir, "s_r.glb", "abc").unwrap();
        assert_eq!(temp, dir.join(".s_r.glb.abc.tmp"));
        assert_eq!(fs::read(&temp).unwrap(), b"glTF");
    }

    #[test]
    fn move_dir_relocates_tree() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("models").join("run");
        fs::create_dir_all(source.join("output")).unwrap();
        fs::write(source.join("output").join("a.splat"), b"x").unwrap();

        let dest = tmp.path().join("archive").join("run");
        move_dir(&source, &dest).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(dest.join("output").join("a.splat")).unwrap(), b"x");
    }

    #[test]
    fn move_dir_refuses_to_clobber() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a");
        let dest = tmp.path().join("b");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        assert!(move_dir(&source, &dest).is_err());
        assert!(source.exists());
    }

    fn no_rename(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "Invalid cross-device link"))
    }

    #[cfg(unix)]
    #[test]
    fn copy_fallback_keeps_symlinks_as_links() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("models").join("r1");
        fs::create_dir_all(source.join("output")).unwrap();
        fs::write(source.join("output").join("a.splat"), b"splat").unwrap();
        std::os::unix::fs::symlink("missing/target", source.join("latest")).unwrap();

        let dest = tmp.path().join("archive").join("r1");
        move_dir_with(&source, &dest, no_rename).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(dest.join("output").join("a.splat")).unwrap(), b"splat");
        assert_eq!(
            fs::read_link(dest.join("latest")).unwrap(),
            PathBuf::from("missing/target")
        );
    }

    #[cfg(unix)]
    #[test]
    fn failed_copy_leaves_no_destination_and_can_be_retried() {
        use std::os::unix::net::UnixListener;

        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("models").join("r1");
        fs::create_dir_all(source.join("output")).unwrap();
        fs::write(source.join("output").join("a.glb"), b"glTF").unwrap();
        // Sockets cannot be copied, even by root.
        let socket = source.join("tool.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let dest = tmp.path().join("archive").join("r1");
        assert!(move_dir_with(&source, &dest, no_rename).is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read(source.join("output").join("a.glb")).unwrap(), b"glTF");

        drop(listener);
        fs::remove_file(&socket).unwrap();
        move_dir_with(&source, &dest, no_rename).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(dest.join("output").join("a.glb")).unwrap(), b"glTF");
    }

    #[cfg(unix)]
    #[test]
    fn restricted_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.bak");
        fs::write(&path, b"x").unwrap();
        restrict_permissions(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
