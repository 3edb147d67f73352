use async_walkdir::WalkDir;
use derive_more::{Display, From};
use futures::StreamExt;
use log::debug;
use std::fs::{FileTimes, Metadata, Permissions};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{
    copy, create_dir_all, read_link, remove_dir_all, remove_file, set_permissions,
    symlink_metadata, File,
};

#[derive(Debug, From, Display)]
pub enum CopyError {
    #[from(ignore)]
    #[display(fmt = "Fixture directory doesn't exist: {}", "_0.display()")]
    MissingSource(PathBuf),
    #[display(fmt = "IO Error occurred while copying fixture: {}", _0)]
    IO(io::Error),
}

pub type CopyResult<T> = Result<T, CopyError>;

/// Safely creates a directory ensuring that if a non directory
/// exists at the path its removed and the directory is created
pub async fn create_directory(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    match symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => {
            remove_file(path).await?;
            create_dir_all(path).await
        }
        Err(_) => create_dir_all(path).await,
    }
}

/// Removes any existing file, link or directory at the provided
/// path. Dangling symlinks are removed as well
pub async fn remove_existing(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    if let Ok(metadata) = symlink_metadata(path).await {
        if metadata.is_dir() {
            remove_dir_all(path).await?;
        } else {
            remove_file(path).await?;
        }
    }
    Ok(())
}

/// Recursively copies the contents of `src` into `dst` keeping hidden
/// entries, permissions, timestamps and symlinks. Entries already present
/// at the destination are replaced so copying twice produces the same tree.
/// The attributes of `dst` itself are left as they are.
///
/// Returns the number of regular files that were copied
pub async fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> CopyResult<usize> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if !src.is_dir() {
        return Err(CopyError::MissingSource(src.to_path_buf()));
    }
    create_directory(dst).await?;

    let mut directories: Vec<(PathBuf, Metadata)> = Vec::new();
    let mut copied = 0;

    let mut entries = WalkDir::new(src);
    while let Some(entry) = entries.next().await {
        let path = entry?.path();
        let Ok(relative) = path.strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let metadata = symlink_metadata(&path).await?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            create_directory(&target).await?;
            // A read-only directory from an earlier copy has to accept new
            // entries, its mode is restored once the walk is done
            let current = symlink_metadata(&target).await?.permissions();
            set_permissions(&target, owner_writable(current)).await?;
            directories.push((target, metadata));
        } else if file_type.is_symlink() {
            copy_symlink(&path, &target).await?;
        } else {
            copy_file(&path, &target, &metadata).await?;
            copied += 1;
        }
    }

    // Parents are walked before their children, finish the deepest first
    for (path, metadata) in directories.iter().rev() {
        apply_times(path, metadata).await?;
        set_permissions(path, metadata.permissions()).await?;
    }

    debug!(
        "Copied {copied} files and {} directories from {src:?} to {dst:?}",
        directories.len()
    );
    Ok(copied)
}

/// Copies a single regular file replacing whatever is at the target.
/// Permission bits are carried over by the copy itself
async fn copy_file(src: &Path, dst: &Path, metadata: &Metadata) -> io::Result<()> {
    remove_existing(dst).await?;
    if let Some(parent) = dst.parent() {
        create_dir_all(parent).await?;
    }
    copy(src, dst).await?;
    apply_times(dst, metadata).await
}

async fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    remove_existing(dst).await?;
    let link = read_link(src).await?;

    #[cfg(unix)]
    tokio::fs::symlink(&link, dst).await?;

    #[cfg(windows)]
    {
        if tokio::fs::metadata(src).await.map(|m| m.is_dir()).unwrap_or(false) {
            tokio::fs::symlink_dir(&link, dst).await?;
        } else {
            tokio::fs::symlink_file(&link, dst).await?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn owner_writable(permissions: Permissions) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    Permissions::from_mode(permissions.mode() | 0o700)
}

#[cfg(not(unix))]
fn owner_writable(mut permissions: Permissions) -> Permissions {
    permissions.set_readonly(false);
    permissions
}

/// Sets the access and modification times of `path` to those of the
/// source metadata
async fn apply_times(path: &Path, metadata: &Metadata) -> io::Result<()> {
    let times = FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?);
    let file = File::open(path).await?.into_std().await;
    file.set_times(times)
}
