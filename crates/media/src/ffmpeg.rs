//! ffmpeg wrapper operations.
//!
//! Each operation mounts only the file's parent directory into the sandbox
//! and fails on any non-zero exit code, surfacing ffmpeg's stderr.

use std::path::{Path, PathBuf};

use pelago_common::{AppError, AppResult};

use crate::sandbox::{SandboxArgs, SandboxPool, SandboxRuntime};

/// Strip all metadata from the file in place.
pub async fn clear_metadata<R: SandboxRuntime>(
    pool: &SandboxPool<R>,
    filepath: &Path,
) -> AppResult<()> {
    let dirpath = parent_dir(filepath)?;
    let ext = filepath
        .extension()
        .map_or_else(|| "bin".to_string(), |e| e.to_string_lossy().into_owned());
    let outpath = append_suffix(filepath, &format!("_cleaned.{ext}"));

    ffmpeg(
        pool,
        dirpath,
        &[
            "-loglevel",
            "error",
            "-i",
            &filepath.to_string_lossy(),
            "-map_metadata",
            "-1",
            "-codec",
            "copy",
            &outpath.to_string_lossy(),
        ],
    )
    .await?;

    // Move the cleaned output over the original.
    tokio::fs::rename(&outpath, filepath)
        .await
        .map_err(|e| AppError::Media(format!("renaming {}: {e}", outpath.display())))?;

    Ok(())
}

/// Generate a JPEG thumbnail next to the file, returning its path.
pub async fn generate_thumb<R: SandboxRuntime>(
    pool: &SandboxPool<R>,
    filepath: &Path,
    width: u32,
    height: u32,
) -> AppResult<PathBuf> {
    let dirpath = parent_dir(filepath)?;
    let outpath = append_suffix(filepath, "_thumb.jpg");
    let scale = format!("scale={width}:{height}");

    ffmpeg(
        pool,
        dirpath,
        &[
            "-loglevel",
            "error",
            "-i",
            &filepath.to_string_lossy(),
            "-filter:v",
            "thumbnail=n=10",
            "-filter:v",
            &scale,
            "-qscale:v",
            "12", // ~ 70% quality
            "-frames:v",
            "1",
            &outpath.to_string_lossy(),
        ],
    )
    .await?;

    Ok(outpath)
}

/// Extract a single static PNG frame, returning its path.
pub async fn generate_static<R: SandboxRuntime>(
    pool: &SandboxPool<R>,
    filepath: &Path,
) -> AppResult<PathBuf> {
    let dirpath = parent_dir(filepath)?;
    let outpath = append_suffix(filepath, "_static.png");

    ffmpeg(
        pool,
        dirpath,
        &[
            "-loglevel",
            "error",
            "-i",
            &filepath.to_string_lossy(),
            "-codec:v",
            "png", // specifically NOT 'apng'
            "-frames:v",
            "1", // in case animated, only take 1 frame
            &outpath.to_string_lossy(),
        ],
    )
    .await?;

    Ok(outpath)
}

/// Run `ffmpeg [args...]` with the directory mounted in the sandbox.
async fn ffmpeg<R: SandboxRuntime>(
    pool: &SandboxPool<R>,
    dirpath: &Path,
    args: &[&str],
) -> AppResult<()> {
    let output = pool
        .run(SandboxArgs {
            args: args.iter().map(|s| (*s).to_string()).collect(),
            stdin: None,
            env: Vec::new(),
            mount_dir: Some(dirpath.to_path_buf()),
            read_only_mount: false,
        })
        .await?;

    if output.exit_code != 0 {
        return Err(AppError::Media(format!(
            "non-zero return code {} ({})",
            output.exit_code,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn parent_dir(filepath: &Path) -> AppResult<&Path> {
    filepath
        .parent()
        .ok_or_else(|| AppError::Media(format!("{} has no parent directory", filepath.display())))
}

fn append_suffix(filepath: &Path, suffix: &str) -> PathBuf {
    let mut out = filepath.as_os_str().to_owned();
    out.push(suffix);
    PathBuf::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_suffix() {
        let path = Path::new("/work/abc.mp4");

        assert_eq!(
            append_suffix(path, "_thumb.jpg"),
            PathBuf::from("/work/abc.mp4_thumb.jpg")
        );
    }

    #[test]
    fn test_parent_dir() {
        assert!(parent_dir(Path::new("/work/abc.mp4")).is_ok());
        assert!(parent_dir(Path::new("/")).is_err());
    }
}
