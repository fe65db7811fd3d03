//! Operation workers run by transfer tasks
//!
//! Every remote read or write is preceded by [`TaskControl::checkpoint`], and
//! every local write by a cancellation check, so a cancelled task moves no
//! further bytes once the worker observes it.

use super::task::{PartialTarget, Stop, TaskControl, TransferRequest};
use crate::client::tree::{join_path, normalize_path};
use crate::client::{RemoteFile, TreeHandle};
use crate::error::{Error, ErrorCode, Result, SmbError};
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// First retry delay; doubled on each further attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Ceiling for the retry backoff
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

type Step<T> = std::result::Result<T, Stop>;

/// Run `request` to completion, returning the bytes (or items) moved
pub(crate) async fn execute(control: &TaskControl, tree: &TreeHandle, request: &TransferRequest) -> Step<u64> {
    let fallback = request.failure_code();
    match request {
        TransferRequest::Download { remote, local, resume } => {
            download_file(control, tree, remote, local, *resume, fallback).await
        }
        TransferRequest::DownloadDirectory { remote, local } => {
            download_directory(control, tree, remote, local, fallback).await
        }
        TransferRequest::Upload { local, remote, offset } => {
            upload(control, tree, local, remote, *offset).await
        }
        TransferRequest::Delete { remote } => delete(control, tree, remote).await,
        TransferRequest::CreateDirectory { remote } => {
            control.checkpoint().await?;
            tree.create_directory(remote).await?;
            control.set_progress(1, None);
            Ok(1)
        }
        TransferRequest::Move { from, to } => {
            control.checkpoint().await?;
            tree.rename(from, to, false).await?;
            control.set_progress(1, None);
            Ok(1)
        }
    }
}

fn failed(fallback: ErrorCode) -> impl FnOnce(Error) -> Stop {
    move |e| Stop::Failed(e.into_smb_error(fallback))
}

fn local_failure(fallback: ErrorCode, path: &Path) -> impl FnOnce(io::Error) -> Stop + '_ {
    move |e| {
        let code = match e.kind() {
            io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            _ => fallback,
        };
        Stop::Failed(SmbError::with_detail(code, format!("{}: {}", path.display(), e)))
    }
}

/// Run `op`, retrying transient server statuses with exponential backoff.
/// Cancellation is honored between attempts.
async fn with_retry<T, F, Fut>(control: &TaskControl, fallback: ErrorCode, mut op: F) -> Step<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < control.max_retries() => {
                attempt += 1;
                let delay = retry_delay(attempt);
                warn!("Transient failure ({}), retry {} in {:?}", e, attempt, delay);
                tokio::time::sleep(delay).await;
                control.checkpoint().await?;
            }
            Err(e) => return Err(failed(fallback)(e)),
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    RETRY_BASE_DELAY
        .checked_mul(factor)
        .map_or(RETRY_MAX_DELAY, |delay| delay.min(RETRY_MAX_DELAY))
}

async fn download_file(
    control: &TaskControl,
    tree: &TreeHandle,
    remote: &str,
    local: &Path,
    resume: bool,
    fallback: ErrorCode,
) -> Step<u64> {
    control.checkpoint().await?;
    let file = tree.open_read(remote).await?;
    if file.is_directory() {
        return Err(Stop::Failed(SmbError::with_detail(
            ErrorCode::DirectoryDownloaded,
            format!("{} is a directory", file.path()),
        )));
    }

    let total = file.size();
    let offset = if resume {
        match fs::metadata(local).await {
            Ok(meta) => meta.len().min(total),
            Err(_) => 0,
        }
    } else {
        0
    };

    let mut out = open_local(local, resume, fallback).await?;
    if offset > 0 {
        debug!("Resuming {} at {} of {} bytes", file.path(), offset, total);
        out.set_len(offset)
            .await
            .map_err(local_failure(fallback, local))?;
        out.seek(SeekFrom::Start(offset))
            .await
            .map_err(local_failure(fallback, local))?;
    }
    control.register_partial(PartialTarget::Local(local.to_path_buf()));
    control.set_progress(offset, Some(total));

    copy_down(control, tree, &file, &mut out, local, offset, total, fallback).await?;
    out.flush().await.map_err(local_failure(fallback, local))?;
    close_remote(file).await;
    Ok(total)
}

async fn open_local(local: &Path, resume: bool, fallback: ErrorCode) -> Step<File> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(local_failure(fallback, parent))?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(!resume)
        .open(local)
        .await
        .map_err(local_failure(fallback, local))
}

/// Copy `file` from `offset` to its end into `out`
#[allow(clippy::too_many_arguments)]
async fn copy_down(
    control: &TaskControl,
    tree: &TreeHandle,
    file: &RemoteFile,
    out: &mut File,
    local: &Path,
    mut offset: u64,
    total: u64,
    fallback: ErrorCode,
) -> Step<()> {
    let chunk = tree.session().max_read_size();
    while offset < total {
        control.checkpoint().await?;
        let want = (total - offset).min(chunk as u64) as u32;
        let data = with_retry(control, fallback, || file.read_chunk(offset, want)).await?;
        if data.is_empty() {
            return Err(Stop::Failed(SmbError::with_detail(
                fallback,
                format!("{} ended at {} of {} bytes", file.path(), offset, total),
            )));
        }
        if control.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        out.write_all(&data)
            .await
            .map_err(local_failure(fallback, local))?;
        offset += data.len() as u64;
        trace!("{}: {}/{}", file.path(), offset, total);
        control.add_progress(data.len() as u64);
    }
    Ok(())
}

async fn close_remote(file: RemoteFile) {
    let path = file.path().to_string();
    if let Err(e) = file.close().await {
        debug!("Closing {} failed: {}", path, e);
    }
}

/// One file of a directory download
struct PlannedFile {
    remote: String,
    local: PathBuf,
    size: u64,
}

async fn download_directory(
    control: &TaskControl,
    tree: &TreeHandle,
    remote: &str,
    local: &Path,
    fallback: ErrorCode,
) -> Step<u64> {
    control.checkpoint().await?;
    let root = tree.stat(remote).await?;
    if !root.is_directory {
        return download_file(control, tree, remote, local, false, fallback).await;
    }

    let root_path = normalize_path(remote).map_err(failed(fallback))?;
    let mut directories = vec![local.to_path_buf()];
    let mut files = Vec::new();
    let mut pending = vec![(root_path, local.to_path_buf())];
    while let Some((dir, target)) = pending.pop() {
        control.checkpoint().await?;
        let mut listing = tree.list_directory(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            let child = join_path(&dir, &entry.name);
            let child_target = target.join(&entry.name);
            if entry.is_directory {
                directories.push(child_target.clone());
                pending.push((child, child_target));
            } else {
                files.push(PlannedFile {
                    remote: child,
                    local: child_target,
                    size: entry.size,
                });
            }
        }
    }

    let total: u64 = files.iter().map(|f| f.size).sum();
    debug!(
        "Downloading {} ({} files, {} bytes)",
        remote,
        files.len(),
        total
    );
    control.set_progress(0, Some(total));

    for dir in &directories {
        if control.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        fs::create_dir_all(dir)
            .await
            .map_err(local_failure(fallback, dir))?;
    }

    let mut moved = 0;
    for planned in files {
        control.checkpoint().await?;
        let file = tree.open_read(&planned.remote).await?;
        let mut out = open_local(&planned.local, false, fallback).await?;
        control.register_partial(PartialTarget::Local(planned.local.clone()));
        let size = file.size();
        copy_down(control, tree, &file, &mut out, &planned.local, 0, size, fallback).await?;
        out.flush()
            .await
            .map_err(local_failure(fallback, &planned.local))?;
        control.clear_partial();
        close_remote(file).await;
        moved += size;
    }
    Ok(moved)
}

async fn upload(control: &TaskControl, tree: &TreeHandle, local: &Path, remote: &str, offset: u64) -> Step<u64> {
    let fallback = ErrorCode::FailToUpload;
    let meta = fs::metadata(local)
        .await
        .map_err(local_failure(fallback, local))?;
    if meta.is_dir() {
        return Err(Stop::Failed(SmbError::with_detail(
            ErrorCode::DirectoryUploaded,
            format!("{} is a directory", local.display()),
        )));
    }
    let total = meta.len();
    let requested = offset.min(total);

    control.checkpoint().await?;
    let file = tree.open_write(remote, requested == 0).await?;
    control.register_partial(PartialTarget::Remote(file.path().to_string()));
    // Never write past what the server already holds
    let offset = requested.min(file.size());
    if offset < requested {
        debug!(
            "{} holds {} bytes, resuming from there instead of {}",
            file.path(),
            offset,
            requested
        );
    }

    let mut input = File::open(local)
        .await
        .map_err(local_failure(fallback, local))?;
    input
        .seek(SeekFrom::Start(offset))
        .await
        .map_err(local_failure(fallback, local))?;
    control.set_progress(offset, Some(total));

    let chunk = tree.session().max_write_size() as usize;
    let mut position = offset;
    let mut buffer = vec![0u8; chunk];
    while position < total {
        let filled = fill_buffer(&mut input, &mut buffer)
            .await
            .map_err(local_failure(fallback, local))?;
        if filled == 0 {
            break;
        }

        let mut sent = 0;
        while sent < filled {
            control.checkpoint().await?;
            let at = position + sent as u64;
            let data = buffer[sent..filled].to_vec();
            let count = with_retry(control, fallback, || file.write_chunk(at, data.clone())).await?;
            if count == 0 {
                return Err(Stop::Failed(SmbError::with_detail(
                    fallback,
                    format!("server accepted no bytes at {}", at),
                )));
            }
            let count = (count as usize).min(filled - sent);
            sent += count;
            control.add_progress(count as u64);
        }
        position += filled as u64;
    }

    control.checkpoint().await?;
    if offset > 0 {
        file.set_end_of_file(position).await.map_err(failed(fallback))?;
    }
    let stored = file.query_size().await.map_err(failed(fallback))?;
    if stored != total {
        return Err(Stop::Failed(SmbError::with_detail(
            fallback,
            format!("{} holds {} of {} bytes", file.path(), stored, total),
        )));
    }
    close_remote(file).await;
    Ok(total)
}

/// Read until `buffer` is full or the input ends
async fn fill_buffer(input: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = input.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Delete a file, or a directory after its contents
async fn delete(control: &TaskControl, tree: &TreeHandle, remote: &str) -> Step<u64> {
    let fallback = ErrorCode::UnableToDeleteItem;
    control.checkpoint().await?;
    let root = tree.stat_entry(remote).await.map_err(failed(fallback))?;
    let root_path = normalize_path(remote).map_err(failed(fallback))?;
    control.set_progress(0, None);

    if !root.is_directory {
        tree.delete(&root_path).await?;
        control.add_progress(1);
        return Ok(1);
    }

    // Parents are listed before their children
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![root_path];
    while let Some(dir) = pending.pop() {
        control.checkpoint().await?;
        let mut listing = tree.list_directory(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            let child = join_path(&dir, &entry.name);
            if entry.is_directory {
                pending.push(child);
            } else {
                files.push(child);
            }
        }
        dirs.push(dir);
    }

    let mut removed = 0;
    for path in files.into_iter().chain(dirs.into_iter().rev()) {
        control.checkpoint().await?;
        tree.delete(&path).await?;
        removed += 1;
        control.add_progress(1);
    }
    debug!("Deleted {} items under {}", removed, remote);
    Ok(removed)
}
