//! Shares and the remote file primitives used by transfers

use super::session::Session;
use crate::error::{Error, ErrorCode, NtStatus, Result, SmbError};
use crate::protocol::messages::{
    parse_directory_entries, FileDirectoryInfo, FileDispositionInfo, FileId, FileInfoClass,
    FileRenameInfo, FileStandardInfo, Smb2CloseRequest, Smb2CloseResponse, Smb2CreateRequest,
    Smb2CreateResponse, Smb2QueryDirectoryRequest, Smb2QueryDirectoryResponse,
    Smb2QueryInfoRequest, Smb2QueryInfoResponse, Smb2ReadRequest, Smb2ReadResponse,
    Smb2SetInfoRequest, Smb2SetInfoResponse, Smb2WriteRequest, Smb2WriteResponse,
};
use crate::protocol::messages::file_info::filetime_to_datetime;
use crate::protocol::smb2_constants::{
    query_directory_flags, CreateDisposition, CreateOptions, DesiredAccess, Smb2Command,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

/// Output buffer requested per QUERY_DIRECTORY
const DIRECTORY_BUFFER_SIZE: u32 = 64 * 1024;

/// One remote directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl From<FileDirectoryInfo> for DirectoryEntry {
    fn from(info: FileDirectoryInfo) -> Self {
        Self {
            is_directory: info.is_directory(),
            size: info.end_of_file,
            modified: filetime_to_datetime(info.last_write_time).unwrap_or_default(),
            name: info.file_name,
        }
    }
}

/// Share-relative, backslash separated form of `path`. `/` and `\` are both
/// accepted; empty and `.` components are dropped and `..` is refused.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidParameter(format!(
                    "Parent references are not allowed: {}",
                    path
                )))
            }
            name => parts.push(name),
        }
    }
    Ok(parts.join("\\"))
}

/// Child `name` of the normalized directory `dir`
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}\\{}", dir, name)
    }
}

/// Last component of a normalized path
pub fn file_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// A connected share
#[derive(Clone)]
pub struct TreeHandle {
    session: Session,
    tree_id: u32,
    share: String,
}

impl fmt::Debug for TreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeHandle")
            .field("share", &self.share)
            .field("tree_id", &self.tree_id)
            .finish()
    }
}

impl Session {
    /// Connect to `share` on this session
    pub async fn connect_share(&self, share: &str) -> std::result::Result<TreeHandle, SmbError> {
        TreeHandle::connect_share(self, share).await
    }
}

impl TreeHandle {
    /// TREE_CONNECT. Needs a `SessionOk` session; fails with
    /// `ShareConnectionFailed` otherwise or when the server refuses.
    pub async fn connect_share(
        session: &Session,
        share: &str,
    ) -> std::result::Result<Self, SmbError> {
        let share = share.trim_matches(['/', '\\']);
        match session.tree_connect(share).await {
            Ok(tree_id) => {
                debug!("Connected share {} as tree {}", share, tree_id);
                Ok(Self {
                    session: session.clone(),
                    tree_id,
                    share: share.to_string(),
                })
            }
            Err(e) => Err(e.into_smb_error(ErrorCode::ShareConnectionFailed)),
        }
    }

    /// TREE_DISCONNECT. Idempotent.
    pub async fn disconnect(&self) -> std::result::Result<(), SmbError> {
        self.session
            .tree_disconnect(self.tree_id)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::ShareConnectionFailed))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn share_name(&self) -> &str {
        &self.share
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    /// False once the share or its session is gone
    pub async fn is_connected(&self) -> bool {
        self.session.is_tree_connected(self.tree_id).await
    }

    /// Entries of a remote directory, fetched lazily. Each call issues a
    /// fresh listing; a listing cannot be restarted.
    pub async fn list_directory(
        &self,
        path: &str,
    ) -> std::result::Result<DirectoryListing, SmbError> {
        let fallback = ErrorCode::Unknown;
        let dir = normalize_path(path).map_err(|e| e.into_smb_error(fallback))?;
        let request = Smb2CreateRequest::new(dir.clone())
            .with_options(CreateOptions::FILE_DIRECTORY_FILE);
        let response = self
            .create(request)
            .await
            .map_err(|e| e.into_smb_error(fallback))?;

        Ok(DirectoryListing {
            tree: self.clone(),
            path: dir,
            file_id: Some(response.file_id),
            pending: VecDeque::new(),
            restart: true,
        })
    }

    /// Metadata of a file or directory
    pub async fn stat(&self, path: &str) -> std::result::Result<DirectoryEntry, SmbError> {
        self.stat_entry(path)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::Unknown))
    }

    pub(crate) async fn stat_entry(&self, path: &str) -> Result<DirectoryEntry> {
        let name = normalize_path(path)?;
        let request = Smb2CreateRequest::new(name.clone())
            .with_access(DesiredAccess::FILE_READ_ATTRIBUTES | DesiredAccess::SYNCHRONIZE);
        let response = self.create(request).await?;
        self.close_handle(response.file_id).await?;

        Ok(DirectoryEntry {
            name: file_name(&name).to_string(),
            is_directory: response.is_directory(),
            size: response.end_of_file,
            modified: filetime_to_datetime(response.last_write_time).unwrap_or_default(),
        })
    }

    /// Open an existing file or directory for reading
    pub async fn open_read(&self, path: &str) -> std::result::Result<RemoteFile, SmbError> {
        let open = async {
            let name = normalize_path(path)?;
            let response = self.create(Smb2CreateRequest::new(name.clone())).await?;
            Ok::<_, Error>(RemoteFile::new(self.clone(), name, response))
        };
        open.await.map_err(|e| e.into_smb_error(ErrorCode::Unknown))
    }

    /// Open a file for writing, creating it when missing. `truncate` empties
    /// an existing file; otherwise its content is kept for resuming.
    pub async fn open_write(
        &self,
        path: &str,
        truncate: bool,
    ) -> std::result::Result<RemoteFile, SmbError> {
        let open = async {
            let name = normalize_path(path)?;
            if name.is_empty() {
                return Err(Error::InvalidParameter("cannot write to the share root".into()));
            }
            let disposition = if truncate {
                CreateDisposition::OverwriteIf
            } else {
                CreateDisposition::OpenIf
            };
            let request = Smb2CreateRequest::new(name.clone())
                .with_access(DesiredAccess::FILE_GENERIC_READ | DesiredAccess::FILE_GENERIC_WRITE)
                .with_disposition(disposition)
                .with_options(CreateOptions::FILE_NON_DIRECTORY_FILE);
            let response = self.create(request).await?;
            Ok::<_, Error>(RemoteFile::new(self.clone(), name, response))
        };
        open.await.map_err(|e| e.into_smb_error(ErrorCode::FailToUpload))
    }

    /// Create a directory and any missing parents. An existing final
    /// component is an error.
    pub async fn create_directory(&self, path: &str) -> std::result::Result<(), SmbError> {
        self.make_directory(path)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::UnableToCreateDirectory))
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        let name = normalize_path(path)?;
        if name.is_empty() {
            return Err(Error::InvalidParameter("the share root already exists".into()));
        }

        let parts: Vec<&str> = name.split('\\').collect();
        for depth in 1..=parts.len() {
            let disposition = if depth == parts.len() {
                CreateDisposition::Create
            } else {
                CreateDisposition::OpenIf
            };
            let request = Smb2CreateRequest::new(parts[..depth].join("\\"))
                .with_access(DesiredAccess::FILE_READ_ATTRIBUTES | DesiredAccess::SYNCHRONIZE)
                .with_disposition(disposition)
                .with_options(CreateOptions::FILE_DIRECTORY_FILE);
            let response = self.create(request).await?;
            self.close_handle(response.file_id).await?;
        }
        debug!("Created directory {}", name);
        Ok(())
    }

    /// Delete a file or an empty directory
    pub async fn delete(&self, path: &str) -> std::result::Result<(), SmbError> {
        self.remove(path)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::UnableToDeleteItem))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let name = normalize_path(path)?;
        if name.is_empty() {
            return Err(Error::InvalidParameter("the share root cannot be deleted".into()));
        }
        let request = Smb2CreateRequest::new(name.clone())
            .with_access(DesiredAccess::DELETE | DesiredAccess::FILE_READ_ATTRIBUTES);
        let response = self.create(request).await?;

        let marked = self
            .set_info(
                response.file_id,
                FileInfoClass::DispositionInformation,
                FileDispositionInfo::delete().serialize(),
            )
            .await;
        let closed = self.close_handle(response.file_id).await;
        marked?;
        closed?;
        debug!("Deleted {}", name);
        Ok(())
    }

    /// Rename or move within the share
    pub async fn rename(
        &self,
        from: &str,
        to: &str,
        replace_if_exists: bool,
    ) -> std::result::Result<(), SmbError> {
        self.move_item(from, to, replace_if_exists)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::UnableToMoveFile))
    }

    async fn move_item(&self, from: &str, to: &str, replace_if_exists: bool) -> Result<()> {
        let source = normalize_path(from)?;
        let target = normalize_path(to)?;
        if source.is_empty() || target.is_empty() {
            return Err(Error::InvalidParameter("the share root cannot be moved".into()));
        }
        let request = Smb2CreateRequest::new(source.clone())
            .with_access(DesiredAccess::DELETE | DesiredAccess::FILE_READ_ATTRIBUTES);
        let response = self.create(request).await?;

        let info = FileRenameInfo::new(target.clone(), replace_if_exists).serialize()?;
        let renamed = self
            .set_info(response.file_id, FileInfoClass::RenameInformation, info)
            .await;
        let closed = self.close_handle(response.file_id).await;
        renamed?;
        closed?;
        debug!("Moved {} to {}", source, target);
        Ok(())
    }

    pub(crate) async fn create(&self, request: Smb2CreateRequest) -> Result<Smb2CreateResponse> {
        trace!("CREATE {:?} on tree {}", request.file_name, self.tree_id);
        let (_, response) = self
            .session
            .request(Smb2Command::Create, self.tree_id, &request)
            .await?;
        Ok(response)
    }

    pub(crate) async fn close_handle(&self, file_id: FileId) -> Result<()> {
        let _: (_, Smb2CloseResponse) = self
            .session
            .request(Smb2Command::Close, self.tree_id, &Smb2CloseRequest::new(file_id))
            .await?;
        Ok(())
    }

    async fn set_info(&self, file_id: FileId, class: FileInfoClass, buffer: Vec<u8>) -> Result<()> {
        let request = Smb2SetInfoRequest::file_info(file_id, class, buffer);
        let _: (_, Smb2SetInfoResponse) = self
            .session
            .request(Smb2Command::SetInfo, self.tree_id, &request)
            .await?;
        Ok(())
    }

    async fn query_directory(&self, file_id: FileId, restart: bool) -> Result<Vec<FileDirectoryInfo>> {
        let flags = if restart {
            query_directory_flags::RESTART_SCANS
        } else {
            0
        };
        let request =
            Smb2QueryDirectoryRequest::new(file_id, "*", DIRECTORY_BUFFER_SIZE).with_flags(flags);
        let (_, response): (_, Smb2QueryDirectoryResponse) = self
            .session
            .request(Smb2Command::QueryDirectory, self.tree_id, &request)
            .await?;
        parse_directory_entries(&response.output_buffer)
    }
}

/// Close `file_id` from a destructor, when a runtime is available
fn close_in_background(tree: TreeHandle, file_id: FileId) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if let Err(e) = tree.close_handle(file_id).await {
                trace!("Deferred close failed: {}", e);
            }
        });
    }
}

/// Lazily fetched entries of one remote directory
pub struct DirectoryListing {
    tree: TreeHandle,
    path: String,
    file_id: Option<FileId>,
    pending: VecDeque<DirectoryEntry>,
    restart: bool,
}

impl DirectoryListing {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next entry, or `None` once the directory is exhausted. `.` and `..`
    /// are skipped; the directory handle is closed at the end.
    pub async fn next_entry(&mut self) -> std::result::Result<Option<DirectoryEntry>, SmbError> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }
            let Some(file_id) = self.file_id else {
                return Ok(None);
            };

            match self.tree.query_directory(file_id, self.restart).await {
                Ok(entries) if entries.is_empty() => self.finish().await,
                Ok(entries) => {
                    self.restart = false;
                    self.pending.extend(
                        entries
                            .into_iter()
                            .filter(|info| info.file_name != "." && info.file_name != "..")
                            .map(DirectoryEntry::from),
                    );
                }
                Err(Error::Status(NtStatus::NoMoreFiles)) => self.finish().await,
                Err(e) => {
                    self.finish().await;
                    return Err(e.into_smb_error(ErrorCode::Unknown));
                }
            }
        }
    }

    /// Drain the remaining entries
    pub async fn collect(mut self) -> std::result::Result<Vec<DirectoryEntry>, SmbError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn finish(&mut self) {
        if let Some(file_id) = self.file_id.take() {
            if let Err(e) = self.tree.close_handle(file_id).await {
                debug!("Closing directory {} failed: {}", self.path, e);
            }
        }
    }
}

impl Drop for DirectoryListing {
    fn drop(&mut self) {
        if let Some(file_id) = self.file_id.take() {
            close_in_background(self.tree.clone(), file_id);
        }
    }
}

/// An open remote file
pub struct RemoteFile {
    tree: TreeHandle,
    path: String,
    file_id: Option<FileId>,
    size: u64,
    is_directory: bool,
    modified: DateTime<Utc>,
}

impl RemoteFile {
    fn new(tree: TreeHandle, path: String, response: Smb2CreateResponse) -> Self {
        Self {
            tree,
            path,
            file_id: Some(response.file_id),
            size: response.end_of_file,
            is_directory: response.is_directory(),
            modified: filetime_to_datetime(response.last_write_time).unwrap_or_default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size reported when the file was opened
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    fn id(&self) -> Result<FileId> {
        self.file_id
            .ok_or_else(|| Error::InvalidState(format!("{} is closed", self.path)))
    }

    /// READ at `offset`; an empty result means end of file
    pub(crate) async fn read_chunk(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let request = Smb2ReadRequest::new(self.id()?, offset, length);
        match self
            .tree
            .session
            .request::<_, Smb2ReadResponse>(Smb2Command::Read, self.tree.tree_id, &request)
            .await
        {
            Ok((_, response)) => Ok(response.data),
            Err(Error::Status(NtStatus::EndOfFile)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// WRITE at `offset`, returning the count the server accepted
    pub(crate) async fn write_chunk(&self, offset: u64, data: Vec<u8>) -> Result<u32> {
        let request = Smb2WriteRequest::new(self.id()?, offset, data);
        let (_, response): (_, Smb2WriteResponse) = self
            .tree
            .session
            .request(Smb2Command::Write, self.tree.tree_id, &request)
            .await?;
        Ok(response.count)
    }

    /// Current end-of-file from the server
    pub(crate) async fn query_size(&self) -> Result<u64> {
        let request = Smb2QueryInfoRequest::file_info(
            self.id()?,
            FileInfoClass::StandardInformation,
            FileStandardInfo::SIZE as u32,
        );
        let (_, response): (_, Smb2QueryInfoResponse) = self
            .tree
            .session
            .request(Smb2Command::QueryInfo, self.tree.tree_id, &request)
            .await?;
        Ok(FileStandardInfo::parse(&response.output_buffer)?.end_of_file)
    }

    /// Truncate or extend the file to `size` bytes
    pub(crate) async fn set_end_of_file(&self, size: u64) -> Result<()> {
        self.tree
            .set_info(
                self.id()?,
                FileInfoClass::EndOfFileInformation,
                size.to_le_bytes().to_vec(),
            )
            .await
    }

    pub async fn read_at(
        &self,
        offset: u64,
        length: u32,
    ) -> std::result::Result<Vec<u8>, SmbError> {
        self.read_chunk(offset, length)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::Unknown))
    }

    pub async fn write_at(&self, offset: u64, data: Vec<u8>) -> std::result::Result<u32, SmbError> {
        self.write_chunk(offset, data)
            .await
            .map_err(|e| e.into_smb_error(ErrorCode::FailToUpload))
    }

    pub async fn close(mut self) -> std::result::Result<(), SmbError> {
        match self.file_id.take() {
            Some(file_id) => self
                .tree
                .close_handle(file_id)
                .await
                .map_err(|e| e.into_smb_error(ErrorCode::Unknown)),
            None => Ok(()),
        }
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if let Some(file_id) = self.file_id.take() {
            close_in_background(self.tree.clone(), file_id);
        }
    }
}
