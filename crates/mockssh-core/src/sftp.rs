// mockssh SFTP Facade (russh-sftp 서버 핸들러)
//
// SFTP 요청 → OS 파일시스템 호출
// root가 설정되면 모든 경로를 root 기준으로 정규화 (.. 로 밖으로 못 나감)
//
// OS 에러 → SFTP 상태 코드
//   EACCES / EDQUOT / EPERM / EROFS → PermissionDenied
//   ENOENT / ENOTDIR                → NoSuchFile
//   그 외                           → Failure
//
// 구현하지 않은 요청(readlink, symlink, fsetstat ...)은 OpUnsupported

use std::collections::HashMap;
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::utils::{long_name, normalize_path, resolve_under};

/// 한 번의 READ 응답 최대 크기
const MAX_READ_LEN: u32 = 256 * 1024;

enum OpenHandle {
    File(tokio::fs::File),
    /// readdir 첫 호출에 전부 반환, 이후 EOF
    Dir(Option<Vec<File>>),
}

pub struct SftpHandler {
    root: Option<PathBuf>,
    handles: HashMap<String, OpenHandle>,
    next_handle: u64,
}

impl SftpHandler {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root, handles: HashMap::new(), next_handle: 0 }
    }

    /// 요청 경로 → 실제 경로
    pub fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => resolve_under(root, path),
            None       => PathBuf::from(path),
        }
    }

    /// 클라이언트에 보여줄 절대 경로
    fn real_path(&self, path: &str) -> String {
        if self.root.is_some() {
            return normalize_path(path).to_string_lossy().into_owned();
        }
        let requested = Path::new(path);
        let absolute = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")).join(requested)
        };
        std::fs::canonicalize(&absolute)
            .unwrap_or_else(|_| normalize_path(&absolute.to_string_lossy()))
            .to_string_lossy()
            .into_owned()
    }

    fn insert(&mut self, handle: OpenHandle) -> String {
        self.next_handle += 1;
        let name = self.next_handle.to_string();
        self.handles.insert(name.clone(), handle);
        name
    }

    fn file(&mut self, handle: &str) -> Result<&mut tokio::fs::File, StatusCode> {
        match self.handles.get_mut(handle) {
            Some(OpenHandle::File(file)) => Ok(file),
            _ => Err(StatusCode::Failure),
        }
    }
}

// ── 에러 매핑 ────────────────────────────────────────────────────────────────

pub fn status_from_io(err: &std::io::Error) -> StatusCode {
    match err.raw_os_error() {
        Some(libc::EACCES | libc::EDQUOT | libc::EPERM | libc::EROFS) => StatusCode::PermissionDenied,
        Some(libc::ENOENT | libc::ENOTDIR) => StatusCode::NoSuchFile,
        Some(_) => StatusCode::Failure,
        None => match err.kind() {
            std::io::ErrorKind::NotFound         => StatusCode::NoSuchFile,
            std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            _ => StatusCode::Failure,
        },
    }
}

fn failed(op: &str, path: &Path, err: std::io::Error) -> StatusCode {
    tracing::debug!("[sftp] {}({}) failed: {}", op, path.display(), err);
    status_from_io(&err)
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn attributes(metadata: &std::fs::Metadata) -> FileAttributes {
    FileAttributes {
        size: Some(metadata.len()),
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
        permissions: Some(metadata.mode()),
        atime: Some(metadata.atime() as u32),
        mtime: Some(metadata.mtime() as u32),
        ..Default::default()
    }
}

fn dir_entry(name: String, metadata: &std::fs::Metadata) -> File {
    let attrs = attributes(metadata);
    let longname = long_name(
        &name,
        attrs.permissions,
        attrs.uid,
        attrs.gid,
        attrs.size,
        attrs.mtime.map(|t| t as u64),
    );
    File { filename: name, longname, attrs }
}

// ── russh-sftp Handler ───────────────────────────────────────────────────────

impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(&mut self, version: u32, _extensions: HashMap<String, String>) -> Result<Version, Self::Error> {
        tracing::debug!("[sftp] session started (client version {})", version);
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let path = self.resolve(&filename);
        let mut options = tokio::fs::OpenOptions::new();
        options
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .append(pflags.contains(OpenFlags::APPEND))
            .create(pflags.contains(OpenFlags::CREATE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE));
        if pflags.contains(OpenFlags::CREATE | OpenFlags::EXCLUDE) {
            options.create_new(true);
        }
        if let Some(mode) = attrs.permissions {
            options.mode(mode & 0o7777);
        }

        let file = options.open(&path).await.map_err(|e| failed("open", &path, e))?;
        tracing::debug!("[sftp] open({}) flags: {:?}", path.display(), pflags);
        Ok(Handle { id, handle: self.insert(OpenHandle::File(file)) })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        match self.handles.remove(&handle) {
            Some(_) => Ok(ok(id)),
            None    => Err(StatusCode::Failure),
        }
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data, Self::Error> {
        let file = self.file(&handle)?;
        let io_failed = |e: std::io::Error| failed("read", Path::new(&handle), e);

        file.seek(SeekFrom::Start(offset)).await.map_err(io_failed)?;
        let mut buf = vec![0u8; len.min(MAX_READ_LEN) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await.map_err(io_failed)?;
            if n == 0 { break; }
            filled += n;
        }
        if filled == 0 {
            return Err(StatusCode::Eof);
        }
        buf.truncate(filled);
        Ok(Data { id, data: buf })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status, Self::Error> {
        let file = self.file(&handle)?;
        let io_failed = |e: std::io::Error| failed("write", Path::new(&handle), e);

        file.seek(SeekFrom::Start(offset)).await.map_err(io_failed)?;
        file.write_all(&data).await.map_err(io_failed)?;
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let path = self.resolve(&path);
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| failed("stat", &path, e))?;
        Ok(Attrs { id, attrs: attributes(&metadata) })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let path = self.resolve(&path);
        let metadata = tokio::fs::symlink_metadata(&path).await.map_err(|e| failed("lstat", &path, e))?;
        Ok(Attrs { id, attrs: attributes(&metadata) })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let file = self.file(&handle)?;
        let metadata = file.metadata().await.map_err(|e| failed("fstat", Path::new(&handle), e))?;
        Ok(Attrs { id, attrs: attributes(&metadata) })
    }

    /// chmod / chown만 지원. truncate, utime은 아무것도 바꾸기 전에 OpUnsupported
    async fn setstat(&mut self, id: u32, path: String, attrs: FileAttributes) -> Result<Status, Self::Error> {
        let path = self.resolve(&path);
        if attrs.size.is_some() || attrs.atime.is_some() || attrs.mtime.is_some() {
            tracing::debug!("[sftp] setstat {}: size/time changes are not supported", path.display());
            return Err(StatusCode::OpUnsupported);
        }
        if let Some(mode) = attrs.permissions {
            let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
            tokio::fs::set_permissions(&path, permissions)
                .await
                .map_err(|e| failed("chmod", &path, e))?;
        }
        if attrs.uid.is_some() || attrs.gid.is_some() {
            std::os::unix::fs::chown(&path, attrs.uid, attrs.gid).map_err(|e| failed("chown", &path, e))?;
        }
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let path = self.resolve(&path);
        let mut dir = tokio::fs::read_dir(&path).await.map_err(|e| failed("opendir", &path, e))?;

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| failed("readdir", &path, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // 링크는 따라간 stat, 깨진 링크는 링크 자체
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(_) => entry.metadata().await.map_err(|e| failed("stat", &entry.path(), e))?,
            };
            files.push(dir_entry(name, &metadata));
        }

        Ok(Handle { id, handle: self.insert(OpenHandle::Dir(Some(files))) })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(OpenHandle::Dir(entries)) => match entries.take() {
                Some(files) if !files.is_empty() => Ok(Name { id, files }),
                _ => Err(StatusCode::Eof),
            },
            _ => Err(StatusCode::Failure),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        let path = self.resolve(&filename);
        tokio::fs::remove_file(&path).await.map_err(|e| failed("remove", &path, e))?;
        Ok(ok(id))
    }

    async fn mkdir(&mut self, id: u32, path: String, attrs: FileAttributes) -> Result<Status, Self::Error> {
        let path = self.resolve(&path);
        tokio::fs::DirBuilder::new()
            .mode(attrs.permissions.map(|m| m & 0o7777).unwrap_or(0o777))
            .create(&path)
            .await
            .map_err(|e| failed("mkdir", &path, e))?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        let path = self.resolve(&path);
        tokio::fs::remove_dir(&path).await.map_err(|e| failed("rmdir", &path, e))?;
        Ok(ok(id))
    }

    async fn rename(&mut self, id: u32, oldpath: String, newpath: String) -> Result<Status, Self::Error> {
        let from = self.resolve(&oldpath);
        let to = self.resolve(&newpath);
        tokio::fs::rename(&from, &to).await.map_err(|e| failed("rename", &from, e))?;
        Ok(ok(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let real = self.real_path(&path);
        Ok(Name {
            id,
            files: vec![File {
                filename: real.clone(),
                longname: real,
                attrs: FileAttributes::default(),
            }],
        })
    }
}
