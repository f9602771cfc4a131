// mockssh Test Client (russh / russh-sftp 클라이언트)
//
// Server::connect_as()가 돌려주는 접속 객체
// - 호스트키 고정: 서버가 제시한 키가 기대한 키와 다르면 접속 거절
// - exec()       : 명령 실행 → stdout / stderr / exit-status 수집
// - open_exec()  : 스트리밍 exec 채널 (stdin 쓰기, 줄 단위 읽기)
// - sftp()       : SFTP 서브시스템 채널 → SftpClient

use std::collections::VecDeque;
use std::sync::Arc;

use russh::client;
use russh::keys::key::PublicKey;
use russh::keys::PublicKeyBase64;
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::{AuthMethod, ConnectConfig};
use crate::error::{Error, Result};

/// SSH 확장 데이터 타입 1 = stderr
const EXTENDED_DATA_STDERR: u32 = 1;

// russh 클라이언트 핸들러 (서버 이벤트 처리)
struct ClientHandler {
    /// None이면 호스트키 검증 생략
    server_key: Option<PublicKey>,
}

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let trusted = match &self.server_key {
            Some(expected) => expected.public_key_base64() == server_public_key.public_key_base64(),
            None => true,
        };
        if !trusted {
            tracing::warn!("[client] unexpected host key {}", server_public_key.name());
        }
        Ok(trusted)
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct Client {
    handle: client::Handle<ClientHandler>,
    user: String,
}

impl Client {
    pub async fn connect(config: &ConnectConfig, server_key: Option<PublicKey>) -> Result<Self> {
        let russh_config = Arc::new(client::Config::default());
        let handler = ClientHandler { server_key };

        tracing::debug!("[client] connecting to {}:{} as '{}'", config.host, config.port, config.username);

        let mut handle = client::connect(russh_config, config.addr(), handler).await?;

        let authed = match &config.auth {
            AuthMethod::Password(pw) => handle.authenticate_password(&config.username, pw).await?,
            AuthMethod::PublicKey { private_key_path } => {
                let key = russh::keys::load_secret_key(private_key_path, None)?;
                handle.authenticate_publickey(&config.username, Arc::new(key)).await?
            }
        };
        if !authed {
            return Err(Error::Auth(format!("server rejected '{}'", config.username)));
        }

        Ok(Self { handle, user: config.username.clone() })
    }

    pub fn user(&self) -> &str { &self.user }

    /// 명령 실행 후 출력 전부 수집 (stdin 없음)
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let mut channel = self.open_exec(command).await?;
        channel.eof().await?;
        channel.finish().await
    }

    pub async fn open_exec(&self, command: &str) -> Result<ExecChannel> {
        let mut channel = self.open_channel().await?;
        channel.request_exec(command).await?;
        Ok(channel)
    }

    /// 요청 없이 session 채널만 연다
    pub async fn open_channel(&self) -> Result<ExecChannel> {
        let channel = self.handle.channel_open_session().await?;
        Ok(ExecChannel::new(channel))
    }

    pub async fn sftp(&self) -> Result<SftpClient> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Sftp(e.to_string()))?;
        tracing::debug!("[client] SFTP ready");
        Ok(SftpClient::new(sftp))
    }

    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

// ── ExecChannel ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// 서버가 exit-status를 보내기 전에 채널이 닫히면 None
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// 서버 쪽 프로세스와 연결된 채널
///
/// 받은 메시지는 stdout / stderr 버퍼에 쌓이고, read_*_line이 줄 단위로 꺼낸다
pub struct ExecChannel {
    channel: russh::Channel<client::Msg>,
    output: ExecOutput,
    replies: VecDeque<bool>,
    closed: bool,
}

impl ExecChannel {
    fn new(channel: russh::Channel<client::Msg>) -> Self {
        Self { channel, output: ExecOutput::default(), replies: VecDeque::new(), closed: false }
    }

    /// exec 요청 + 서버 응답 대기. 거절이면 Err(Rejected)
    pub async fn request_exec(&mut self, command: &str) -> Result<()> {
        self.channel.exec(true, command).await?;
        loop {
            if let Some(accepted) = self.replies.pop_front() {
                return if accepted { Ok(()) } else { Err(Error::Rejected(format!("exec {}", command))) };
            }
            if !self.pump().await {
                return Err(Error::ChannelClosed);
            }
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.channel.data(data).await?;
        Ok(())
    }

    /// 프로세스 stdin 닫기
    pub async fn eof(&mut self) -> Result<()> {
        self.channel.eof().await?;
        Ok(())
    }

    /// 개행 포함 한 줄. 채널이 닫히면 남은 조각 또는 None
    pub async fn read_stdout_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = take_line(&mut self.output.stdout, self.closed) {
                return Some(line);
            }
            if !self.pump().await {
                return take_line(&mut self.output.stdout, true);
            }
        }
    }

    pub async fn read_stderr_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = take_line(&mut self.output.stderr, self.closed) {
                return Some(line);
            }
            if !self.pump().await {
                return take_line(&mut self.output.stderr, true);
            }
        }
    }

    /// 채널이 닫힐 때까지 읽고 남은 출력 반환
    pub async fn finish(mut self) -> Result<ExecOutput> {
        while self.pump().await {}
        Ok(self.output)
    }

    /// 메시지 하나 처리. 채널이 닫혔으면 false
    async fn pump(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.channel.wait().await {
            Some(ChannelMsg::Data { data }) => self.output.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == EXTENDED_DATA_STDERR => {
                self.output.stderr.extend_from_slice(&data)
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => self.output.exit_status = Some(exit_status),
            Some(ChannelMsg::Success) => self.replies.push_back(true),
            Some(ChannelMsg::Failure) => self.replies.push_back(false),
            Some(ChannelMsg::Close) | None => self.closed = true,
            Some(_) => {}
        }
        !self.closed
    }
}

fn take_line(buf: &mut Vec<u8>, take_rest: bool) -> Option<String> {
    let end = match buf.iter().position(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None if take_rest && !buf.is_empty() => buf.len(),
        None => return None,
    };
    let line: Vec<u8> = buf.drain(..end).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

// ── SftpClient ───────────────────────────────────────────────────────────────

/// 디렉토리 엔트리
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub permissions: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mtime: Option<u64>,
}

pub struct SftpClient {
    sftp: SftpSession,
}

fn sftp_err(e: impl std::fmt::Display) -> Error {
    Error::Sftp(e.to_string())
}

impl SftpClient {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }

    pub async fn ls(&mut self, path: &str) -> Result<Vec<FileEntry>> {
        let dir = self.sftp.read_dir(path).await.map_err(sftp_err)?;

        let mut entries: Vec<FileEntry> = dir.into_iter()
            .filter(|e| e.file_name() != "." && e.file_name() != "..")
            .map(|e| {
                let attrs = e.metadata();
                let permissions = attrs.permissions;
                let is_dir = permissions
                    .map(|p| p & 0o170000 == 0o040000)
                    .unwrap_or(false);
                FileEntry {
                    name: e.file_name().to_string(),
                    is_dir,
                    size: attrs.size.unwrap_or(0),
                    permissions,
                    uid: attrs.uid,
                    gid: attrs.gid,
                    mtime: attrs.mtime.map(|t| t as u64),
                }
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// 이름만
    pub async fn listdir(&mut self, path: &str) -> Result<Vec<String>> {
        Ok(self.ls(path).await?.into_iter().map(|e| e.name).collect())
    }

    /// 원격 파일 전체 읽기
    pub async fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.sftp.open(path).await.map_err(sftp_err)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// 원격 파일 생성 또는 덮어쓰기
    pub async fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = self.sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE)
            .await
            .map_err(sftp_err)?;
        file.write_all(data).await?;
        file.shutdown().await?;
        Ok(())
    }

    /// 로컬 파일 업로드
    pub async fn put(&mut self, local: &str, remote: &str) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        self.write(remote, &data).await?;
        Ok(data.len() as u64)
    }

    /// 원격 파일 다운로드
    pub async fn get(&mut self, remote: &str, local: &str) -> Result<u64> {
        let data = self.read(remote).await?;
        tokio::fs::write(local, &data).await?;
        Ok(data.len() as u64)
    }

    pub async fn stat(&mut self, path: &str) -> Result<FileAttributes> {
        self.sftp.metadata(path).await.map_err(sftp_err)
    }

    pub async fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let attrs = FileAttributes { permissions: Some(mode), ..Default::default() };
        self.sftp.set_metadata(path, attrs).await.map_err(sftp_err)
    }

    pub async fn chown(&mut self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let attrs = FileAttributes { uid: Some(uid), gid: Some(gid), ..Default::default() };
        self.sftp.set_metadata(path, attrs).await.map_err(sftp_err)
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.sftp.create_dir(path).await.map_err(sftp_err)
    }

    pub async fn rmdir(&mut self, path: &str) -> Result<()> {
        self.sftp.remove_dir(path).await.map_err(sftp_err)
    }

    pub async fn rm(&mut self, path: &str) -> Result<()> {
        self.sftp.remove_file(path).await.map_err(sftp_err)
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.sftp.rename(from, to).await.map_err(sftp_err)
    }

    pub async fn realpath(&mut self, path: &str) -> Result<String> {
        self.sftp.canonicalize(path).await.map_err(sftp_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_splits_on_newline() {
        let mut buf = b"one\ntwo\nrest".to_vec();
        assert_eq!(take_line(&mut buf, false).as_deref(), Some("one\n"));
        assert_eq!(take_line(&mut buf, false).as_deref(), Some("two\n"));
        assert_eq!(take_line(&mut buf, false), None);
        assert_eq!(take_line(&mut buf, true).as_deref(), Some("rest"));
        assert_eq!(take_line(&mut buf, true), None);
    }
}
