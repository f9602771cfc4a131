// mockssh Channel Worker
//
// 채널 하나 = 워커 태스크 하나
// SessionHandler는 exec / subsystem 요청을 one-shot 슬롯으로 넘기고 바로 응답
// 워커는 슬롯에서 요청 하나만 받음 (두 번째 exec는 핸들러에서 거절)
//
// exec      : sh -c <command> → StreamMultiplexer → exit-status → eof → close
// subsystem : russh-sftp 서버 (SftpHandler) 에 채널 스트림을 넘김
//
// 실행 중 에러는 여기서 잡고 로그만 남김 → 채널만 닫히고 세션/리스너는 계속

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::handler::{SessionContext, SessionHooks};
use crate::sftp::SftpHandler;
use crate::state::ChannelState;
use crate::stream::StreamMultiplexer;
use crate::utils::exit_code;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// 받은 바이트 그대로. UTF-8이 아니어도 변환하지 않음
    Exec(Vec<u8>),
    Subsystem(String),
}

/// 핸들러가 채널마다 보관하는 송신측
pub struct ChannelSlot {
    /// 요청 슬롯. 한 번 보내면 None
    pub request: Option<oneshot::Sender<ChannelRequest>>,
    /// 클라이언트가 채널을 닫음
    pub closed: oneshot::Sender<()>,
}

/// 워커 태스크 시작 → 핸들러에 보관할 슬롯 반환
pub fn spawn(channel: Channel<Msg>, handle: Handle, ctx: &SessionContext) -> ChannelSlot {
    let (request_tx, request_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    let worker = ChannelWorker::new(channel.id(), handle, ctx.hooks.clone(), ctx.sftp_root.clone());
    tokio::spawn(worker.run(channel, request_rx, closed_rx));

    ChannelSlot { request: Some(request_tx), closed: closed_tx }
}

pub struct ChannelWorker {
    id: ChannelId,
    /// exit-status 요청은 세션 핸들로 보냄
    handle: Handle,
    hooks: Arc<dyn SessionHooks>,
    sftp_root: Option<PathBuf>,
    state: ChannelState,
}

impl ChannelWorker {
    pub fn new(id: ChannelId, handle: Handle, hooks: Arc<dyn SessionHooks>, sftp_root: Option<PathBuf>) -> Self {
        Self { id, handle, hooks, sftp_root, state: ChannelState::Open }
    }

    fn transition(&mut self, next: ChannelState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(Error::InvalidTransition { from: self.state.clone(), to: next });
        }
        let prev = std::mem::replace(&mut self.state, next);
        self.hooks.on_channel_state(self.id, &prev, &self.state);
        Ok(())
    }

    /// 이미 Closed면 무시
    fn close_state(&mut self) {
        if self.state != ChannelState::Closed {
            let _ = self.transition(ChannelState::Closed);
        }
    }

    pub async fn run(
        mut self,
        mut channel: Channel<Msg>,
        request: oneshot::Receiver<ChannelRequest>,
        closed: oneshot::Receiver<()>,
    ) {
        let request = match request.await {
            Ok(request) => request,
            Err(_) => {
                tracing::debug!("[channel] {:?} closed without a request", self.id);
                self.close_state();
                return;
            }
        };

        match request {
            ChannelRequest::Exec(command) => {
                if let Err(e) = self.execute(&mut channel, command).await {
                    tracing::error!("[channel] error handling client (channel {:?}): {}", self.id, e);
                }
                if let Err(e) = channel.close().await {
                    tracing::debug!("[channel] {:?} already closed: {}", self.id, e);
                }
            }
            ChannelRequest::Subsystem(name) => {
                if let Err(e) = self.transition(ChannelState::SubsystemOpen { name: name.clone() }) {
                    tracing::error!("[channel] error handling client (channel {:?}): {}", self.id, e);
                } else {
                    tracing::info!("[channel] {:?} starting subsystem {}", self.id, name);
                    let handler = SftpHandler::new(self.sftp_root.clone());
                    russh_sftp::server::run(channel.into_stream(), handler).await;
                    // SFTP 세션은 채널이 닫힐 때까지 russh-sftp 쪽에서 돌아감
                    let _ = closed.await;
                }
            }
        }

        self.close_state();
    }

    async fn execute(&mut self, channel: &mut Channel<Msg>, command: Vec<u8>) -> Result<()> {
        let command_str = String::from_utf8_lossy(&command).into_owned();
        tracing::info!("[channel] executing {}", command_str);
        self.transition(ChannelState::ExecQueued { command: command_str })?;

        let child = shell_command(&command).spawn()?;
        self.transition(ChannelState::Running { pid: child.id() })?;

        let status = StreamMultiplexer::new(channel, child).run().await?;
        let code = exit_code(&status);

        // 출력 drain이 끝난 뒤에만 exit-status
        self.handle
            .exit_status_request(self.id, code)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.transition(ChannelState::Exited { status: code })?;
        channel.eof().await?;
        Ok(())
    }
}

/// sh -c <command>, 표준 입출력 모두 piped
fn shell_command(command: &[u8]) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(OsStr::from_bytes(command))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
