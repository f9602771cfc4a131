// mockssh Stream Multiplexer
//
// 원격 채널 ↔ 로컬 프로세스 stdin/stdout/stderr 사이 바이트 중계
//
//   remote → stdin  : 받은 청크 그대로 write + flush
//   stdout → remote : 한 줄씩 채널 기본 출력으로
//   stderr → remote : 한 줄씩 채널 확장 출력(stderr, ext=1)으로
//
// 프로세스 파이프 I/O는 각각 별도 태스크가 담당하고, 이 모듈의 루프는
// mpsc 준비 상태만 select! 한다 → 어느 한쪽이 막혀도 다른 방향은 계속 흐름
//
// stdin 버퍼가 차면 원격 수신을 멈춤 → SSH 윈도우가 닫혀 클라이언트 쪽에서 대기
//
// 1단계(active): 프로세스가 살아있는 동안 준비된 이벤트마다 한 단위씩 전송
// 2단계(drain) : 종료 후 stdout/stderr를 EOF까지 비움 → exit-status 전에 출력 유실 없음

use russh::ChannelMsg;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};

use crate::error::{Error, Result};

/// stdout/stderr 펌프 → 멀티플렉서 사이 버퍼 (줄 단위)
const LINE_BUFFER: usize = 64;

/// 멀티플렉서 → stdin 펌프 사이 버퍼 (청크 단위)
const STDIN_BUFFER: usize = 16;

/// SSH 확장 데이터 타입 1 = stderr
const EXTENDED_DATA_STDERR: u32 = 1;

// ── RemoteChannel ────────────────────────────────────────────────────────────

/// 원격 쪽에서 들어온 입력 한 단위
#[derive(Debug, PartialEq, Eq)]
pub enum RemoteInput {
    Data(Vec<u8>),
    /// 원격이 더 이상 보낼 입력 없음 → 프로세스 stdin 닫기
    Eof,
    /// 전송 계층이 채널을 닫음
    Closed,
}

/// 멀티플렉서가 사용하는 원격 듀플렉스 채널
#[async_trait::async_trait]
pub trait RemoteChannel: Send {
    async fn recv(&mut self) -> RemoteInput;
    async fn send_stdout(&mut self, data: &[u8]) -> Result<()>;
    async fn send_stderr(&mut self, data: &[u8]) -> Result<()>;
}

#[async_trait::async_trait]
impl RemoteChannel for russh::Channel<russh::server::Msg> {
    async fn recv(&mut self) -> RemoteInput {
        loop {
            match self.wait().await {
                Some(ChannelMsg::Data { data })    => return RemoteInput::Data(data.to_vec()),
                Some(ChannelMsg::Eof)              => return RemoteInput::Eof,
                Some(ChannelMsg::Close) | None     => return RemoteInput::Closed,
                Some(_) => continue,
            }
        }
    }

    async fn send_stdout(&mut self, data: &[u8]) -> Result<()> {
        self.data(data).await?;
        Ok(())
    }

    async fn send_stderr(&mut self, data: &[u8]) -> Result<()> {
        self.extended_data(EXTENDED_DATA_STDERR, data).await?;
        Ok(())
    }
}

// ── StreamMultiplexer ────────────────────────────────────────────────────────

enum Event {
    Remote(RemoteInput),
    Stdout(Option<Vec<u8>>),
    Stderr(Option<Vec<u8>>),
    /// 보류 중인 stdin 청크를 넣을 자리. None이면 펌프가 이미 끝남
    StdinReady(Option<OwnedPermit<Vec<u8>>>),
    Exited(std::process::ExitStatus),
}

/// 채널 하나 + 프로세스 하나 전용. 채널끼리 공유 상태 없음
pub struct StreamMultiplexer<'a, R: RemoteChannel> {
    remote: &'a mut R,
    child: Child,
}

impl<'a, R: RemoteChannel> StreamMultiplexer<'a, R> {
    /// child는 stdin/stdout/stderr 모두 piped로 spawn 되어 있어야 함
    pub fn new(remote: &'a mut R, child: Child) -> Self {
        Self { remote, child }
    }

    /// 프로세스 종료 + 출력 drain 완료까지 중계
    ///
    /// 원격 채널이 먼저 닫히면 Err(ChannelClosed). 이때 child는 drop 시 kill 됨
    pub async fn run(self) -> Result<std::process::ExitStatus> {
        let Self { remote, mut child } = self;

        let stdin  = child.stdin.take().ok_or_else(|| not_piped("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| not_piped("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_piped("stderr"))?;

        let mut stdin_tx  = Some(spawn_stdin_pump(stdin));
        let mut pending: Option<Vec<u8>> = None;
        let mut stdout_rx = spawn_line_pump(stdout, "stdout");
        let mut stderr_rx = spawn_line_pump(stderr, "stderr");
        let mut stdout_open = true;
        let mut stderr_open = true;

        // ---- active phase ----
        let status = loop {
            let event = tokio::select! {
                input  = remote.recv(), if pending.is_none()    => Event::Remote(input),
                permit = reserve(stdin_tx.clone()), if pending.is_some() => Event::StdinReady(permit),
                line   = stdout_rx.recv(), if stdout_open       => Event::Stdout(line),
                line   = stderr_rx.recv(), if stderr_open       => Event::Stderr(line),
                status = child.wait()                           => Event::Exited(status?),
            };

            match event {
                Event::Remote(RemoteInput::Data(data)) => {
                    if let Some(tx) = &stdin_tx {
                        match tx.try_send(data) {
                            Ok(()) => {}
                            Err(TrySendError::Full(data)) => pending = Some(data),
                            // 프로세스가 stdin을 이미 닫았으면 버림
                            Err(TrySendError::Closed(_)) => {}
                        }
                    }
                }
                Event::StdinReady(Some(permit)) => {
                    if let Some(data) = pending.take() {
                        permit.send(data);
                    }
                }
                Event::StdinReady(None) => pending = None,
                Event::Remote(RemoteInput::Eof) => {
                    tracing::trace!("[stream] remote eof, closing process stdin");
                    stdin_tx = None;
                }
                Event::Remote(RemoteInput::Closed) => {
                    tracing::debug!("[stream] remote closed before process exit");
                    return Err(Error::ChannelClosed);
                }
                Event::Stdout(Some(line)) => remote.send_stdout(&line).await?,
                Event::Stderr(Some(line)) => remote.send_stderr(&line).await?,
                Event::Stdout(None) => stdout_open = false,
                Event::Stderr(None) => stderr_open = false,
                Event::Exited(status) => break status,
            }
        };

        // ---- drain phase ----
        drop(stdin_tx);
        while stdout_open {
            match stdout_rx.recv().await {
                Some(line) => remote.send_stdout(&line).await?,
                None       => stdout_open = false,
            }
        }
        while stderr_open {
            match stderr_rx.recv().await {
                Some(line) => remote.send_stderr(&line).await?,
                None       => stderr_open = false,
            }
        }

        tracing::debug!("[stream] process exited: {}", status);
        Ok(status)
    }
}

fn not_piped(name: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("process {} is not piped", name),
    ))
}

/// 원격 → stdin. 버퍼가 차도 멀티플렉서는 reserve()로만 기다림
fn spawn_stdin_pump(mut stdin: ChildStdin) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(STDIN_BUFFER);
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = write_chunk(&mut stdin, &chunk).await {
                tracing::debug!("[stream] stdin closed: {}", e);
                break;
            }
        }
        // stdin drop → 프로세스에 EOF
    });
    tx
}

async fn reserve(tx: Option<mpsc::Sender<Vec<u8>>>) -> Option<OwnedPermit<Vec<u8>>> {
    tx?.reserve_owned().await.ok()
}

async fn write_chunk(stdin: &mut ChildStdin, chunk: &[u8]) -> std::io::Result<()> {
    stdin.write_all(chunk).await?;
    stdin.flush().await
}

/// 프로세스 출력 → 줄 단위 청크. EOF 또는 에러에서 송신측이 닫힘
fn spawn_line_pump<T>(reader: T, name: &'static str) -> mpsc::Receiver<Vec<u8>>
where
    T: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>(LINE_BUFFER);
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("[stream] {} read failed: {}", name, e);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    /// 입력은 mpsc로 주입, 출력은 Vec에 누적
    struct FakeRemote {
        input: mpsc::UnboundedReceiver<RemoteInput>,
        /// 멀티플렉서가 가져간 입력 수
        received: usize,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl RemoteChannel for FakeRemote {
        async fn recv(&mut self) -> RemoteInput {
            match self.input.recv().await {
                Some(input) => {
                    self.received += 1;
                    input
                }
                // 주입 끝 → 원격은 열린 채로 조용함
                None => std::future::pending().await,
            }
        }

        async fn send_stdout(&mut self, data: &[u8]) -> Result<()> {
            self.stdout.extend_from_slice(data);
            Ok(())
        }

        async fn send_stderr(&mut self, data: &[u8]) -> Result<()> {
            self.stderr.extend_from_slice(data);
            Ok(())
        }
    }

    fn fake(inputs: Vec<RemoteInput>) -> FakeRemote {
        let (tx, rx) = mpsc::unbounded_channel();
        for input in inputs {
            tx.send(input).unwrap();
        }
        FakeRemote { input: rx, received: 0, stdout: Vec::new(), stderr: Vec::new() }
    }

    fn shell(command: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn echo_reaches_stdout() {
        let mut remote = fake(vec![]);
        let status = StreamMultiplexer::new(&mut remote, shell("echo 42")).run().await.unwrap();
        assert!(status.success());
        assert_eq!(remote.stdout, b"42\n");
        assert!(remote.stderr.is_empty());
    }

    #[tokio::test]
    async fn cat_echoes_every_line_in_order() {
        let lines: Vec<String> = (0..100).map(|i| format!("line-{:03}\n", i)).collect();
        let mut inputs: Vec<RemoteInput> = lines.iter()
            .map(|l| RemoteInput::Data(l.as_bytes().to_vec()))
            .collect();
        inputs.push(RemoteInput::Eof);

        let mut remote = fake(inputs);
        let status = StreamMultiplexer::new(&mut remote, shell("cat")).run().await.unwrap();
        assert!(status.success());
        assert_eq!(String::from_utf8(remote.stdout).unwrap(), lines.concat());
    }

    #[tokio::test]
    async fn redirected_output_goes_to_stderr() {
        let mut remote = fake(vec![RemoteInput::Data(b"hello\n".to_vec()), RemoteInput::Eof]);
        StreamMultiplexer::new(&mut remote, shell("cat 1>&2")).run().await.unwrap();
        assert_eq!(remote.stderr, b"hello\n");
        assert!(remote.stdout.is_empty());
    }

    #[tokio::test]
    async fn output_written_right_before_exit_is_drained() {
        let mut remote = fake(vec![]);
        let status = StreamMultiplexer::new(&mut remote, shell("printf 'a\\nb'; printf 'e' 1>&2; exit 3"))
            .run()
            .await
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(remote.stdout, b"a\nb");
        assert_eq!(remote.stderr, b"e");
    }

    #[tokio::test]
    async fn unread_stdin_stops_remote_intake() {
        let chunk = vec![b'x'; 64 * 1024];
        let inputs: Vec<RemoteInput> = (0..200).map(|_| RemoteInput::Data(chunk.clone())).collect();

        // stdin을 읽지 않는 프로세스: 파이프 + 버퍼가 차면 원격 입력을 더 받지 않음
        let mut remote = fake(inputs);
        let status = StreamMultiplexer::new(&mut remote, shell("sleep 1; echo done"))
            .run()
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(remote.stdout, b"done\n");
        assert!(remote.received < 50, "took {} chunks", remote.received);
    }

    #[tokio::test]
    async fn remote_close_abandons_process() {
        let mut remote = fake(vec![RemoteInput::Closed]);
        let result = StreamMultiplexer::new(&mut remote, shell("sleep 30")).run().await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }
}
