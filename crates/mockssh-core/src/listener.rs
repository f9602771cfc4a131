// mockssh Connection Listener
//
// Server: 테스트 코드가 직접 다루는 진입점
//   start()      : loopback 임시 포트 bind + accept 루프 태스크 시작 → 포트 반환
//   stop()       : 새 접속 수락 중단 (이미 붙은 세션은 그대로 둠)
//   connect_as() : 등록된 identity로 접속한 Client
//
// accept 루프
//   - 접속마다 SessionHandler 태스크를 따로 띄움 → 루프는 세션 때문에 막히지 않음
//   - shutdown 신호(watch)가 오면 에러 없이 종료
//   - 일시적 에러(연결 중단/리셋)는 무시, 그 외 accept 에러는 루프 종료

use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::key::PublicKey;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::config::{AuthMethod, ConnectConfig, ServerConfig};
use crate::credentials::{Credential, CredentialDescriptor, Identity, IdentityRegistry};
use crate::error::{Error, Result};
use crate::handler::{DefaultHooks, SessionContext, SessionHandler, SessionHooks};

struct Running {
    local_addr: SocketAddr,
    host_key: PublicKey,
    /// drop 되어도 accept 루프는 종료됨
    shutdown: watch::Sender<bool>,
    accept_loop: JoinHandle<Result<()>>,
}

pub struct Server {
    config: ServerConfig,
    registry: Arc<IdentityRegistry>,
    hooks: Arc<dyn SessionHooks>,
    running: Option<Running>,
}

impl Server {
    /// 기본 설정 + (이름, descriptor) 목록
    pub fn new<I, S, D>(users: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<CredentialDescriptor>,
    {
        Ok(Self::with_config(ServerConfig::default(), IdentityRegistry::from_descriptors(users)?))
    }

    pub fn with_config(config: ServerConfig, registry: IdentityRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            hooks: Arc::new(DefaultHooks),
            running: None,
        }
    }

    /// 세션 콜백 교체. start() 전에 호출해야 새 세션에 적용됨
    pub fn with_hooks(mut self, hooks: impl SessionHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub async fn start(&mut self) -> Result<u16> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        // accept 루프가 혼자 끝난 상태면 정리 후 다시 bind
        self.stop().await;

        let russh_config = self.config.russh_config()?;
        let host_key = russh_config.keys
            .first()
            .ok_or_else(|| Error::Config("no host key configured".to_string()))?
            .clone_public_key()?;

        let listener = TcpListener::bind(self.config.addr()).await?;
        let local_addr = listener.local_addr()?;

        let ctx = SessionContext {
            registry: self.registry.clone(),
            hooks: self.hooks.clone(),
            sftp_root: self.config.sftp_root.clone(),
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_loop = tokio::spawn(accept_loop(listener, russh_config, ctx, shutdown_rx));

        tracing::info!("[listener] listening on {}", local_addr);
        self.running = Some(Running { local_addr, host_key, shutdown, accept_loop });
        Ok(local_addr.port())
    }

    /// 여러 번 호출해도 안전
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        match running.accept_loop.await {
            Ok(Ok(())) => tracing::info!("[listener] stopped ({})", running.local_addr),
            Ok(Err(e)) => tracing::debug!("[listener] accept loop had already failed: {}", e),
            Err(e)     => tracing::error!("[listener] accept loop did not finish: {}", e),
        }
    }

    /// accept 루프가 살아있는 동안만 Some
    fn live(&self) -> Option<&Running> {
        self.running.as_ref().filter(|r| !r.accept_loop.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.live().is_some()
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> Result<u16> {
        self.live()
            .map(|r| r.local_addr.port())
            .ok_or(Error::NotStarted)
    }

    pub fn host_key(&self) -> Option<&PublicKey> {
        self.live().map(|r| &r.host_key)
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// 실행 중에도 가능. 다음 인증부터 바로 적용
    pub fn add_identity(&self, name: impl Into<String>, descriptor: impl Into<CredentialDescriptor>) -> Result<()> {
        self.registry.add(name, descriptor)
    }

    /// 등록된 이름 (정렬)
    pub fn users(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn identity(&self, name: &str) -> Result<Arc<Identity>> {
        self.registry.lookup(name)
    }

    /// 등록된 credential로 접속 + 인증
    pub async fn connect_as(&self, name: &str) -> Result<Client> {
        let identity = self.registry.lookup(name)?;
        let auth = match identity.credential() {
            Credential::Key { private_key_path, .. } => AuthMethod::PublicKey {
                private_key_path: private_key_path.clone(),
            },
            Credential::Password(password) => AuthMethod::Password(password.clone()),
        };
        self.connect_with(name, auth).await
    }

    /// 임의 credential로 접속 (거절 테스트용)
    pub async fn connect_with(&self, username: &str, auth: AuthMethod) -> Result<Client> {
        let running = self.live().ok_or(Error::NotStarted)?;
        let config = ConnectConfig {
            host: self.config.host.clone(),
            port: running.local_addr.port(),
            username: username.to_string(),
            auth,
        };
        Client::connect(&config, Some(running.host_key.clone())).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<russh::server::Config>,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!("[listener] shutdown requested");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!("[listener] accepted {}", peer);
                let handler = SessionHandler::new(ctx.clone(), Some(peer));
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.serve(config, stream).await {
                        tracing::debug!("[listener] session {} ended: {}", peer, e);
                    }
                });
            }
            Err(e) if is_transient(&e) => {
                tracing::debug!("[listener] accept skipped: {}", e);
            }
            Err(e) => {
                tracing::error!("[listener] accept loop terminated: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// 상대편 때문에 생긴 일회성 accept 에러
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Server {
        Server::with_config(ServerConfig::default(), IdentityRegistry::new())
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let mut server = empty();
        assert!(matches!(server.port(), Err(Error::NotStarted)));

        let port = server.start().await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(server.port().unwrap(), port);
        assert_eq!(server.host_key().unwrap().name(), "ssh-ed25519");
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok());

        server.stop().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut server = empty();
        let port = server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(Error::AlreadyStarted)));
        assert_eq!(server.port().unwrap(), port);
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_intake() {
        let mut server = empty();
        let port = server.start().await.unwrap();
        server.stop().await;
        server.stop().await;

        assert!(!server.is_running());
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn dead_accept_loop_is_not_running() {
        let mut server = empty();
        server.start().await.unwrap();
        let running = server.running.as_ref().unwrap();
        running.accept_loop.abort();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !server.running.as_ref().unwrap().accept_loop.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(!server.is_running());
        assert!(matches!(server.port(), Err(Error::NotStarted)));

        // 다시 start 가능
        let port = server.start().await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.port().unwrap(), port);
        server.stop().await;
    }

    #[test]
    fn transient_accept_errors() {
        use std::io::{Error as IoError, ErrorKind};
        assert!(is_transient(&IoError::from(ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&IoError::from(ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn connect_as_unknown_identity() {
        let mut server = empty();
        server.start().await.unwrap();
        let err = server.connect_as("unknown-user").await.err().unwrap();
        assert!(matches!(err, Error::UnknownIdentity(ref name) if name == "unknown-user"));
        server.stop().await;
    }
}
