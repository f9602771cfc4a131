// mockssh Session Handler (russh 서버 핸들러)
//
// 접속 하나 = SessionHandler 하나
// 협상(키 교환, 호스트키 제시)은 russh가 처리하고, 여기서는 콜백만 구현
//
// 인증     : SessionHooks → IdentityRegistry
// 채널     : "session"만 허용, 채널마다 ChannelWorker 태스크
// exec     : 채널의 one-shot 슬롯에 명령 전달 후 바로 success 응답
// 서브시스템 : "sftp"만 허용
//
// SessionHooks: 콜백 판단을 교체할 수 있는 전략 인터페이스
// 기본 구현(DefaultHooks)은 registry를 그대로 따름. 테스트에서 일부만 오버라이드

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use russh::keys::key::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodSet};
use tokio::net::TcpStream;

use crate::channel::{self, ChannelRequest, ChannelSlot};
use crate::credentials::{AuthKind, IdentityRegistry};
use crate::error::{Error, Result};
use crate::state::ChannelState;

// ── SessionHooks ─────────────────────────────────────────────────────────────

/// 세션 콜백 판단 (기본 구현 있음)
///
/// 필요한 메서드만 오버라이드:
/// ```ignore
/// struct AnyPassword;
/// impl SessionHooks for AnyPassword {
///     fn check_password(&self, _: &IdentityRegistry, _: &str, _: &str) -> bool { true }
/// }
/// ```
pub trait SessionHooks: Send + Sync {
    fn check_password(&self, registry: &IdentityRegistry, user: &str, password: &str) -> bool {
        registry.verify_password(user, password)
    }

    fn check_public_key(&self, registry: &IdentityRegistry, user: &str, key: &PublicKey) -> bool {
        registry.verify_public_key(user, key)
    }

    /// 모르는 사용자는 두 방식 모두 제시 (어차피 검증에서 거절됨)
    fn allowed_methods(&self, registry: &IdentityRegistry, user: &str) -> MethodSet {
        match registry.allowed_auth_method(user) {
            Some(AuthKind::PublicKey) => MethodSet::PUBLICKEY,
            Some(AuthKind::Password)  => MethodSet::PASSWORD,
            None => MethodSet::PUBLICKEY | MethodSet::PASSWORD,
        }
    }

    /// 채널 종류별 허용 여부 ("session", "direct-tcpip" ...)
    fn check_channel_open(&self, kind: &str) -> bool {
        kind == "session"
    }

    /// UTF-8이 아닌 바이트는 U+FFFD로 보임. 실행은 원래 바이트 그대로
    fn check_exec(&self, _command: &str) -> bool {
        true
    }

    fn on_channel_state(&self, _channel: ChannelId, _prev: &ChannelState, _next: &ChannelState) {}
}

pub struct DefaultHooks;

impl SessionHooks for DefaultHooks {}

// ── SessionContext ───────────────────────────────────────────────────────────

/// 서버가 모든 세션에 나눠주는 공유 컨텍스트
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<IdentityRegistry>,
    pub hooks: Arc<dyn SessionHooks>,
    pub sftp_root: Option<PathBuf>,
}

// ── SessionHandler ───────────────────────────────────────────────────────────

pub struct SessionHandler {
    ctx: SessionContext,
    peer: Option<SocketAddr>,
    user: Option<String>,
    channels: HashMap<ChannelId, ChannelSlot>,
}

impl SessionHandler {
    pub fn new(ctx: SessionContext, peer: Option<SocketAddr>) -> Self {
        Self { ctx, peer, user: None, channels: HashMap::new() }
    }

    /// 협상부터 연결 종료까지
    pub async fn serve(self, config: Arc<russh::server::Config>, stream: TcpStream) -> Result<()> {
        let peer = self.peer;
        tracing::debug!("[session] negotiating with {:?}", peer);
        let running = russh::server::run_stream(config, stream, self).await?;
        running.await?;
        tracing::debug!("[session] {:?} disconnected", peer);
        Ok(())
    }

    fn reject(&self, user: &str) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(self.ctx.hooks.allowed_methods(&self.ctx.registry, user)),
        }
    }

    fn accept(&mut self, user: &str, kind: AuthKind) -> Auth {
        tracing::info!("[session] {:?} authenticated as '{}' ({})", self.peer, user, kind.as_str());
        self.user = Some(user.to_string());
        Auth::Accept
    }

    /// 채널의 one-shot 슬롯에 요청 전달. 이미 소비된 슬롯이면 false
    fn dispatch(&mut self, id: ChannelId, request: ChannelRequest) -> bool {
        let sender = self.channels.get_mut(&id).and_then(|slot| slot.request.take());
        match sender {
            Some(sender) => sender.send(request).is_ok(),
            None => {
                tracing::warn!("[session] channel {:?} already has a request, rejecting {:?}", id, request);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl russh::server::Handler for SessionHandler {
    type Error = Error;

    async fn auth_none(&mut self, user: &str) -> std::result::Result<Auth, Self::Error> {
        Ok(self.reject(user))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> std::result::Result<Auth, Self::Error> {
        if self.ctx.hooks.check_password(&self.ctx.registry, user, password) {
            return Ok(self.accept(user, AuthKind::Password));
        }
        tracing::debug!("[session] password rejected for '{}'", user);
        Ok(self.reject(user))
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        if self.ctx.hooks.check_public_key(&self.ctx.registry, user, public_key) {
            return Ok(Auth::Accept);
        }
        tracing::debug!("[session] public key {} not accepted for '{}'", public_key.name(), user);
        Ok(self.reject(user))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> std::result::Result<Auth, Self::Error> {
        if self.ctx.hooks.check_public_key(&self.ctx.registry, user, public_key) {
            return Ok(self.accept(user, AuthKind::PublicKey));
        }
        tracing::debug!("[session] public key rejected for '{}'", user);
        Ok(self.reject(user))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        if !self.ctx.hooks.check_channel_open("session") {
            return Ok(false);
        }
        let id = channel.id();
        tracing::debug!("[session] channel {:?} opened by '{}'", id, self.user.as_deref().unwrap_or("?"));
        let slot = channel::spawn(channel, session.handle(), &self.ctx);
        self.channels.insert(id, slot);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let allowed = self.ctx.hooks.check_channel_open("direct-tcpip");
        if !allowed {
            tracing::debug!("[session] refused direct-tcpip to {}:{}", host_to_connect, port_to_connect);
        }
        Ok(allowed)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let allowed = self.ctx.hooks.check_exec(&String::from_utf8_lossy(data));
        if allowed && self.dispatch(channel, ChannelRequest::Exec(data.to_vec())) {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if name == "sftp" && self.dispatch(channel, ChannelRequest::Subsystem(name.to_string())) {
            session.channel_success(channel);
        } else {
            tracing::debug!("[session] subsystem '{}' refused on channel {:?}", name, channel);
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> std::result::Result<(), Self::Error> {
        tracing::debug!("[session] shell refused on channel {:?}", channel);
        session.channel_failure(channel);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> std::result::Result<(), Self::Error> {
        if let Some(slot) = self.channels.remove(&channel) {
            let _ = slot.closed.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sample-user-key");

    fn registry() -> IdentityRegistry {
        let registry = IdentityRegistry::new();
        registry.add("sample-user", SAMPLE_KEY).unwrap();
        registry.add("pw-user", crate::credentials::CredentialDescriptor::password("secret")).unwrap();
        registry
    }

    #[test]
    fn default_hooks_follow_registry() {
        let registry = registry();
        let hooks = DefaultHooks;
        assert!(hooks.check_password(&registry, "pw-user", "secret"));
        assert!(!hooks.check_password(&registry, "pw-user", "wrong"));
        assert!(!hooks.check_password(&registry, "sample-user", "secret"));
        assert!(!hooks.check_password(&registry, "nobody", "secret"));
    }

    #[test]
    fn allowed_methods_per_identity() {
        let registry = registry();
        let hooks = DefaultHooks;
        assert_eq!(hooks.allowed_methods(&registry, "sample-user"), MethodSet::PUBLICKEY);
        assert_eq!(hooks.allowed_methods(&registry, "pw-user"), MethodSet::PASSWORD);
        assert_eq!(hooks.allowed_methods(&registry, "nobody"), MethodSet::PUBLICKEY | MethodSet::PASSWORD);
    }

    #[test]
    fn only_session_channels() {
        let hooks = DefaultHooks;
        assert!(hooks.check_channel_open("session"));
        assert!(!hooks.check_channel_open("direct-tcpip"));
        assert!(!hooks.check_channel_open("x11"));
    }

    #[test]
    fn override_single_hook() {
        struct AnyPassword;
        impl SessionHooks for AnyPassword {
            fn check_password(&self, _: &IdentityRegistry, _: &str, _: &str) -> bool { true }
        }
        let registry = registry();
        assert!(AnyPassword.check_password(&registry, "sample-user", "whatever"));
        assert_eq!(AnyPassword.allowed_methods(&registry, "sample-user"), MethodSet::PUBLICKEY);
    }
}
