// mockssh Config
//
// 설정 파일 없음: 테스트 코드에서 구조체로 직접 구성
// ServerConfig  : Default = loopback + 임시 포트 + 내장 호스트키
// ConnectConfig : 테스트 클라이언트 접속 정보 (connect_as가 identity로부터 만듦)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::key::KeyPair;

use crate::error::Result;

/// 내장 서버 호스트키 (ed25519, 테스트 전용)
const DEFAULT_SERVER_KEY: &str = include_str!("../keys/server-key");

#[derive(Debug, Clone)]
pub enum HostKey {
    /// crate에 포함된 테스트용 키
    Embedded,
    /// OpenSSH 포맷 개인키 파일
    File(PathBuf),
}

impl HostKey {
    pub fn load(&self) -> Result<KeyPair> {
        let key = match self {
            HostKey::Embedded   => russh::keys::decode_secret_key(DEFAULT_SERVER_KEY, None)?,
            HostKey::File(path) => russh::keys::load_secret_key(path, None)?,
        };
        Ok(key)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub host_key: HostKey,
    /// SFTP 루트 디렉토리. None이면 OS 경로를 그대로 사용
    pub sftp_root: Option<PathBuf>,
    /// 인증 실패 응답 지연. 테스트가 느려지지 않도록 기본 0
    pub auth_rejection_time: Duration,
    pub inactivity_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            host_key: HostKey::Embedded,
            sftp_root: None,
            auth_rejection_time: Duration::ZERO,
            inactivity_timeout: None,
        }
    }
}

impl ServerConfig {
    /// bind 주소. 문자열로 합치지 않음 → IPv6 호스트("::1")도 그대로
    pub fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    /// russh 서버 설정으로 변환 (호스트키 로드 포함)
    pub(crate) fn russh_config(&self) -> Result<Arc<russh::server::Config>> {
        let config = russh::server::Config {
            keys: vec![self.host_key.load()?],
            auth_rejection_time: self.auth_rejection_time,
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: self.inactivity_timeout,
            ..Default::default()
        };
        Ok(Arc::new(config))
    }
}

// ── 클라이언트 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

#[derive(Debug, Clone)]
pub enum AuthMethod {
    Password(String),
    PublicKey { private_key_path: PathBuf },
}

impl ConnectConfig {
    pub fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), ("127.0.0.1", 0));
        assert!(config.sftp_root.is_none());
    }

    #[test]
    fn connect_addr() {
        let config = ConnectConfig {
            host: "127.0.0.1".to_string(),
            port: 2222,
            username: "sample-user".to_string(),
            auth: AuthMethod::Password("pw".to_string()),
        };
        assert_eq!(config.addr(), ("127.0.0.1", 2222));
    }

    #[test]
    fn ipv6_host_resolves() {
        use std::net::{SocketAddr, ToSocketAddrs};
        let config = ServerConfig { host: "::1".to_string(), ..ServerConfig::default() };
        let resolved: Vec<SocketAddr> = config.addr().to_socket_addrs().unwrap().collect();
        assert_eq!(resolved, vec!["[::1]:0".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn embedded_host_key_loads() {
        let key = HostKey::Embedded.load().unwrap();
        assert_eq!(key.name(), "ssh-ed25519");
    }
}
