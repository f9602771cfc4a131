// mockssh Core Library (russh 기반)
//
// 테스트 안에서 띄우는 일회용 SSH/SFTP 서버
//
//   credentials : identity 등록 / 인증 검증
//   listener    : Server (start / stop / connect_as)
//   handler     : 접속별 russh 콜백 + SessionHooks
//   channel     : 채널별 워커 (exec / sftp)
//   stream      : 프로세스 stdio ↔ 채널 중계
//   sftp        : SFTP 요청 → 파일시스템
//   client      : 테스트용 접속 객체

pub mod channel;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod listener;
pub mod sftp;
pub mod state;
pub mod stream;
pub mod utils;

pub use client::{Client, ExecChannel, ExecOutput, FileEntry, SftpClient};
pub use config::{AuthMethod, ConnectConfig, HostKey, ServerConfig};
pub use credentials::{CredentialDescriptor, EcdsaCurve, Identity, IdentityRegistry, KeyType};
pub use error::{Error, Result};
pub use handler::{DefaultHooks, SessionHooks};
pub use listener::Server;
pub use state::ChannelState;
