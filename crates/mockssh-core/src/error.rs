// mockssh Error Types
//
// thiserror 없이 직접 구현
// Display: 에러 메시지 포맷팅
// From<..>: ? 연산자로 IO / russh / 키 파싱 에러 자동 변환

use std::fmt;
use crate::state::ChannelState;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// 잘못된 credential descriptor (필드 누락, 알 수 없는 type / key_type)
    Config(String),
    /// 등록되지 않은 identity 이름 (요청한 이름 그대로 보관)
    UnknownIdentity(String),
    Key(russh::keys::Error),
    Ssh(russh::Error),
    Auth(String),
    InvalidTransition {
        from: ChannelState,
        to: ChannelState,
    },
    Sftp(String),
    AlreadyStarted,
    NotStarted,
    ChannelClosed,
    /// 상대편이 요청을 거절함 (exec, subsystem 등)
    Rejected(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e)              => write!(f, "IO error: {}", e),
            Error::Config(s)          => write!(f, "Configuration error: {}", s),
            Error::UnknownIdentity(s) => write!(f, "Unknown identity: {}", s),
            Error::Key(e)             => write!(f, "Key error: {}", e),
            Error::Ssh(e)             => write!(f, "SSH error: {}", e),
            Error::Auth(s)            => write!(f, "Auth failed: {}", s),
            Error::InvalidTransition { from, to } => write!(f, "Invalid channel state transition: {:?} → {:?}", from, to),
            Error::Sftp(s)            => write!(f, "SFTP error: {}", s),
            Error::AlreadyStarted     => write!(f, "Server already started"),
            Error::NotStarted         => write!(f, "Server not started"),
            Error::ChannelClosed      => write!(f, "Channel closed by peer"),
            Error::Rejected(s)        => write!(f, "Request rejected: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e)  => Some(e),
            Error::Key(e) => Some(e),
            Error::Ssh(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<russh::Error> for Error {
    fn from(e: russh::Error) -> Self {
        Error::Ssh(e)
    }
}

impl From<russh::keys::Error> for Error {
    fn from(e: russh::keys::Error) -> Self {
        Error::Key(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_identity_carries_exact_name() {
        let e = Error::UnknownIdentity("unknown-user".to_string());
        assert_eq!(e.to_string(), "Unknown identity: unknown-user");
        assert!(matches!(e, Error::UnknownIdentity(ref n) if n == "unknown-user"));
    }

    #[test]
    fn io_error_converts_with_source() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy").into();
        assert!(e.to_string().starts_with("IO error"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
