// mockssh CLI Arguments
//
// 순수 파싱만 담당 (IO 없음, 테스트 용이)
//
// mockssh [--host H] [--port N] [--root DIR] [--host-key PATH] NAME=DESCRIPTOR...
//   DESCRIPTOR: 개인키 경로 또는 "type=password,password=secret" 형식

use std::path::PathBuf;

use mockssh_core::CredentialDescriptor;

#[derive(Debug)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub sftp_root: Option<PathBuf>,
    pub host_key: Option<PathBuf>,
    pub users: Vec<(String, CredentialDescriptor)>,
}

impl Options {
    /// args: 프로그램 이름 제외
    pub fn parse<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Options {
            host: "127.0.0.1".to_string(),
            port: 0,
            sftp_root: None,
            host_key: None,
            users: Vec::new(),
        };

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let mut value = |flag: &str| {
                args.next()
                    .map(|v| v.as_ref().to_string())
                    .ok_or_else(|| format!("Usage: {} <value>", flag))
            };

            match arg {
                "--host"     => options.host = value(arg)?,
                "--port"     => {
                    let port = value(arg)?;
                    options.port = port.parse().map_err(|_| format!("Invalid port: {}", port))?;
                }
                "--root"     => options.sftp_root = Some(PathBuf::from(value(arg)?)),
                "--host-key" => options.host_key = Some(PathBuf::from(value(arg)?)),
                other if other.starts_with("--") => return Err(format!("Unknown option: {}", other)),
                user => {
                    let (name, descriptor) = user
                        .split_once('=')
                        .ok_or_else(|| format!("Expected NAME=DESCRIPTOR, got: {}", user))?;
                    let descriptor = descriptor.parse::<CredentialDescriptor>().map_err(|e| e.to_string())?;
                    options.users.push((name.to_string(), descriptor));
                }
            }
        }

        if options.users.is_empty() {
            return Err("At least one NAME=DESCRIPTOR is required".to_string());
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_password_users() {
        let options = Options::parse([
            "--port", "2222",
            "--root", "/tmp/jail",
            "alice=/keys/alice",
            "bob=type=password,password=secret",
        ]).unwrap();

        assert_eq!(options.port, 2222);
        assert_eq!(options.sftp_root, Some(PathBuf::from("/tmp/jail")));
        assert_eq!(options.users[0], ("alice".to_string(), CredentialDescriptor::key("/keys/alice")));
        assert_eq!(options.users[1], ("bob".to_string(), CredentialDescriptor::password("secret")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Options::parse(Vec::<&str>::new()).is_err());
        assert!(Options::parse(["--port", "high", "a=/k"]).is_err());
        assert!(Options::parse(["--port"]).is_err());
        assert!(Options::parse(["--verbose", "a=/k"]).is_err());
        assert!(Options::parse(["alice"]).is_err());
        assert!(Options::parse(["bob=type=token,token=x"]).unwrap_err().contains("Unrecognized credential type"));
    }
}
