// mockssh Credential Store
//
// Identity      : 이름 + (키 | 패스워드) 중 정확히 하나
// KeyType       : ssh-rsa / ssh-dss / ecdsa-sha2-* / ssh-ed25519
// CredentialDescriptor : 등록 요청 (bare path | key | password)
// IdentityRegistry     : 이름 → Identity, 런타임 추가 가능
//
// 검증 함수들은 부작용 없음. 알 수 없는 identity는 에러가 아니라 거절

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use russh::keys::key::PublicKey;
use russh::keys::PublicKeyBase64;

use crate::error::{Error, Result};

// ── KeyType ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcdsaCurve {
    NistP256,
    NistP384,
    NistP521,
}

/// 키 알고리즘
///
/// Dss는 이름으로만 인식. russh-keys가 DSA 키를 읽지 못하므로 등록은 Config 에러
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Dss,
    Ecdsa(EcdsaCurve),
    Ed25519,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa                         => "ssh-rsa",
            KeyType::Dss                         => "ssh-dss",
            KeyType::Ecdsa(EcdsaCurve::NistP256) => "ecdsa-sha2-nistp256",
            KeyType::Ecdsa(EcdsaCurve::NistP384) => "ecdsa-sha2-nistp384",
            KeyType::Ecdsa(EcdsaCurve::NistP521) => "ecdsa-sha2-nistp521",
            KeyType::Ed25519                     => "ssh-ed25519",
        }
    }

    /// 키 알고리즘 이름 → KeyType
    ///
    /// RSA는 서명 해시에 따라 "rsa-sha2-256" 등으로도 불림
    pub fn from_algorithm(name: &str) -> Option<Self> {
        if name == "ssh-rsa" || name.starts_with("rsa-sha2-") {
            return Some(KeyType::Rsa);
        }
        name.parse().ok()
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ssh-rsa"             => Ok(KeyType::Rsa),
            "ssh-dss"             => Ok(KeyType::Dss),
            "ecdsa-sha2-nistp256" => Ok(KeyType::Ecdsa(EcdsaCurve::NistP256)),
            "ecdsa-sha2-nistp384" => Ok(KeyType::Ecdsa(EcdsaCurve::NistP384)),
            "ecdsa-sha2-nistp521" => Ok(KeyType::Ecdsa(EcdsaCurve::NistP521)),
            "ssh-ed25519"         => Ok(KeyType::Ed25519),
            other => Err(Error::Config(format!("Unable to handle key of type {}", other))),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// identity 등록 요청
///
/// key_type이 None이면 키 파일에서 알고리즘을 읽어 결정
/// public_key가 있으면 파일에서 유도하지 않고 그대로 사용 ("ssh-ed25519 AAAA..." 형식)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialDescriptor {
    Key {
        private_key_path: PathBuf,
        key_type: Option<KeyType>,
        public_key: Option<String>,
    },
    Password {
        password: String,
    },
}

impl CredentialDescriptor {
    pub fn key(private_key_path: impl Into<PathBuf>) -> Self {
        CredentialDescriptor::Key {
            private_key_path: private_key_path.into(),
            key_type: None,
            public_key: None,
        }
    }

    pub fn password(password: impl Into<String>) -> Self {
        CredentialDescriptor::Password { password: password.into() }
    }

    /// 필드 매핑 형식 ({"type": "key", "private_key_path": ...})에서 생성
    pub fn from_fields<'a, I>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let fields: BTreeMap<&str, &str> = fields.into_iter().collect();
        let required = |name: &str| {
            fields.get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| Error::Config(format!("credential is missing key '{}'", name)))
        };

        match required("type")?.as_str() {
            "key" => Ok(CredentialDescriptor::Key {
                private_key_path: PathBuf::from(required("private_key_path")?),
                key_type: fields.get("key_type").map(|t| t.parse()).transpose()?,
                public_key: fields.get("public_key").map(|k| k.to_string()),
            }),
            "password" => Ok(CredentialDescriptor::Password { password: required("password")? }),
            other => Err(Error::Config(format!("Unrecognized credential type: {}", other))),
        }
    }
}

/// "type=password,password=secret" 또는 bare path
impl FromStr for CredentialDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.contains('=') {
            return Ok(CredentialDescriptor::key(s));
        }
        let pairs = s.split(',')
            .map(|pair| {
                pair.split_once('=')
                    .ok_or_else(|| Error::Config(format!("malformed credential field: {}", pair)))
            })
            .collect::<Result<Vec<_>>>()?;
        CredentialDescriptor::from_fields(pairs)
    }
}

impl From<&str> for CredentialDescriptor {
    fn from(path: &str) -> Self {
        CredentialDescriptor::key(path)
    }
}

impl From<PathBuf> for CredentialDescriptor {
    fn from(path: PathBuf) -> Self {
        CredentialDescriptor::key(path)
    }
}

impl From<&Path> for CredentialDescriptor {
    fn from(path: &Path) -> Self {
        CredentialDescriptor::key(path)
    }
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    PublicKey,
    Password,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::PublicKey => "publickey",
            AuthKind::Password  => "password",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    Key {
        private_key_path: PathBuf,
        key_type: KeyType,
        public_key: PublicKey,
    },
    Password(String),
}

#[derive(Debug, Clone)]
pub struct Identity {
    name: String,
    credential: Credential,
}

impl Identity {
    /// descriptor → Identity
    ///
    /// 키 credential은 등록 시점에 공개키를 바로 유도 (lazy 아님)
    pub fn register(name: impl Into<String>, descriptor: CredentialDescriptor) -> Result<Self> {
        let credential = match descriptor {
            CredentialDescriptor::Password { password } => Credential::Password(password),
            CredentialDescriptor::Key { private_key_path, key_type, public_key } => {
                if key_type == Some(KeyType::Dss) {
                    return Err(Error::Config("DSS keys are not supported".to_string()));
                }
                let public_key = match public_key {
                    Some(openssh) => parse_openssh_public_key(&openssh)?,
                    None => russh::keys::load_secret_key(&private_key_path, None)?
                        .clone_public_key()?,
                };
                let detected = KeyType::from_algorithm(public_key.name()).ok_or_else(|| {
                    Error::Config(format!("Unable to handle key of type {}", public_key.name()))
                })?;
                let key_type = key_type.unwrap_or(detected);
                if key_type != detected {
                    return Err(Error::Config(format!(
                        "{} holds a {} key, not {}",
                        private_key_path.display(), detected, key_type
                    )));
                }
                Credential::Key { private_key_path, key_type, public_key }
            }
        };
        Ok(Self { name: name.into(), credential })
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn credential(&self) -> &Credential { &self.credential }

    pub fn auth_kind(&self) -> AuthKind {
        match self.credential {
            Credential::Key { .. }   => AuthKind::PublicKey,
            Credential::Password(_)  => AuthKind::Password,
        }
    }
}

/// "ssh-ed25519 AAAA... comment" 또는 base64 본문만
fn parse_openssh_public_key(s: &str) -> Result<PublicKey> {
    let mut parts = s.split_whitespace();
    let first = parts.next().unwrap_or_default();
    let base64 = match parts.next() {
        Some(body) if KeyType::from_algorithm(first).is_some() => body,
        _ => first,
    };
    Ok(russh::keys::parse_public_key_base64(base64)?)
}

// ── IdentityRegistry ─────────────────────────────────────────────────────────

/// 이름 → Identity
///
/// Identity는 완성된 뒤 Arc로 한 번에 삽입 → 조회 쪽은 완성본 아니면 없음만 봄
/// 파생 캐시 없음: names()는 매번 현재 맵에서 계산
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: RwLock<HashMap<String, Arc<Identity>>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<I, S, D>(users: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<CredentialDescriptor>,
    {
        let registry = Self::new();
        for (name, descriptor) in users {
            registry.add(name, descriptor)?;
        }
        Ok(registry)
    }

    /// 같은 이름이면 교체
    pub fn add(&self, name: impl Into<String>, descriptor: impl Into<CredentialDescriptor>) -> Result<()> {
        let identity = Arc::new(Identity::register(name, descriptor.into())?);
        tracing::debug!("[credentials] registered '{}' ({})", identity.name(), identity.auth_kind().as_str());
        self.identities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.name().to_string(), identity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Identity>> {
        self.identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Identity>> {
        self.get(name).ok_or_else(|| Error::UnknownIdentity(name.to_string()))
    }

    /// 등록된 이름 (정렬)
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn verify_password(&self, name: &str, password: &str) -> bool {
        let Some(identity) = self.get(name) else {
            tracing::debug!("[credentials] unknown user '{}'", name);
            return false;
        };
        match identity.credential() {
            Credential::Password(stored) if stored == password => {
                tracing::debug!("[credentials] accepting password for '{}'", name);
                true
            }
            Credential::Password(_) => {
                tracing::debug!("[credentials] rejecting password for '{}'", name);
                false
            }
            Credential::Key { .. } => {
                tracing::debug!("[credentials] '{}' is not a password identity; rejecting password", name);
                false
            }
        }
    }

    pub fn verify_public_key(&self, name: &str, key: &PublicKey) -> bool {
        let Some(identity) = self.get(name) else {
            tracing::debug!("[credentials] unknown user '{}'", name);
            return false;
        };
        match identity.credential() {
            Credential::Key { public_key, .. } => {
                let accepted = public_key.public_key_base64() == key.public_key_base64();
                tracing::debug!(
                    "[credentials] {} public key for '{}'",
                    if accepted { "accepting" } else { "rejecting" },
                    name
                );
                accepted
            }
            Credential::Password(_) => {
                tracing::debug!("[credentials] '{}' is not a key identity; rejecting public key", name);
                false
            }
        }
    }

    /// None: 알 수 없는 identity (거절은 조회 단계에서 일어남)
    pub fn allowed_auth_method(&self, name: &str) -> Option<AuthKind> {
        self.get(name).map(|identity| identity.auth_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sample-user-key");
    const SAMPLE_PUB: &str = include_str!("../tests/fixtures/sample-user-key.pub");
    const OTHER_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/other-user-key");

    fn public_key_of(path: &str) -> PublicKey {
        russh::keys::load_secret_key(path, None).unwrap().clone_public_key().unwrap()
    }

    fn registry() -> IdentityRegistry {
        IdentityRegistry::from_descriptors([
            ("sample-user", CredentialDescriptor::key(SAMPLE_KEY)),
            ("sample-user2", CredentialDescriptor::password("greeneggs&spam")),
        ])
        .unwrap()
    }

    #[test]
    fn key_type_round_trips_wire_names() {
        for name in ["ssh-rsa", "ssh-dss", "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp521", "ssh-ed25519"] {
            assert_eq!(name.parse::<KeyType>().unwrap().as_str(), name);
        }
        assert_eq!(KeyType::from_algorithm("rsa-sha2-512"), Some(KeyType::Rsa));
        assert!(matches!("ssh-foo".parse::<KeyType>(), Err(Error::Config(_))));
    }

    #[test]
    fn descriptor_from_fields() {
        let d = CredentialDescriptor::from_fields([("type", "password"), ("password", "x")]).unwrap();
        assert_eq!(d, CredentialDescriptor::password("x"));

        let d = CredentialDescriptor::from_fields([
            ("type", "key"),
            ("private_key_path", "/tmp/k"),
            ("key_type", "ssh-ed25519"),
        ])
        .unwrap();
        assert_eq!(d, CredentialDescriptor::Key {
            private_key_path: PathBuf::from("/tmp/k"),
            key_type: Some(KeyType::Ed25519),
            public_key: None,
        });
    }

    #[test]
    fn descriptor_errors_are_config_errors() {
        let missing_type = CredentialDescriptor::from_fields([("password", "x")]);
        assert!(matches!(missing_type, Err(Error::Config(m)) if m.contains("'type'")));

        let bad_type = CredentialDescriptor::from_fields([("type", "token")]);
        assert!(matches!(bad_type, Err(Error::Config(m)) if m.contains("Unrecognized")));

        let missing_path = CredentialDescriptor::from_fields([("type", "key")]);
        assert!(matches!(missing_path, Err(Error::Config(m)) if m.contains("private_key_path")));

        let missing_password = CredentialDescriptor::from_fields([("type", "password")]);
        assert!(matches!(missing_password, Err(Error::Config(m)) if m.contains("'password'")));
    }

    #[test]
    fn descriptor_from_str() {
        assert_eq!("/keys/id".parse::<CredentialDescriptor>().unwrap(), CredentialDescriptor::key("/keys/id"));
        assert_eq!(
            "type=password,password=s3cret".parse::<CredentialDescriptor>().unwrap(),
            CredentialDescriptor::password("s3cret")
        );
        assert!("type=password,oops".parse::<CredentialDescriptor>().is_err());
    }

    #[test]
    fn key_identity_derives_public_key_eagerly() {
        let identity = Identity::register("u", CredentialDescriptor::key(SAMPLE_KEY)).unwrap();
        match identity.credential() {
            Credential::Key { key_type, public_key, .. } => {
                assert_eq!(*key_type, KeyType::Ed25519);
                assert_eq!(public_key.public_key_base64(), public_key_of(SAMPLE_KEY).public_key_base64());
            }
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[test]
    fn key_type_mismatch_is_rejected() {
        let descriptor = CredentialDescriptor::Key {
            private_key_path: PathBuf::from(SAMPLE_KEY),
            key_type: Some(KeyType::Rsa),
            public_key: None,
        };
        assert!(matches!(Identity::register("u", descriptor), Err(Error::Config(_))));
    }

    #[test]
    fn dss_registration_is_a_config_error() {
        let descriptor = CredentialDescriptor::from_fields([
            ("type", "key"),
            ("private_key_path", SAMPLE_KEY),
            ("key_type", "ssh-dss"),
        ])
        .unwrap();
        let err = Identity::register("u", descriptor).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("DSS")), "{}", err);
    }

    #[test]
    fn missing_key_file_fails_registration() {
        let result = Identity::register("u", CredentialDescriptor::key("/nonexistent/mockssh-key"));
        assert!(result.is_err());
    }

    #[test]
    fn supplied_public_key_skips_file() {
        let descriptor = CredentialDescriptor::Key {
            private_key_path: PathBuf::from("/not/read/at/registration"),
            key_type: None,
            public_key: Some(SAMPLE_PUB.trim().to_string()),
        };
        let identity = Identity::register("u", descriptor).unwrap();
        assert_eq!(identity.auth_kind(), AuthKind::PublicKey);
    }

    #[test]
    fn password_verification() {
        let registry = registry();
        assert!(registry.verify_password("sample-user2", "greeneggs&spam"));
        assert!(!registry.verify_password("sample-user2", "greeneggs"));
        // 키 identity에 패스워드 → 항상 거절
        assert!(!registry.verify_password("sample-user", "greeneggs&spam"));
        assert!(!registry.verify_password("nobody", "greeneggs&spam"));
    }

    #[test]
    fn public_key_verification() {
        let registry = registry();
        let sample = public_key_of(SAMPLE_KEY);
        let other = public_key_of(OTHER_KEY);
        assert!(registry.verify_public_key("sample-user", &sample));
        assert!(!registry.verify_public_key("sample-user", &other));
        assert!(!registry.verify_public_key("sample-user2", &sample));
        assert!(!registry.verify_public_key("nobody", &sample));
    }

    #[test]
    fn allowed_method_follows_credential_kind() {
        let registry = registry();
        assert_eq!(registry.allowed_auth_method("sample-user"), Some(AuthKind::PublicKey));
        assert_eq!(registry.allowed_auth_method("sample-user2").map(|k| k.as_str()), Some("password"));
        assert_eq!(registry.allowed_auth_method("nobody"), None);
    }

    #[test]
    fn names_reflect_runtime_additions() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["sample-user", "sample-user2"]);
        registry.add("new-user", SAMPLE_KEY).unwrap();
        assert_eq!(registry.names(), vec!["new-user", "sample-user", "sample-user2"]);
        assert!(matches!(registry.lookup("ghost"), Err(Error::UnknownIdentity(n)) if n == "ghost"));
    }
}
