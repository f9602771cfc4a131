// 통합 테스트 공용 헬퍼
#![allow(dead_code)]

use mockssh_core::{IdentityRegistry, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

pub const SAMPLE_USER_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sample-user-key");
pub const OTHER_USER_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/other-user-key");

/// RUST_LOG=debug cargo test -p mockssh-core
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// sample-user(키) 하나로 시작한 서버
pub async fn sample_server() -> Server {
    started(ServerConfig::default()).await
}

pub async fn started(config: ServerConfig) -> Server {
    init_tracing();
    let registry = IdentityRegistry::new();
    registry.add("sample-user", SAMPLE_USER_KEY).unwrap();
    let mut server = Server::with_config(config, registry);
    server.start().await.unwrap();
    server
}
