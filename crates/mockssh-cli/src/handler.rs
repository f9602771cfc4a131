// mockssh CLI Handler
//
// core 호출만: 서버 시작 → 포트 출력 → Ctrl-C 대기 → stop

use mockssh_core::config::{HostKey, ServerConfig};
use mockssh_core::credentials::IdentityRegistry;
use mockssh_core::{ChannelState, Server, SessionHooks};
use russh::ChannelId;

use crate::commands::Options;

/// 채널 상태 변화를 콘솔에 출력
struct CliHooks;

impl SessionHooks for CliHooks {
    fn on_channel_state(&self, channel: ChannelId, _prev: &ChannelState, next: &ChannelState) {
        println!("[state] channel {:?} → {:?}", channel, next);
    }
}

pub async fn run(options: Options) -> mockssh_core::Result<()> {
    let config = ServerConfig {
        host: options.host,
        port: options.port,
        host_key: options.host_key.map(HostKey::File).unwrap_or(HostKey::Embedded),
        sftp_root: options.sftp_root,
        ..ServerConfig::default()
    };
    let registry = IdentityRegistry::from_descriptors(options.users)?;

    let mut server = Server::with_config(config, registry).with_hooks(CliHooks);
    let port = server.start().await?;

    println!("mockssh listening on {}:{}", server.host(), port);
    for user in server.users() {
        let identity = server.identity(&user)?;
        println!("  {} ({})", user, identity.auth_kind().as_str());
    }
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    println!("Stopped.");
    Ok(())
}
