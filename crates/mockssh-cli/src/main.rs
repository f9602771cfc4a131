// mockssh CLI
//
// Usage: mockssh [--host H] [--port N] [--root DIR] [--host-key PATH] NAME=DESCRIPTOR...

use std::env;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod handler;

use commands::Options;

#[tokio::main]
async fn main() {
    // RUST_LOG=debug cargo run -p mockssh-cli -- alice=./keys/alice
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let options = match Options::parse(env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            println!("{}", message);
            println!();
            print_usage();
            return;
        }
    };

    if let Err(e) = handler::run(options).await {
        println!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("mockssh - disposable SSH/SFTP server for tests");
    println!();
    println!("Usage: mockssh [--host H] [--port N] [--root DIR] [--host-key PATH] NAME=DESCRIPTOR...");
    println!();
    println!("DESCRIPTOR is a private key path or type=password,password=<value>");
    println!();
    println!("Example:");
    println!("  mockssh alice=./keys/alice");
    println!("  mockssh --port 2222 --root /tmp/jail bob=type=password,password=secret");
}
