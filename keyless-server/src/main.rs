//! Keyless SSL key server binary.
//!
//! Owns everything spec.md treats as an "external collaborator": CLI
//! parsing, TOML configuration, TLS context construction, private-key
//! directory loading, and worker supervision. The protocol engine itself
//! — codec, registry, dispatcher, connection FSM — lives in
//! `keyless-shared` and is used here only through its public API.

mod config;
mod keys;
mod supervisor;
mod tls;

use clap::Parser;

use config::{CliArgs, ServerConfig};

fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let config = match ServerConfig::load(cli) {
        Ok(config) => config,
        Err(e) => {
            // No logger is initialized yet for a config error this early;
            // print directly and exit 1 per §6's startup-failure contract.
            eprintln!("keyless-server: configuration error: {e}");
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.effective_log_level()),
    )
    .init();

    log::info!(
        "starting keyless-server: {}:{}, {} worker(s), key directory {}",
        config.bind_address,
        config.port,
        config.workers,
        config.key_directory.display()
    );

    let registry = match keys::load_key_registry(&config.key_directory) {
        Ok(registry) => registry,
        Err(e) => {
            log::error!("failed to load private keys: {e}");
            std::process::exit(1);
        }
    };
    log::info!("loaded {} private key(s)", registry.len());

    let tls_acceptor = match tls::build_acceptor(&config) {
        Ok(acceptor) => acceptor,
        Err(e) => {
            log::error!("failed to build TLS context: {e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("keyless-server-worker")
        .build()?;

    let result = runtime.block_on(supervisor::run(config, registry, tls_acceptor));

    if let Err(e) = result {
        log::error!("server error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
