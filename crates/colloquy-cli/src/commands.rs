use std::path::Path;

use anyhow::Context;

use colloquy_server::{ColloquyServer, ServerConfig};

use crate::cli::{Cli, Command, Overrides};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let config = resolve_config(cli.config.as_deref(), args.overrides)?;
            cmd_serve(config)
        }
        Command::Config(args) => {
            let config = resolve_config(cli.config.as_deref(), args.overrides)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// File, then environment, then flags.
fn resolve_config(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<ServerConfig> {
    let config = ServerConfig::load(path)
        .context("loading configuration")?
        .apply_env()
        .context("applying environment overrides")?;
    apply_overrides(config, overrides)
}

fn apply_overrides(mut config: ServerConfig, overrides: Overrides) -> anyhow::Result<ServerConfig> {
    if let Some(bind) = overrides.bind {
        config.bind_addr = bind;
    }
    if let Some(store) = overrides.store {
        config.store.kind = store.parse()?;
    }
    if let Some(dsn) = overrides.postgres_dsn {
        config.store.postgres_dsn = Some(dsn);
    }
    Ok(config)
}

fn cmd_serve(config: ServerConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = ColloquyServer::new(config)
        .await
        .context("starting server")?;
    server.serve().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_server::StoreKind;

    #[test]
    fn flags_override_config() {
        let overrides = Overrides {
            bind: Some("127.0.0.1:7000".parse().unwrap()),
            store: Some("postgres".into()),
            postgres_dsn: Some("postgres://localhost/c".into()),
        };
        let config = apply_overrides(ServerConfig::default(), overrides).unwrap();
        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.store.kind, StoreKind::Postgres);
        assert_eq!(config.store.postgres_dsn.as_deref(), Some("postgres://localhost/c"));
    }

    #[test]
    fn empty_overrides_change_nothing() {
        let config = apply_overrides(ServerConfig::default(), Overrides::default()).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn unknown_store_flag_fails() {
        let overrides = Overrides {
            store: Some("cassandra".into()),
            ..Default::default()
        };
        assert!(apply_overrides(ServerConfig::default(), overrides).is_err());
    }
}
