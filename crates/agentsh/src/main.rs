//! # agentsh
//!
//! Boots a local peer inside an in-process mesh, preloads agents, and either
//! hands the terminal to the operator console or stays up until Ctrl-C.
//!
//! Operator output goes to stdout. Logs go to stderr and are filtered with
//! `RUST_LOG`.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::CommandFactory;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use agentsh_core::Platform;
use agentsh_core::Shell;
use agentsh_core::agentfile;
use agentsh_core::console::Console;
use agentsh_mesh::Mesh;
use agentsh_mesh::MeshPlatform;

use crate::config::Cli;
use crate::config::Config;

const DEFAULT_LOG_FILTER: &str = "warn,agentsh=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = config::read_file(&cli)?;
    let config = match Config::resolve(cli, file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", Cli::command().render_usage());
            return Err(e);
        }
    };

    let platform = boot(&config).await?;
    info!(peer = %platform.home().id(), name = %config.peer_name, "peer started");

    if config.interactive {
        let mut shell = Shell::new(platform.clone(), Console::stdout(), config.shell);
        shell
            .run(BufReader::new(tokio::io::stdin()))
            .await
            .context("console input failed")?;
    } else {
        info!("running headless, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
        if platform.is_online() {
            platform.leave().await.context("cannot leave the network")?;
        }
    }

    info!("bye");
    Ok(())
}

/// Builds the mesh, the configured remote peers and the local peer, then
/// preloads agents and joins if asked to.
async fn boot(config: &Config) -> anyhow::Result<Arc<MeshPlatform>> {
    let mesh = Mesh::new();

    for peer in &config.peers {
        let node = mesh.add_node(peer.name.as_str(), peer.location());
        node.set_online(true);
        for agent in &peer.agents {
            node.create_agent(&agent.class, &agent.name, agent.category.as_deref(), agent.location())
                .with_context(|| format!("cannot create agent {} on peer {}", agent.name, peer.name))?;
        }
        info!(peer = %node.id(), name = %peer.name, agents = peer.agents.len(), "simulated peer online");
    }

    let platform = Arc::new(MeshPlatform::new(
        mesh,
        &config.peer_name,
        config.location,
        config.locator(),
    ));

    if let Some(path) = &config.agent_file {
        let report = agentfile::load_path(platform.as_ref(), path)
            .await
            .with_context(|| format!("cannot preload agents from {}", path.display()))?;
        if report.failed > 0 {
            warn!(created = report.created, failed = report.failed, "some preloaded agents were not created");
        } else {
            info!(created = report.created, "preloaded agents");
        }
    }

    if config.autojoin {
        platform.join().await.context("cannot join the network")?;
    }

    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::FileConfig;

    fn resolved(toml: &str, args: &[&str]) -> Config {
        let file: FileConfig = toml::from_str(toml).unwrap();
        let cli = Cli::parse_from(std::iter::once("agentsh").chain(args.iter().copied()));
        Config::resolve(cli, file).unwrap()
    }

    #[tokio::test]
    async fn test_boot_builds_peers_and_joins() {
        let config = resolved(
            r#"
            [[peers]]
            name = "tokyo"

            [[peers.agents]]
            class = "echo"
            name = "greeter"
            "#,
            &["home", "-j"],
        );

        let platform = boot(&config).await.unwrap();
        assert!(platform.is_online());
        assert_eq!(platform.mesh().len(), 2);

        let mut stream = platform.discover("name == greeter", "getName", &[]).await.unwrap();
        let reply = stream.next(Some(std::time::Duration::from_secs(2))).await.unwrap();
        assert_eq!(reply.outcome, Ok("greeter".into()));
    }

    #[tokio::test]
    async fn test_boot_preloads_agent_file() {
        let path = std::env::temp_dir().join(format!("agentsh-boot-{}.agents", std::process::id()));
        std::fs::write(&path, "# preload\necho alice\ncounter bob tally\n").unwrap();

        let config = resolved("", &["home", "-A", path.to_str().unwrap()]);
        let platform = boot(&config).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let agents = platform.list_agents(None).await.unwrap();
        let names: Vec<_> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert!(!platform.is_online());
    }

    #[tokio::test]
    async fn test_boot_rejects_unknown_agent_class() {
        let config = resolved(
            r#"
            [[peers]]
            name = "tokyo"

            [[peers.agents]]
            class = "robot"
            name = "r2"
            "#,
            &["home"],
        );
        assert!(boot(&config).await.is_err());
    }
}
