use anyhow::anyhow;
use clap::Parser;
use log::*;
use peering_cli::config::{CliCommand, Config, IdCommand, SettingsCommand, SimulateCommand, TrustCommand};
use peering_cli::node_files::NodeFiles;
use peering_cli::simulation::run_simulation;
use std::time::Duration;
use trusted_peering::{resolve_peering_url, PublicKey, TrustedNetworkManager};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();
    let files = NodeFiles::new(global_options.data_dir);

    let result = match command {
        CliCommand::Id(id_command) => exec_id_command(id_command, &files),
        CliCommand::Trust(trust_command) => exec_trust_command(trust_command, &files),
        CliCommand::Settings(settings_command) => exec_settings_command(settings_command, &files),
        CliCommand::Simulate(simulate_command) => simulate(simulate_command, &files).await,
    };

    if let Err(err) = result {
        eprintln!("** Error ** \n {err}");
        std::process::exit(1);
    }
}

fn exec_id_command(cmd: IdCommand, files: &NodeFiles) -> Result<(), anyhow::Error> {
    match cmd {
        IdCommand::Create { name, force } => {
            let identity = files.create_identity(&name, force)?;
            println!("Identity created: {identity}");
            println!("Public key: {}", identity.public_key()?);
            println!("Saved to {}", files.identity_path().display());
        }
        IdCommand::Show => {
            let identity = files.load_identity()?;
            let pub_key = identity.public_key()?;
            println!("Name:               {}", identity.name());
            println!("Public key:         {pub_key}");
            println!("Transport identity: {}", pub_key.transport_identity());
        }
    }
    Ok(())
}

fn exec_trust_command(cmd: TrustCommand, files: &NodeFiles) -> Result<(), anyhow::Error> {
    let store = files.open_trust_store()?;
    match cmd {
        TrustCommand::Add { name, pub_key, peering_url } => {
            let pub_key: PublicKey = pub_key.parse()?;
            let addrs = resolve_peering_url(&peering_url)?;
            debug!("{peering_url} resolves to {addrs:?}");
            let tp = store.trust_peer(&name, pub_key, &peering_url)?;
            println!("Trusted peer: {tp}");
        }
        TrustCommand::Remove { peer } => {
            let found = store.trusted_peers_by_pub_key_or_name(&[peer.clone()])?;
            let tp = found.first().ok_or_else(|| anyhow!("No trusted peer matches {peer}."))?;
            store.distrust_peer(&tp.pub_key)?;
            println!("No longer trusted: {tp}");
        }
        TrustCommand::List => {
            let peers = store.trusted_peers()?;
            println!("{} trusted peers found.", peers.len());
            for tp in peers {
                println!("{tp}");
            }
        }
    }
    Ok(())
}

fn exec_settings_command(cmd: SettingsCommand, files: &NodeFiles) -> Result<(), anyhow::Error> {
    match cmd {
        SettingsCommand::Init => {
            let path = files.save_default_config()?;
            println!("Default configuration written to {}", path.display());
        }
        SettingsCommand::Show => {
            let config = files.load_config()?;
            print!("{}", serde_yml::to_string(&config)?);
        }
    }
    Ok(())
}

async fn simulate(cmd: SimulateCommand, files: &NodeFiles) -> Result<(), anyhow::Error> {
    if cmd.nodes == 0 {
        return Err(anyhow!("A cluster needs at least one node."));
    }
    let config = files.load_config()?;
    info!("Simulating {} nodes, {} broadcasts each", cmd.nodes, cmd.messages);
    let report = run_simulation(cmd.nodes, cmd.messages, Duration::from_secs(cmd.timeout), config).await?;
    for (name, statuses) in &report.statuses {
        println!("{name}:");
        for status in statuses {
            let alive = if status.alive { "alive" } else { "silent" };
            println!("  {:<8} {:<16} {alive:<7} users={}", status.name, status.peering_url, status.num_users);
        }
    }
    println!(
        "Delivered {} of {} messages in {:?}",
        report.total_delivered(),
        report.expected * report.delivered.len(),
        report.elapsed
    );
    if !report.is_complete() {
        return Err(anyhow!("Some messages were not delivered: {:?}", report.delivered));
    }
    Ok(())
}
