//! netpol-agentd - offline policy resolution daemon.
//!
//! Loads a policy model snapshot into the managed-object store, runs the
//! policy manager to settlement, and dumps the resolved forwarding state.
//! Useful for validating controller snapshots without a dataplane.

use clap::Parser;
use netpol_modb::{Modb, MoObject};
use netpol_policy::PolicyManager;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Network policy resolution daemon
#[derive(Parser, Debug)]
#[command(name = "netpol-agentd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Policy model snapshot (JSON array of managed objects)
    #[arg(short, long)]
    model: PathBuf,

    /// Policy domain name
    #[arg(short, long, default_value = "default")]
    domain: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Initializes tracing/logging subsystem.
fn init_logging(level: &str) {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting netpol-agentd ---");
    info!("Policy domain: {}", args.domain);

    let raw = match std::fs::read_to_string(&args.model) {
        Ok(raw) => raw,
        Err(err) => {
            error!(path = %args.model.display(), %err, "failed to read model snapshot");
            return ExitCode::FAILURE;
        }
    };
    let objects: Vec<MoObject> = match serde_json::from_str(&raw) {
        Ok(objects) => objects,
        Err(err) => {
            error!(path = %args.model.display(), %err, "malformed model snapshot");
            return ExitCode::FAILURE;
        }
    };
    info!(objects = objects.len(), "loaded model snapshot");

    let store = Arc::new(Modb::new());
    let manager = PolicyManager::new(store.clone(), args.domain);
    manager.start();

    let mut mutator = store.mutator();
    for object in objects {
        mutator.put(object);
    }
    mutator.commit();
    manager.wait_idle();

    let mut contracts = BTreeSet::new();
    for group in manager.get_groups() {
        let bridge_domain = manager
            .get_bd_for_group(&group)
            .map(|o| o.uri().to_string());
        let routing_domain = manager
            .get_rd_for_group(&group)
            .map(|o| o.uri().to_string());
        let vnid = manager.get_vnid_for_group(&group);
        let subnets = manager.get_subnets_for_group(&group).len();
        info!(
            group = %group,
            bd = ?bridge_domain,
            rd = ?routing_domain,
            ?vnid,
            subnets,
            "resolved endpoint group"
        );
        contracts.extend(manager.get_contracts_for_group(&group));
    }

    for contract in contracts {
        let providers = manager.get_contract_providers(&contract).len();
        let consumers = manager.get_contract_consumers(&contract).len();
        info!(contract = %contract, providers, consumers, "contract");
        for rule in manager.get_contract_rules(&contract) {
            info!("  {rule}");
        }
    }

    for routing_domain in manager.get_routing_domains() {
        info!(rd = %routing_domain, "routing domain");
    }

    manager.stop();
    info!("netpol-agentd complete");
    ExitCode::SUCCESS
}
