use crate::cli::{CreateArgs, RepairArgs};
use crate::commands::records::{self, config_dir};
use crate::commands::CommandError;
use crate::games::GamesManager;
use crate::provision::{
    Mode, OptionalPorts, Orchestrator, ProvisionError, ProvisionReport, ProvisionRequest,
};
use crate::pve::{EnvironmentProbe, PveManager};

pub async fn create(args: CreateArgs) -> Result<(), CommandError> {
    let host = PveManager::new();
    let request = match args.config.clone() {
        Some(path) => ProvisionRequest {
            mode: Mode::Create,
            ..records::load_request_file(&path)?
        },
        None => build_request(args, &EnvironmentProbe::new(&host)).await?,
    };
    execute(&host, request).await
}

pub async fn repair(args: RepairArgs) -> Result<(), CommandError> {
    let base = match &args.config {
        Some(path) => records::load_request_file(path)?,
        None => records::load_record(&config_dir(), args.id)?.request,
    };
    if base.container_id != args.id {
        return Err(CommandError::RecordMismatch {
            requested: args.id,
            found: base.container_id,
        });
    }

    let host = PveManager::new();
    let request = ProvisionRequest {
        mode: Mode::Repair,
        ..base
    };
    execute(&host, request).await
}

/// Fill in everything the operator left out from host discovery.
pub async fn build_request(
    args: CreateArgs,
    probe: &EnvironmentProbe<'_>,
) -> Result<ProvisionRequest, CommandError> {
    let static_address_cidr = args.ip.ok_or(CommandError::MissingArgument("--ip"))?;
    let gateway = args
        .gateway
        .ok_or(CommandError::MissingArgument("--gateway"))?;

    let container_id = match args.id {
        Some(id) => id,
        None => probe.next_container_id().await,
    };
    let storage_pool = match args.storage {
        Some(storage) => storage,
        None => probe.detect_storage_pool().await,
    };
    let network_bridge = match args.bridge {
        Some(bridge) => bridge,
        None => probe.detect_network_bridge().await,
    };

    let optional_ports = match (args.query_port, args.beacon_port) {
        (Some(query_port), Some(beacon_port)) => Some(OptionalPorts {
            query_port,
            beacon_port,
        }),
        _ => None,
    };

    Ok(ProvisionRequest {
        mode: Mode::Create,
        container_id,
        container_name: args.name,
        storage_pool,
        network_bridge,
        cpu_cores: args.cores,
        memory_mb: args.memory,
        disk_gb: args.disk,
        static_address_cidr,
        gateway,
        unprivileged: args.unprivileged,
        server_bind_address: args.bind_address.unwrap_or(static_address_cidr.address),
        server_port: args.port,
        optional_ports,
        update_on_start: !args.no_update_on_start,
        restart_interval_seconds: args.restart_interval,
        game: args.game,
        host_root: args.host_root,
        template: args.template,
    })
}

async fn execute(host: &PveManager, request: ProvisionRequest) -> Result<(), CommandError> {
    let profile = GamesManager::load()?.get_profile(&request.game)?;
    tracing::info!(
        "{} container {} ({}) for {}",
        request.mode,
        request.container_id,
        request.container_name,
        profile.name
    );

    let result = Orchestrator::new(host, host).run(&request, &profile).await;

    if should_record(request.mode, &result) {
        match records::save_record(&config_dir(), &request) {
            Ok(path) => tracing::info!("Saved request to {}", path.display()),
            Err(e) => tracing::warn!("Could not save request: {}", e),
        }
    }

    let report = result?;
    print_summary(&request, &report);
    Ok(())
}

/// A request is worth keeping once a container exists for it to repair.
fn should_record(mode: Mode, result: &Result<ProvisionReport, ProvisionError>) -> bool {
    match (mode, result) {
        (_, Ok(_)) => true,
        (Mode::Create, Err(e)) => e.stage().is_some_and(|s| s.container_allocated()),
        (Mode::Repair, Err(_)) => false,
    }
}

fn print_summary(request: &ProvisionRequest, report: &ProvisionReport) {
    println!();
    println!("✅ Container {} is provisioned", report.handle.id());
    println!("  Address      {}", request.static_address_cidr);
    println!(
        "  Game port    {}:{}",
        request.server_bind_address, request.server_port
    );
    if let Some(ports) = &request.optional_ports {
        println!(
            "  Query/beacon {}/{}",
            ports.query_port, ports.beacon_port
        );
    }
    println!("  Service      {}", report.service_unit);
    println!(
        "  Server files {}",
        request.host_dir().join("server").display()
    );
    println!("  Saves        {}", request.host_dir().join("saves").display());
    println!();
    println!(
        "  Logs: pct exec {} -- journalctl -u {} -f",
        report.handle.id(),
        report.service_unit
    );
}
