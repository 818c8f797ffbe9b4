use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use veinmine_common::{Material, PlayerId, Position};
use veinmine_config::PluginConfig;
use veinmine_mining::{
    CostSettings, GridWorld, MaterialPolicy, MemoryInventory, MiningEngine, MiningRequest,
};
use veinmine_progress::{RewardLedger, TracingSink};
use veinmine_service::VeinService;

const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "veinmine-cli", about = "Admin tool for the cluster-mining service")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, configuration summary and store status
    Info,
    /// Mine a cube of ore in memory and print the outcome
    Mine {
        /// Material the cube is made of
        #[arg(short, long, default_value = "DIAMOND_ORE")]
        material: String,
        /// Edge length of the cube
        #[arg(short, long, default_value = "3")]
        size: i32,
        /// Cluster cap; the configured flat cap when omitted
        #[arg(long)]
        max_blocks: Option<usize>,
        #[arg(long)]
        silk_touch: bool,
        #[arg(short, long, default_value = "0")]
        fortune: u32,
        /// RNG seed for the drop rolls
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// List the materials each tool may cluster-mine
    DumpAllowedMaterials,
    /// Set a player's level, online here or not
    SetPlayerLevel {
        /// Player UUID
        #[arg(short, long)]
        player: String,
        #[arg(short, long)]
        level: u32,
    },
    /// Save dirty players and run one sync pass
    ForceSync,
    /// Reconnect to the shared store and reconcile fallback data
    ReconnectStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => PluginConfig::load(path)?.0,
        None => PluginConfig::default(),
    };
    tracing::debug!(
        server = %config.server_id,
        source = ?cli.config,
        "configuration loaded"
    );

    match cli.command {
        Commands::Info => {
            println!("veinmine-cli v{}", env!("CARGO_PKG_VERSION"));
            for info in [
                veinmine_common::crate_info(),
                veinmine_config::crate_info(),
                veinmine_mining::crate_info(),
                veinmine_progress::crate_info(),
                veinmine_persist::crate_info(),
                veinmine_service::crate_info(),
            ] {
                println!("  {info}");
            }
            println!("server: {}", config.server_id);
            println!(
                "leveling: {}, max-blocks: {}, achievements: {}",
                if config.leveling_enabled { "on" } else { "off" },
                config.max_blocks,
                config.achievements.len()
            );
            let service = start(config).await?;
            let status = service.status();
            println!(
                "store: {} ({}), local snapshot: {}",
                status.gateway.location, status.gateway.mode, status.gateway.local_dir
            );
            match status.cursor {
                Some(c) => println!("sync log head: id={} ts={}", c.last_id, c.last_timestamp),
                None => println!("sync log: inactive"),
            }
        }
        Commands::Mine {
            material,
            size,
            max_blocks,
            silk_touch,
            fortune,
            seed,
        } => {
            let material: Material = material.parse()?;
            let policy = MaterialPolicy::new(config.allowed_materials.clone());
            let Some(tool) = policy.tool_for(material) else {
                anyhow::bail!("{material} is not allowed for any tool");
            };
            let edge = size.max(1);
            let mut world = GridWorld::new();
            world.fill(
                Position::new(0, 0, 0),
                Position::new(edge - 1, edge - 1, edge - 1),
                material,
            );
            let origin = Position::new(edge / 2, edge / 2, edge / 2);
            let req = MiningRequest {
                origin,
                material,
                max_cluster_size: max_blocks.unwrap_or(config.max_blocks as usize),
                allowed_materials: policy.allowed_for(tool),
                tool,
                silk_touch,
                fortune_level: fortune,
                unbreaking_level: 0,
                costs: CostSettings::new(config.durability_multiplier, config.hunger_multiplier),
            };

            let engine = MiningEngine::default();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let outcome = engine.execute(&req, &world, &mut rng);
            if !outcome.accepted() {
                anyhow::bail!("request rejected");
            }
            let player = PlayerId::new();
            let mut inventory = MemoryInventory::new(u32::MAX);
            let report = engine.apply(&outcome, player, &mut world, &mut inventory);

            println!(
                "Mined {} with a {tool}: {} blocks ({} cleared + origin)",
                material,
                report.blocks_mined(),
                report.cleared.len()
            );
            for stack in &report.granted {
                println!("  {stack}");
            }
            println!(
                "tool damage: {}, hunger: {:.2}, remaining {}: {}",
                report.tool_damage,
                report.hunger_delta,
                material,
                world.count_of(material)
            );
        }
        Commands::DumpAllowedMaterials => {
            let policy = MaterialPolicy::new(config.allowed_materials.clone());
            for (tool, materials) in policy.allowed_materials() {
                let names: Vec<&str> = materials.iter().map(|m| m.name()).collect();
                println!("{tool}: {}", names.join(", "));
            }
        }
        Commands::SetPlayerLevel { player, level } => {
            let player: PlayerId = player.parse()?;
            let service = start(config).await?;
            service.set_player_level(player, level).await?;
            println!("{player} is now level {level}");
            service.shutdown(SHUTDOWN_LIMIT).await?;
        }
        Commands::ForceSync => {
            let service = start(config).await?;
            let (flushed, synced) = service.force_sync().await?;
            tracing::info!(cursor = ?synced.cursor, "forced sync finished");
            println!(
                "saved {} players ({:?}); pushed {}, received {}, applied {}, skipped {}",
                flushed.players,
                flushed.target,
                synced.pushed,
                synced.received,
                synced.applied,
                synced.skipped
            );
        }
        Commands::ReconnectStore => {
            let service = start(config).await?;
            let report = service.reconnect_store().await?;
            println!(
                "reconnected ({}); reconciled {} players from the local snapshot",
                service.status().gateway.mode,
                report.players
            );
        }
    }

    Ok(())
}

async fn start(config: PluginConfig) -> anyhow::Result<VeinService> {
    Ok(VeinService::start(config, Arc::new(TracingSink), Arc::new(RewardLedger::default())).await?)
}
