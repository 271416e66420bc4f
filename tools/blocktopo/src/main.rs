use std::path::PathBuf;

use blockmesh::geometry::faces;
use blockmesh::mesh::slot_region;
use blockmesh::prelude::*;
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use datasize::DataSize as _;
use eyre::eyre;

mod config;

use config::{import_toml, Config};

fn main() -> eyre::Result<()> {
    // Set up nice colored error handing.
    color_eyre::install()?;
    // Specify cli argument parsing.
    let matches = Command::new("blocktopo")
        .about("Builds a block mesh and prints its decomposition and neighbor tables")
        .version("0.1.0")
        .config_args()
        .get_matches();

    // Compute log filter level.
    let level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).init();

    let mut config = load_config(&matches)?;
    if let Some(&rank) = matches.get_one::<usize>("rank") {
        config.rank = rank;
    }

    eyre::ensure!(
        config.rank < config.workers,
        "rank {} is out of range for {} workers",
        config.rank,
        config.workers
    );

    let mesh = build(&config)?;

    log::info!(
        "Mesh uses approximately {} bytes of heap memory",
        mesh.estimate_heap_size()
    );

    print_decomposition(&mesh);

    if matches.get_flag("tables") {
        print_tables(&mesh);
    }

    Ok(())
}

fn load_config(matches: &ArgMatches) -> eyre::Result<Config> {
    let path = matches
        .get_one::<PathBuf>("config")
        .ok_or_else(|| eyre!("failed to specify config argument"))?;

    log::info!("Loading configuration from {}", path.display());
    import_toml(path)
}

/// Builds the mesh, then applies every requested refinement and cost in order.
fn build(config: &Config) -> eyre::Result<Mesh> {
    let mut mesh = Mesh::new(config.mesh, config.workers, config.rank)?;

    for loc in config.refine.iter() {
        let leaf = mesh
            .tree()
            .find_leaf(loc)
            .ok_or_else(|| eyre!("no block at {:?} to refine", loc))?;
        let gid = mesh
            .tree()
            .gid(leaf)
            .ok_or_else(|| eyre!("{:?} is not a block", loc))?;

        let mut flags = vec![false; mesh.num_blocks()];
        flags[gid] = true;
        mesh.refine(&flags)?;
    }

    if !config.costs.is_empty() {
        for cost in config.costs.iter() {
            let loc = cost.location();
            let leaf = mesh
                .tree()
                .find_leaf(&loc)
                .ok_or_else(|| eyre!("no block at {:?} to assign a cost to", loc))?;
            let gid = mesh
                .tree()
                .gid(leaf)
                .ok_or_else(|| eyre!("{:?} is not a block", loc))?;
            mesh.set_cost(gid, cost.cost)?;
        }

        mesh.rebalance()?;
    }

    Ok(mesh)
}

fn print_decomposition(mesh: &Mesh) {
    let decomposition = mesh.decomposition();

    println!(
        "{} blocks over {} workers, max level {}, imbalance {:.3}",
        mesh.num_blocks(),
        mesh.num_workers(),
        mesh.tree().max_level(),
        decomposition.imbalance()
    );

    for rank in 0..decomposition.num_workers() {
        let range = decomposition.range_of(rank);
        println!(
            "  rank {rank:>4}: blocks {:>6}..{:<6} cost {:.3}",
            range.start,
            range.end,
            decomposition.cost_of(rank)
        );
    }
}

fn print_tables(mesh: &Mesh) {
    let topology = mesh.topology();

    println!("Topology of rank {}", mesh.rank());

    for local in 0..topology.num_blocks() {
        let gid = topology.gid(local);
        let loc = mesh.tree().location(gid);
        let boundary = topology.boundary(local);

        println!("block {gid} level {} lx {:?}", loc.level, loc.lx);

        for face in faces() {
            println!(
                "  face {}{}: {:?}",
                if face.side { "outer_x" } else { "inner_x" },
                face.axis + 1,
                boundary[face]
            );
        }

        for slot in 0..topology.num_slots() {
            let entries: Vec<_> = topology
                .slot(local, slot)
                .iter()
                .filter(|entry| !entry.is_none())
                .map(|entry| {
                    format!(
                        "(gid {}, level {}, rank {}, destn {})",
                        entry.gid, entry.level, entry.rank, entry.destn
                    )
                })
                .collect();

            if entries.is_empty() {
                continue;
            }

            let offsets = slot_region(slot).map(|region| region.offsets());
            println!("  slot {slot:>2} {:?}: {}", offsets, entries.join(" "));
        }
    }
}

/// Extension trait for defining helper methods on `clap::Command`.
trait CommandExt {
    fn config_args(self) -> Self;
}

impl CommandExt for Command {
    fn config_args(self) -> Self {
        self.arg(
            arg!(-c --config <FILE> "Sets the mesh config file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-r --rank <RANK> "Overrides the rank whose topology is built")
                .required(false)
                .value_parser(value_parser!(usize)),
        )
        .arg(arg!(-t --tables "Prints the neighbor tables of local blocks").action(ArgAction::SetTrue))
        .arg(arg!(-v --verbose ... "Increases logging verbosity").action(ArgAction::Count))
    }
}
