use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use center_of_mass::{
    config::ComSettings,
    engine::{self, Pose},
    generate::{generate_scene, GenerateOptions},
    mesh::Mesh,
    scene::{ObjectId, Scene},
    scene_file::{SceneFile, SceneLoader},
    scheduler::TokioTimer,
    session::ComSession,
    web::{self, WebServerConfig},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Moves a marker to the center of mass of a collection")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print objects, mass metadata and settings of a scene
    Show { scene: PathBuf },
    /// Recompute the center of mass once
    Update {
        scene: PathBuf,
        #[command(flatten)]
        overrides: SettingsOverrides,
        /// Write the moved marker back to the scene file
        #[arg(long)]
        write: bool,
    },
    /// Recompute continuously until Ctrl+C or the tick limit
    Watch {
        scene: PathBuf,
        #[command(flatten)]
        overrides: SettingsOverrides,
        /// Stop after this many ticks, successful or not
        #[arg(long)]
        ticks: Option<u64>,
        #[arg(long)]
        write: bool,
    },
    /// Edit mass metadata of objects (all objects when none are named)
    Mass {
        #[arg(value_enum)]
        op: MassOp,
        scene: PathBuf,
        #[arg(long, value_delimiter = ',')]
        objects: Vec<String>,
        /// Density written by `set`
        #[arg(long)]
        density: Option<f64>,
        /// Volume written by `set`
        #[arg(long)]
        volume: Option<f64>,
    },
    /// Write a random demo scene
    Generate {
        out: PathBuf,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        #[arg(long, default_value_t = 8)]
        count: usize,
        #[arg(long, default_value_t = 10.0)]
        extent: f64,
        #[arg(long, default_value_t = 0.0)]
        inactive_ratio: f64,
    },
    /// Serve the HTTP control panel
    Serve {
        scene: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Write the scene back on shutdown
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MassOp {
    Add,
    Remove,
    Activate,
    Deactivate,
    Toggle,
    Volume,
    Set,
}

#[derive(Debug, Args)]
struct SettingsOverrides {
    #[arg(long)]
    marker: Option<String>,
    #[arg(long)]
    group: Option<String>,
    /// Override the scene's snap-cursor flag (true or false)
    #[arg(long)]
    snap_cursor: Option<bool>,
    /// Override the scene's scale-to-floor flag (true or false)
    #[arg(long)]
    scale_to_floor: Option<bool>,
    #[arg(long)]
    floor: Option<f64>,
    /// Hundredths of a second between continuous updates
    #[arg(long)]
    update_rate: Option<u32>,
}

impl SettingsOverrides {
    fn apply(&self, settings: &mut ComSettings) -> Result<()> {
        if let Some(marker) = &self.marker {
            settings.marker = Some(marker.clone());
        }
        if let Some(group) = &self.group {
            settings.group = Some(group.clone());
        }
        if let Some(snap) = self.snap_cursor {
            settings.snap_cursor = snap;
        }
        if let Some(scale) = self.scale_to_floor {
            settings.scale_to_floor = scale;
        }
        if let Some(floor) = self.floor {
            settings.floor = floor;
        }
        if let Some(rate) = self.update_rate {
            settings.update_rate = rate;
        }
        settings.validate()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let loader = SceneLoader::new(".");

    match cli.command {
        Command::Show { scene } => {
            let file = loader.load(&scene)?;
            let snapshot = file.build_scene().snapshot();
            println!("{}", serde_yaml::to_string(&file.settings)?);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Update {
            scene,
            overrides,
            write,
        } => {
            let mut file = loader.load(&scene)?;
            overrides.apply(&mut file.settings)?;
            let mut world = file.build_scene();
            let pose = engine::recompute(&mut world, &file.settings)?;
            println!("{}", serde_json::to_string_pretty(&pose)?);
            if write {
                loader.save(&scene, &SceneFile::capture(&world, &file.settings))?;
            }
        }
        Command::Watch {
            scene,
            overrides,
            ticks,
            write,
        } => {
            let mut file = loader.load(&scene)?;
            overrides.apply(&mut file.settings)?;
            let world = watch(&file, ticks).await?;
            if write {
                loader.save(&scene, &SceneFile::capture(&world, &file.settings))?;
            }
        }
        Command::Mass {
            op,
            scene,
            objects,
            density,
            volume,
        } => {
            let is_set = matches!(op, MassOp::Set);
            if is_set && density.is_none() && volume.is_none() {
                bail!("`mass set` needs --density and/or --volume");
            }
            if !is_set && (density.is_some() || volume.is_some()) {
                bail!("--density and --volume only apply to `mass set`");
            }
            let file = loader.load(&scene)?;
            let mut world = file.build_scene();
            let ids = select(&world, &objects)?;
            let affected = match op {
                MassOp::Add => world.add_mass_properties(&ids),
                MassOp::Remove => world.remove_mass_properties(&ids),
                MassOp::Activate => world.set_active_all(&ids, true),
                MassOp::Deactivate => world.set_active_all(&ids, false),
                MassOp::Toggle => world.toggle_active(&ids),
                MassOp::Volume => world.recalculate_volume(&ids, Mesh::volume),
                MassOp::Set => world.set_mass_values(&ids, density, volume)?,
            };
            loader.save(&scene, &SceneFile::capture(&world, &file.settings))?;
            println!("{op:?}: {affected} of {} objects affected", ids.len());
        }
        Command::Generate {
            out,
            seed,
            count,
            extent,
            inactive_ratio,
        } => {
            let name = out
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("generated")
                .to_string();
            let file = generate_scene(&GenerateOptions {
                name,
                seed,
                count,
                extent,
                inactive_ratio,
            })?;
            let path = loader.save(&out, &file)?;
            println!("Wrote {} bodies to {}", count, path.display());
        }
        Command::Serve {
            scene,
            host,
            port,
            write,
        } => {
            let file = loader.load(&scene)?;
            web::run(WebServerConfig {
                scene: file,
                host,
                port,
                save_to: write.then_some(scene),
            })
            .await?;
        }
    }
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn select(scene: &Scene, names: &[String]) -> Result<Vec<ObjectId>> {
    if names.is_empty() {
        return Ok(scene.object_ids());
    }
    names
        .iter()
        .map(|name| {
            scene
                .find(name)
                .with_context(|| format!("unknown object '{name}'"))
        })
        .collect()
}

async fn watch(file: &SceneFile, ticks: Option<u64>) -> Result<Scene> {
    if ticks == Some(0) {
        bail!("--ticks must be at least 1");
    }
    let shared = Arc::new(Mutex::new(file.build_scene()));
    let timer = TokioTimer::current()?;
    let mut session = ComSession::new(shared.clone(), file.settings.clone(), timer);
    let mut poses = session.subscribe();
    session.start_continuous()?;
    info!(
        interval_ms = file.settings.update_interval().as_millis() as u64,
        "watching; press Ctrl+C to stop"
    );

    let mut seen = 0_u64;
    {
        let limit_reached = async {
            match ticks {
                Some(limit) => session.ticks_reached(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(limit_reached);
        loop {
            tokio::select! {
                received = poses.recv() => match received {
                    Ok(pose) => {
                        seen += 1;
                        print_pose(seen, &pose);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch output fell behind"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut limit_reached => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }
    while let Ok(pose) = poses.try_recv() {
        seen += 1;
        print_pose(seen, &pose);
    }

    session.stop_continuous();
    let stats = session.stats();
    info!(ticks = stats.ticks, failures = stats.failures, "watch finished");
    drop(session);
    let scene = shared.lock().clone();
    Ok(scene)
}

fn print_pose(seen: u64, pose: &Pose) {
    println!(
        "[{seen}] ({:.4}, {:.4}, {:.4}) mass {:.4}",
        pose.position.x, pose.position.y, pose.position.z, pose.total_mass
    );
}
