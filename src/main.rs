//! sr-autopilot: locate the player on the Star Rail minimap and walk routes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sr_autopilot_lib::commands;
use sr_autopilot_lib::Settings;

#[derive(Parser)]
#[command(name = "sr-autopilot")]
#[command(about = "Minimap position estimation and route walking for Honkai: Star Rail")]
struct Cli {
    /// Settings file (default: the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Atlas directory, overrides the settings file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all visible windows
    ListWindows,

    /// Capture one frame from the game window
    Capture {
        #[arg(short, long, default_value = "capture.png")]
        output: PathBuf,

        /// Also save the minimap crop here
        #[arg(short, long)]
        minimap: Option<PathBuf>,
    },

    /// Locate the player on a region's large map
    Locate {
        /// Region id from regions.json
        region: String,

        /// Use a saved screenshot instead of the live window
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Dump the minimap masks here
        #[arg(long)]
        debug_dir: Option<PathBuf>,
    },

    /// Analyse the minimap of one frame and save its masks
    Analyze {
        #[arg(short, long)]
        image: Option<PathBuf>,

        #[arg(short, long, default_value = "debug_output")]
        output_dir: PathBuf,
    },

    /// Validate a route file against the atlas
    CheckRoute { route: PathBuf },

    /// Walk a route file
    RunRoute {
        route: PathBuf,

        /// Directory of recorded frames to play back instead of the window
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Attempts before giving up on the route
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Print the settings, or write the defaults with --init
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    sr_autopilot_lib::init_tracing();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load_or_default(),
    };
    if let Some(dir) = cli.data_dir {
        settings.data_dir = Some(dir);
    }

    match cli.command {
        Commands::ListWindows => commands::capture::list_windows()?,

        Commands::Capture { output, minimap } => {
            commands::capture::capture(&settings, &output, minimap.as_deref())?
        }

        Commands::Locate {
            region,
            image,
            debug_dir,
        } => commands::capture::locate(&settings, &region, image.as_deref(), debug_dir.as_deref())?,

        Commands::Analyze { image, output_dir } => {
            commands::capture::analyze(&settings, image.as_deref(), &output_dir)?
        }

        Commands::CheckRoute { route } => commands::route::check_route(&settings, &route)?,

        Commands::RunRoute {
            route,
            replay,
            attempts,
        } => {
            if let Some(n) = attempts {
                settings.max_route_attempts = n;
            }
            commands::route::run_route(settings, &route, replay.as_deref()).await?
        }

        Commands::Config { init } => {
            if init {
                let path = match &cli.config {
                    Some(p) => p.clone(),
                    None => Settings::path()?,
                };
                settings.save_to(&path)?;
                println!("Settings written to {}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        }
    }

    Ok(())
}
