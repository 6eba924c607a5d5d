use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Context;
use tracing::info;

use landmark_mvg::aggregate::{CancelToken, Termination};
use landmark_triangulate::{config::SessionConfig, logging, session};

#[derive(Debug, Parser)]
#[command(name = "landmark-triangulate", author, version)]
struct Cli {
    /// Also write the log to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Triangulate the keypoint files of a session config
    Run {
        /// Session config (YAML)
        config: PathBuf,

        /// Override the output file of the config
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the minimum number of views per landmark
        #[arg(long)]
        min_views: Option<usize>,
    },
    /// Print the projection matrix and center of each camera
    PrintRig {
        /// Folder with the `cam_{i}_intrinsics.dat` and
        /// `cam_{i}_extrinsics.dat` files
        parameter_folder: PathBuf,

        #[arg(long)]
        num_cams: usize,
    },
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::initiate_logging(cli.log_file.as_ref(), false)?;

    match cli.command {
        Commands::Run {
            config,
            output,
            min_views,
        } => {
            let mut cfg = SessionConfig::from_path(&config)
                .with_context(|| format!("while reading config {}", config.display()))?;
            if let Some(output) = output {
                cfg.output = output;
            }
            if let Some(min_views) = min_views {
                cfg.min_views = min_views;
            }
            cfg.validate()?;

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                info!("got Ctrl-C, stopping after the current frame");
                handler_token.cancel();
            })?;

            let summary = session::run_session(&cfg, Some(cancel))?;
            println!(
                "{} frames, {} of {} landmark positions resolved, written to {}",
                summary.frames_written,
                summary.resolved_points,
                summary.frames_written * summary.num_landmarks,
                summary.output.display()
            );
            if let Termination::Desynchronized { exhausted_cameras } = summary.termination {
                println!("camera(s) {exhausted_cameras:?} ran out of frames early");
            }
        }
        Commands::PrintRig {
            parameter_folder,
            num_cams,
        } => {
            let rig = session::load_rig(&parameter_folder, num_cams)?;
            session::write_rig_summary(&mut std::io::stdout().lock(), &rig)?;
        }
    }
    Ok(())
}
