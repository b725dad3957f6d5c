//! Dubline CLI: command-line interface for caption inspection, sync preview
//! and narrated export.
//!
//! Usage:
//!   dubline cues <FILE>          Parse a caption file and print its timeline
//!   dubline active <FILE> <T>    Show the cue on screen at time T
//!   dubline styles               List caption style presets
//!   dubline check                Check ffmpeg and font availability
//!   dubline preview [OPTIONS]    Play video and narration clocks in the terminal
//!   dubline export [OPTIONS]     Export a captioned, narrated video

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dubline_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "dubline",
    about = "Burn captions into a video and lay a narration over it",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/dubline/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a caption file and print the timeline
    Cues {
        /// Caption text file with one `[m:ss] text` entry per line
        path: PathBuf,

        /// Output format: json, srt or vtt
        #[arg(long, default_value = "json")]
        format: String,

        /// Seconds a cue stays on screen
        #[arg(long)]
        window: Option<f64>,

        /// Write SRT or VTT (by extension) to this file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show which cue is on screen at a given time
    Active {
        /// Caption text file
        path: PathBuf,

        /// Time in seconds or as m:ss
        time: String,

        /// Seconds a cue stays on screen
        #[arg(long)]
        window: Option<f64>,
    },

    /// List caption style presets
    Styles {
        /// Print the presets as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check ffmpeg encoders and caption fonts
    Check,

    /// Run the video and narration clocks in real time and print their sync
    Preview {
        /// Narration audio file
        #[arg(long)]
        narration: PathBuf,

        /// Video length in seconds
        #[arg(long)]
        video_secs: f64,

        /// Caption text file
        #[arg(long)]
        captions: Option<PathBuf>,

        /// Status lines per second
        #[arg(long, default_value = "4")]
        hz: u32,

        /// Jump the video to this time once playback starts
        #[arg(long)]
        seek: Option<f64>,
    },

    /// Export a captioned video with the narration as its soundtrack
    Export {
        /// Still image used for every frame
        #[arg(long, group = "source")]
        image: Option<PathBuf>,

        /// Directory of numbered frame images
        #[arg(long, group = "source")]
        frames: Option<PathBuf>,

        /// Video file (frames are extracted with ffmpeg)
        #[arg(long, group = "source")]
        video: Option<PathBuf>,

        /// Narration audio file
        #[arg(long)]
        narration: PathBuf,

        /// Caption text file
        #[arg(long)]
        captions: Option<PathBuf>,

        /// Video length in seconds (defaults to the source or narration length)
        #[arg(long)]
        duration: Option<f64>,

        /// Aspect preset: landscape, portrait, square or original
        #[arg(long)]
        aspect: Option<String>,

        /// Caption style preset name
        #[arg(long)]
        style: Option<String>,

        /// Frames per second
        #[arg(long)]
        fps: Option<u32>,

        /// Caption size multiplier
        #[arg(long)]
        font_scale: Option<f64>,

        /// Caption bottom edge, percent of height from the bottom
        #[arg(long)]
        position: Option<f64>,

        /// Render captions in upper case
        #[arg(long)]
        uppercase: bool,

        /// Leave captions out
        #[arg(long)]
        no_captions: bool,

        /// Output file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep raw frames in memory instead of encoding with ffmpeg
        #[arg(long)]
        raw: bool,

        /// Pace the export against the wall clock
        #[arg(long)]
        realtime: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    dubline_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Cues {
            path,
            format,
            window,
            output,
        } => commands::cues::run(&config, path, format, window, output),
        Commands::Active { path, time, window } => {
            commands::active::run(&config, path, time, window)
        }
        Commands::Styles { json } => commands::styles::run(&config, json),
        Commands::Check => commands::check::run(&config),
        Commands::Preview {
            narration,
            video_secs,
            captions,
            hz,
            seek,
        } => commands::preview::run(&config, narration, video_secs, captions, hz, seek).await,
        Commands::Export {
            image,
            frames,
            video,
            narration,
            captions,
            duration,
            aspect,
            style,
            fps,
            font_scale,
            position,
            uppercase,
            no_captions,
            output,
            raw,
            realtime,
        } => {
            let source = match (image, frames, video) {
                (Some(path), _, _) => commands::export::Source::Image(path),
                (_, Some(path), _) => commands::export::Source::Frames(path),
                (_, _, Some(path)) => commands::export::Source::Video(path),
                _ => anyhow::bail!("Give one of --image, --frames or --video"),
            };
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    source,
                    narration,
                    captions,
                    duration,
                    aspect,
                    style,
                    fps,
                    font_scale,
                    position,
                    uppercase,
                    no_captions,
                    output,
                    raw,
                    realtime,
                },
            )
            .await
        }
    }
}
