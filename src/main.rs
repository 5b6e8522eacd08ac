// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use sunvoxrs::{config::EngineConfig, native, Channel, Engine, VolumeFade};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// How often fades are advanced while playing.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Plays and inspects SunVox projects."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints where the engine library for this machine lives inside a library distribution.
    LibraryPath {
        /// The root of the unpacked library distribution.
        base: String,
    },
    /// Lists the patterns and modules of a project.
    Info {
        /// The path to the engine config.
        config_path: String,
        /// The path to the project.
        project_path: String,
    },
    /// Plays a project through the engine's audio output.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// The path to the project.
        project_path: String,
        /// The volume to play at, 0 to 1.
        #[arg(short, long)]
        volume: Option<f32>,
        /// The first line of a custom loop.
        #[arg(long, requires = "loop_end")]
        loop_start: Option<i32>,
        /// The line a custom loop ends on.
        #[arg(long, requires = "loop_start")]
        loop_end: Option<i32>,
        /// How long to play before stopping, e.g. 30s.
        #[arg(short, long)]
        duration: Option<String>,
        /// How long to fade out for once the duration is up, e.g. 5s.
        #[arg(short, long)]
        fade_out: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::LibraryPath { base } => {
            println!("{}", native::library_path(Path::new(&base)).display());
        }
        Commands::Info {
            config_path,
            project_path,
        } => {
            let config = EngineConfig::load(Path::new(&config_path))?;
            let (engine, channel) = open_project(&config, &project_path)?;
            print_info(&channel)?;
            channel.close()?;
            engine.deinit()?;
        }
        Commands::Play {
            config_path,
            project_path,
            volume,
            loop_start,
            loop_end,
            duration,
            fade_out,
        } => {
            let play_for = duration.map(parse_duration).transpose()?;
            let fade_out = fade_out.map(parse_duration).transpose()?;
            let config = EngineConfig::load(Path::new(&config_path))?;
            let (engine, channel) = open_project(&config, &project_path)?;

            if let Some(volume) = volume {
                channel.set_volume(volume)?;
            }
            if let (Some(start), Some(end)) = (loop_start, loop_end) {
                channel.set_custom_loop(start, end)?;
            }

            let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel();
            channel.set_on_current_line_change(
                config.poll_resolution()?,
                Some(Box::new(move |line| line_tx.send(line).is_ok())),
            )?;
            channel.play_from_beginning()?;
            println!(
                "Playing {} ({})",
                channel.project_name()?,
                duration_minutes_seconds(channel.length()?)
            );

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut ticker = tokio::time::interval(FRAME);
            let started = Instant::now();
            let mut last_tick = Instant::now();
            let mut fade: Option<VolumeFade> = None;
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("Interrupted.");
                        break;
                    }
                    Some(line) = line_rx.recv() => {
                        debug!(line, "Line changed.");
                    }
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let dt = now - last_tick;
                        last_tick = now;

                        if let Some(fade) = fade.as_mut() {
                            if fade.update(dt)?.1 {
                                break;
                            }
                        } else if play_for.is_some_and(|play_for| started.elapsed() >= play_for) {
                            match fade_out {
                                Some(fade_out) => {
                                    info!(?fade_out, "Fading out.");
                                    fade = Some(VolumeFade::new(-1.0, 0.0, fade_out, channel.clone())?);
                                }
                                None => break,
                            }
                        }
                        if !channel.is_looping()? && channel.is_at_end_of_song()? {
                            break;
                        }
                    }
                }
            }

            channel.set_on_current_line_change(Duration::ZERO, None)?;
            channel.stop()?;
            channel.close()?;
            engine.deinit()?;
        }
    }

    Ok(())
}

/// Initializes the engine from the config and loads the project into a new channel.
fn open_project(
    config: &EngineConfig,
    project_path: &str,
) -> Result<(Engine, Arc<Channel>), Box<dyn Error>> {
    let mut engine = Engine::new();
    engine.init_from_config(config)?;
    if let Some(version) = engine.version() {
        info!(%version, "Engine ready.");
    }

    let channel = engine.create_channel(project_path)?;
    channel.load_from_path(Path::new(project_path))?;
    Ok((engine, channel))
}

fn print_info(channel: &Arc<Channel>) -> Result<(), Box<dyn Error>> {
    println!("Project: {}", channel.project_name()?);
    println!(
        "BPM: {}, TPL: {}, length: {} ({} lines)",
        channel.bpm()?,
        channel.tpl()?,
        duration_minutes_seconds(channel.length()?),
        channel.length_in_lines()?
    );

    println!("\nPatterns (count: {}):", channel.pattern_count()?);
    for pattern in channel.patterns()? {
        println!(
            "- {:>3} {} (x: {}, y: {}, tracks: {}, lines: {})",
            pattern.index(),
            pattern.name()?,
            pattern.x()?,
            pattern.y()?,
            pattern.track_count()?,
            pattern.line_count()?
        );
    }

    println!("\nModules (count: {}):", channel.module_count()?);
    for index in 0..channel.module_slot_count()? {
        let Some(module) = channel.module_by_index(index) else {
            continue;
        };
        println!("- {:02X} {} [{}]", index, module.name()?, module.flags()?);
        for controller in 1..=module.controller_count()? as i32 {
            println!(
                "    {:2}. {}: {} ({}..{})",
                controller,
                module.controller_name(controller)?,
                module.controller_value(controller)?,
                module.controller_min(controller)?,
                module.controller_max(controller)?
            );
        }
    }
    Ok(())
}

fn parse_duration(value: String) -> Result<Duration, Box<dyn Error>> {
    let duration = DurationString::from_string(value).map_err(|e| e.to_string())?;
    Ok(duration.into())
}

/// Formats the duration as minutes:seconds.
fn duration_minutes_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
