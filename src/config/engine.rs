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
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use super::{InitConfig, InitFlags};
use crate::channel::DEFAULT_POLL_RESOLUTION;

/// Where the engine library lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LibraryLocation {
    /// The exact path of the shared library.
    Path(PathBuf),
    /// The root of an unpacked library distribution; the platform build is picked from it.
    Directory(PathBuf),
}

/// A YAML representation of the engine configuration. Every key can be overridden with a
/// `SUNVOX_` prefixed environment variable, e.g. `SUNVOX_AUDIO_DRIVER=jack`.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// The exact path of the engine library. Takes precedence over library_directory.
    library_path: Option<String>,

    /// The root of the library distribution (containing linux/, macos/, windows/).
    library_directory: Option<String>,

    /// Desired sample rate in Hz (default: 44100).
    sample_rate: Option<i32>,

    /// Preferred audio buffer size in frames.
    buffer: Option<usize>,

    /// Audio driver name, e.g. alsa, jack, pulse, dsound, asio, sdl.
    audio_driver: Option<String>,

    /// Audio device name, e.g. hw:0,0.
    audio_device: Option<String>,

    /// Whether the engine prints its own diagnostics (default: true).
    debug_output: Option<bool>,

    /// Run the audio callback and song modification on one thread (default: false).
    one_thread: Option<bool>,

    /// How often the channel pollers check the playhead (default: 10ms).
    poll_resolution: Option<String>,
}

impl EngineConfig {
    /// Creates a configuration pointing at a library distribution directory.
    pub fn new(library_directory: &str) -> EngineConfig {
        EngineConfig {
            library_directory: Some(library_directory.to_string()),
            ..Default::default()
        }
    }

    /// Loads the configuration from a file, applying environment overrides.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("SUNVOX"))
            .build()?
            .try_deserialize::<EngineConfig>()?)
    }

    /// Returns where the engine library should be loaded from.
    pub fn library(&self) -> Result<LibraryLocation, ConfigError> {
        match (&self.library_path, &self.library_directory) {
            (Some(path), _) => Ok(LibraryLocation::Path(PathBuf::from(path))),
            (None, Some(directory)) => Ok(LibraryLocation::Directory(PathBuf::from(directory))),
            (None, None) => Err(ConfigError::NoLibrary),
        }
    }

    /// Returns the poll resolution for channel callbacks.
    pub fn poll_resolution(&self) -> Result<Duration, ConfigError> {
        match &self.poll_resolution {
            Some(resolution) => Ok(DurationString::from_string(resolution.clone())
                .map_err(|reason| ConfigError::Duration {
                    value: resolution.clone(),
                    reason: reason.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_POLL_RESOLUTION),
        }
    }

    /// Builds the engine initialization settings.
    pub fn init_config(&self) -> InitConfig {
        let mut init = InitConfig::new();
        if let Some(sample_rate) = self.sample_rate {
            init = init.with_sample_rate(sample_rate);
        }
        if let Some(buffer) = self.buffer {
            init = init.with_buffer(buffer);
        }
        if let Some(driver) = &self.audio_driver {
            init = init.with_audio_driver(driver);
        }
        if let Some(device) = &self.audio_device {
            init = init.with_device(device);
        }
        if !self.debug_output.unwrap_or(true) {
            init = init.with_no_debug();
        }
        if self.one_thread.unwrap_or(false) {
            init = init.with_flags(InitFlags::ONE_THREAD);
        }
        init
    }
}
