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
use std::ops::BitOr;

pub mod engine;
pub mod error;

pub use engine::EngineConfig;

/// The sample rate used when none (or a non-positive one) is configured.
pub const DEFAULT_SAMPLE_RATE: i32 = 44100;

/// Flags passed to the engine at initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitFlags(u32);

impl InitFlags {
    /// Keep the engine from printing its own diagnostics to stdout.
    pub const NO_DEBUG_OUTPUT: InitFlags = InitFlags(1 << 0);
    /// Audio is pulled by the caller instead of an engine-owned audio thread.
    pub const USER_AUDIO_CALLBACK: InitFlags = InitFlags(1 << 1);
    pub const AUDIO_INT16: InitFlags = InitFlags(1 << 2);
    pub const AUDIO_FLOAT32: InitFlags = InitFlags(1 << 3);
    /// Audio callback and song modification happen on the same thread.
    pub const ONE_THREAD: InitFlags = InitFlags(1 << 4);

    /// Returns no flags.
    pub const fn empty() -> InitFlags {
        InitFlags(0)
    }

    /// Returns the raw bits handed to the engine.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    pub const fn contains(self, other: InitFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InitFlags {
    type Output = InitFlags;

    fn bitor(self, rhs: InitFlags) -> InitFlags {
        InitFlags(self.0 | rhs.0)
    }
}

/// How the engine should be initialized: sample rate, flags and the option string
/// (`buffer=1024|audiodriver=alsa|audiodevice=hw:0,0`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitConfig {
    sample_rate: i32,
    flags: InitFlags,
    options: String,
}

impl InitConfig {
    /// Creates an empty configuration; the engine picks its own defaults.
    pub fn new() -> InitConfig {
        InitConfig::default()
    }

    fn with_option(mut self, key: &str, value: &str) -> InitConfig {
        if !self.options.is_empty() {
            self.options.push('|');
        }
        self.options.push_str(key);
        self.options.push('=');
        self.options.push_str(value);
        self
    }

    /// The preferred audio buffer size in frames. The engine may not honor it exactly.
    pub fn with_buffer(self, buffer_size: usize) -> InitConfig {
        self.with_option("buffer", &buffer_size.to_string())
    }

    /// The audio driver to use, e.g. "alsa", "pulse", "dsound", "asio" or "sdl".
    pub fn with_audio_driver(self, driver: &str) -> InitConfig {
        self.with_option("audiodriver", driver)
    }

    /// Uses JACK on Linux. Does nothing elsewhere.
    pub fn with_audio_driver_linux_jack(self) -> InitConfig {
        if cfg!(target_os = "linux") {
            self.with_audio_driver("jack")
        } else {
            self
        }
    }

    /// Uses PipeWire on Linux. Does nothing elsewhere.
    pub fn with_audio_driver_linux_pipewire(self) -> InitConfig {
        if cfg!(target_os = "linux") {
            self.with_audio_driver("pipewire")
        } else {
            self
        }
    }

    /// Uses PulseAudio on Linux. Does nothing elsewhere.
    pub fn with_audio_driver_linux_pulseaudio(self) -> InitConfig {
        if cfg!(target_os = "linux") {
            self.with_audio_driver("pulse")
        } else {
            self
        }
    }

    /// Uses SDL on any OS that supports it.
    pub fn with_audio_driver_sdl(self) -> InitConfig {
        self.with_audio_driver("sdl")
    }

    /// The audio device to use, e.g. "hw:0,0" for the first ALSA device.
    pub fn with_device(self, device: &str) -> InitConfig {
        self.with_option("audiodevice", device)
    }

    /// The desired sample rate in Hz.
    pub fn with_sample_rate(mut self, sample_rate: i32) -> InitConfig {
        self.sample_rate = sample_rate;
        self
    }

    /// Adds initialization flags.
    pub fn with_flags(mut self, flags: InitFlags) -> InitConfig {
        self.flags = self.flags | flags;
        self
    }

    /// Silences the engine's own debug output.
    pub fn with_no_debug(self) -> InitConfig {
        self.with_flags(InitFlags::NO_DEBUG_OUTPUT)
    }

    /// The sample rate to initialize with.
    pub fn sample_rate(&self) -> i32 {
        if self.sample_rate <= 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            self.sample_rate
        }
    }

    /// The flags to initialize with.
    pub fn flags(&self) -> InitFlags {
        self.flags
    }

    /// The pipe separated option string; empty means automatic configuration.
    pub fn options(&self) -> &str {
        &self.options
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_option_string() {
        let config = InitConfig::new()
            .with_buffer(1024)
            .with_audio_driver("alsa")
            .with_device("hw:0,0");
        assert_eq!(config.options(), "buffer=1024|audiodriver=alsa|audiodevice=hw:0,0");
    }

    #[test]
    fn test_defaults() {
        let config = InitConfig::new();
        assert_eq!(config.options(), "");
        assert_eq!(config.sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(config.flags(), InitFlags::empty());

        let config = InitConfig::new().with_sample_rate(-3);
        assert_eq!(config.sample_rate(), DEFAULT_SAMPLE_RATE);
        let config = InitConfig::new().with_sample_rate(48000);
        assert_eq!(config.sample_rate(), 48000);
    }

    #[test]
    fn test_flags_accumulate() {
        let config = InitConfig::new()
            .with_no_debug()
            .with_flags(InitFlags::ONE_THREAD)
            .with_no_debug();
        assert!(config.flags().contains(InitFlags::NO_DEBUG_OUTPUT));
        assert!(config.flags().contains(InitFlags::ONE_THREAD));
        assert_eq!(config.flags().bits(), 0b1_0001);
    }

    #[test]
    fn test_linux_only_drivers() {
        let config = InitConfig::new().with_audio_driver_linux_pulseaudio();
        if cfg!(target_os = "linux") {
            assert_eq!(config.options(), "audiodriver=pulse");
        } else {
            assert_eq!(config.options(), "");
        }

        let config = InitConfig::new().with_audio_driver_sdl();
        assert_eq!(config.options(), "audiodriver=sdl");
    }
}
