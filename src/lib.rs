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
//! Bindings to the SunVox modular synthesizer engine.
//!
//! The engine ships as a closed-source shared library. [`Engine`] loads it, initializes
//! it and hands out up to 16 [`Channel`]s, each playing one project. Patterns and modules
//! of a loaded project are reached through the channel.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use sunvoxrs::{config::InitConfig, Engine};
//!
//! # fn main() -> sunvoxrs::Result<()> {
//! let mut engine = Engine::new();
//! engine.init_from_directory(Path::new("sunvox_lib"), &InitConfig::new().with_no_debug())?;
//!
//! let channel = engine.create_channel("music")?;
//! channel.load_from_path(Path::new("song.sunvox"))?;
//! channel.set_volume(0.8)?;
//! channel.play_from_beginning()?;
//! # Ok(())
//! # }
//! ```
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fade;
pub mod module;
pub mod native;
pub mod pattern;
#[cfg(test)]
mod testutil;

pub use channel::{Channel, SlotLock};
pub use engine::{Engine, Selection, Version};
pub use error::{Error, Result};
pub use fade::{ControllerFade, VolumeFade};
pub use module::{Module, ModuleFlags};
pub use native::Note;
pub use pattern::{NoteCommand, Pattern, PatternData, MIDDLE_C};
