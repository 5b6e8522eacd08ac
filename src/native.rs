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
//! The raw calling contract of the engine library and the means of loading it.
//!
//! Everything above this module talks to the engine through the [`Native`] trait. The
//! production implementation resolves the exported `sv_*` symbols from the platform's
//! shared library; the mock implementation simulates the engine in memory.
use std::{
    ffi::CStr,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::error::Result;

pub mod dylib;
pub mod mock;

/// The number of playback slots the engine provides.
pub const MAX_CHANNELS: usize = 16;

/// Returned by an entry point that the loaded library does not export.
pub const NATIVE_SYMBOL_MISSING: i32 = i32::MIN;

/// A single cell of a pattern's note grid, laid out exactly as the engine stores it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Note {
    /// 0 is nothing, 1..=127 are notes (61 is middle C), 128 and above are note commands.
    pub note: u8,
    /// 0 is the default velocity, otherwise 1..=129.
    pub velocity: u8,
    /// Module index plus one; 0 means no module.
    pub module: u16,
    /// The controller/effect column, 0xCCEE.
    pub ctl: u16,
    /// The controller/effect parameter, 0xXXYY.
    pub ctl_val: u16,
}

/// The entry points of the engine library. Every method mirrors one exported symbol and
/// returns the engine's integer code untouched; interpretation happens in the layers above.
///
/// An entry point the library does not export returns [`NATIVE_SYMBOL_MISSING`], or
/// `None` where the engine's return type is unsigned.
pub trait Native: Send + Sync {
    fn init(&self, config: Option<&CStr>, sample_rate: i32, channels: i32, flags: u32) -> i32;
    fn deinit(&self) -> i32;
    fn sample_rate(&self) -> i32;

    fn open_slot(&self, slot: i32) -> i32;
    fn close_slot(&self, slot: i32) -> i32;
    fn lock_slot(&self, slot: i32) -> i32;
    fn unlock_slot(&self, slot: i32) -> i32;

    fn load_from_memory(&self, slot: i32, data: &[u8]) -> i32;

    fn play(&self, slot: i32) -> i32;
    fn play_from_beginning(&self, slot: i32) -> i32;
    fn stop(&self, slot: i32) -> i32;
    fn pause(&self, slot: i32) -> i32;
    fn resume(&self, slot: i32) -> i32;
    fn set_autostop(&self, slot: i32, autostop: i32) -> i32;
    fn autostop(&self, slot: i32) -> i32;
    fn end_of_song(&self, slot: i32) -> i32;
    fn rewind(&self, slot: i32, line: i32) -> i32;
    /// Sets the slot volume (0..=256) and returns the previous one; negative values only read.
    fn volume(&self, slot: i32, volume: i32) -> i32;

    fn set_event_t(&self, slot: i32, set: i32, t: i32) -> i32;
    #[allow(clippy::too_many_arguments)]
    fn send_event(
        &self,
        slot: i32,
        track: i32,
        note: i32,
        velocity: i32,
        module: i32,
        ctl: i32,
        ctl_val: i32,
    ) -> i32;

    fn current_line(&self, slot: i32) -> i32;
    /// Peak level of the given output channel, 0..=255.
    fn current_signal_level(&self, slot: i32, channel: i32) -> i32;
    fn song_name(&self, slot: i32) -> Option<String>;
    fn set_song_name(&self, slot: i32, name: &CStr) -> i32;
    fn song_bpm(&self, slot: i32) -> i32;
    fn song_tpl(&self, slot: i32) -> i32;
    fn song_length_frames(&self, slot: i32) -> Option<u32>;
    fn song_length_lines(&self, slot: i32) -> Option<u32>;

    fn find_module(&self, slot: i32, name: &CStr) -> i32;
    fn find_pattern(&self, slot: i32, name: &CStr) -> i32;

    fn module_slot_count(&self, slot: i32) -> i32;
    fn module_flags(&self, slot: i32, module: i32) -> i32;
    fn module_name(&self, slot: i32, module: i32) -> Option<String>;
    fn connect_module(&self, slot: i32, source: i32, destination: i32) -> i32;
    fn disconnect_module(&self, slot: i32, source: i32, destination: i32) -> i32;
    fn module_ctl_count(&self, slot: i32, module: i32) -> i32;
    fn module_ctl_name(&self, slot: i32, module: i32, ctl: i32) -> Option<String>;
    fn module_ctl_value(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32;
    fn set_module_ctl_value(&self, slot: i32, module: i32, ctl: i32, value: i32, scaled: i32)
        -> i32;
    fn module_ctl_min(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32;
    fn module_ctl_max(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32;
    /// Finetune in the high 16 bits, relative note in the low 16 bits.
    fn module_finetune(&self, slot: i32, module: i32) -> Option<u32>;
    fn set_module_finetune(&self, slot: i32, module: i32, finetune: i32) -> i32;
    fn set_module_relnote(&self, slot: i32, module: i32, relative_note: i32) -> i32;

    fn pattern_slot_count(&self, slot: i32) -> i32;
    fn pattern_x(&self, slot: i32, pattern: i32) -> i32;
    fn pattern_y(&self, slot: i32, pattern: i32) -> i32;
    fn set_pattern_xy(&self, slot: i32, pattern: i32, x: i32, y: i32) -> i32;
    fn pattern_tracks(&self, slot: i32, pattern: i32) -> i32;
    fn pattern_lines(&self, slot: i32, pattern: i32) -> i32;
    fn pattern_name(&self, slot: i32, pattern: i32) -> Option<String>;
    /// Pointer to the first of `lines * tracks` cells, or null if the pattern doesn't exist.
    fn pattern_data(&self, slot: i32, pattern: i32) -> *mut Note;
    fn pattern_mute(&self, slot: i32, pattern: i32, mute: i32) -> i32;

    fn ticks(&self) -> Option<u32>;
    fn ticks_per_second(&self) -> Option<u32>;
}

/// Opens the engine library at the given path. Paths starting with "mock" produce an
/// in-memory engine instead of loading anything from disk.
pub fn open(path: &Path) -> Result<Arc<dyn Native>> {
    if path.to_string_lossy().starts_with("mock") {
        info!(path = %path.display(), "Using mock engine library.");
        return Ok(Arc::new(mock::Library::new()));
    }

    Ok(Arc::new(dylib::Library::open(path)?))
}

/// The folder of the library distribution that holds builds for the host OS.
pub fn os_folder() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        ""
    }
}

/// The folder of the library distribution that holds builds for the host architecture.
pub fn arch_folder() -> &'static str {
    if cfg!(target_arch = "x86") {
        "lib_x86"
    } else if cfg!(target_arch = "x86_64") {
        "lib_x86_64"
    } else if cfg!(target_arch = "arm") {
        "lib_arm"
    } else if cfg!(target_arch = "aarch64") {
        "lib_arm64"
    } else {
        ""
    }
}

/// The file name of the engine library on the host OS.
pub fn library_filename() -> &'static str {
    if cfg!(target_os = "macos") {
        "sunvox.dylib"
    } else if cfg!(target_os = "windows") {
        "sunvox.dll"
    } else if cfg!(target_os = "linux") {
        "sunvox.so"
    } else {
        ""
    }
}

/// Resolves the library path inside an unpacked library distribution:
/// `<base>/<os-folder>/<arch-folder>/<library-filename>`.
pub fn library_path(base: &Path) -> PathBuf {
    base.join(os_folder())
        .join(arch_folder())
        .join(library_filename())
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_note_layout() {
        assert_eq!(std::mem::size_of::<Note>(), 8);
        assert_eq!(std::mem::align_of::<Note>(), 2);
    }

    #[test]
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    fn test_library_path_linux_x86_64() {
        assert_eq!(
            library_path(Path::new("/opt/sunvox_lib")),
            Path::new("/opt/sunvox_lib/linux/lib_x86_64/sunvox.so")
        );
    }

    #[test]
    fn test_library_path_layout() {
        let path = library_path(Path::new("base"));
        assert!(path.starts_with("base"));
        assert!(path.ends_with(library_filename()));
        assert!(path
            .to_string_lossy()
            .contains(&format!("{}", Path::new(os_folder()).join(arch_folder()).display())));
    }

    #[test]
    fn test_open_mock() {
        let native = open(Path::new("mock-engine")).expect("mock should open");
        assert!(native.init(None, 44100, 2, 0) > 0);
    }

    #[test]
    fn test_open_missing_library() {
        let result = open(Path::new("/nonexistent/sunvox/library.so"));
        assert!(matches!(result, Err(crate::Error::Load { .. })));
    }
}
