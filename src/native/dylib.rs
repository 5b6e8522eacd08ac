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
    ffi::{c_char, c_int, c_void, CStr},
    path::{Path, PathBuf},
    ptr,
};

use tracing::{debug, info};

use super::{Native, Note, NATIVE_SYMBOL_MISSING};
use crate::error::{Error, Result};

/// Declares the exported entry points and how to resolve them from a shared library.
macro_rules! entry_points {
    ($($field:ident = $symbol:literal: fn($($arg:ty),*) -> $ret:ty;)*) => {
        struct EntryPoints {
            $($field: Option<unsafe extern "system" fn($($arg),*) -> $ret>,)*
        }

        impl EntryPoints {
            /// Looks up every entry point by its exported name. Unexported symbols are left
            /// unresolved.
            ///
            /// # Safety
            ///
            /// The declared signatures must match the ones exported by the library.
            unsafe fn resolve(library: &libloading::Library) -> EntryPoints {
                EntryPoints {
                    $($field: library
                        .get::<unsafe extern "system" fn($($arg),*) -> $ret>(
                            concat!($symbol, "\0").as_bytes(),
                        )
                        .ok()
                        .map(|symbol| *symbol),)*
                }
            }

            /// Returns the names of the entry points that could not be resolved.
            fn unresolved(&self) -> Vec<&'static str> {
                let mut unresolved = Vec::new();
                $(if self.$field.is_none() {
                    unresolved.push($symbol);
                })*
                unresolved
            }
        }
    };
}

entry_points! {
    init = "sv_init": fn(*const c_char, c_int, c_int, u32) -> c_int;
    deinit = "sv_deinit": fn() -> c_int;
    sample_rate = "sv_get_sample_rate": fn() -> c_int;
    open_slot = "sv_open_slot": fn(c_int) -> c_int;
    close_slot = "sv_close_slot": fn(c_int) -> c_int;
    lock_slot = "sv_lock_slot": fn(c_int) -> c_int;
    unlock_slot = "sv_unlock_slot": fn(c_int) -> c_int;
    load_from_memory = "sv_load_from_memory": fn(c_int, *mut c_void, u32) -> c_int;
    play = "sv_play": fn(c_int) -> c_int;
    play_from_beginning = "sv_play_from_beginning": fn(c_int) -> c_int;
    stop = "sv_stop": fn(c_int) -> c_int;
    pause = "sv_pause": fn(c_int) -> c_int;
    resume = "sv_resume": fn(c_int) -> c_int;
    set_autostop = "sv_set_autostop": fn(c_int, c_int) -> c_int;
    autostop = "sv_get_autostop": fn(c_int) -> c_int;
    end_of_song = "sv_end_of_song": fn(c_int) -> c_int;
    rewind = "sv_rewind": fn(c_int, c_int) -> c_int;
    volume = "sv_volume": fn(c_int, c_int) -> c_int;
    set_event_t = "sv_set_event_t": fn(c_int, c_int, c_int) -> c_int;
    send_event = "sv_send_event": fn(c_int, c_int, c_int, c_int, c_int, c_int, c_int) -> c_int;
    current_line = "sv_get_current_line": fn(c_int) -> c_int;
    current_signal_level = "sv_get_current_signal_level": fn(c_int, c_int) -> c_int;
    song_name = "sv_get_song_name": fn(c_int) -> *const c_char;
    set_song_name = "sv_set_song_name": fn(c_int, *const c_char) -> c_int;
    song_bpm = "sv_get_song_bpm": fn(c_int) -> c_int;
    song_tpl = "sv_get_song_tpl": fn(c_int) -> c_int;
    song_length_frames = "sv_get_song_length_frames": fn(c_int) -> u32;
    song_length_lines = "sv_get_song_length_lines": fn(c_int) -> u32;
    find_module = "sv_find_module": fn(c_int, *const c_char) -> c_int;
    find_pattern = "sv_find_pattern": fn(c_int, *const c_char) -> c_int;
    module_slot_count = "sv_get_number_of_modules": fn(c_int) -> c_int;
    module_flags = "sv_get_module_flags": fn(c_int, c_int) -> c_int;
    module_name = "sv_get_module_name": fn(c_int, c_int) -> *const c_char;
    connect_module = "sv_connect_module": fn(c_int, c_int, c_int) -> c_int;
    disconnect_module = "sv_disconnect_module": fn(c_int, c_int, c_int) -> c_int;
    module_ctl_count = "sv_get_number_of_module_ctls": fn(c_int, c_int) -> c_int;
    module_ctl_name = "sv_get_module_ctl_name": fn(c_int, c_int, c_int) -> *const c_char;
    module_ctl_value = "sv_get_module_ctl_value": fn(c_int, c_int, c_int, c_int) -> c_int;
    set_module_ctl_value = "sv_set_module_ctl_value": fn(c_int, c_int, c_int, c_int, c_int) -> c_int;
    module_ctl_min = "sv_get_module_ctl_min": fn(c_int, c_int, c_int, c_int) -> c_int;
    module_ctl_max = "sv_get_module_ctl_max": fn(c_int, c_int, c_int, c_int) -> c_int;
    module_finetune = "sv_get_module_finetune": fn(c_int, c_int) -> u32;
    set_module_finetune = "sv_set_module_finetune": fn(c_int, c_int, c_int) -> c_int;
    set_module_relnote = "sv_set_module_relnote": fn(c_int, c_int, c_int) -> c_int;
    pattern_slot_count = "sv_get_number_of_patterns": fn(c_int) -> c_int;
    pattern_x = "sv_get_pattern_x": fn(c_int, c_int) -> c_int;
    pattern_y = "sv_get_pattern_y": fn(c_int, c_int) -> c_int;
    set_pattern_xy = "sv_set_pattern_xy": fn(c_int, c_int, c_int, c_int) -> c_int;
    pattern_tracks = "sv_get_pattern_tracks": fn(c_int, c_int) -> c_int;
    pattern_lines = "sv_get_pattern_lines": fn(c_int, c_int) -> c_int;
    pattern_name = "sv_get_pattern_name": fn(c_int, c_int) -> *const c_char;
    pattern_data = "sv_get_pattern_data": fn(c_int, c_int) -> *mut Note;
    pattern_mute = "sv_pattern_mute": fn(c_int, c_int, c_int) -> c_int;
    ticks = "sv_get_ticks": fn() -> u32;
    ticks_per_second = "sv_get_ticks_per_second": fn() -> u32;
}

/// Entry points without which the binding cannot do anything useful. Everything else is
/// allowed to be missing and fails when it is called.
const REQUIRED: &[&str] = &[
    "sv_init",
    "sv_deinit",
    "sv_open_slot",
    "sv_close_slot",
    "sv_load_from_memory",
    "sv_play",
    "sv_play_from_beginning",
    "sv_stop",
    "sv_pause",
    "sv_resume",
    "sv_lock_slot",
    "sv_unlock_slot",
];

/// Calls a resolved entry point, or yields the fallback if the library doesn't export it.
/// `or none` wraps the result in an `Option` instead.
macro_rules! call {
    ($self:ident.$field:ident($($arg:expr),*) or none) => {
        match $self.entry_points.$field {
            // SAFETY: as below.
            Some(entry_point) => Some(unsafe { entry_point($($arg),*) }),
            None => {
                debug!(symbol = stringify!($field), "Entry point is not exported");
                None
            }
        }
    };
    ($self:ident.$field:ident($($arg:expr),*) or $fallback:expr) => {
        match $self.entry_points.$field {
            // SAFETY: the signature was declared to match the export and the library is
            // kept loaded for as long as `self` lives.
            Some(entry_point) => unsafe { entry_point($($arg),*) },
            None => {
                debug!(symbol = stringify!($field), "Entry point is not exported");
                $fallback
            }
        }
    };
}

/// The engine's shared library, opened from disk with its entry points resolved.
pub struct Library {
    entry_points: EntryPoints,
    path: PathBuf,
    // Keeps the code behind `entry_points` mapped.
    _library: libloading::Library,
}

impl Library {
    /// Opens the shared library at the given path and resolves its entry points.
    pub fn open(path: &Path) -> Result<Library> {
        let library = open_shared(path).map_err(|source| Error::Load {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the declarations above mirror the engine's public header.
        let entry_points = unsafe { EntryPoints::resolve(&library) };
        let unresolved = entry_points.unresolved();
        let missing_required: Vec<&'static str> = unresolved
            .iter()
            .copied()
            .filter(|symbol| REQUIRED.contains(symbol))
            .collect();
        if !missing_required.is_empty() {
            return Err(Error::MissingSymbols {
                path: path.to_path_buf(),
                symbols: missing_required,
            });
        }

        info!(
            path = %path.display(),
            unresolved = unresolved.len(),
            "Loaded engine library"
        );
        if !unresolved.is_empty() {
            debug!(symbols = ?unresolved, "Optional entry points are unavailable");
        }

        Ok(Library {
            entry_points,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    /// The path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_shared(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: loading the engine runs its initializers, which have no preconditions.
    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(libloading::Library::from)
}

#[cfg(not(unix))]
fn open_shared(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    // SAFETY: loading the engine runs its initializers, which have no preconditions.
    unsafe { libloading::Library::new(path) }
}

/// Copies a string owned by the engine. The engine keeps these alive until the project
/// changes, so they're copied immediately.
fn owned_string(raw: *const c_char) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: non-null strings returned by the engine are NUL terminated.
    Some(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
}

impl Native for Library {
    fn init(&self, config: Option<&CStr>, sample_rate: i32, channels: i32, flags: u32) -> i32 {
        let config = config.map_or(ptr::null(), CStr::as_ptr);
        call!(self.init(config, sample_rate, channels, flags) or NATIVE_SYMBOL_MISSING)
    }

    fn deinit(&self) -> i32 {
        call!(self.deinit() or NATIVE_SYMBOL_MISSING)
    }

    fn sample_rate(&self) -> i32 {
        call!(self.sample_rate() or NATIVE_SYMBOL_MISSING)
    }

    fn open_slot(&self, slot: i32) -> i32 {
        call!(self.open_slot(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn close_slot(&self, slot: i32) -> i32 {
        call!(self.close_slot(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn lock_slot(&self, slot: i32) -> i32 {
        call!(self.lock_slot(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn unlock_slot(&self, slot: i32) -> i32 {
        call!(self.unlock_slot(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn load_from_memory(&self, slot: i32, data: &[u8]) -> i32 {
        let Ok(size) = u32::try_from(data.len()) else {
            return -1;
        };
        // The engine only reads from the buffer.
        let data = data.as_ptr() as *mut c_void;
        call!(self.load_from_memory(slot, data, size) or NATIVE_SYMBOL_MISSING)
    }

    fn play(&self, slot: i32) -> i32 {
        call!(self.play(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn play_from_beginning(&self, slot: i32) -> i32 {
        call!(self.play_from_beginning(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn stop(&self, slot: i32) -> i32 {
        call!(self.stop(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn pause(&self, slot: i32) -> i32 {
        call!(self.pause(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn resume(&self, slot: i32) -> i32 {
        call!(self.resume(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn set_autostop(&self, slot: i32, autostop: i32) -> i32 {
        call!(self.set_autostop(slot, autostop) or NATIVE_SYMBOL_MISSING)
    }

    fn autostop(&self, slot: i32) -> i32 {
        call!(self.autostop(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn end_of_song(&self, slot: i32) -> i32 {
        call!(self.end_of_song(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn rewind(&self, slot: i32, line: i32) -> i32 {
        call!(self.rewind(slot, line) or NATIVE_SYMBOL_MISSING)
    }

    fn volume(&self, slot: i32, volume: i32) -> i32 {
        call!(self.volume(slot, volume) or NATIVE_SYMBOL_MISSING)
    }

    fn set_event_t(&self, slot: i32, set: i32, t: i32) -> i32 {
        call!(self.set_event_t(slot, set, t) or NATIVE_SYMBOL_MISSING)
    }

    fn send_event(
        &self,
        slot: i32,
        track: i32,
        note: i32,
        velocity: i32,
        module: i32,
        ctl: i32,
        ctl_val: i32,
    ) -> i32 {
        call!(self.send_event(slot, track, note, velocity, module, ctl, ctl_val) or NATIVE_SYMBOL_MISSING)
    }

    fn current_line(&self, slot: i32) -> i32 {
        call!(self.current_line(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn current_signal_level(&self, slot: i32, channel: i32) -> i32 {
        call!(self.current_signal_level(slot, channel) or NATIVE_SYMBOL_MISSING)
    }

    fn song_name(&self, slot: i32) -> Option<String> {
        owned_string(call!(self.song_name(slot) or ptr::null()))
    }

    fn set_song_name(&self, slot: i32, name: &CStr) -> i32 {
        call!(self.set_song_name(slot, name.as_ptr()) or NATIVE_SYMBOL_MISSING)
    }

    fn song_bpm(&self, slot: i32) -> i32 {
        call!(self.song_bpm(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn song_tpl(&self, slot: i32) -> i32 {
        call!(self.song_tpl(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn song_length_frames(&self, slot: i32) -> Option<u32> {
        call!(self.song_length_frames(slot) or none)
    }

    fn song_length_lines(&self, slot: i32) -> Option<u32> {
        call!(self.song_length_lines(slot) or none)
    }

    fn find_module(&self, slot: i32, name: &CStr) -> i32 {
        call!(self.find_module(slot, name.as_ptr()) or NATIVE_SYMBOL_MISSING)
    }

    fn find_pattern(&self, slot: i32, name: &CStr) -> i32 {
        call!(self.find_pattern(slot, name.as_ptr()) or NATIVE_SYMBOL_MISSING)
    }

    fn module_slot_count(&self, slot: i32) -> i32 {
        call!(self.module_slot_count(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn module_flags(&self, slot: i32, module: i32) -> i32 {
        call!(self.module_flags(slot, module) or NATIVE_SYMBOL_MISSING)
    }

    fn module_name(&self, slot: i32, module: i32) -> Option<String> {
        owned_string(call!(self.module_name(slot, module) or ptr::null()))
    }

    fn connect_module(&self, slot: i32, source: i32, destination: i32) -> i32 {
        call!(self.connect_module(slot, source, destination) or NATIVE_SYMBOL_MISSING)
    }

    fn disconnect_module(&self, slot: i32, source: i32, destination: i32) -> i32 {
        call!(self.disconnect_module(slot, source, destination) or NATIVE_SYMBOL_MISSING)
    }

    fn module_ctl_count(&self, slot: i32, module: i32) -> i32 {
        call!(self.module_ctl_count(slot, module) or NATIVE_SYMBOL_MISSING)
    }

    fn module_ctl_name(&self, slot: i32, module: i32, ctl: i32) -> Option<String> {
        owned_string(call!(self.module_ctl_name(slot, module, ctl) or ptr::null()))
    }

    fn module_ctl_value(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32 {
        call!(self.module_ctl_value(slot, module, ctl, scaled) or NATIVE_SYMBOL_MISSING)
    }

    fn set_module_ctl_value(
        &self,
        slot: i32,
        module: i32,
        ctl: i32,
        value: i32,
        scaled: i32,
    ) -> i32 {
        call!(self.set_module_ctl_value(slot, module, ctl, value, scaled) or NATIVE_SYMBOL_MISSING)
    }

    fn module_ctl_min(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32 {
        call!(self.module_ctl_min(slot, module, ctl, scaled) or NATIVE_SYMBOL_MISSING)
    }

    fn module_ctl_max(&self, slot: i32, module: i32, ctl: i32, scaled: i32) -> i32 {
        call!(self.module_ctl_max(slot, module, ctl, scaled) or NATIVE_SYMBOL_MISSING)
    }

    fn module_finetune(&self, slot: i32, module: i32) -> Option<u32> {
        call!(self.module_finetune(slot, module) or none)
    }

    fn set_module_finetune(&self, slot: i32, module: i32, finetune: i32) -> i32 {
        call!(self.set_module_finetune(slot, module, finetune) or NATIVE_SYMBOL_MISSING)
    }

    fn set_module_relnote(&self, slot: i32, module: i32, relative_note: i32) -> i32 {
        call!(self.set_module_relnote(slot, module, relative_note) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_slot_count(&self, slot: i32) -> i32 {
        call!(self.pattern_slot_count(slot) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_x(&self, slot: i32, pattern: i32) -> i32 {
        call!(self.pattern_x(slot, pattern) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_y(&self, slot: i32, pattern: i32) -> i32 {
        call!(self.pattern_y(slot, pattern) or NATIVE_SYMBOL_MISSING)
    }

    fn set_pattern_xy(&self, slot: i32, pattern: i32, x: i32, y: i32) -> i32 {
        call!(self.set_pattern_xy(slot, pattern, x, y) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_tracks(&self, slot: i32, pattern: i32) -> i32 {
        call!(self.pattern_tracks(slot, pattern) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_lines(&self, slot: i32, pattern: i32) -> i32 {
        call!(self.pattern_lines(slot, pattern) or NATIVE_SYMBOL_MISSING)
    }

    fn pattern_name(&self, slot: i32, pattern: i32) -> Option<String> {
        owned_string(call!(self.pattern_name(slot, pattern) or ptr::null()))
    }

    fn pattern_data(&self, slot: i32, pattern: i32) -> *mut Note {
        call!(self.pattern_data(slot, pattern) or ptr::null_mut())
    }

    fn pattern_mute(&self, slot: i32, pattern: i32, mute: i32) -> i32 {
        call!(self.pattern_mute(slot, pattern, mute) or NATIVE_SYMBOL_MISSING)
    }

    fn ticks(&self) -> Option<u32> {
        call!(self.ticks() or none)
    }

    fn ticks_per_second(&self) -> Option<u32> {
        call!(self.ticks_per_second() or none)
    }
}
