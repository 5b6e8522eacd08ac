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
//! An in-memory stand-in for the engine library.
//!
//! Projects are JSON documents describing patterns, modules and controllers rather than
//! real `.sunvox` files. Playback advances the current line with wall-clock time using the
//! project's BPM and TPL, which is enough to drive the pollers and fades.
use std::{
    cell::UnsafeCell,
    collections::{BTreeSet, HashMap},
    ffi::CStr,
    ptr,
    time::Instant,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Native, Note, MAX_CHANNELS, NATIVE_SYMBOL_MISSING};
use crate::module::ModuleFlags;

/// The version reported by the mock engine: 2.1.2.
pub const MOCK_VERSION: i32 = 0x0002_0102;

const DEFAULT_BPM: i32 = 125;
const DEFAULT_TPL: i32 = 6;

/// A project understood by the mock engine.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Project {
    pub name: String,
    pub bpm: i32,
    pub tpl: i32,
    /// Pattern slots; `None` is a deleted pattern.
    pub patterns: Vec<Option<Pattern>>,
    /// Module slots; `None` is a deleted module. Slot 0 is the output.
    pub modules: Vec<Option<Module>>,
}

impl Default for Project {
    fn default() -> Self {
        Project {
            name: String::new(),
            bpm: DEFAULT_BPM,
            tpl: DEFAULT_TPL,
            patterns: Vec::new(),
            modules: vec![Some(Module::new("Output", 0))],
        }
    }
}

impl Project {
    /// Creates an empty project with only an output module.
    pub fn new(name: &str) -> Project {
        Project {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Sets the tempo of the project.
    pub fn with_tempo(mut self, bpm: i32, tpl: i32) -> Project {
        self.bpm = bpm;
        self.tpl = tpl;
        self
    }

    /// Adds a pattern to the next free pattern slot.
    pub fn with_pattern(mut self, pattern: Pattern) -> Project {
        self.patterns.push(Some(pattern));
        self
    }

    /// Leaves an empty pattern slot, as the engine does after a pattern is deleted.
    pub fn with_deleted_pattern(mut self) -> Project {
        self.patterns.push(None);
        self
    }

    /// Adds a module to the next free module slot.
    pub fn with_module(mut self, module: Module) -> Project {
        self.modules.push(Some(module));
        self
    }

    /// Serializes the project into the bytes the mock engine loads.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A pattern of a mock project.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Pattern {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub tracks: i32,
    pub lines: i32,
    #[serde(default)]
    pub muted: bool,
}

impl Pattern {
    /// Creates a pattern at the given line with four tracks.
    pub fn new(name: &str, x: i32, lines: i32) -> Pattern {
        Pattern {
            name: name.to_string(),
            x,
            y: 0,
            tracks: 4,
            lines,
            muted: false,
        }
    }

    /// Sets the number of tracks.
    pub fn with_tracks(mut self, tracks: i32) -> Pattern {
        self.tracks = tracks;
        self
    }

    /// Sets the Y coordinate.
    pub fn with_y(mut self, y: i32) -> Pattern {
        self.y = y;
        self
    }
}

/// A module of a mock project.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Module {
    pub name: String,
    /// Module flags, without the EXISTS bit which the mock adds itself.
    pub flags: u32,
    #[serde(default)]
    pub controllers: Vec<Controller>,
    #[serde(default)]
    pub finetune: i32,
    #[serde(default)]
    pub relative_note: i32,
}

impl Module {
    /// Creates a module without controllers.
    pub fn new(name: &str, flags: u32) -> Module {
        Module {
            name: name.to_string(),
            flags,
            controllers: Vec::new(),
            finetune: 0,
            relative_note: 0,
        }
    }

    /// Creates a generator module.
    pub fn generator(name: &str) -> Module {
        Module::new(name, ModuleFlags::GENERATOR.bits())
    }

    /// Creates an effect module.
    pub fn effect(name: &str) -> Module {
        Module::new(name, ModuleFlags::EFFECT.bits())
    }

    /// Adds a controller.
    pub fn with_controller(mut self, name: &str, min: i32, max: i32, value: i32) -> Module {
        self.controllers.push(Controller {
            name: name.to_string(),
            min,
            max,
            value,
        });
        self
    }
}

/// A controller of a mock module.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Controller {
    pub name: String,
    pub min: i32,
    pub max: i32,
    pub value: i32,
}

/// An event received through `send_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentEvent {
    pub track: i32,
    pub note: i32,
    pub velocity: i32,
    pub module: i32,
    pub ctl: i32,
    pub ctl_val: i32,
}

struct LoadedPattern {
    pattern: Pattern,
    notes: Box<[UnsafeCell<Note>]>,
}

struct Loaded {
    project: Project,
    patterns: Vec<Option<LoadedPattern>>,
    connections: BTreeSet<(i32, i32)>,
}

impl Loaded {
    fn new(project: Project) -> Loaded {
        let patterns = project
            .patterns
            .iter()
            .map(|pattern| {
                pattern.as_ref().map(|pattern| {
                    let cells = (pattern.tracks.max(0) * pattern.lines.max(0)) as usize;
                    LoadedPattern {
                        pattern: pattern.clone(),
                        notes: (0..cells).map(|_| UnsafeCell::new(Note::default())).collect(),
                    }
                })
            })
            .collect();
        Loaded {
            project,
            patterns,
            connections: BTreeSet::new(),
        }
    }

    fn pattern(&self, pattern: i32) -> Option<&LoadedPattern> {
        usize::try_from(pattern)
            .ok()
            .and_then(|index| self.patterns.get(index))
            .and_then(Option::as_ref)
    }

    fn pattern_mut(&mut self, pattern: i32) -> Option<&mut LoadedPattern> {
        usize::try_from(pattern)
            .ok()
            .and_then(|index| self.patterns.get_mut(index))
            .and_then(Option::as_mut)
    }

    fn module(&self, module: i32) -> Option<&Module> {
        usize::try_from(module)
            .ok()
            .and_then(|index| self.project.modules.get(index))
            .and_then(Option::as_ref)
    }

    fn module_mut(&mut self, module: i32) -> Option<&mut Module> {
        usize::try_from(module)
            .ok()
            .and_then(|index| self.project.modules.get_mut(index))
            .and_then(Option::as_mut)
    }

    fn controller(&self, module: i32, ctl: i32) -> Option<&Controller> {
        self.module(module)
            .and_then(|module| usize::try_from(ctl).ok().and_then(|i| module.controllers.get(i)))
    }

    /// The line just after the last pattern.
    fn length_lines(&self) -> i32 {
        self.patterns
            .iter()
            .flatten()
            .map(|loaded| loaded.pattern.x + loaded.pattern.lines)
            .max()
            .unwrap_or(0)
            .max(0)
    }
}

struct Slot {
    loaded: Option<Loaded>,
    playing: bool,
    start_line: i32,
    started: Option<Instant>,
    volume: i32,
    autostop: i32,
    pause_calls: usize,
    resume_calls: usize,
    lock_depth: i32,
    event_timestamp: Option<i32>,
    events: Vec<SentEvent>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            loaded: None,
            playing: false,
            start_line: 0,
            started: None,
            volume: 256,
            autostop: 0,
            pause_calls: 0,
            resume_calls: 0,
            lock_depth: 0,
            event_timestamp: None,
            events: Vec::new(),
        }
    }

    fn tempo(&self) -> (i32, i32) {
        self.loaded
            .as_ref()
            .map(|loaded| (loaded.project.bpm.max(1), loaded.project.tpl.max(1)))
            .unwrap_or((DEFAULT_BPM, DEFAULT_TPL))
    }

    fn current_line(&self) -> i32 {
        let (bpm, tpl) = self.tempo();
        let elapsed_lines = match (self.playing, self.started) {
            (true, Some(started)) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                (elapsed_ms * i64::from(bpm) * 24 / (i64::from(tpl) * 60_000)) as i32
            }
            _ => 0,
        };
        let line = self.start_line.saturating_add(elapsed_lines);
        let length = self
            .loaded
            .as_ref()
            .map(Loaded::length_lines)
            .unwrap_or(0);

        if length <= 0 || line < length {
            line
        } else if self.autostop != 0 {
            length
        } else {
            line % length
        }
    }
}

struct State {
    initialized: bool,
    sample_rate: i32,
    slots: HashMap<i32, Slot>,
    failures: HashMap<&'static str, i32>,
    // Calls to let through before failing once, and the code to fail with.
    delayed_failures: HashMap<&'static str, (usize, i32)>,
}

/// The mock engine library.
pub struct Library {
    state: Mutex<State>,
    epoch: Instant,
}

impl Default for Library {
    fn default() -> Self {
        Library::new()
    }
}

impl Library {
    /// Creates a fresh, uninitialized mock engine.
    pub fn new() -> Library {
        Library {
            state: Mutex::new(State {
                initialized: false,
                sample_rate: 44100,
                slots: HashMap::new(),
                failures: HashMap::new(),
                delayed_failures: HashMap::new(),
            }),
            epoch: Instant::now(),
        }
    }

    /// Makes every later call of the named entry point (e.g. "sv_deinit") return the code.
    pub fn fail(&self, symbol: &'static str, code: i32) {
        self.state.lock().failures.insert(symbol, code);
    }

    /// Lets `successes` calls of the named entry point through, then makes the next one
    /// return the code. Later calls succeed again.
    pub fn fail_once_after(&self, symbol: &'static str, successes: usize, code: i32) {
        self.state
            .lock()
            .delayed_failures
            .insert(symbol, (successes, code));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.delayed_failures.clear();
    }

    /// Returns true if the slot is open.
    pub fn is_slot_open(&self, slot: usize) -> bool {
        self.state.lock().slots.contains_key(&(slot as i32))
    }

    /// Returns how often the audio engine was paused and resumed for the slot.
    pub fn pause_resume_calls(&self, slot: usize) -> (usize, usize) {
        self.state
            .lock()
            .slots
            .get(&(slot as i32))
            .map(|slot| (slot.pause_calls, slot.resume_calls))
            .unwrap_or_default()
    }

    /// Returns how many locks are currently held on the slot.
    pub fn lock_depth(&self, slot: usize) -> i32 {
        self.state
            .lock()
            .slots
            .get(&(slot as i32))
            .map(|slot| slot.lock_depth)
            .unwrap_or_default()
    }

    /// Returns the events sent to the slot, oldest first.
    pub fn events(&self, slot: usize) -> Vec<SentEvent> {
        self.state
            .lock()
            .slots
            .get(&(slot as i32))
            .map(|slot| slot.events.clone())
            .unwrap_or_default()
    }

    /// Returns the event timestamp set for the slot, if any.
    pub fn event_timestamp(&self, slot: usize) -> Option<i32> {
        self.state
            .lock()
            .slots
            .get(&(slot as i32))
            .and_then(|slot| slot.event_timestamp)
    }

    /// Returns the module connections of the slot's project as (source, destination).
    pub fn connections(&self, slot: usize) -> Vec<(i32, i32)> {
        self.state
            .lock()
            .slots
            .get(&(slot as i32))
            .and_then(|slot| slot.loaded.as_ref())
            .map(|loaded| loaded.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Unsigned getters have no error code, so any injected failure makes them behave as if
    /// the symbol were not exported.
    fn exports(&self, symbol: &'static str) -> bool {
        !self.state.lock().failures.contains_key(symbol)
    }

    /// Runs the operation against an open slot, honoring injected failures.
    fn with_slot<F>(&self, symbol: &'static str, slot: i32, op: F) -> i32
    where
        F: FnOnce(&mut Slot) -> i32,
    {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.get(symbol) {
            debug!(symbol, code, "Injected failure");
            return *code;
        }
        if let Some((remaining, code)) = state.delayed_failures.get_mut(symbol) {
            if *remaining == 0 {
                let code = *code;
                state.delayed_failures.remove(symbol);
                debug!(symbol, code, "Injected failure");
                return code;
            }
            *remaining -= 1;
        }
        match state.slots.get_mut(&slot) {
            Some(slot) => op(slot),
            None => -1,
        }
    }

    /// Runs the operation against the project loaded into a slot.
    fn with_loaded<F>(&self, symbol: &'static str, slot: i32, op: F) -> i32
    where
        F: FnOnce(&mut Loaded, i32) -> i32,
    {
        self.with_slot(symbol, slot, |slot| {
            let lock_depth = slot.lock_depth;
            match slot.loaded.as_mut() {
                Some(loaded) => op(loaded, lock_depth),
                None => -1,
            }
        })
    }

    fn read_loaded<T, F>(&self, slot: i32, op: F) -> Option<T>
    where
        F: FnOnce(&Loaded) -> Option<T>,
    {
        let state = self.state.lock();
        state
            .slots
            .get(&slot)
            .and_then(|slot| slot.loaded.as_ref())
            .and_then(op)
    }
}

impl Native for Library {
    fn init(&self, _config: Option<&CStr>, sample_rate: i32, _channels: i32, _flags: u32) -> i32 {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.get("sv_init") {
            return *code;
        }
        state.initialized = true;
        state.sample_rate = sample_rate.max(44100);
        MOCK_VERSION
    }

    fn deinit(&self) -> i32 {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.get("sv_deinit") {
            return *code;
        }
        state.initialized = false;
        state.slots.clear();
        0
    }

    fn sample_rate(&self) -> i32 {
        let state = self.state.lock();
        if let Some(code) = state.failures.get("sv_get_sample_rate") {
            return *code;
        }
        if state.initialized {
            state.sample_rate
        } else {
            -1
        }
    }

    fn open_slot(&self, slot: i32) -> i32 {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.get("sv_open_slot") {
            return *code;
        }
        if !state.initialized || slot < 0 || slot as usize >= MAX_CHANNELS {
            return -1;
        }
        state.slots.insert(slot, Slot::new());
        0
    }

    fn close_slot(&self, slot: i32) -> i32 {
        let mut state = self.state.lock();
        if let Some(code) = state.failures.get("sv_close_slot") {
            return *code;
        }
        match state.slots.remove(&slot) {
            Some(_) => 0,
            None => -1,
        }
    }

    fn lock_slot(&self, slot: i32) -> i32 {
        self.with_slot("sv_lock_slot", slot, |slot| {
            slot.lock_depth += 1;
            0
        })
    }

    fn unlock_slot(&self, slot: i32) -> i32 {
        self.with_slot("sv_unlock_slot", slot, |slot| {
            if slot.lock_depth == 0 {
                return -1;
            }
            slot.lock_depth -= 1;
            0
        })
    }

    fn load_from_memory(&self, slot: i32, data: &[u8]) -> i32 {
        self.with_slot("sv_load_from_memory", slot, |slot| {
            match serde_json::from_slice::<Project>(data) {
                Ok(project) => {
                    slot.loaded = Some(Loaded::new(project));
                    slot.playing = false;
                    slot.start_line = 0;
                    slot.started = None;
                    0
                }
                Err(e) => {
                    debug!(err = %e, "Mock engine could not parse project");
                    -1
                }
            }
        })
    }

    fn play(&self, slot: i32) -> i32 {
        self.with_slot("sv_play", slot, |slot| {
            if !slot.playing {
                slot.playing = true;
                slot.started = Some(Instant::now());
            }
            0
        })
    }

    fn play_from_beginning(&self, slot: i32) -> i32 {
        self.with_slot("sv_play_from_beginning", slot, |slot| {
            slot.playing = true;
            slot.start_line = 0;
            slot.started = Some(Instant::now());
            0
        })
    }

    fn stop(&self, slot: i32) -> i32 {
        self.with_slot("sv_stop", slot, |slot| {
            if slot.playing {
                slot.start_line = slot.current_line();
                slot.playing = false;
                slot.started = None;
            }
            0
        })
    }

    fn pause(&self, slot: i32) -> i32 {
        self.with_slot("sv_pause", slot, |slot| {
            slot.pause_calls += 1;
            0
        })
    }

    fn resume(&self, slot: i32) -> i32 {
        self.with_slot("sv_resume", slot, |slot| {
            slot.resume_calls += 1;
            0
        })
    }

    fn set_autostop(&self, slot: i32, autostop: i32) -> i32 {
        self.with_slot("sv_set_autostop", slot, |slot| {
            slot.autostop = autostop;
            0
        })
    }

    fn autostop(&self, slot: i32) -> i32 {
        self.with_slot("sv_get_autostop", slot, |slot| slot.autostop)
    }

    fn end_of_song(&self, slot: i32) -> i32 {
        self.with_slot("sv_end_of_song", slot, |slot| {
            let length = slot.loaded.as_ref().map(Loaded::length_lines).unwrap_or(0);
            let at_end = slot.autostop != 0 && slot.current_line() >= length;
            i32::from(!slot.playing || at_end)
        })
    }

    fn rewind(&self, slot: i32, line: i32) -> i32 {
        self.with_slot("sv_rewind", slot, |slot| {
            slot.start_line = line;
            if slot.playing {
                slot.started = Some(Instant::now());
            }
            0
        })
    }

    fn volume(&self, slot: i32, volume: i32) -> i32 {
        self.with_slot("sv_volume", slot, |slot| {
            let previous = slot.volume;
            if volume >= 0 {
                slot.volume = volume;
            }
            previous
        })
    }

    fn set_event_t(&self, slot: i32, set: i32, t: i32) -> i32 {
        self.with_slot("sv_set_event_t", slot, |slot| {
            slot.event_timestamp = (set != 0).then_some(t);
            0
        })
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
        self.with_slot("sv_send_event", slot, |slot| {
            slot.events.push(SentEvent {
                track,
                note,
                velocity,
                module,
                ctl,
                ctl_val,
            });

            let Some(loaded) = slot.loaded.as_mut() else {
                return 0;
            };
            match (module, ctl & 0xFF) {
                // Global tempo: values below 0x20 set the speed, the rest set the BPM.
                (0, 0x0F) if ctl_val < 0x20 => loaded.project.tpl = ctl_val,
                (0, 0x0F) => loaded.project.bpm = ctl_val,
                (module, 0x13) if module > 0 => {
                    if let Some(target) = loaded.module_mut(module - 1) {
                        let mut flags = target.flags
                            & !(ModuleFlags::BYPASS | ModuleFlags::SOLO | ModuleFlags::MUTE)
                                .bits();
                        if ctl_val & 0x100 != 0 {
                            flags |= ModuleFlags::BYPASS.bits();
                        }
                        if ctl_val & 0x10 != 0 {
                            flags |= ModuleFlags::SOLO.bits();
                        }
                        if ctl_val & 0x1 != 0 {
                            flags |= ModuleFlags::MUTE.bits();
                        }
                        target.flags = flags;
                    }
                }
                _ => {}
            }
            0
        })
    }

    fn current_line(&self, slot: i32) -> i32 {
        self.with_slot("sv_get_current_line", slot, |slot| slot.current_line())
    }

    fn current_signal_level(&self, slot: i32, _channel: i32) -> i32 {
        self.with_slot("sv_get_current_signal_level", slot, |slot| {
            if slot.playing {
                128 * slot.volume / 256
            } else {
                0
            }
        })
    }

    fn song_name(&self, slot: i32) -> Option<String> {
        self.read_loaded(slot, |loaded| Some(loaded.project.name.clone()))
    }

    fn set_song_name(&self, slot: i32, name: &CStr) -> i32 {
        let name = name.to_string_lossy().into_owned();
        self.with_loaded("sv_set_song_name", slot, |loaded, _| {
            loaded.project.name = name;
            0
        })
    }

    fn song_bpm(&self, slot: i32) -> i32 {
        self.with_loaded("sv_get_song_bpm", slot, |loaded, _| loaded.project.bpm)
    }

    fn song_tpl(&self, slot: i32) -> i32 {
        self.with_loaded("sv_get_song_tpl", slot, |loaded, _| loaded.project.tpl)
    }

    fn song_length_frames(&self, slot: i32) -> Option<u32> {
        if !self.exports("sv_get_song_length_frames") {
            return None;
        }
        let sample_rate = i64::from(self.state.lock().sample_rate);
        self.read_loaded(slot, |loaded| {
            let lines = i64::from(loaded.length_lines());
            let bpm = i64::from(loaded.project.bpm.max(1));
            let tpl = i64::from(loaded.project.tpl.max(1));
            // One beat is 24 ticks.
            Some((lines * tpl * sample_rate * 60 / (bpm * 24)) as u32)
        })
        .or(Some(0))
    }

    fn song_length_lines(&self, slot: i32) -> Option<u32> {
        if !self.exports("sv_get_song_length_lines") {
            return None;
        }
        self.read_loaded(slot, |loaded| Some(loaded.length_lines() as u32))
            .or(Some(0))
    }

    fn find_module(&self, slot: i32, name: &CStr) -> i32 {
        let name = name.to_string_lossy();
        self.read_loaded(slot, |loaded| {
            loaded
                .project
                .modules
                .iter()
                .position(|module| module.as_ref().is_some_and(|m| m.name == name))
                .map(|index| index as i32)
        })
        .unwrap_or(-1)
    }

    fn find_pattern(&self, slot: i32, name: &CStr) -> i32 {
        let name = name.to_string_lossy();
        self.read_loaded(slot, |loaded| {
            loaded
                .patterns
                .iter()
                .position(|pattern| pattern.as_ref().is_some_and(|p| p.pattern.name == name))
                .map(|index| index as i32)
        })
        .unwrap_or(-1)
    }

    fn module_slot_count(&self, slot: i32) -> i32 {
        self.with_loaded("sv_get_number_of_modules", slot, |loaded, _| {
            loaded.project.modules.len() as i32
        })
    }

    fn module_flags(&self, slot: i32, module: i32) -> i32 {
        self.with_loaded("sv_get_module_flags", slot, |loaded, _| {
            if module < 0 || module as usize >= loaded.project.modules.len() {
                return -1;
            }
            match loaded.module(module) {
                Some(module) => (module.flags | ModuleFlags::EXISTS.bits()) as i32,
                None => 0,
            }
        })
    }

    fn module_name(&self, slot: i32, module: i32) -> Option<String> {
        self.read_loaded(slot, |loaded| loaded.module(module).map(|m| m.name.clone()))
    }

    fn connect_module(&self, slot: i32, source: i32, destination: i32) -> i32 {
        self.with_loaded("sv_connect_module", slot, |loaded, lock_depth| {
            if lock_depth == 0 || loaded.module(source).is_none() || loaded.module(destination).is_none()
            {
                return -1;
            }
            loaded.connections.insert((source, destination));
            0
        })
    }

    fn disconnect_module(&self, slot: i32, source: i32, destination: i32) -> i32 {
        self.with_loaded("sv_disconnect_module", slot, |loaded, lock_depth| {
            if lock_depth == 0 || !loaded.connections.remove(&(source, destination)) {
                return -1;
            }
            0
        })
    }

    fn module_ctl_count(&self, slot: i32, module: i32) -> i32 {
        self.with_loaded("sv_get_number_of_module_ctls", slot, |loaded, _| {
            loaded
                .module(module)
                .map_or(-1, |module| module.controllers.len() as i32)
        })
    }

    fn module_ctl_name(&self, slot: i32, module: i32, ctl: i32) -> Option<String> {
        self.read_loaded(slot, |loaded| {
            loaded.controller(module, ctl).map(|c| c.name.clone())
        })
    }

    fn module_ctl_value(&self, slot: i32, module: i32, ctl: i32, _scaled: i32) -> i32 {
        self.with_loaded("sv_get_module_ctl_value", slot, |loaded, _| {
            loaded
                .controller(module, ctl)
                .map_or(NATIVE_SYMBOL_MISSING, |c| c.value)
        })
    }

    fn set_module_ctl_value(
        &self,
        slot: i32,
        module: i32,
        ctl: i32,
        value: i32,
        _scaled: i32,
    ) -> i32 {
        self.with_loaded("sv_set_module_ctl_value", slot, |loaded, _| {
            let controller = loaded
                .module_mut(module)
                .and_then(|m| usize::try_from(ctl).ok().and_then(|i| m.controllers.get_mut(i)));
            match controller {
                Some(controller) => {
                    controller.value = value.clamp(controller.min, controller.max);
                    0
                }
                None => -1,
            }
        })
    }

    fn module_ctl_min(&self, slot: i32, module: i32, ctl: i32, _scaled: i32) -> i32 {
        self.with_loaded("sv_get_module_ctl_min", slot, |loaded, _| {
            loaded
                .controller(module, ctl)
                .map_or(NATIVE_SYMBOL_MISSING, |c| c.min)
        })
    }

    fn module_ctl_max(&self, slot: i32, module: i32, ctl: i32, _scaled: i32) -> i32 {
        self.with_loaded("sv_get_module_ctl_max", slot, |loaded, _| {
            loaded
                .controller(module, ctl)
                .map_or(NATIVE_SYMBOL_MISSING, |c| c.max)
        })
    }

    fn module_finetune(&self, slot: i32, module: i32) -> Option<u32> {
        if !self.exports("sv_get_module_finetune") {
            return None;
        }
        self.read_loaded(slot, |loaded| {
            loaded.module(module).map(|module| {
                ((module.finetune as u16 as u32) << 16) | (module.relative_note as u16 as u32)
            })
        })
        .or(Some(0))
    }

    fn set_module_finetune(&self, slot: i32, module: i32, finetune: i32) -> i32 {
        self.with_loaded("sv_set_module_finetune", slot, |loaded, _| {
            match loaded.module_mut(module) {
                Some(module) => {
                    module.finetune = finetune;
                    0
                }
                None => -1,
            }
        })
    }

    fn set_module_relnote(&self, slot: i32, module: i32, relative_note: i32) -> i32 {
        self.with_loaded("sv_set_module_relnote", slot, |loaded, _| {
            match loaded.module_mut(module) {
                Some(module) => {
                    module.relative_note = relative_note;
                    0
                }
                None => -1,
            }
        })
    }

    fn pattern_slot_count(&self, slot: i32) -> i32 {
        self.with_loaded("sv_get_number_of_patterns", slot, |loaded, _| {
            loaded.patterns.len() as i32
        })
    }

    fn pattern_x(&self, slot: i32, pattern: i32) -> i32 {
        self.with_loaded("sv_get_pattern_x", slot, |loaded, _| {
            loaded.pattern(pattern).map_or(0, |p| p.pattern.x)
        })
    }

    fn pattern_y(&self, slot: i32, pattern: i32) -> i32 {
        self.with_loaded("sv_get_pattern_y", slot, |loaded, _| {
            loaded.pattern(pattern).map_or(0, |p| p.pattern.y)
        })
    }

    fn set_pattern_xy(&self, slot: i32, pattern: i32, x: i32, y: i32) -> i32 {
        self.with_loaded("sv_set_pattern_xy", slot, |loaded, lock_depth| {
            if lock_depth == 0 {
                return -1;
            }
            match loaded.pattern_mut(pattern) {
                Some(loaded) => {
                    loaded.pattern.x = x;
                    loaded.pattern.y = y;
                    0
                }
                None => -1,
            }
        })
    }

    fn pattern_tracks(&self, slot: i32, pattern: i32) -> i32 {
        self.with_loaded("sv_get_pattern_tracks", slot, |loaded, _| {
            if pattern < 0 || pattern as usize >= loaded.patterns.len() {
                return -1;
            }
            loaded.pattern(pattern).map_or(0, |p| p.pattern.tracks)
        })
    }

    fn pattern_lines(&self, slot: i32, pattern: i32) -> i32 {
        self.with_loaded("sv_get_pattern_lines", slot, |loaded, _| {
            if pattern < 0 || pattern as usize >= loaded.patterns.len() {
                return -1;
            }
            loaded.pattern(pattern).map_or(0, |p| p.pattern.lines)
        })
    }

    fn pattern_name(&self, slot: i32, pattern: i32) -> Option<String> {
        self.read_loaded(slot, |loaded| {
            loaded.pattern(pattern).map(|p| p.pattern.name.clone())
        })
    }

    fn pattern_data(&self, slot: i32, pattern: i32) -> *mut Note {
        self.read_loaded(slot, |loaded| {
            loaded
                .pattern(pattern)
                .filter(|p| !p.notes.is_empty())
                .map(|p| UnsafeCell::raw_get(p.notes.as_ptr()))
        })
        .unwrap_or(ptr::null_mut())
    }

    fn pattern_mute(&self, slot: i32, pattern: i32, mute: i32) -> i32 {
        self.with_loaded("sv_pattern_mute", slot, |loaded, lock_depth| {
            if lock_depth == 0 {
                return -1;
            }
            match loaded.pattern_mut(pattern) {
                Some(loaded) => {
                    let previous = loaded.pattern.muted;
                    if mute >= 0 {
                        loaded.pattern.muted = mute != 0;
                    }
                    i32::from(previous)
                }
                None => -1,
            }
        })
    }

    fn ticks(&self) -> Option<u32> {
        self.exports("sv_get_ticks")
            .then(|| self.epoch.elapsed().as_millis() as u32)
    }

    fn ticks_per_second(&self) -> Option<u32> {
        self.exports("sv_get_ticks_per_second").then_some(1000)
    }
}

#[cfg(test)]
mod test {
    use std::ffi::CString;

    use super::*;

    fn loaded_library(project: &Project) -> Library {
        let library = Library::new();
        assert_eq!(library.init(None, 44100, 2, 0), MOCK_VERSION);
        assert_eq!(library.open_slot(0), 0);
        assert_eq!(
            library.load_from_memory(0, &project.to_bytes().expect("serialize")),
            0
        );
        library
    }

    #[test]
    fn test_rejects_garbage_projects() {
        let library = Library::new();
        library.init(None, 44100, 2, 0);
        library.open_slot(0);
        assert_eq!(library.load_from_memory(0, b"not a project"), -1);
        assert_eq!(library.load_from_memory(5, b"{}"), -1);
    }

    #[test]
    fn test_slots_require_init() {
        let library = Library::new();
        assert_eq!(library.open_slot(0), -1);
        library.init(None, 48000, 2, 0);
        assert_eq!(library.sample_rate(), 48000);
        assert_eq!(library.open_slot(16), -1);
        assert_eq!(library.open_slot(15), 0);
    }

    #[test]
    fn test_structure_changes_require_lock() {
        let library = loaded_library(&Project::new("song").with_pattern(Pattern::new("a", 0, 16)));
        assert_eq!(library.set_pattern_xy(0, 0, 4, 0), -1);
        library.lock_slot(0);
        assert_eq!(library.set_pattern_xy(0, 0, 4, 0), 0);
        library.unlock_slot(0);
        assert_eq!(library.pattern_x(0, 0), 4);
        assert_eq!(library.unlock_slot(0), -1);
    }

    #[test]
    fn test_length_and_lookup() {
        let library = loaded_library(
            &Project::new("song")
                .with_pattern(Pattern::new("intro", 0, 32))
                .with_deleted_pattern()
                .with_pattern(Pattern::new("verse", 32, 64)),
        );
        assert_eq!(library.song_length_lines(0), Some(96));
        assert_eq!(library.pattern_lines(0, 1), 0);
        assert_eq!(library.pattern_lines(0, 3), -1);
        let name = CString::new("verse").expect("cstring");
        assert_eq!(library.find_pattern(0, &name), 2);
    }

    #[test]
    fn test_tempo_events() {
        let library = loaded_library(&Project::new("song"));
        library.send_event(0, 0, 0, 0, 0, 0x0F, 140);
        library.send_event(0, 0, 0, 0, 0, 0x0F, 3);
        assert_eq!(library.song_bpm(0), 140);
        assert_eq!(library.song_tpl(0), 3);
        assert_eq!(library.events(0).len(), 2);
    }

    #[test]
    fn test_injected_failure() {
        let library = loaded_library(&Project::new("song"));
        library.fail("sv_play", -7);
        assert_eq!(library.play(0), -7);
        library.clear_failures();
        assert_eq!(library.play(0), 0);
    }
}
