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
    collections::{BTreeMap, HashMap},
    ffi::CString,
    fmt, fs,
    io::Read,
    path::Path,
    sync::{Arc, Weak},
    time::Duration,
};

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, span, warn, Level, Span};

use crate::{
    error::{Error, Result},
    module::{Module, ModuleFlags},
    native::{Native, NATIVE_SYMBOL_MISSING},
    pattern::Pattern,
};

mod looping;
mod poll;

pub(crate) use looping::CustomLoop;
pub use looping::{CUSTOM_LOOP_OFFSET, MOVED_OUT_THRESHOLD};
pub use poll::{LineChangeCallback, PatternTouchCallback, DEFAULT_POLL_RESOLUTION};

/// The channels of an engine, keyed by slot index.
pub(crate) type Registry = RwLock<BTreeMap<usize, Arc<Channel>>>;

/// The pattern effect that sets the tempo. Values below 0x20 set the TPL, the rest the BPM.
const EFFECT_TEMPO: i32 = 0x000F;
const MIN_BPM: f32 = 32.0;
const MAX_TPL: i32 = 0x1F;

/// One beat is 24 ticks.
const TICKS_PER_BEAT: f32 = 24.0;

struct State {
    data: Option<Arc<[u8]>>,
    filename: String,
    playing: bool,
    played: bool,
    closed: bool,
    custom_loop: Option<CustomLoop>,
}

/// A playback slot of the engine holding one project.
///
/// Channels are created by [`crate::Engine::create_channel`] and shared as `Arc<Channel>`.
/// Once closed, every operation that reaches the engine fails with
/// [`Error::ChannelClosed`].
pub struct Channel {
    index: usize,
    id: String,
    native: Arc<dyn Native>,
    registry: Weak<Registry>,
    state: Mutex<State>,
    // Held shared by every PatternData; taken exclusively to replace or release the project.
    views: RwLock<()>,
    pollers: Mutex<HashMap<&'static str, Sender<()>>>,
    span: Span,
}

impl Channel {
    pub(crate) fn new(
        id: &str,
        index: usize,
        native: Arc<dyn Native>,
        registry: Weak<Registry>,
    ) -> Channel {
        Channel {
            index,
            id: id.to_string(),
            native,
            registry,
            state: Mutex::new(State {
                data: None,
                filename: String::new(),
                playing: false,
                played: false,
                closed: false,
                custom_loop: None,
            }),
            views: RwLock::new(()),
            pollers: Mutex::new(HashMap::new()),
            span: span!(Level::INFO, "channel", index, id),
        }
    }

    /// The slot index of the channel, 0 to 15.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The caller-supplied ID of the channel.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The slot to pass to the engine, if the channel is still open.
    pub(crate) fn slot(&self) -> Result<i32> {
        if self.state.lock().closed {
            return Err(Error::ChannelClosed(self.index));
        }
        Ok(self.index as i32)
    }

    pub(crate) fn native(&self) -> &dyn Native {
        self.native.as_ref()
    }

    /// Keeps the project's native memory alive for a pattern data view.
    pub(crate) fn share_views(&self) -> RwLockReadGuard<'_, ()> {
        self.views.read_recursive()
    }

    /// Fails while any pattern data view is alive, otherwise blocks new views until the
    /// guard is dropped.
    pub(crate) fn exclude_views(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.views.try_write().ok_or(Error::ViewsInUse(self.index))
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Loads a project file from disk.
    ///
    /// All loading fails once the channel has started playback; close the channel and
    /// create a new one to load a different project.
    pub fn load_from_path(&self, path: &Path) -> Result<()> {
        let _enter = self.span.enter();
        self.check_loadable()?;

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                self.state.lock().data = None;
                return Err(e.into());
            }
        };
        self.load(data.into())?;
        self.state.lock().filename = path.to_string_lossy().into_owned();

        info!(path = %path.display(), "Loaded project.");
        Ok(())
    }

    /// Loads a project from the contents of a project file. The project filename is cleared.
    pub fn load_from_bytes(&self, data: impl Into<Arc<[u8]>>) -> Result<()> {
        let _enter = self.span.enter();
        self.load(data.into())?;
        self.state.lock().filename.clear();

        info!("Loaded project from memory.");
        Ok(())
    }

    /// Loads a project by reading the reader to its end.
    pub fn load_from_reader<R: Read>(&self, mut reader: R) -> Result<()> {
        self.check_loadable()?;

        let mut data = Vec::new();
        if let Err(e) = reader.read_to_end(&mut data) {
            self.state.lock().data = None;
            return Err(e.into());
        }
        self.load_from_bytes(data)
    }

    fn check_loadable(&self) -> Result<()> {
        if self.state.lock().played {
            return Err(Error::AlreadyPlayed(self.index));
        }
        Ok(())
    }

    fn load(&self, data: Arc<[u8]>) -> Result<()> {
        let slot = self.slot()?;
        self.check_loadable()?;
        let _views = self.exclude_views()?;

        let res = self.native.load_from_memory(slot, &data);
        let mut state = self.state.lock();
        if res != 0 {
            state.data = None;
            return Err(Error::native("sv_load_from_memory", self.index, res));
        }
        state.data = Some(data);
        state.custom_loop = None;
        Ok(())
    }

    /// The path the project was loaded from, or an empty string if it came from memory.
    pub fn project_filename(&self) -> String {
        self.state.lock().filename.clone()
    }

    pub fn set_project_filename(&self, filename: &str) {
        self.state.lock().filename = filename.to_string();
    }

    /// Returns true if the channel is open and has a project loaded.
    pub fn is_valid(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.data.as_ref().is_some_and(|data| !data.is_empty())
    }

    /// The name of the loaded project, or an empty string if it has none.
    pub fn project_name(&self) -> Result<String> {
        let slot = self.slot()?;
        Ok(self.native.song_name(slot).unwrap_or_default())
    }

    pub fn set_project_name(&self, name: &str) -> Result<()> {
        let slot = self.slot()?;
        let name = CString::new(name)?;
        let res = self.native.set_song_name(slot, &name);
        if res != 0 {
            return Err(Error::native("sv_set_song_name", self.index, res));
        }
        Ok(())
    }

    /// Sets the volume of the channel from 0 to 1, in steps of 1/256. Values outside of
    /// that range are clamped.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let slot = self.slot()?;
        let volume = volume.clamp(0.0, 1.0);
        let res = self.native.volume(slot, (volume * 256.0).round() as i32);
        if res < 0 {
            return Err(Error::native("sv_volume", self.index, res));
        }
        Ok(())
    }

    /// The volume of the channel, 0 to 1.
    pub fn volume(&self) -> Result<f32> {
        let slot = self.slot()?;
        // Negative volumes only read the current one.
        let res = self.native.volume(slot, -1);
        if res < 0 {
            return Err(Error::native("sv_volume", self.index, res));
        }
        Ok(res as f32 / 256.0)
    }

    /// Pauses the audio engine until the returned guard is dropped.
    pub(crate) fn paused(&self) -> AudioPause<'_> {
        if let Err(e) = self.pause_audio_engine() {
            warn!(index = self.index, err = %e, "Unable to pause the audio engine.");
        }
        AudioPause { channel: self }
    }

    /// Plays the project from the beginning.
    pub fn play_from_beginning(&self) -> Result<()> {
        let _enter = self.span.enter();
        let slot = self.slot()?;
        let _paused = self.paused();

        let res = self.native.play_from_beginning(slot);
        if res < 0 {
            return Err(Error::native("sv_play_from_beginning", self.index, res));
        }
        self.mark_playing(true);
        info!("Playing from the beginning.");
        Ok(())
    }

    /// Plays the project from the current position, resuming a stopped channel.
    pub fn play(&self) -> Result<()> {
        let _enter = self.span.enter();
        let slot = self.slot()?;
        let _paused = self.paused();

        let res = self.native.play(slot);
        if res < 0 {
            return Err(Error::native("sv_play", self.index, res));
        }
        self.mark_playing(true);
        info!("Playing.");
        Ok(())
    }

    /// Moves the playhead to the given line.
    pub fn seek(&self, line: i32) -> Result<()> {
        let slot = self.slot()?;
        let _paused = self.paused();

        let res = self.native.rewind(slot, line);
        if res != 0 {
            return Err(Error::native("sv_rewind", self.index, res));
        }
        debug!(index = self.index, line, "Seeked.");
        Ok(())
    }

    /// Stops playback. Stopping a stopped channel silences lingering audio such as
    /// echoes. Does nothing if no project is loaded.
    pub fn stop(&self) -> Result<()> {
        let _enter = self.span.enter();
        let slot = self.slot()?;
        let _paused = self.paused();

        if !self.is_valid() {
            return Ok(());
        }
        let res = self.native.stop(slot);
        if res < 0 {
            return Err(Error::native("sv_stop", self.index, res));
        }
        self.mark_playing(false);
        info!("Stopped.");
        Ok(())
    }

    fn mark_playing(&self, playing: bool) {
        let mut state = self.state.lock();
        state.playing = playing;
        state.played |= playing;
    }

    /// Returns true if playback was started and not stopped since. Stays true when a
    /// non-looping project reaches its end.
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Returns true if playback has stopped at the end of a non-looping project.
    pub fn is_at_end_of_song(&self) -> Result<bool> {
        let slot = self.slot()?;
        let res = self.native.end_of_song(slot);
        if res < 0 {
            return Err(Error::native("sv_end_of_song", self.index, res));
        }
        Ok(res == 1)
    }

    /// Returns true if playback loops at the end of the project (the default).
    pub fn is_looping(&self) -> Result<bool> {
        let slot = self.slot()?;
        let res = self.native.autostop(slot);
        if res < 0 {
            return Err(Error::native("sv_get_autostop", self.index, res));
        }
        Ok(res == 0)
    }

    pub fn set_looping(&self, looping: bool) -> Result<()> {
        if self.is_looping()? == looping {
            return Ok(());
        }
        let slot = self.slot()?;
        let _paused = self.paused();

        let res = self.native.set_autostop(slot, i32::from(!looping));
        if res != 0 {
            return Err(Error::native("sv_set_autostop", self.index, res));
        }
        Ok(())
    }

    /// The line the playhead is on. Briefly -1 right after playing from the beginning.
    pub fn current_line(&self) -> Result<i32> {
        let slot = self.slot()?;
        let line = self.native.current_line(slot);
        if line == NATIVE_SYMBOL_MISSING {
            return Err(Error::native("sv_get_current_line", self.index, line));
        }
        Ok(line)
    }

    /// The current signal level of the left and right outputs, 0 to 1.
    pub fn current_signal_level(&self) -> Result<(f32, f32)> {
        let slot = self.slot()?;
        let left = self.native.current_signal_level(slot, 0);
        let right = self.native.current_signal_level(slot, 1);
        if left < 0 || right < 0 {
            return Err(Error::native(
                "sv_get_current_signal_level",
                self.index,
                left.min(right),
            ));
        }
        Ok((left as f32 / 255.0, right as f32 / 255.0))
    }

    pub fn length_in_frames(&self) -> Result<u32> {
        let slot = self.slot()?;
        self.native.song_length_frames(slot).ok_or_else(|| Error::native(
            "sv_get_song_length_frames",
            self.index,
            NATIVE_SYMBOL_MISSING,
        ))
    }

    pub fn length_in_lines(&self) -> Result<u32> {
        let slot = self.slot()?;
        self.native.song_length_lines(slot).ok_or_else(|| Error::native(
            "sv_get_song_length_lines",
            self.index,
            NATIVE_SYMBOL_MISSING,
        ))
    }

    /// The playing time of the project.
    pub fn length(&self) -> Result<Duration> {
        let frames = self.length_in_frames()?;
        let sample_rate = self.native.sample_rate();
        if sample_rate <= 0 {
            return Err(Error::Native {
                op: "sv_get_sample_rate",
                slot: None,
                code: sample_rate,
            });
        }
        Ok(Duration::from_secs_f64(
            f64::from(frames) / f64::from(sample_rate),
        ))
    }

    /// Pauses the audio engine for this channel. All audio stops, including echoes and
    /// delays, but the playback state does not change.
    pub fn pause_audio_engine(&self) -> Result<()> {
        let slot = self.slot()?;
        let res = self.native.pause(slot);
        if res < 0 {
            return Err(Error::native("sv_pause", self.index, res));
        }
        Ok(())
    }

    pub fn resume_audio_engine(&self) -> Result<()> {
        let slot = self.slot()?;
        let res = self.native.resume(slot);
        if res < 0 {
            return Err(Error::native("sv_resume", self.index, res));
        }
        Ok(())
    }

    /// Locks the slot against concurrent access from the audio thread. Structural
    /// changes to the project only work while the lock is held. The lock is released
    /// when the guard is dropped.
    pub fn lock(&self) -> Result<SlotLock<'_>> {
        let slot = self.slot()?;
        let res = self.native.lock_slot(slot);
        if res != 0 {
            return Err(Error::native("sv_lock_slot", self.index, res));
        }
        Ok(SlotLock { channel: self })
    }

    fn unlock_slot(&self) -> Result<()> {
        let res = self.native.unlock_slot(self.index as i32);
        if res != 0 {
            return Err(Error::native("sv_unlock_slot", self.index, res));
        }
        Ok(())
    }

    /// Sets the timestamp of the events sent afterwards. Without one, events are
    /// stamped with the current time.
    pub fn set_event_timestamp(&self, set: bool, timestamp: u32) -> Result<()> {
        let slot = self.slot()?;
        let res = self
            .native
            .set_event_t(slot, i32::from(set), timestamp as i32);
        if res < 0 {
            return Err(Error::native("sv_set_event_t", self.index, res));
        }
        Ok(())
    }

    /// Sends a note/controller event, as if it were played from a pattern track.
    pub fn send_event(
        &self,
        track: i32,
        note: i32,
        velocity: i32,
        module: i32,
        ctl: i32,
        ctl_val: i32,
    ) -> Result<()> {
        let slot = self.slot()?;
        let res = self
            .native
            .send_event(slot, track, note, velocity, module, ctl, ctl_val);
        if res < 0 {
            return Err(Error::native("sv_send_event", self.index, res));
        }
        Ok(())
    }

    /// Sets the BPM of the project, at least 32.
    pub fn set_bpm(&self, bpm: f32) -> Result<()> {
        self.send_event(0, 0, 0, 0, EFFECT_TEMPO, bpm.max(MIN_BPM) as i32)
    }

    pub fn bpm(&self) -> Result<f32> {
        let slot = self.slot()?;
        Ok(self.native.song_bpm(slot) as f32)
    }

    /// Sets the ticks per line of the project, 1 to 31.
    pub fn set_tpl(&self, tpl: i32) -> Result<()> {
        self.send_event(0, 0, 0, 0, EFFECT_TEMPO, tpl.clamp(1, MAX_TPL))
    }

    pub fn tpl(&self) -> Result<i32> {
        let slot = self.slot()?;
        Ok(self.native.song_tpl(slot))
    }

    /// Ticks per minute.
    pub fn tpm(&self) -> Result<f32> {
        Ok(self.bpm()? * TICKS_PER_BEAT)
    }

    /// Lines per minute.
    pub fn lpm(&self) -> Result<f32> {
        Ok(self.tpm()? / self.tpl()?.max(1) as f32)
    }

    /// The number of pattern slots, including slots of deleted patterns.
    pub fn pattern_slot_count(&self) -> Result<usize> {
        let slot = self.slot()?;
        let count = self.native.pattern_slot_count(slot);
        if count < 0 {
            return Err(Error::native("sv_get_number_of_patterns", self.index, count));
        }
        Ok(count as usize)
    }

    /// The number of patterns that exist.
    pub fn pattern_count(&self) -> Result<usize> {
        let slots = self.pattern_slot_count()?;
        let slot = self.slot()?;
        Ok((0..slots)
            .filter(|pattern| self.native.pattern_lines(slot, *pattern as i32) > 0)
            .count())
    }

    /// The pattern in the given slot, if it exists.
    pub fn pattern_by_index(self: &Arc<Self>, index: usize) -> Option<Pattern> {
        let slot = self.slot().ok()?;
        let pattern = i32::try_from(index).ok()?;
        (self.native.pattern_lines(slot, pattern) > 0).then(|| Pattern::new(Arc::clone(self), index))
    }

    /// The first pattern with the given name, if any.
    pub fn pattern_by_name(self: &Arc<Self>, name: &str) -> Option<Pattern> {
        let slot = self.slot().ok()?;
        let name = CString::new(name).ok()?;
        let index = usize::try_from(self.native.find_pattern(slot, &name)).ok()?;
        Some(Pattern::new(Arc::clone(self), index))
    }

    /// Calls the function for every existing pattern until it returns false.
    pub fn for_each_pattern<F>(self: &Arc<Self>, mut f: F) -> Result<()>
    where
        F: FnMut(&Pattern) -> bool,
    {
        for index in 0..self.pattern_slot_count()? {
            if let Some(pattern) = self.pattern_by_index(index) {
                if !f(&pattern) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// All existing patterns, in slot order.
    pub fn patterns(self: &Arc<Self>) -> Result<Vec<Pattern>> {
        let mut patterns = Vec::new();
        self.for_each_pattern(|pattern| {
            patterns.push(pattern.clone());
            true
        })?;
        Ok(patterns)
    }

    /// The number of module slots, including slots of deleted modules.
    pub fn module_slot_count(&self) -> Result<usize> {
        let slot = self.slot()?;
        let count = self.native.module_slot_count(slot);
        if count < 0 {
            return Err(Error::native("sv_get_number_of_modules", self.index, count));
        }
        Ok(count as usize)
    }

    fn module_exists(&self, slot: i32, module: i32) -> bool {
        let flags = self.native.module_flags(slot, module);
        flags >= 0 && ModuleFlags::from_bits(flags as u32).contains(ModuleFlags::EXISTS)
    }

    /// The number of modules that exist.
    pub fn module_count(&self) -> Result<usize> {
        let slots = self.module_slot_count()?;
        let slot = self.slot()?;
        Ok((0..slots)
            .filter(|module| self.module_exists(slot, *module as i32))
            .count())
    }

    /// The module in the given slot, if it exists. Indices match the (hexadecimal)
    /// numbers shown in the engine's interface.
    pub fn module_by_index(self: &Arc<Self>, index: usize) -> Option<Module> {
        let slot = self.slot().ok()?;
        let module = i32::try_from(index).ok()?;
        self.module_exists(slot, module)
            .then(|| Module::new(Arc::clone(self), index))
    }

    /// The first module with the given name, if any.
    pub fn module_by_name(self: &Arc<Self>, name: &str) -> Option<Module> {
        let slot = self.slot().ok()?;
        let name = CString::new(name).ok()?;
        let index = usize::try_from(self.native.find_module(slot, &name)).ok()?;
        Some(Module::new(Arc::clone(self), index))
    }

    /// Calls the function for every existing module until it returns false.
    pub fn for_each_module<F>(self: &Arc<Self>, mut f: F) -> Result<()>
    where
        F: FnMut(&Module) -> bool,
    {
        for index in 0..self.module_slot_count()? {
            if let Some(module) = self.module_by_index(index) {
                if !f(&module) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// The output module, which is always in slot 0.
    pub fn output_module(self: &Arc<Self>) -> Module {
        Module::new(Arc::clone(self), 0)
    }

    /// Closes the slot, removes the channel from its engine and stops its pollers. The
    /// channel index becomes available to new channels.
    ///
    /// Fails with [`Error::ViewsInUse`] while a [`crate::PatternData`] of the channel is
    /// alive. Loading a project has the same restriction.
    pub fn close(&self) -> Result<()> {
        let _enter = self.span.enter();
        let slot = self.slot()?;
        let _views = self.exclude_views()?;

        let res = self.native.close_slot(slot);
        if res != 0 {
            return Err(Error::native("sv_close_slot", self.index, res));
        }
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.playing = false;
            state.data = None;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.index);
        }
        self.cancel_all_pollers();

        info!("Closed channel.");
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Keeps the audio engine of a channel paused until dropped.
pub(crate) struct AudioPause<'a> {
    channel: &'a Channel,
}

impl Drop for AudioPause<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.resume_audio_engine() {
            warn!(index = self.channel.index, err = %e, "Unable to resume the audio engine.");
        }
    }
}

/// Holds the lock of a channel's slot until dropped.
pub struct SlotLock<'a> {
    channel: &'a Channel,
}

impl SlotLock<'_> {
    /// Releases the lock, reporting a failure to do so.
    pub fn unlock(self) -> Result<()> {
        let channel = self.channel;
        std::mem::forget(self);
        channel.unlock_slot()
    }
}

impl Drop for SlotLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.unlock_slot() {
            warn!(index = self.channel.index, err = %e, "Unable to unlock slot.");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{io::Cursor, path::Path};

    use crate::{
        error::Error,
        native::{
            mock::{self, Project},
            NATIVE_SYMBOL_MISSING,
        },
        testutil::{engine_with_mock, loaded_channel},
    };

    fn project() -> Project {
        Project::new("channel")
            .with_tempo(120, 6)
            .with_pattern(mock::Pattern::new("intro", 0, 32))
            .with_pattern(mock::Pattern::new("verse", 32, 64))
    }

    #[test]
    fn test_volume_round_trip() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        for volume in [0.0_f32, 0.1, 0.25, 0.333, 0.5, 0.77, 1.0] {
            channel.set_volume(volume).unwrap();
            let read = channel.volume().unwrap();
            assert!(
                (read - volume).abs() <= 1.0 / 256.0,
                "set {volume}, read {read}"
            );
        }

        channel.set_volume(3.0).unwrap();
        assert_eq!(channel.volume().unwrap(), 1.0);
        channel.set_volume(-0.5).unwrap();
        assert_eq!(channel.volume().unwrap(), 0.0);
    }

    #[test]
    fn test_load_from_file_records_filename() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert_eq!(channel.project_filename(), "");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.sunvox");
        std::fs::write(&path, project().to_bytes().unwrap()).unwrap();
        channel.load_from_path(&path).unwrap();
        assert_eq!(channel.project_filename(), path.to_string_lossy());
        assert!(channel.is_valid());

        channel.load_from_reader(Cursor::new(project().to_bytes().unwrap())).unwrap();
        assert_eq!(channel.project_filename(), "");
        channel.set_project_filename("renamed.sunvox");
        assert_eq!(channel.project_filename(), "renamed.sunvox");
    }

    #[test]
    fn test_failed_load_clears_project() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert!(channel.is_valid());

        let err = channel.load_from_bytes(&b"garbage"[..]).unwrap_err();
        assert!(matches!(err, Error::Native { op: "sv_load_from_memory", .. }));
        assert!(!channel.is_valid());

        channel.load_from_bytes(project().to_bytes().unwrap()).unwrap();
        assert!(channel.is_valid());
        assert!(channel
            .load_from_path(Path::new("/nonexistent/song.sunvox"))
            .is_err());
        assert!(!channel.is_valid());
    }

    #[test]
    fn test_load_rejected_after_playback() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        channel.play_from_beginning().unwrap();
        channel.stop().unwrap();
        assert!(matches!(
            channel.load_from_bytes(project().to_bytes().unwrap()),
            Err(Error::AlreadyPlayed(_))
        ));
        assert!(channel.is_valid());
    }

    #[test]
    fn test_playback_is_paused_around_changes() {
        let (_engine, mock, channel) = loaded_channel(&project());
        channel.play_from_beginning().unwrap();
        assert!(channel.is_playing());
        channel.seek(16).unwrap();
        channel.stop().unwrap();
        assert!(!channel.is_playing());
        channel.play().unwrap();
        assert_eq!(mock.pause_resume_calls(channel.index()), (4, 4));

        mock.fail("sv_play", -2);
        let err = channel.play().unwrap_err();
        assert_eq!(err.code(), Some(-2));
        assert_eq!(mock.pause_resume_calls(channel.index()), (5, 5));
    }

    #[test]
    fn test_stop_without_project() {
        let (engine, _mock) = engine_with_mock();
        let channel = engine.create_channel("empty").unwrap();
        channel.stop().unwrap();
        assert!(!channel.is_valid());
    }

    #[test]
    fn test_looping() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert!(channel.is_looping().unwrap());
        channel.set_looping(false).unwrap();
        assert!(!channel.is_looping().unwrap());
        assert!(channel.is_at_end_of_song().unwrap());
        channel.play_from_beginning().unwrap();
        assert!(!channel.is_at_end_of_song().unwrap());
        channel.set_looping(true).unwrap();
        assert!(channel.is_looping().unwrap());
    }

    #[test]
    fn test_tempo() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert_eq!(channel.bpm().unwrap(), 120.0);
        assert_eq!(channel.tpl().unwrap(), 6);
        assert_eq!(channel.tpm().unwrap(), 2880.0);
        assert_eq!(channel.lpm().unwrap(), 480.0);

        channel.set_bpm(10.0).unwrap();
        assert_eq!(channel.bpm().unwrap(), 32.0);
        channel.set_bpm(140.5).unwrap();
        assert_eq!(channel.bpm().unwrap(), 140.0);
        channel.set_tpl(64).unwrap();
        assert_eq!(channel.tpl().unwrap(), 31);
        channel.set_tpl(3).unwrap();
        assert_eq!(channel.tpl().unwrap(), 3);
    }

    #[test]
    fn test_length() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert_eq!(channel.length_in_lines().unwrap(), 96);
        // 96 lines at 120 BPM and 6 TPL are 24 beats, 12 seconds.
        assert_eq!(channel.length_in_frames().unwrap(), 12 * 44100);
        assert_eq!(channel.length().unwrap().as_secs(), 12);
    }

    #[test]
    fn test_project_name() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert_eq!(channel.project_name().unwrap(), "channel");
        channel.set_project_name("renamed").unwrap();
        assert_eq!(channel.project_name().unwrap(), "renamed");
        assert!(matches!(
            channel.set_project_name("bad\0name"),
            Err(Error::Nul(_))
        ));
    }

    #[test]
    fn test_events() {
        let (_engine, mock, channel) = loaded_channel(&project());
        channel.set_event_timestamp(true, 1234).unwrap();
        assert_eq!(mock.event_timestamp(channel.index()), Some(1234));
        channel.set_event_timestamp(false, 0).unwrap();
        assert_eq!(mock.event_timestamp(channel.index()), None);

        channel.send_event(1, 61, 129, 2, 0, 0).unwrap();
        let events = mock.events(channel.index());
        assert_eq!(
            events,
            vec![mock::SentEvent {
                track: 1,
                note: 61,
                velocity: 129,
                module: 2,
                ctl: 0,
                ctl_val: 0,
            }]
        );
    }

    #[test]
    fn test_signal_level() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        assert_eq!(channel.current_signal_level().unwrap(), (0.0, 0.0));
        channel.play_from_beginning().unwrap();
        let (left, right) = channel.current_signal_level().unwrap();
        assert!(left > 0.0 && left <= 1.0);
        assert_eq!(left, right);
    }

    #[test]
    fn test_slot_lock_guard() {
        let (_engine, mock, channel) = loaded_channel(&project());
        {
            let _lock = channel.lock().unwrap();
            assert_eq!(mock.lock_depth(channel.index()), 1);
        }
        assert_eq!(mock.lock_depth(channel.index()), 0);

        let lock = channel.lock().unwrap();
        lock.unlock().unwrap();
        assert_eq!(mock.lock_depth(channel.index()), 0);
    }

    #[test]
    fn test_closed_channel() {
        let (engine, mock, channel) = loaded_channel(&project());
        channel.close().unwrap();
        assert!(channel.is_closed());
        assert!(!channel.is_valid());
        assert!(!mock.is_slot_open(channel.index()));
        assert!(engine.channel_by_index(channel.index()).is_none());

        assert!(matches!(channel.play(), Err(Error::ChannelClosed(0))));
        assert!(matches!(channel.volume(), Err(Error::ChannelClosed(0))));
        assert!(matches!(channel.close(), Err(Error::ChannelClosed(0))));
        assert!(channel.pattern_by_index(0).is_none());
    }

    #[test]
    fn test_failed_close_keeps_channel() {
        let (engine, mock, channel) = loaded_channel(&project());
        mock.fail("sv_close_slot", -1);
        assert!(channel.close().is_err());
        assert!(!channel.is_closed());
        assert!(engine.channel_by_index(channel.index()).is_some());
    }

    #[test]
    fn test_unexported_getters_fail() {
        let (_engine, mock, channel) = loaded_channel(&project());
        assert_eq!(channel.length_in_lines().unwrap(), 96);

        for symbol in [
            "sv_get_current_line",
            "sv_get_song_length_frames",
            "sv_get_song_length_lines",
        ] {
            mock.fail(symbol, NATIVE_SYMBOL_MISSING);
        }
        assert!(matches!(
            channel.current_line(),
            Err(Error::Native { op: "sv_get_current_line", .. })
        ));
        assert_eq!(
            channel.length_in_frames().unwrap_err().code(),
            Some(NATIVE_SYMBOL_MISSING)
        );
        assert!(channel.length_in_lines().is_err());
        assert!(channel.length().is_err());
    }
}
