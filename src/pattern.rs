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
use std::{fmt, ptr::NonNull, sync::Arc};

use parking_lot::RwLockReadGuard;

use crate::{
    channel::{Channel, CUSTOM_LOOP_OFFSET, MOVED_OUT_THRESHOLD},
    error::{Error, Result},
    native::{Note, NATIVE_SYMBOL_MISSING},
};

/// Middle C (C5).
pub const MIDDLE_C: u8 = 61;

/// Special note values. Everything from 128 upwards is a command rather than a pitch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NoteCommand {
    NoteOff = 128,
    AllNotesOff = 129,
    CleanSynths = 130,
    Stop = 131,
    Play = 132,
    SetPitch = 133,
    CleanModule = 134,
}

impl From<NoteCommand> for u8 {
    fn from(command: NoteCommand) -> u8 {
        command as u8
    }
}

/// A reference to a pattern in the project loaded into a channel. Holds only a position;
/// every call queries the engine.
#[derive(Clone)]
pub struct Pattern {
    channel: Arc<Channel>,
    index: usize,
}

impl Pattern {
    pub(crate) fn new(channel: Arc<Channel>, index: usize) -> Pattern {
        Pattern { channel, index }
    }

    /// The pattern's slot index in the project.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The channel the pattern belongs to.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn pattern_index(&self) -> i32 {
        self.index as i32
    }

    /// Returns true if the pattern exists, i.e. has any lines.
    pub fn is_valid(&self) -> bool {
        self.line_count().map(|lines| lines > 0).unwrap_or(false)
    }

    /// The line the pattern starts on.
    pub fn x(&self) -> Result<i32> {
        let slot = self.channel.slot()?;
        let x = self.channel.native().pattern_x(slot, self.pattern_index());
        if x == NATIVE_SYMBOL_MISSING {
            return Err(Error::native("sv_get_pattern_x", self.channel.index(), x));
        }
        Ok(x)
    }

    pub fn y(&self) -> Result<i32> {
        let slot = self.channel.slot()?;
        let y = self.channel.native().pattern_y(slot, self.pattern_index());
        if y == NATIVE_SYMBOL_MISSING {
            return Err(Error::native("sv_get_pattern_y", self.channel.index(), y));
        }
        Ok(y)
    }

    /// The line just after the end of the pattern.
    pub fn x2(&self) -> Result<i32> {
        Ok(self.x()? + self.line_count()? as i32)
    }

    /// Moves the pattern to the given line and Y coordinate.
    pub fn set_xy(&self, x: i32, y: i32) -> Result<()> {
        let _paused = self.channel.paused();
        self.place(x, y)
    }

    /// Moves the pattern by the given number of lines and Y units.
    pub fn move_by(&self, dx: i32, dy: i32) -> Result<()> {
        let _paused = self.channel.paused();
        self.shift(dx, dy)
    }

    /// Moves the pattern under the slot lock. The caller decides whether the audio
    /// engine is paused.
    pub(crate) fn place(&self, x: i32, y: i32) -> Result<()> {
        let slot = self.channel.slot()?;
        let _lock = self.channel.lock()?;
        let res = self
            .channel
            .native()
            .set_pattern_xy(slot, self.pattern_index(), x, y);
        if res != 0 {
            return Err(Error::native("sv_set_pattern_xy", self.channel.index(), res));
        }
        Ok(())
    }

    pub(crate) fn shift(&self, dx: i32, dy: i32) -> Result<()> {
        let (x, y) = (self.x()?, self.y()?);
        self.place(x.saturating_add(dx), y.saturating_add(dy))
    }

    /// The line the pattern would start on if no custom loop were set.
    pub fn custom_loopless_x(&self) -> Result<i32> {
        let x = self.x()?;
        Ok(match self.channel.custom_loop() {
            Some(_) if x < MOVED_OUT_THRESHOLD => x + CUSTOM_LOOP_OFFSET,
            Some(custom) => x + custom.start,
            None => x,
        })
    }

    /// The line just after the end of the pattern if no custom loop were set.
    pub fn custom_loopless_x2(&self) -> Result<i32> {
        Ok(self.custom_loopless_x()? + self.line_count()? as i32)
    }

    /// The name of the pattern.
    pub fn name(&self) -> Result<String> {
        let slot = self.channel.slot()?;
        Ok(self
            .channel
            .native()
            .pattern_name(slot, self.pattern_index())
            .unwrap_or_default())
    }

    /// Mutes or unmutes the pattern, returning whether it was muted before.
    pub fn set_mute(&self, mute: bool) -> Result<bool> {
        let slot = self.channel.slot()?;
        let res = {
            let _lock = self.channel.lock()?;
            self.channel
                .native()
                .pattern_mute(slot, self.pattern_index(), i32::from(mute))
        };
        if res < 0 {
            return Err(Error::native("sv_pattern_mute", self.channel.index(), res));
        }
        Ok(res == 1)
    }

    /// The number of lines in the pattern.
    pub fn line_count(&self) -> Result<usize> {
        let slot = self.channel.slot()?;
        let lines = self
            .channel
            .native()
            .pattern_lines(slot, self.pattern_index());
        if lines < 0 {
            return Err(Error::native("sv_get_pattern_lines", self.channel.index(), lines));
        }
        Ok(lines as usize)
    }

    /// The number of tracks in the pattern.
    pub fn track_count(&self) -> Result<usize> {
        let slot = self.channel.slot()?;
        let tracks = self
            .channel
            .native()
            .pattern_tracks(slot, self.pattern_index());
        if tracks < 0 {
            return Err(Error::native("sv_get_pattern_tracks", self.channel.index(), tracks));
        }
        Ok(tracks as usize)
    }

    /// Returns a view over the pattern's notes as the engine stores them. Writes through
    /// the view change the live project immediately.
    pub fn data(&self) -> Result<PatternData<'_>> {
        let views = self.channel.share_views();
        let lines = self.line_count()?;
        let tracks = self.track_count()?;
        let slot = self.channel.slot()?;
        let cells = self
            .channel
            .native()
            .pattern_data(slot, self.pattern_index());
        let cells = NonNull::new(cells).ok_or(Error::NoSuchPattern {
            slot: self.channel.index(),
            pattern: self.index,
        })?;
        Ok(PatternData {
            cells,
            lines,
            tracks,
            _views: views,
        })
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("channel", &self.channel.index())
            .field("index", &self.index)
            .finish()
    }
}

/// A live view over a pattern's note grid, `lines * tracks` cells stored line by line.
///
/// The cells belong to the engine. Nothing synchronizes access with the audio thread.
/// While a view is alive the channel refuses to load another project or close, and the
/// engine refuses to shut down, so the cells stay allocated.
pub struct PatternData<'a> {
    cells: NonNull<Note>,
    lines: usize,
    tracks: usize,
    _views: RwLockReadGuard<'a, ()>,
}

impl PatternData<'_> {
    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn track_count(&self) -> usize {
        self.tracks
    }

    fn offset(&self, track: usize, line: usize) -> Result<usize> {
        if track >= self.tracks {
            return Err(Error::OutOfBounds {
                what: "track",
                index: track,
                len: self.tracks,
            });
        }
        if line >= self.lines {
            return Err(Error::OutOfBounds {
                what: "line",
                index: line,
                len: self.lines,
            });
        }
        Ok(line * self.tracks + track)
    }

    /// Returns a copy of the cell at the track and line.
    pub fn cell(&self, track: usize, line: usize) -> Result<Note> {
        let offset = self.offset(track, line)?;
        // SAFETY: offset is within the lines * tracks cells the engine reported.
        Ok(unsafe { self.cells.as_ptr().add(offset).read() })
    }

    /// Replaces the cell at the track and line.
    pub fn set_cell(&mut self, track: usize, line: usize, note: Note) -> Result<()> {
        self.update(track, line, |cell| *cell = note)
    }

    fn update<F>(&mut self, track: usize, line: usize, op: F) -> Result<()>
    where
        F: FnOnce(&mut Note),
    {
        let offset = self.offset(track, line)?;
        // SAFETY: offset is within the lines * tracks cells the engine reported, and the
        // reference does not escape this call.
        op(unsafe { &mut *self.cells.as_ptr().add(offset) });
        Ok(())
    }

    /// The note at the track and line. 61 is middle C; see [`NoteCommand`] for values
    /// from 128 up.
    pub fn note(&self, track: usize, line: usize) -> Result<u8> {
        Ok(self.cell(track, line)?.note)
    }

    pub fn set_note(&mut self, track: usize, line: usize, note: u8) -> Result<()> {
        self.update(track, line, |cell| cell.note = note)
    }

    /// The velocity, 1 to 129, with 0 meaning the default.
    pub fn velocity(&self, track: usize, line: usize) -> Result<u8> {
        Ok(self.cell(track, line)?.velocity)
    }

    pub fn set_velocity(&mut self, track: usize, line: usize, velocity: u8) -> Result<()> {
        self.update(track, line, |cell| cell.velocity = velocity)
    }

    /// The index of the module the cell plays, if any.
    pub fn module(&self, track: usize, line: usize) -> Result<Option<u16>> {
        Ok(self.cell(track, line)?.module.checked_sub(1))
    }

    pub fn set_module(&mut self, track: usize, line: usize, module: Option<u16>) -> Result<()> {
        let stored = match module {
            Some(module) => module.checked_add(1).ok_or(Error::OutOfBounds {
                what: "module",
                index: usize::from(module),
                len: usize::from(u16::MAX),
            })?,
            None => 0,
        };
        self.update(track, line, |cell| cell.module = stored)
    }

    /// The raw controller/effect column, 0xCCEE.
    pub fn controller(&self, track: usize, line: usize) -> Result<u16> {
        Ok(self.cell(track, line)?.ctl)
    }

    pub fn set_controller(&mut self, track: usize, line: usize, controller: u16) -> Result<()> {
        self.update(track, line, |cell| cell.ctl = controller)
    }

    /// The raw controller/effect parameter, 0xXXYY.
    pub fn controller_value(&self, track: usize, line: usize) -> Result<u16> {
        Ok(self.cell(track, line)?.ctl_val)
    }

    pub fn set_controller_value(&mut self, track: usize, line: usize, value: u16) -> Result<()> {
        self.update(track, line, |cell| cell.ctl_val = value)
    }
}
