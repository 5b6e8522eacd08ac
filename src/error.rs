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
use std::{ffi::NulError, io, path::PathBuf};

use crate::config::error::ConfigError;

/// Convenience alias used throughout the binding.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the binding. Native failures always carry the numeric code the
/// engine returned so callers can decide what to do with them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to load the engine library at {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("engine library at {path} does not export required symbols: {}", .symbols.join(", "))]
    MissingSymbols {
        path: PathBuf,
        symbols: Vec<&'static str>,
    },

    #[error("engine initialization failed; error code {0}")]
    Init(i32),

    #[error("the engine has not been initialized")]
    NotInitialized,

    #[error("a maximum of {0} channels have been created already; close an existing channel")]
    Capacity(usize),

    #[error("{op} failed{}; error code {code}", .slot.map(|slot| format!(" on channel {slot}")).unwrap_or_default())]
    Native {
        op: &'static str,
        slot: Option<usize>,
        code: i32,
    },

    #[error("{what} {index} is outside of the range 0..{len}")]
    OutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("controller {0} does not exist; controller numbers start at 1")]
    InvalidController(i32),

    #[error("channel {0} has been closed")]
    ChannelClosed(usize),

    #[error("channel {0} has already started playback; close and recreate it to load another project")]
    AlreadyPlayed(usize),

    #[error("channel {0} has live pattern data views; drop them before replacing or releasing the project")]
    ViewsInUse(usize),

    #[error("pattern {pattern} does not exist on channel {slot}")]
    NoSuchPattern { slot: usize, pattern: usize },

    #[error("module {module} does not exist on channel {slot}")]
    NoSuchModule { slot: usize, module: usize },

    #[error("string passed to the engine contains a NUL byte: {0}")]
    Nul(#[from] NulError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Builds a native failure for the given slot.
    pub(crate) fn native(op: &'static str, slot: usize, code: i32) -> Error {
        Error::Native {
            op,
            slot: Some(slot),
            code,
        }
    }

    /// Returns the native error code, if this error came from the engine.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Init(code) | Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_native_error_display() {
        let err = Error::native("sv_play", 3, -2);
        assert_eq!(err.to_string(), "sv_play failed on channel 3; error code -2");
        assert_eq!(err.code(), Some(-2));

        let err = Error::Native {
            op: "sv_get_sample_rate",
            slot: None,
            code: -1,
        };
        assert_eq!(err.to_string(), "sv_get_sample_rate failed; error code -1");
    }

    #[test]
    fn test_non_native_errors_have_no_code() {
        assert_eq!(Error::Capacity(16).code(), None);
        assert_eq!(Error::InvalidController(0).code(), None);
        assert_eq!(Error::Init(-5).code(), Some(-5));
    }
}
