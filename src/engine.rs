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
    collections::BTreeMap,
    ffi::CString,
    fmt,
    path::Path,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{info, span, warn, Level, Span};

use crate::{
    channel::{Channel, Registry},
    config::{engine::LibraryLocation, EngineConfig, InitConfig},
    error::{Error, Result},
    native::{self, Native, MAX_CHANNELS, NATIVE_SYMBOL_MISSING},
};

/// The number of output channels the engine is initialized with.
const OUTPUT_CHANNELS: i32 = 2;

/// The version of the engine library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    /// Decodes the version the engine returns from initialization, 0xMMmmpp.
    pub fn from_code(code: i32) -> Version {
        Version {
            major: ((code >> 16) & 0xFF) as u8,
            minor: ((code >> 8) & 0xFF) as u8,
            patch: (code & 0xFF) as u8,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How [`Engine::channel_by_id`] chooses between channels sharing an ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// The first channel with the ID.
    Any,
    /// The first playing channel with the ID.
    Playing,
    /// The first playing channel with the ID, or else the first with the ID.
    PlayingOrAny,
    /// The first stopped channel with the ID.
    NotPlaying,
    /// The first stopped channel with the ID, or else the first with the ID.
    NotPlayingOrAny,
}

/// The engine and its channels.
///
/// The engine library keeps process-wide state, so create one `Engine` per process and
/// share it. Initialization only happens once; later calls return immediately.
pub struct Engine {
    native: Option<Arc<dyn Native>>,
    version: Option<Version>,
    channels: Arc<Registry>,
    span: Span,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    /// Creates an uninitialized engine.
    pub fn new() -> Engine {
        Engine {
            native: None,
            version: None,
            channels: Arc::new(RwLock::new(BTreeMap::new())),
            span: span!(Level::INFO, "engine"),
        }
    }

    /// Loads the engine library at the given path and initializes it.
    pub fn init(&mut self, path: &Path, config: &InitConfig) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let native = native::open(path)?;
        self.init_with(native, config)
    }

    /// Loads the engine library for this OS and architecture from an unpacked library
    /// distribution (`<base>/linux/lib_x86_64/sunvox.so` and so on) and initializes it.
    pub fn init_from_directory(&mut self, base: &Path, config: &InitConfig) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.init(&native::library_path(base), config)
    }

    /// Loads and initializes the engine as described by the configuration.
    pub fn init_from_config(&mut self, config: &EngineConfig) -> Result<()> {
        let init = config.init_config();
        match config.library()? {
            LibraryLocation::Path(path) => self.init(&path, &init),
            LibraryLocation::Directory(base) => self.init_from_directory(&base, &init),
        }
    }

    /// Initializes an already loaded engine library.
    pub fn init_with(&mut self, native: Arc<dyn Native>, config: &InitConfig) -> Result<()> {
        let _enter = self.span.enter();
        if self.is_initialized() {
            return Ok(());
        }

        let options = if config.options().is_empty() {
            None
        } else {
            Some(CString::new(config.options())?)
        };
        let code = native.init(
            options.as_deref(),
            config.sample_rate(),
            OUTPUT_CHANNELS,
            config.flags().bits(),
        );
        if code < 0 {
            return Err(Error::Init(code));
        }

        let version = Version::from_code(code);
        info!(
            %version,
            sample_rate = config.sample_rate(),
            options = config.options(),
            "Initialized engine."
        );
        self.native = Some(native);
        self.version = Some(version);
        Ok(())
    }

    /// Shuts the engine down.
    ///
    /// The engine still counts as initialized afterwards, so it cannot be initialized
    /// again through this handle.
    ///
    /// Fails with [`Error::ViewsInUse`] while any channel has a live pattern data view.
    pub fn deinit(&self) -> Result<()> {
        let _enter = self.span.enter();
        let native = self.native()?;
        let channels = self.channels.read();
        let _views = channels
            .values()
            .map(|channel| channel.exclude_views())
            .collect::<Result<Vec<_>>>()?;
        let res = native.deinit();
        if res != 0 {
            return Err(Error::Native {
                op: "sv_deinit",
                slot: None,
                code: res,
            });
        }
        info!("Deinitialized engine.");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.native.is_some()
    }

    /// The version of the engine library, once initialized.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    fn native(&self) -> Result<&Arc<dyn Native>> {
        self.native.as_ref().ok_or(Error::NotInitialized)
    }

    /// Opens a channel in the first free slot. At most 16 channels can be open at once.
    pub fn create_channel(&self, id: &str) -> Result<Arc<Channel>> {
        let _enter = self.span.enter();
        let native = self.native()?;

        let mut channels = self.channels.write();
        let index = (0..MAX_CHANNELS)
            .find(|index| !channels.contains_key(index))
            .ok_or(Error::Capacity(MAX_CHANNELS))?;

        let res = native.open_slot(index as i32);
        if res != 0 {
            warn!(index, code = res, "Unable to open slot.");
            return Err(Error::native("sv_open_slot", index, res));
        }

        let channel = Arc::new(Channel::new(
            id,
            index,
            Arc::clone(native),
            Arc::downgrade(&self.channels),
        ));
        channels.insert(index, Arc::clone(&channel));

        info!(index, id, "Created channel.");
        Ok(channel)
    }

    /// Returns the lowest-indexed channel with the ID that matches the selection.
    pub fn channel_by_id(&self, id: &str, selection: Selection) -> Option<Arc<Channel>> {
        let channels = self.channels.read();
        let mut matching = channels.values().filter(|channel| channel.id() == id);
        let first_where = |playing: bool| {
            channels
                .values()
                .find(|channel| channel.id() == id && channel.is_playing() == playing)
        };

        let found = match selection {
            Selection::Any => matching.next(),
            Selection::Playing => first_where(true),
            Selection::NotPlaying => first_where(false),
            Selection::PlayingOrAny => first_where(true).or_else(|| matching.next()),
            Selection::NotPlayingOrAny => first_where(false).or_else(|| matching.next()),
        };
        found.cloned()
    }

    /// Returns the channel in the given slot.
    pub fn channel_by_index(&self, index: usize) -> Option<Arc<Channel>> {
        self.channels.read().get(&index).cloned()
    }

    /// Returns the lowest-indexed channel whose project was loaded from the file name.
    pub fn channel_by_filename(&self, filename: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .values()
            .find(|channel| channel.project_filename() == filename)
            .cloned()
    }

    /// Calls the function for every channel, lowest index first, until it returns false.
    pub fn for_each_channel<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Channel>) -> bool,
    {
        let channels: Vec<_> = self.channels.read().values().cloned().collect();
        for channel in &channels {
            if !f(channel) {
                break;
            }
        }
    }

    /// The number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// The sample rate the engine runs at, which may differ from the requested one.
    pub fn sample_rate(&self) -> Result<u32> {
        let sample_rate = self.native()?.sample_rate();
        if sample_rate < 0 {
            return Err(Error::Native {
                op: "sv_get_sample_rate",
                slot: None,
                code: sample_rate,
            });
        }
        Ok(sample_rate as u32)
    }

    /// The engine's current system tick counter, for event timestamps.
    pub fn ticks(&self) -> Result<u32> {
        self.native()?.ticks().ok_or_else(|| Error::Native {
            op: "sv_get_ticks",
            slot: None,
            code: NATIVE_SYMBOL_MISSING,
        })
    }

    pub fn ticks_per_second(&self) -> Result<u32> {
        self.native()?.ticks_per_second().ok_or_else(|| Error::Native {
            op: "sv_get_ticks_per_second",
            slot: None,
            code: NATIVE_SYMBOL_MISSING,
        })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("version", &self.version)
            .field("channels", &self.channel_count())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{path::Path, sync::Arc};

    use super::*;
    use crate::{
        config::InitFlags,
        native::mock::{self, MOCK_VERSION},
        testutil::{engine_with_mock, project_bytes},
    };

    #[test]
    fn test_version_decode() {
        let version = Version::from_code(MOCK_VERSION);
        assert_eq!(
            version,
            Version {
                major: 2,
                minor: 1,
                patch: 2
            }
        );
        assert_eq!(version.to_string(), "2.1.2");
    }

    #[test]
    fn test_init_mock_path() {
        let mut engine = Engine::new();
        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.create_channel("song"),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(engine.sample_rate(), Err(Error::NotInitialized)));

        engine
            .init(Path::new("mock"), &InitConfig::new().with_sample_rate(48000))
            .unwrap();
        assert!(engine.is_initialized());
        assert_eq!(engine.version().unwrap().to_string(), "2.1.2");
        assert_eq!(engine.sample_rate().unwrap(), 48000);
        assert_eq!(engine.ticks_per_second().unwrap(), 1000);

        // A second init is a no-op, even with a path that could not load.
        engine
            .init(Path::new("/nonexistent/sunvox.so"), &InitConfig::new())
            .unwrap();
    }

    #[test]
    fn test_init_failure() {
        let native = Arc::new(mock::Library::new());
        native.fail("sv_init", -4);
        let mut engine = Engine::new();
        let err = engine
            .init_with(native, &InitConfig::new().with_flags(InitFlags::ONE_THREAD))
            .unwrap_err();
        assert!(matches!(err, Error::Init(-4)));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_init_rejects_nul_options() {
        let mut engine = Engine::new();
        let err = engine
            .init_with(
                Arc::new(mock::Library::new()),
                &InitConfig::new().with_device("hw\0"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Nul(_)));
    }

    #[test]
    fn test_init_from_missing_directory() {
        let mut engine = Engine::new();
        let err = engine
            .init_from_directory(Path::new("/nonexistent/sunvox_lib"), &InitConfig::new())
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn test_init_from_config() {
        let mut engine = Engine::new();
        assert!(matches!(
            engine.init_from_config(&EngineConfig::default()),
            Err(Error::Config(_))
        ));

        let config: EngineConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(
                "library_path: mock\nsample_rate: 22050",
                ::config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        engine.init_from_config(&config).unwrap();
        // The mock never runs slower than 44.1kHz.
        assert_eq!(engine.sample_rate().unwrap(), 44100);
    }

    #[test]
    fn test_deinit_keeps_initialized_flag() {
        let (engine, mock) = engine_with_mock();
        engine.deinit().unwrap();
        assert!(engine.is_initialized());

        mock.fail("sv_deinit", -1);
        let err = engine.deinit().unwrap_err();
        assert_eq!(err.code(), Some(-1));
        assert!(engine.is_initialized());
    }

    #[test]
    fn test_deinit_waits_for_pattern_views() {
        let (engine, _mock) = engine_with_mock();
        let channel = engine.create_channel("song").unwrap();
        channel.load_from_bytes(project_bytes()).unwrap();
        let pattern = channel.pattern_by_index(0).unwrap();

        let data = pattern.data().unwrap();
        assert!(matches!(engine.deinit(), Err(Error::ViewsInUse(0))));
        assert_eq!(data.note(0, 0).unwrap(), 0);
        drop(data);
        engine.deinit().unwrap();
    }

    #[test]
    fn test_unexported_ticks() {
        let (engine, mock) = engine_with_mock();
        assert!(engine.ticks().is_ok());
        mock.fail("sv_get_ticks", NATIVE_SYMBOL_MISSING);
        mock.fail("sv_get_ticks_per_second", NATIVE_SYMBOL_MISSING);
        assert_eq!(engine.ticks().unwrap_err().code(), Some(NATIVE_SYMBOL_MISSING));
        assert!(engine.ticks_per_second().is_err());
    }

    #[test]
    fn test_capacity_and_reuse() {
        let (engine, mock) = engine_with_mock();
        let channels: Vec<_> = (0..MAX_CHANNELS)
            .map(|i| engine.create_channel(&format!("channel {i}")).unwrap())
            .collect();
        for (i, channel) in channels.iter().enumerate() {
            assert_eq!(channel.index(), i);
            assert!(mock.is_slot_open(i));
        }
        assert_eq!(engine.channel_count(), 16);
        assert!(matches!(
            engine.create_channel("one too many"),
            Err(Error::Capacity(16))
        ));

        channels[5].close().unwrap();
        assert_eq!(engine.channel_count(), 15);
        let reused = engine.create_channel("reused").unwrap();
        assert_eq!(reused.index(), 5);
        assert!(matches!(
            engine.create_channel("still full"),
            Err(Error::Capacity(_))
        ));
    }

    #[test]
    fn test_open_slot_failure() {
        let (engine, mock) = engine_with_mock();
        mock.fail("sv_open_slot", -2);
        let err = engine.create_channel("song").unwrap_err();
        assert!(matches!(err, Error::Native { op: "sv_open_slot", code: -2, .. }));
        assert_eq!(engine.channel_count(), 0);
    }

    #[test]
    fn test_channel_selection() {
        let (engine, _mock) = engine_with_mock();
        let first = engine.create_channel("song").unwrap();
        let second = engine.create_channel("song").unwrap();
        let other = engine.create_channel("other").unwrap();
        for channel in [&first, &second, &other] {
            channel.load_from_bytes(project_bytes()).unwrap();
        }
        second.play().unwrap();

        let index = |selection| engine.channel_by_id("song", selection).map(|c| c.index());
        assert_eq!(index(Selection::Any), Some(0));
        assert_eq!(index(Selection::Playing), Some(1));
        assert_eq!(index(Selection::PlayingOrAny), Some(1));
        assert_eq!(index(Selection::NotPlaying), Some(0));
        assert_eq!(index(Selection::NotPlayingOrAny), Some(0));

        first.play().unwrap();
        assert_eq!(index(Selection::Playing), Some(0));
        assert_eq!(index(Selection::NotPlaying), None);
        assert_eq!(index(Selection::NotPlayingOrAny), Some(0));

        first.stop().unwrap();
        second.stop().unwrap();
        assert_eq!(index(Selection::Playing), None);
        assert_eq!(index(Selection::PlayingOrAny), Some(0));
        assert!(engine.channel_by_id("missing", Selection::Any).is_none());
    }

    #[test]
    fn test_channel_lookup() {
        let (engine, _mock) = engine_with_mock();
        let first = engine.create_channel("a").unwrap();
        let second = engine.create_channel("b").unwrap();
        second.set_project_filename("song.sunvox");

        assert_eq!(engine.channel_by_index(0).unwrap().id(), "a");
        assert!(engine.channel_by_index(2).is_none());
        assert_eq!(
            engine.channel_by_filename("song.sunvox").unwrap().index(),
            1
        );
        assert!(engine.channel_by_filename("other.sunvox").is_none());

        let mut visited = Vec::new();
        engine.for_each_channel(|channel| {
            visited.push(channel.index());
            false
        });
        assert_eq!(visited, vec![0]);

        // Closing from inside the callback does not deadlock.
        engine.for_each_channel(|channel| {
            channel.close().unwrap();
            true
        });
        assert_eq!(engine.channel_count(), 0);
        assert!(first.is_closed());
    }
}
