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
    fmt,
    ops::{BitAnd, BitOr},
    sync::Arc,
};

use crate::{
    channel::Channel,
    error::{Error, Result},
    native::NATIVE_SYMBOL_MISSING,
};

/// The flags the engine reports for a module slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuleFlags(u32);

impl ModuleFlags {
    pub const EXISTS: ModuleFlags = ModuleFlags(1 << 0);
    pub const GENERATOR: ModuleFlags = ModuleFlags(1 << 1);
    pub const EFFECT: ModuleFlags = ModuleFlags(1 << 2);
    pub const MUTE: ModuleFlags = ModuleFlags(1 << 3);
    pub const SOLO: ModuleFlags = ModuleFlags(1 << 4);
    pub const BYPASS: ModuleFlags = ModuleFlags(1 << 5);

    /// Wraps the raw flags reported by the engine.
    pub const fn from_bits(bits: u32) -> ModuleFlags {
        ModuleFlags(bits)
    }

    /// Returns the raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    pub const fn contains(self, other: ModuleFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ModuleFlags {
    type Output = ModuleFlags;

    fn bitor(self, rhs: ModuleFlags) -> ModuleFlags {
        ModuleFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for ModuleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (ModuleFlags::GENERATOR, "generator"),
            (ModuleFlags::EFFECT, "effect"),
            (ModuleFlags::MUTE, "mute"),
            (ModuleFlags::SOLO, "solo"),
            (ModuleFlags::BYPASS, "bypass"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", set.join(","))
        }
    }
}

impl BitAnd for ModuleFlags {
    type Output = ModuleFlags;

    fn bitand(self, rhs: ModuleFlags) -> ModuleFlags {
        ModuleFlags(self.0 & rhs.0)
    }
}

/// Controller values are requested as displayed in the engine's interface.
const SCALED_DISPLAYED: i32 = 2;

/// The pattern effect that sets bypass/solo/mute of a module.
const EFFECT_BSM: i32 = 0x0013;

/// A reference to a module in the project loaded into a channel. Holds only a position;
/// every call queries the engine.
#[derive(Clone)]
pub struct Module {
    channel: Arc<Channel>,
    index: usize,
}

impl Module {
    pub(crate) fn new(channel: Arc<Channel>, index: usize) -> Module {
        Module { channel, index }
    }

    /// The module's slot index in the project, as shown (in hex) by the engine's interface.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The channel the module belongs to.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn slot(&self) -> Result<i32> {
        self.channel.slot()
    }

    fn module_index(&self) -> i32 {
        self.index as i32
    }

    /// The name of the module.
    pub fn name(&self) -> Result<String> {
        Ok(self
            .channel
            .native()
            .module_name(self.slot()?, self.module_index())
            .unwrap_or_default())
    }

    /// Returns true if the module still exists.
    pub fn is_valid(&self) -> bool {
        self.flags()
            .map(|flags| flags.contains(ModuleFlags::EXISTS))
            .unwrap_or(false)
    }

    /// The flags of the module.
    pub fn flags(&self) -> Result<ModuleFlags> {
        let slot = self.slot()?;
        let flags = self.channel.native().module_flags(slot, self.module_index());
        if flags < 0 {
            return Err(Error::native("sv_get_module_flags", self.channel.index(), flags));
        }
        Ok(ModuleFlags::from_bits(flags as u32))
    }

    /// Sets bypass, solo and mute for the module. Only works for instruments, not effects.
    pub fn set_bsm(&self, bypass: bool, solo: bool, mute: bool) -> Result<()> {
        let mut bsm = 0;
        if bypass {
            bsm |= 0x100;
        }
        if solo {
            bsm |= 0x10;
        }
        if mute {
            bsm |= 0x1;
        }
        self.channel
            .send_event(0, 0, 0, self.module_index() + 1, EFFECT_BSM, bsm)
    }

    /// The number of controllers the module exposes.
    pub fn controller_count(&self) -> Result<usize> {
        let slot = self.slot()?;
        let count = self
            .channel
            .native()
            .module_ctl_count(slot, self.module_index());
        if count < 0 {
            return Err(Error::native(
                "sv_get_number_of_module_ctls",
                self.channel.index(),
                count,
            ));
        }
        Ok(count as usize)
    }

    /// Checks the controller number against the module and returns the engine's slot and
    /// 0-based controller index.
    fn controller_slot(&self, controller: i32) -> Result<(i32, i32)> {
        let ctl = controller_index(controller)?;
        let count = self.controller_count()?;
        if ctl as usize >= count {
            return Err(Error::OutOfBounds {
                what: "controller",
                index: ctl as usize,
                len: count,
            });
        }
        Ok((self.slot()?, ctl))
    }

    /// Controller reads have no error range; only an unexported entry point fails.
    fn controller_read(&self, op: &'static str, value: i32) -> Result<i32> {
        if value == NATIVE_SYMBOL_MISSING {
            return Err(Error::native(op, self.channel.index(), value));
        }
        Ok(value)
    }

    /// The value of the numbered controller. Controller numbers start at 1, as in the
    /// engine's interface (0x1C in the interface is 0x1C here).
    ///
    /// Values are as displayed in the engine's interface and may be negative.
    pub fn controller_value(&self, controller: i32) -> Result<i32> {
        let (slot, ctl) = self.controller_slot(controller)?;
        let value =
            self.channel
                .native()
                .module_ctl_value(slot, self.module_index(), ctl, SCALED_DISPLAYED);
        self.controller_read("sv_get_module_ctl_value", value)
    }

    /// The name of the numbered controller.
    pub fn controller_name(&self, controller: i32) -> Result<String> {
        let (slot, ctl) = self.controller_slot(controller)?;
        Ok(self
            .channel
            .native()
            .module_ctl_name(slot, self.module_index(), ctl)
            .unwrap_or_default())
    }

    /// The minimum value of the numbered controller.
    pub fn controller_min(&self, controller: i32) -> Result<i32> {
        let (slot, ctl) = self.controller_slot(controller)?;
        let value =
            self.channel
                .native()
                .module_ctl_min(slot, self.module_index(), ctl, SCALED_DISPLAYED);
        self.controller_read("sv_get_module_ctl_min", value)
    }

    /// The maximum value of the numbered controller.
    pub fn controller_max(&self, controller: i32) -> Result<i32> {
        let (slot, ctl) = self.controller_slot(controller)?;
        let value =
            self.channel
                .native()
                .module_ctl_max(slot, self.module_index(), ctl, SCALED_DISPLAYED);
        self.controller_read("sv_get_module_ctl_max", value)
    }

    /// Sets the numbered controller to a value as displayed in the engine's interface,
    /// e.g. panning of an Analog generator (controller 3) ranges from -128 to 128.
    pub fn set_controller_value(&self, controller: i32, value: i32) -> Result<()> {
        let (slot, ctl) = self.controller_slot(controller)?;
        let res = self.channel.native().set_module_ctl_value(
            slot,
            self.module_index(),
            ctl,
            value,
            SCALED_DISPLAYED,
        );
        if res < 0 {
            return Err(Error::native("sv_set_module_ctl_value", self.channel.index(), res));
        }
        Ok(())
    }

    /// Connects the output of this module to the input of the destination.
    pub fn connect(&self, destination: &Module) -> Result<()> {
        let slot = self.slot()?;
        let _lock = self.channel.lock()?;
        let res = self
            .channel
            .native()
            .connect_module(slot, self.module_index(), destination.module_index());
        if res < 0 {
            return Err(Error::native("sv_connect_module", self.channel.index(), res));
        }
        Ok(())
    }

    /// Disconnects this module from the destination.
    pub fn disconnect(&self, destination: &Module) -> Result<()> {
        let slot = self.slot()?;
        let _lock = self.channel.lock()?;
        let res = self.channel.native().disconnect_module(
            slot,
            self.module_index(),
            destination.module_index(),
        );
        if res < 0 {
            return Err(Error::native("sv_disconnect_module", self.channel.index(), res));
        }
        Ok(())
    }

    fn finetune_and_relative_note(&self) -> Result<u32> {
        let slot = self.slot()?;
        self.channel
            .native()
            .module_finetune(slot, self.module_index())
            .ok_or_else(|| Error::native(
                "sv_get_module_finetune",
                self.channel.index(),
                NATIVE_SYMBOL_MISSING,
            ))
    }

    /// The finetune of the module, -256 to 256.
    pub fn finetune(&self) -> Result<i32> {
        Ok(i32::from((self.finetune_and_relative_note()? >> 16) as u16 as i16))
    }

    /// The relative note of the module.
    pub fn relative_note(&self) -> Result<i32> {
        Ok(i32::from(self.finetune_and_relative_note()? as u16 as i16))
    }

    /// Sets the finetune of the module, -256 to 256 (0 by default).
    pub fn set_finetune(&self, finetune: i32) -> Result<()> {
        let slot = self.slot()?;
        let res = self
            .channel
            .native()
            .set_module_finetune(slot, self.module_index(), finetune);
        if res < 0 {
            return Err(Error::native("sv_set_module_finetune", self.channel.index(), res));
        }
        Ok(())
    }

    /// Sets the relative note of the module (0 by default).
    pub fn set_relative_note(&self, relative_note: i32) -> Result<()> {
        let slot = self.slot()?;
        let res = self
            .channel
            .native()
            .set_module_relnote(slot, self.module_index(), relative_note);
        if res < 0 {
            return Err(Error::native("sv_set_module_relnote", self.channel.index(), res));
        }
        Ok(())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("channel", &self.channel.index())
            .field("index", &self.index)
            .finish()
    }
}

/// Maps a 1-based controller number to the engine's 0-based index.
fn controller_index(controller: i32) -> Result<i32> {
    if controller <= 0 {
        return Err(Error::InvalidController(controller));
    }
    Ok(controller - 1)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::fade::ControllerFade;
    use crate::native::mock::{self, Project};
    use crate::testutil::loaded_channel;

    fn project() -> Project {
        Project::new("modules")
            .with_module(
                mock::Module::generator("Analog generator")
                    .with_controller("Volume", 0, 256, 80)
                    .with_controller("Waveform", 0, 15, 0)
                    .with_controller("Panning", -128, 128, 0),
            )
            .with_module(mock::Module::effect("Reverb").with_controller("Dry", 0, 256, 256))
    }

    #[test]
    fn test_flags() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();
        let flags = generator.flags().unwrap();
        assert!(flags.contains(ModuleFlags::EXISTS | ModuleFlags::GENERATOR));
        assert!(!flags.contains(ModuleFlags::EFFECT));

        let output = channel.output_module();
        assert_eq!(output.name().unwrap(), "Output");
        assert!(output.is_valid());
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(ModuleFlags::EXISTS.to_string(), "-");
        assert_eq!(
            (ModuleFlags::EXISTS | ModuleFlags::GENERATOR | ModuleFlags::MUTE).to_string(),
            "generator,mute"
        );
    }

    #[test]
    fn test_controller_numbers_start_at_one() {
        let (_engine, mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();

        assert_eq!(generator.controller_count().unwrap(), 3);
        assert_eq!(generator.controller_name(1).unwrap(), "Volume");
        assert_eq!(generator.controller_value(1).unwrap(), 80);
        assert_eq!(generator.controller_min(3).unwrap(), -128);
        assert_eq!(generator.controller_max(3).unwrap(), 128);

        // Nothing below 1 reaches the engine.
        mock.fail("sv_get_module_ctl_value", NATIVE_SYMBOL_MISSING);
        for controller in [0, -1, -20] {
            assert!(matches!(
                generator.controller_value(controller),
                Err(Error::InvalidController(c)) if c == controller
            ));
            assert!(matches!(
                generator.controller_name(controller),
                Err(Error::InvalidController(_))
            ));
            assert!(matches!(
                generator.controller_min(controller),
                Err(Error::InvalidController(_))
            ));
            assert!(matches!(
                generator.controller_max(controller),
                Err(Error::InvalidController(_))
            ));
            assert!(matches!(
                generator.set_controller_value(controller, 1),
                Err(Error::InvalidController(_))
            ));
        }
        assert_eq!(
            generator.controller_value(1).unwrap_err().code(),
            Some(NATIVE_SYMBOL_MISSING)
        );
    }

    #[test]
    fn test_set_controller_value() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();
        generator.set_controller_value(1, 128).unwrap();
        assert_eq!(generator.controller_value(1).unwrap(), 128);
    }

    #[test]
    fn test_negative_controller_values() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();

        generator.set_controller_value(3, -64).unwrap();
        assert_eq!(generator.controller_value(3).unwrap(), -64);
        assert_eq!(generator.controller_min(3).unwrap(), -128);

        let mut fade =
            ControllerFade::new(-1, 64, Duration::from_secs(1), generator.clone(), 3).unwrap();
        assert_eq!(fade.update(Duration::ZERO).unwrap(), (-64, false));
        assert_eq!(fade.update(Duration::from_millis(500)).unwrap(), (0, false));
        assert_eq!(fade.update(Duration::from_millis(500)).unwrap(), (64, true));
        assert_eq!(generator.controller_value(3).unwrap(), 64);
    }

    #[test]
    fn test_controller_past_the_last_one() {
        let (_engine, mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();
        mock.fail("sv_set_module_ctl_value", -99);
        for controller in [4, 9] {
            assert!(matches!(
                generator.controller_value(controller),
                Err(Error::OutOfBounds { what: "controller", len: 3, .. })
            ));
            assert!(matches!(
                generator.controller_name(controller),
                Err(Error::OutOfBounds { .. })
            ));
            assert!(matches!(
                generator.controller_max(controller),
                Err(Error::OutOfBounds { .. })
            ));
            assert!(matches!(
                generator.set_controller_value(controller, 1),
                Err(Error::OutOfBounds { index, .. }) if index == controller as usize - 1
            ));
        }
    }

    #[test]
    fn test_connect_and_disconnect_are_locked() {
        let (_engine, mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();
        let reverb = channel.module_by_name("Reverb").unwrap();

        generator.connect(&reverb).unwrap();
        reverb.connect(&channel.output_module()).unwrap();
        assert_eq!(mock.connections(channel.index()), vec![(1, 2), (2, 0)]);
        assert_eq!(mock.lock_depth(channel.index()), 0);

        generator.disconnect(&reverb).unwrap();
        assert_eq!(mock.connections(channel.index()), vec![(2, 0)]);
        assert!(generator.disconnect(&reverb).is_err());
        assert_eq!(mock.lock_depth(channel.index()), 0);
    }

    #[test]
    fn test_bsm_targets_module() {
        let (_engine, mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_name("Analog generator").unwrap();
        generator.set_bsm(false, true, true).unwrap();

        let events = mock.events(channel.index());
        assert_eq!(events.last().unwrap().module, 2);
        assert_eq!(events.last().unwrap().ctl_val, 0x11);
        let flags = generator.flags().unwrap();
        assert!(flags.contains(ModuleFlags::SOLO | ModuleFlags::MUTE));
        assert!(!flags.contains(ModuleFlags::BYPASS));
    }

    #[test]
    fn test_finetune_and_relative_note_are_signed() {
        let (_engine, mock, channel) = loaded_channel(&project());
        let generator = channel.module_by_index(1).unwrap();
        generator.set_finetune(-100).unwrap();
        generator.set_relative_note(-12).unwrap();
        assert_eq!(generator.finetune().unwrap(), -100);
        assert_eq!(generator.relative_note().unwrap(), -12);

        generator.set_relative_note(7).unwrap();
        assert_eq!(generator.relative_note().unwrap(), 7);
        assert_eq!(generator.finetune().unwrap(), -100);
        mock.fail("sv_get_module_finetune", NATIVE_SYMBOL_MISSING);
        assert!(generator.finetune().is_err());
        assert!(generator.relative_note().is_err());
    }

    #[test]
    fn test_deleted_module_slots() {
        let mut project = project();
        project.modules.insert(1, None);
        let (_engine, _mock, channel) = loaded_channel(&project);

        assert_eq!(channel.module_slot_count().unwrap(), 4);
        assert_eq!(channel.module_count().unwrap(), 3);
        assert!(channel.module_by_index(1).is_none());
        assert!(channel.module_by_index(2).is_some());

        let mut names = Vec::new();
        channel
            .for_each_module(|module| {
                names.push(module.name().unwrap());
                true
            })
            .unwrap();
        assert_eq!(names, vec!["Output", "Analog generator", "Reverb"]);
    }
}
