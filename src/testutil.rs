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
//! Fixtures shared by the unit tests. Everything runs against the mock engine.
use std::sync::Arc;

use crate::{
    channel::Channel,
    config::InitConfig,
    engine::Engine,
    native::mock::{self, Project},
};

mod polling;

pub use polling::eventually;

/// An initialized engine backed by a fresh mock library, plus a handle to inspect it.
pub fn engine_with_mock() -> (Engine, Arc<mock::Library>) {
    let mock = Arc::new(mock::Library::new());
    let mut engine = Engine::new();
    engine
        .init_with(mock.clone(), &InitConfig::new().with_no_debug())
        .expect("mock engine should initialize");
    (engine, mock)
}

/// A channel with the project loaded.
pub fn loaded_channel(project: &Project) -> (Engine, Arc<mock::Library>, Arc<Channel>) {
    let (engine, mock) = engine_with_mock();
    let channel = engine
        .create_channel("test")
        .expect("channel should be created");
    channel
        .load_from_bytes(project.to_bytes().expect("project should serialize"))
        .expect("project should load");
    (engine, mock, channel)
}

/// A small two pattern project.
pub fn project_bytes() -> Vec<u8> {
    Project::new("test")
        .with_pattern(mock::Pattern::new("first", 0, 16))
        .with_pattern(mock::Pattern::new("second", 16, 16))
        .to_bytes()
        .expect("project should serialize")
}
