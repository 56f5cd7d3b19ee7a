//! Keyboard tab switching across browser profiles.
//!
//! Each browser profile launches its own native helper. One helper wins
//! the election, grabs the global shortcut and broadcasts every press on
//! a local bus; the helper whose profile is in front forwards it to its
//! extension, which owns the tabs (see [`switcher`]).

pub mod bus;
pub mod config;
pub mod election;
pub mod helper;
pub mod hotkey;
pub mod native;
pub mod resolver;
pub mod surface;
pub mod switcher;
