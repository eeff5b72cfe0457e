//! Core contract between the palmboy frontend and an emulation engine.

mod engine;
mod keys;

pub use engine::{Engine, EngineError, Model, Platform};
pub use keys::{
    KEY_A, KEY_B, KEY_DOWN, KEY_L, KEY_LEFT, KEY_MASK, KEY_R, KEY_RIGHT, KEY_SELECT, KEY_START,
    KEY_UP, Keys,
};
