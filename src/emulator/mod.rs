//! Virtual machine control: boot assets, the engine abstraction, the
//! scancode keymap and the session facade.

pub mod assets;
pub mod engine;
pub mod facade;
pub mod keymap;
pub mod types;
