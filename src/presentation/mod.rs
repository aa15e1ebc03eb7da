//! Presentation layer: plain-text views over cached state.

pub mod views;

pub use views::{Renderer, TextRenderer};
