//! Depth-map driven parallax compositor.
//!
//! A [`Viewer`] takes a photo and a depth map, and each [`Viewer::tick`]
//! re-renders only what its dirty flags say is stale before displacing the
//! image by depth for the current offset. An adaptive controller picks the
//! kernel quality from measured frame times.
#![allow(clippy::too_many_arguments)]

pub mod animation;
pub mod cli;
pub mod error;
pub mod export;
pub mod geometry;
pub mod gpu;
pub mod kernel;
pub mod logger;
pub mod options;
pub mod quality;
pub mod renderer;
pub mod resource;
pub mod scheduler;
pub mod stage;
pub mod viewer;


pub use error::{Result, Slot, ViewerError};
pub use geometry::{PixelSize, SizeF, Vec2};
pub use options::{Fit, ViewerOptions};
pub use renderer::RendererKind;
pub use resource::ResourceSource;
pub use viewer::{ReadyFuture, Viewer};
