//! QCR (Quote Card Renderer): turns chat messages into quote stickers,
//! captioned images, story canvases, and short webm clips.

pub mod avatar;
pub mod backdrop;
pub mod cache;
pub mod colors;
pub mod compositor;
pub mod config;
pub mod emoji;
pub mod errors;
pub mod fonts;
pub mod layout;
pub mod media;
pub mod painter;
pub mod params;
pub mod probe;
pub mod provider;
pub mod service;
pub mod shaper;
pub mod styled;

pub use service::QuoteService;
