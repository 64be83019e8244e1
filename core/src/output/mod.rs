//! Output for the display surface: render events and file classification

pub mod classifier;
pub mod render;

pub use classifier::{render_file, sniff_image, Classifier, ImageKind};
pub use render::{bundle, DisplayHandle, DisplaySurface, MimeBundle, RenderEvent, StreamName};
