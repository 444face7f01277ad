pub mod content;
pub mod loader;

pub use content::{load_catalogue, load_content, load_engine_config};
pub use loader::{DataLoadError, Format};
