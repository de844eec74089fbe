pub mod acquirer;
pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod detect;
pub mod digest;
pub mod digest_tracker;
pub mod error;
pub mod metadata;
pub mod notifier;
pub mod processor;
pub mod sbom;
pub mod sources;
pub mod tar_extractor;

// Re-exports for easy access
pub use acquirer::{ImageAcquirer, ImageHandle};
pub use archive::OciArchiver;
pub use cache::LayerCache;
pub use catalog::{Cataloger, DefaultCataloger};
pub use config::{PipelineConfig, SbomScope};
pub use digest::ContentDigest;
pub use error::{Error, Result};
pub use notifier::Notifier;
pub use processor::{Pipeline, RunReport};
pub use sbom::SbomFormat;
pub use sources::ImageReference;
pub use sources::RegistrySource;
pub use sources::Source;
