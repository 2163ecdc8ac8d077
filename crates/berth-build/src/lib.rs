//! Image builder for Berth deployments.
//!
//! Takes a project revision from repository URL to runnable image:
//! materialize the source with `gix`, detect the framework from the
//! app manifests, generate a staged build recipe, and drive
//! `docker build`. Working directories are throwaway; bare repository
//! caches persist across builds.

pub mod builder;
pub mod detect;
pub mod error;
pub mod recipe;
pub mod source;

pub use builder::{image_tag, BuildOutput, ImageBuilder};
pub use detect::{detect, FrameworkDetector, DETECTORS};
pub use error::{BuildError, BuildResult};
pub use source::{SourceManager, SourceTree};
