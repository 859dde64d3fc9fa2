//! Configuration parsing and types.
//!
//! - `types` - Root [`Config`] and lookup helpers
//! - `container` - Container definitions, links
//! - `volume` - Volumes, mounts and [`MountModes`]
//! - `profile` - Profile definitions as written
//! - `health` - Readiness probes
//! - `settings` - The `settings.bay` section and env overrides
//! - `parser` - YAML loading
//! - `validation` - Config validation

mod container;
mod duration;
mod health;
mod parser;
mod profile;
mod resources;
mod settings;
mod types;
mod validation;
mod volume;

pub use container::*;
pub use duration::*;
pub use health::*;
pub use parser::*;
pub use profile::*;
pub use resources::*;
pub use settings::*;
pub use types::*;
pub use volume::*;
