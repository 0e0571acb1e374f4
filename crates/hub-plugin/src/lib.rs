//! Plugin loader: manifest validation, the sub-process plugin host, and
//! auto-discovery/canonical-renaming.

mod error;
mod host;
mod loader;
mod manifest;

pub use error::{Error, PluginSpecError, PluginSpecErrors};
pub use host::{HostError, NullPluginHost, PluginHost, StdioPluginHost};
pub use loader::{
    canonicalize_name, discover_plugins, load_plugin_dir, protocol_of, LoadedPlugin, PluginConfig,
};
pub use manifest::{Manifest, ManifestDumper, ManifestUploader, OnDuplicates, OneOrMany, Protocol};
