//! Native plugin loading via dynamic libraries
//!
//! Native modules are shared libraries exporting the C-ABI entry points
//! emitted by `alcove_plugin_api::export_plugin!`. Once loaded, a library
//! is retained for the lifetime of the process; unloading code that may
//! still back vtables or thread-locals is not safe, so `unload` drops the
//! plugin instance but keeps the library mapped.

use libloading::Library;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use alcove_plugin_api::{
    API_VERSION, CommandDefinition, DataMetrics, NavigationItem, Plugin, PluginContext,
    PluginError, PluginMetadata,
};

use super::error::PluginHostError;
use super::handle::{PluginHandle, PluginKind};

type ApiVersionFn = extern "C" fn() -> u32;
type CreateFn = extern "C" fn() -> *mut dyn Plugin;

/// Loads native plugin modules and keeps their libraries resident.
///
/// Libraries are cached by file stem so that a dependency library shipped
/// alongside several plugins is mapped once and shared.
pub struct NativeLoader {
    shared: Mutex<HashMap<String, Arc<Library>>>,
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLoader {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Load a native plugin from a shared library file.
    ///
    /// Checks the exported API version before constructing the instance;
    /// a mismatched module is rejected without calling into plugin code
    /// beyond the version getter.
    pub fn load(&self, path: &Path) -> Result<NativePlugin, PluginHostError> {
        let library = self.library_for(path)?;

        // SAFETY: the version getter is a plain `extern "C" fn() -> u32`
        // emitted by the export macro.
        let api_version_fn: libloading::Symbol<ApiVersionFn> =
            unsafe { library.get(b"_alcove_plugin_api_version")? };
        let found = api_version_fn();
        if found != API_VERSION {
            return Err(PluginHostError::ApiVersionMismatch {
                expected: API_VERSION,
                found,
            });
        }

        // SAFETY: the create function returns a raw pointer produced by
        // Box::into_raw on the plugin side; ownership transfers to us.
        let create_fn: libloading::Symbol<CreateFn> =
            unsafe { library.get(b"_alcove_plugin_create")? };
        let instance = unsafe { Box::from_raw(create_fn()) };
        let metadata = instance.metadata();

        tracing::debug!(
            plugin = %metadata.id,
            version = %metadata.version,
            path = %path.display(),
            "Native module loaded"
        );

        Ok(NativePlugin {
            metadata,
            instance: Some(instance),
            _library: library,
            path: path.to_path_buf(),
        })
    }

    /// Map a library, reusing an already-resident copy with the same file
    /// stem. Libraries are never removed from the cache.
    fn library_for(&self, path: &Path) -> Result<Arc<Library>, PluginHostError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PluginHostError::LibraryNotFound {
                dir: path.to_path_buf(),
            })?
            .to_string();

        let mut shared = self.shared.lock();
        if let Some(existing) = shared.get(&stem) {
            tracing::debug!(stem = %stem, "Reusing resident library");
            return Ok(Arc::clone(existing));
        }

        // SAFETY: loading a module the user placed in a plugin directory.
        // The module is expected to honor the export_plugin! contract.
        let library = Arc::new(unsafe { Library::new(path)? });
        shared.insert(stem, Arc::clone(&library));
        Ok(library)
    }

    /// Number of distinct libraries currently resident
    pub fn resident_count(&self) -> usize {
        self.shared.lock().len()
    }
}

/// A native plugin instance together with the library that backs it
pub struct NativePlugin {
    metadata: PluginMetadata,
    /// None after dispose
    instance: Option<Box<dyn Plugin>>,
    /// Kept mapped for the process lifetime; the instance's vtable lives here
    _library: Arc<Library>,
    path: PathBuf,
}

impl NativePlugin {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn instance_mut(&mut self) -> Result<&mut Box<dyn Plugin>, PluginError> {
        self.instance
            .as_mut()
            .ok_or_else(|| PluginError::custom("plugin already disposed"))
    }
}

impl PluginHandle for NativePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Native
    }

    fn initialize(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        let instance = self.instance_mut()?;
        // Panic isolation: a panicking plugin must not take the host down.
        match std::panic::catch_unwind(AssertUnwindSafe(|| instance.initialize(ctx))) {
            Ok(result) => result,
            Err(_) => Err(PluginError::custom("plugin panicked during initialize")),
        }
    }

    fn activate(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let instance = self.instance_mut()?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| instance.activate(ctx))) {
            Ok(result) => result,
            Err(_) => Err(PluginError::custom("plugin panicked during activate")),
        }
    }

    fn deactivate(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let instance = self.instance_mut()?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| instance.deactivate(ctx))) {
            Ok(result) => result,
            Err(_) => Err(PluginError::custom("plugin panicked during deactivate")),
        }
    }

    fn dispose(&mut self) -> Result<(), PluginError> {
        let Some(mut instance) = self.instance.take() else {
            return Ok(());
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| instance.dispose())) {
            Ok(result) => result,
            Err(_) => Err(PluginError::custom("plugin panicked during dispose")),
        }
    }

    fn navigation_item(&self) -> Option<NavigationItem> {
        self.instance.as_ref().and_then(|i| i.navigation_item())
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        self.instance
            .as_ref()
            .map(|i| i.commands())
            .unwrap_or_default()
    }

    fn data_metrics(&self, ctx: &PluginContext) -> Option<DataMetrics> {
        self.instance.as_ref().and_then(|i| i.data_metrics(ctx))
    }
}

impl Drop for NativePlugin {
    fn drop(&mut self) {
        // Give the plugin a chance to release resources before the
        // instance is dropped. The library itself stays mapped.
        if self.instance.is_some() {
            if let Err(e) = self.dispose() {
                tracing::warn!(
                    plugin = %self.metadata.id,
                    error = %e,
                    "Plugin dispose returned error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_starts_empty() {
        let loader = NativeLoader::new();
        assert_eq!(loader.resident_count(), 0);
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let loader = NativeLoader::new();
        let result = loader.load(Path::new("/nonexistent/alcove_plugin_missing.so"));
        assert!(result.is_err());
    }

    #[test]
    fn library_for_rejects_pathless_stem() {
        let loader = NativeLoader::new();
        let result = loader.library_for(Path::new("/"));
        assert!(matches!(
            result,
            Err(PluginHostError::LibraryNotFound { .. })
        ));
    }
}
