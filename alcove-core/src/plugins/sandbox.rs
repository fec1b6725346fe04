//! Sandboxed plugin loading
//!
//! Sandboxed units carry their metadata in a manifest, so the host can run
//! them without native code in the process. With the `wasm` feature the
//! module bytes are compiled up front; without it the unit loads in
//! metadata-only mode and its lifecycle is driven entirely host-side.
//!
//! Compilation is CPU-bound and independent per module, so batches are
//! compiled on scoped worker threads. A structurally invalid batch result
//! falls back to sequential loading.

use sha2::{Digest, Sha256};
use std::path::PathBuf;

use alcove_plugin_api::{
    CommandDefinition, DataMetrics, NavigationItem, PluginContext, PluginError, PluginMetadata,
    SdkAction, SdkRequest,
};

use super::discovery::SandboxUnit;
use super::error::PluginHostError;
use super::handle::{PluginHandle, PluginKind};

/// Compiles and instantiates sandboxed units
pub struct SandboxLoader {
    #[cfg(feature = "wasm")]
    engine: wasmtime::Engine,
}

impl SandboxLoader {
    pub fn new() -> Result<Self, PluginHostError> {
        #[cfg(feature = "wasm")]
        {
            let mut config = wasmtime::Config::new();
            config.consume_fuel(true);
            let engine = wasmtime::Engine::new(&config)
                .map_err(|e| PluginHostError::Module(format!("engine setup failed: {e}")))?;
            Ok(Self { engine })
        }

        #[cfg(not(feature = "wasm"))]
        {
            Ok(Self {})
        }
    }

    /// Load a single sandboxed unit
    pub fn load(&self, unit: &SandboxUnit) -> Result<SandboxedPlugin, PluginHostError> {
        let bytes = std::fs::read(&unit.module)?;

        if let Some(expected) = &unit.manifest.plugin.checksum {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(PluginHostError::ChecksumMismatch {
                    path: unit.module.clone(),
                });
            }
        }

        #[cfg(feature = "wasm")]
        let module = wasmtime::Module::new(&self.engine, &bytes).map_err(|e| {
            PluginHostError::Module(format!("{}: compile failed: {e}", unit.module.display()))
        })?;

        let mut metadata = unit.manifest.to_metadata();
        // schema.json sidecar entries were merged into the manifest at
        // discovery time; keep the full set on the metadata.
        metadata.schemas = unit.manifest.schemas.clone();

        tracing::debug!(
            plugin = %metadata.id,
            version = %metadata.version,
            module = %unit.module.display(),
            "Sandboxed module loaded"
        );

        Ok(SandboxedPlugin {
            metadata,
            navigation: unit.manifest.navigation.clone(),
            commands: unit.commands.clone(),
            template: unit.template.clone(),
            module_path: unit.module.clone(),
            #[cfg(feature = "wasm")]
            _module: module,
        })
    }

    /// Load a batch of units, compiling in parallel.
    ///
    /// Returns one result per input unit, in input order. If the parallel
    /// pass comes back structurally wrong (missing results or a worker
    /// panic), the whole batch is reloaded sequentially.
    pub fn load_batch(
        &self,
        units: &[SandboxUnit],
    ) -> Vec<Result<SandboxedPlugin, PluginHostError>> {
        if units.len() <= 1 {
            return units.iter().map(|u| self.load(u)).collect();
        }

        match self.load_parallel(units) {
            Some(results) if results.len() == units.len() => results,
            _ => {
                tracing::warn!(
                    count = units.len(),
                    "Parallel sandbox load produced an invalid batch, retrying sequentially"
                );
                units.iter().map(|u| self.load(u)).collect()
            }
        }
    }

    /// One worker thread per unit; None if any worker panicked
    fn load_parallel(
        &self,
        units: &[SandboxUnit],
    ) -> Option<Vec<Result<SandboxedPlugin, PluginHostError>>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = units
                .iter()
                .map(|unit| scope.spawn(move || self.load(unit)))
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.join().ok()?);
            }
            Some(results)
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A loaded sandboxed plugin.
///
/// Lifecycle hooks run host-side from manifest metadata; plugin code never
/// executes during initialize or activate. Data metrics are computed by
/// counting the plugin's declared entity types through the data bridge.
pub struct SandboxedPlugin {
    metadata: PluginMetadata,
    navigation: Option<NavigationItem>,
    commands: Vec<CommandDefinition>,
    template: Option<PathBuf>,
    module_path: PathBuf,
    #[cfg(feature = "wasm")]
    _module: wasmtime::Module,
}

impl SandboxedPlugin {
    pub fn module_path(&self) -> &std::path::Path {
        &self.module_path
    }

    /// Optional view template shipped alongside the module
    pub fn template(&self) -> Option<&std::path::Path> {
        self.template.as_deref()
    }
}

impl PluginHandle for SandboxedPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Sandboxed
    }

    fn initialize(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
        if self.metadata.id.is_empty() {
            return Err(PluginError::init("manifest is missing a plugin id"));
        }
        ctx.log_debug("sandboxed plugin initialized");
        Ok(true)
    }

    fn activate(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn deactivate(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn navigation_item(&self) -> Option<NavigationItem> {
        self.navigation.clone()
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        self.commands.clone()
    }

    fn data_metrics(&self, ctx: &PluginContext) -> Option<DataMetrics> {
        if self.metadata.schemas.is_empty() {
            return None;
        }

        let mut entity_count = 0u64;
        let mut disk_usage_bytes = 0u64;
        for schema in &self.metadata.schemas {
            let request = SdkRequest::new(&self.metadata.id, SdkAction::Count, &schema.entity_type);
            let response = ctx.send(&request);
            if !response.success {
                continue;
            }
            if let Some(data) = &response.data {
                entity_count += data.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
                disk_usage_bytes += data
                    .get("disk_usage_bytes")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
        }

        Some(DataMetrics {
            entity_count,
            disk_usage_bytes,
        })
    }
}
