//! Plugin unit discovery
//!
//! Scans the bundled and user plugin directories for three unit kinds:
//!
//! 1. native module files (`alcove_plugin_*.so` / `.dylib` / `.dll`)
//! 2. directories holding a sandboxed `.wasm` module plus optional
//!    sidecars: `plugin.toml`, `schema.json`, `view.html`, `commands.toml`
//! 3. standalone single-file `.wasm` packages carrying their manifest as
//!    JSON in an `alcove-manifest` custom section
//!
//! Malformed or unreadable units are skipped and logged; discovery of the
//! remaining units continues unaffected.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use alcove_plugin_api::{CommandDefinition, EntitySchema, PluginManifest};

use super::error::PluginHostError;

/// Fixed naming prefix for native module files (after any `lib` prefix)
const NATIVE_PREFIX: &str = "alcove_plugin_";

/// Custom section name carrying the embedded manifest of a packaged unit
const MANIFEST_SECTION: &str = "alcove-manifest";

/// A sandboxed unit ready for the batch loader
#[derive(Debug)]
pub struct SandboxUnit {
    /// Directory the unit lives in (the file's parent for packaged units)
    pub dir: PathBuf,
    /// Path to the `.wasm` module
    pub module: PathBuf,
    pub manifest: PluginManifest,
    /// Commands from the `commands.toml` sidecar
    pub commands: Vec<CommandDefinition>,
    /// Optional `view.html` template sidecar
    pub template: Option<PathBuf>,
}

/// One discovered plugin unit
#[derive(Debug)]
pub enum DiscoveredUnit {
    /// In-process native module
    Native { path: PathBuf },
    /// Sandboxed module, from a directory unit or a single-file package
    Sandboxed(SandboxUnit),
}

/// Scan the given directories for plugin units
pub fn scan(dirs: &[PathBuf]) -> Vec<DiscoveredUnit> {
    let mut units = Vec::new();
    for dir in dirs {
        if !dir.exists() {
            debug!(dir = %dir.display(), "Plugin directory does not exist");
            continue;
        }
        scan_dir(dir, &mut units);
    }
    units
}

fn scan_dir(dir: &Path, units: &mut Vec<DiscoveredUnit>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read plugin directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            match sandbox_unit_from_dir(&path) {
                Ok(Some(unit)) => units.push(DiscoveredUnit::Sandboxed(unit)),
                Ok(None) => debug!(dir = %path.display(), "Directory is not a plugin unit"),
                Err(e) => warn!(dir = %path.display(), error = %e, "Skipping malformed unit"),
            }
        } else if is_native_module(&path) {
            units.push(DiscoveredUnit::Native { path });
        } else if path.extension().is_some_and(|ext| ext == "wasm") {
            match packaged_unit(&path) {
                Ok(unit) => units.push(DiscoveredUnit::Sandboxed(unit)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed package"),
            }
        }
    }
}

/// Whether a file follows the native module naming convention
fn is_native_module(path: &Path) -> bool {
    let valid_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext, "so" | "dylib" | "dll"));
    if !valid_ext {
        return false;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.trim_start_matches("lib").starts_with(NATIVE_PREFIX))
}

/// Build a sandbox unit from a directory, `Ok(None)` if it holds no module
fn sandbox_unit_from_dir(dir: &Path) -> Result<Option<SandboxUnit>, PluginHostError> {
    let Some(module) = find_wasm_module(dir)? else {
        return Ok(None);
    };

    // Sidecar manifest wins; fall back to the embedded one
    let manifest_path = dir.join("plugin.toml");
    let mut manifest = if manifest_path.exists() {
        let content = std::fs::read_to_string(&manifest_path)?;
        PluginManifest::from_toml(&content).map_err(|e| PluginHostError::Manifest(e.to_string()))?
    } else {
        let bytes = std::fs::read(&module)?;
        embedded_manifest(&bytes)?.ok_or_else(|| {
            PluginHostError::Manifest(format!(
                "{}: no plugin.toml sidecar and no embedded manifest",
                dir.display()
            ))
        })?
    };

    let schema_path = dir.join("schema.json");
    if schema_path.exists() {
        let content = std::fs::read_to_string(&schema_path)?;
        let schemas: Vec<EntitySchema> = serde_json::from_str(&content)
            .map_err(|e| PluginHostError::Manifest(format!("schema.json: {e}")))?;
        manifest.schemas.extend(schemas);
    }

    let commands = read_commands_sidecar(dir)?;
    let template = Some(dir.join("view.html")).filter(|p| p.exists());

    Ok(Some(SandboxUnit {
        dir: dir.to_path_buf(),
        module,
        manifest,
        commands,
        template,
    }))
}

/// Build a sandbox unit from a standalone `.wasm` package
fn packaged_unit(path: &Path) -> Result<SandboxUnit, PluginHostError> {
    let bytes = std::fs::read(path)?;
    let manifest = embedded_manifest(&bytes)?.ok_or_else(|| {
        PluginHostError::Manifest(format!("{}: no embedded manifest", path.display()))
    })?;

    Ok(SandboxUnit {
        dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        module: path.to_path_buf(),
        manifest,
        commands: Vec::new(),
        template: None,
    })
}

fn find_wasm_module(dir: &Path) -> Result<Option<PathBuf>, PluginHostError> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "wasm") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn read_commands_sidecar(dir: &Path) -> Result<Vec<CommandDefinition>, PluginHostError> {
    #[derive(serde::Deserialize)]
    struct CommandsFile {
        #[serde(default)]
        commands: Vec<CommandDefinition>,
    }

    let path = dir.join("commands.toml");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let file: CommandsFile = toml::from_str(&content)
        .map_err(|e| PluginHostError::Manifest(format!("commands.toml: {e}")))?;
    Ok(file.commands)
}

/// Extract the manifest embedded in a module's `alcove-manifest` custom
/// section, `None` if the module carries none.
pub fn embedded_manifest(bytes: &[u8]) -> Result<Option<PluginManifest>, PluginHostError> {
    const MAGIC: &[u8] = &[0x00, 0x61, 0x73, 0x6d];

    if bytes.len() < 8 || &bytes[..4] != MAGIC {
        return Err(PluginHostError::Module("not a wasm module".to_string()));
    }

    let mut offset = 8; // past magic + version
    while offset < bytes.len() {
        let section_id = bytes[offset];
        offset += 1;
        let size = read_leb_u32(bytes, &mut offset)
            .ok_or_else(|| PluginHostError::Module("truncated section header".to_string()))?
            as usize;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| PluginHostError::Module("section exceeds module size".to_string()))?;

        if section_id == 0 {
            let mut cursor = offset;
            let name_len = read_leb_u32(bytes, &mut cursor)
                .ok_or_else(|| PluginHostError::Module("truncated section name".to_string()))?
                as usize;
            let name_end = cursor
                .checked_add(name_len)
                .filter(|&n| n <= end)
                .ok_or_else(|| PluginHostError::Module("section name overrun".to_string()))?;

            if &bytes[cursor..name_end] == MANIFEST_SECTION.as_bytes() {
                let content = std::str::from_utf8(&bytes[name_end..end]).map_err(|e| {
                    PluginHostError::Manifest(format!("embedded manifest not UTF-8: {e}"))
                })?;
                let manifest = PluginManifest::from_json(content)
                    .map_err(|e| PluginHostError::Manifest(e.to_string()))?;
                return Ok(Some(manifest));
            }
        }

        offset = end;
    }

    Ok(None)
}

/// Read one unsigned LEB128 u32, advancing `offset`
fn read_leb_u32(bytes: &[u8], offset: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*offset)?;
        *offset += 1;
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 32 {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn encode_leb_u32(mut value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                return out;
            }
        }
    }

    /// Minimal wasm module: magic + version + one custom section
    fn wasm_with_manifest(json: &str) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        let name = b"alcove-manifest";
        let mut payload = encode_leb_u32(name.len() as u32);
        payload.extend_from_slice(name);
        payload.extend_from_slice(json.as_bytes());

        bytes.push(0); // custom section id
        bytes.extend(encode_leb_u32(payload.len() as u32));
        bytes.extend(payload);
        bytes
    }

    const MANIFEST_JSON: &str =
        r#"{"plugin": {"id": "app.alcove.pack", "name": "Pack", "version": "0.1.0"}}"#;

    const SIDECAR_MANIFEST: &str = r#"
[plugin]
id = "app.alcove.journal"
name = "Journal"
version = "0.2.0"
"#;

    #[test]
    fn embedded_manifest_extraction() {
        let bytes = wasm_with_manifest(MANIFEST_JSON);
        let manifest = embedded_manifest(&bytes).unwrap().unwrap();
        assert_eq!(manifest.plugin.id, "app.alcove.pack");
    }

    #[test]
    fn module_without_manifest_section() {
        let bytes = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        assert!(embedded_manifest(&bytes).unwrap().is_none());
    }

    #[test]
    fn non_wasm_bytes_rejected() {
        assert!(embedded_manifest(b"definitely not wasm").is_err());
    }

    #[test]
    fn truncated_section_rejected() {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        bytes.push(0);
        bytes.extend(encode_leb_u32(200)); // claims more bytes than exist
        bytes.extend_from_slice(b"short");
        assert!(embedded_manifest(&bytes).is_err());
    }

    #[test]
    fn native_naming_convention() {
        assert!(is_native_module(Path::new("/p/libalcove_plugin_notes.so")));
        assert!(is_native_module(Path::new("/p/alcove_plugin_notes.dylib")));
        assert!(is_native_module(Path::new("/p/alcove_plugin_tasks.dll")));
        assert!(!is_native_module(Path::new("/p/libother.so")));
        assert!(!is_native_module(Path::new("/p/alcove_plugin_notes.txt")));
    }

    #[test]
    fn scan_skips_missing_dirs() {
        let units = scan(&[PathBuf::from("/nonexistent/plugins")]);
        assert!(units.is_empty());
    }

    #[test]
    fn scan_finds_directory_unit_with_sidecars() {
        let dir = TempDir::new().unwrap();
        let unit_dir = dir.path().join("journal");
        std::fs::create_dir(&unit_dir).unwrap();
        std::fs::write(unit_dir.join("journal.wasm"), wasm_with_manifest("{}")).unwrap();
        std::fs::write(unit_dir.join("plugin.toml"), SIDECAR_MANIFEST).unwrap();
        std::fs::write(
            unit_dir.join("schema.json"),
            r#"[{"entity_type": "entry", "indexed_fields": []}]"#,
        )
        .unwrap();
        std::fs::write(
            unit_dir.join("commands.toml"),
            r#"
[[commands]]
id = "new-entry"
title = "New Entry"
"#,
        )
        .unwrap();
        std::fs::write(unit_dir.join("view.html"), "<main/>").unwrap();

        let units = scan(&[dir.path().to_path_buf()]);
        assert_eq!(units.len(), 1);
        let DiscoveredUnit::Sandboxed(unit) = &units[0] else {
            panic!("expected sandboxed unit");
        };
        assert_eq!(unit.manifest.plugin.id, "app.alcove.journal");
        assert_eq!(unit.manifest.schemas.len(), 1);
        assert_eq!(unit.commands.len(), 1);
        assert!(unit.template.is_some());
    }

    #[test]
    fn scan_finds_packaged_unit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pack.wasm"), wasm_with_manifest(MANIFEST_JSON)).unwrap();

        let units = scan(&[dir.path().to_path_buf()]);
        assert_eq!(units.len(), 1);
        let DiscoveredUnit::Sandboxed(unit) = &units[0] else {
            panic!("expected sandboxed unit");
        };
        assert_eq!(unit.manifest.plugin.id, "app.alcove.pack");
    }

    #[test]
    fn malformed_unit_skipped_others_survive() {
        let dir = TempDir::new().unwrap();

        // Broken: directory with a module but no manifest anywhere
        let broken = dir.path().join("broken");
        std::fs::create_dir(&broken).unwrap();
        std::fs::write(broken.join("broken.wasm"), b"garbage").unwrap();

        // Valid packaged unit alongside it
        std::fs::write(dir.path().join("pack.wasm"), wasm_with_manifest(MANIFEST_JSON)).unwrap();

        let units = scan(&[dir.path().to_path_buf()]);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn plain_directory_is_not_a_unit() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("assets");
        std::fs::create_dir(&plain).unwrap();
        std::fs::write(plain.join("readme.txt"), "hi").unwrap();

        let units = scan(&[dir.path().to_path_buf()]);
        assert!(units.is_empty());
    }
}
