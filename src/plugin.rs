//! Dynamic loading of a compiled Wormfile shared library.
//!
//! Rust has no `importlib` analogue, so a Wormfile is authored as its own
//! `cdylib` crate exporting a single `sandworm_load_targets` symbol. This
//! module is the crate's only `unsafe` surface; everything upstream of
//! [`load`] deals in safe Rust only.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::debug;

use crate::environment::Environment;
use crate::error::{Result, SandwormError};

const ENV_OVERRIDE: &str = "SANDWORM_WORMFILE";
const ENTRY_SYMBOL: &[u8] = b"sandworm_load_targets\0";

type LoadTargetsFn = unsafe extern "C" fn(&mut Environment) -> bool;

/// Resolves the compiled Wormfile path: `SANDWORM_WORMFILE` if set,
/// otherwise the conventional `./Wormfile/target/release/libwormfile.<ext>`
/// under `dir`.
pub fn resolve_path(dir: &Path) -> PathBuf {
    if let Ok(over) = std::env::var(ENV_OVERRIDE) {
        return PathBuf::from(over);
    }

    let name = libloading::library_filename("wormfile");
    dir.join("Wormfile").join("target").join("release").join(name)
}

/// Loads the Wormfile at `dir` and invokes its `sandworm_load_targets`
/// entry point with `env`, returning whatever the plugin returns.
pub fn load(env: &mut Environment, dir: &Path) -> Result<bool> {
    let path = resolve_path(dir);
    if !path.exists() {
        return Err(SandwormError::WormfileMissing(path));
    }

    debug!("loading Wormfile from {}", path.display());

    // SAFETY: `path` points at a library we expect to export
    // `sandworm_load_targets` with the signature declared above; a
    // mismatched or malicious library can still misbehave, which is the
    // inherent risk of dynamic loading and is scoped to this module.
    let outcome = unsafe {
        let lib = Library::new(&path).map_err(|e| SandwormError::PluginError(e.to_string()))?;
        let entry: Symbol<LoadTargetsFn> = lib
            .get(ENTRY_SYMBOL)
            .map_err(|e| SandwormError::PluginError(e.to_string()))?;
        entry(env)
    };

    Ok(outcome)
}
