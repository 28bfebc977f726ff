//! Parameter file loading
//!
//! Every module of the executable owns one TOML file under `params/`,
//! deserialised into that module's `Params` struct once at startup. The
//! layout is fixed; callers name the module, not a path.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Directory holding the module parameter files.
const PARAMS_DIR: &str = "params";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load the parameter file of the named module, `params/<module>.toml`.
pub fn load_module<P>(module: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let path = Path::new(PARAMS_DIR).join(format!("{}.toml", module));

    let text = fs::read_to_string(&path).map_err(|source| LoadError::Read {
        path: path.clone(),
        source,
    })?;

    toml::from_str(&text).map_err(|source| LoadError::Parse { path, source })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_module_reports_the_path() {
        let result: Result<toml::Value, _> = load_module("no_such_module");

        match result {
            Err(LoadError::Read { path, .. }) => {
                assert_eq!(path, Path::new("params/no_such_module.toml"));
            }
            other => panic!("expected a read error, got {:?}", other.map(|_| ())),
        }
    }
}
