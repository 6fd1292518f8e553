// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use serde::de::DeserializeOwned;
use std::{fs, io, path::Path, path::PathBuf};
use thiserror::Error;

/// Compact fmt subscriber. `RUST_LOG` wins, otherwise `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Reads a TOML config file. A missing file yields `T::default()`,
/// a malformed one is an error rather than a silent fallback.
pub fn load_toml_or_default<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_toml(path, &text)
}

pub fn parse_toml<T: DeserializeOwned>(origin: &Path, text: &str) -> Result<T, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        width: u32,
        title: String,
    }

    #[test]
    fn missing_file_gives_default() {
        let cfg: Sample = load_toml_or_default("definitely/not/here.toml").unwrap();
        assert_eq!(cfg, Sample::default());
    }

    #[test]
    fn partial_table_fills_defaults() {
        let cfg: Sample = parse_toml(Path::new("inline"), "width = 800").unwrap();
        assert_eq!(cfg.width, 800);
        assert!(cfg.title.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = parse_toml::<Sample>(Path::new("bad.toml"), "width = = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
