use crate::{error::Error, gemini::GeminiConfig, session::SessionOptions};
use std::path::{Path, PathBuf};

/// Settings read from the `--config` TOML file. Every key is optional.
///
/// ```toml
/// references = "data/references.json"
///
/// [session]
/// feedback_interval = 5
///
/// [session.scoring]
/// tolerance = 8.0
///
/// [session.hold]
/// threshold = 90.0
/// seconds = 3
///
/// [gemini]
/// model = "gemini-2.5-flash"
/// ```
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) references: Option<PathBuf>,
    pub(crate) module: Option<PathBuf>,
    pub(crate) session: SessionOptions,
    pub(crate) gemini: GeminiConfig,
}

impl Config {
    pub(crate) fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(Error::ParseConfig)
    }

    pub(crate) fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::ReadFile(e, path.to_owned()))?;
        Self::from_toml(&content)
    }
}
