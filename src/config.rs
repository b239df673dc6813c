use std::path::PathBuf;
use tracing::{info, warn};

/// Library configuration
/// Loaded from environment variables, with a `.env` file applied first when present
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the library; everything else lives below it
    pub library_path: PathBuf,
    /// Number of import workers
    pub import_concurrency: usize,
    /// Root of a legacy installation to import from
    pub legacy_path: Option<PathBuf>,
    /// URL template for the HTTP download provider; `{name}` is substituted
    pub download_url: Option<String>,
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }
        Self::from_env()
    }

    fn from_env() -> Self {
        let library_path = std::env::var("HOARD_LIBRARY_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_library_path);

        let import_concurrency = match std::env::var("HOARD_IMPORT_CONCURRENCY") {
            Ok(value) => match value.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    warn!("Config: invalid HOARD_IMPORT_CONCURRENCY '{}', using 1", value);
                    1
                }
            },
            Err(_) => 1,
        };

        let legacy_path = std::env::var("HOARD_LEGACY_PATH").ok().map(PathBuf::from);
        let download_url = std::env::var("HOARD_DOWNLOAD_URL")
            .ok()
            .filter(|v| !v.is_empty());

        info!("Config: library at {}", library_path.display());

        Self {
            library_path,
            import_concurrency,
            legacy_path,
            download_url,
        }
    }

    /// Configuration rooted at `library_path` with defaults for everything else
    pub fn for_library(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            import_concurrency: 1,
            legacy_path: None,
            download_url: None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.library_path.join("library.db")
    }

    pub fn files_path(&self) -> PathBuf {
        self.library_path.join("files")
    }

    pub fn exports_path(&self) -> PathBuf {
        self.library_path.join("exports")
    }

    pub fn downloads_path(&self) -> PathBuf {
        self.library_path.join("downloads")
    }
}

fn default_library_path() -> PathBuf {
    // Fall back to the working directory when there is no home directory
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hoard")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths_live_under_library_root() {
        let config = Config::for_library("/data/hoard");
        assert_eq!(config.database_path(), PathBuf::from("/data/hoard/library.db"));
        assert_eq!(config.files_path(), PathBuf::from("/data/hoard/files"));
        assert_eq!(config.exports_path(), PathBuf::from("/data/hoard/exports"));
        assert_eq!(config.downloads_path(), PathBuf::from("/data/hoard/downloads"));
        assert_eq!(config.import_concurrency, 1);
    }
}
