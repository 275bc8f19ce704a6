//! Cross-platform data path resolution.
//!
//! Determines where the document directory and the prompt library live,
//! based on platform conventions and Docker detection.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Represents the resolved paths for application data storage.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Directory of PDF documents
    pub documents_path: PathBuf,
    /// Prompt library file
    pub prompts_path: PathBuf,
}

/// Configuration for path resolution.
#[derive(Debug, Default)]
pub struct PathConfig {
    /// Explicit data directory (documents/ and prompts/ will be inside)
    pub data_dir: Option<PathBuf>,
    /// Explicit documents directory
    pub documents_path: Option<PathBuf>,
    /// Explicit prompt library file
    pub prompts_path: Option<PathBuf>,
}

impl DataPaths {
    /// Resolve data paths based on configuration.
    ///
    /// Priority (highest to lowest):
    /// 1. Explicit documents_path/prompts_path if provided
    /// 2. Explicit data_dir if provided
    /// 3. Default directory (platform-specific or Docker-detected)
    ///
    /// The documents directory is created when missing.
    pub fn resolve(config: PathConfig) -> anyhow::Result<Self> {
        let base_dir = match config.data_dir {
            Some(dir) => dir,
            None => Self::default_data_dir(),
        };

        let default_documents = base_dir.join("documents");
        let documents_path = match config.documents_path {
            Some(path) => {
                Self::log_path_override("documents", &path, &default_documents);
                path
            }
            None => default_documents,
        };

        let default_prompts = base_dir.join("prompts").join("library.json");
        let prompts_path = match config.prompts_path {
            Some(path) => {
                Self::log_path_override("prompts", &path, &default_prompts);
                path
            }
            None => default_prompts,
        };

        if !documents_path.exists() {
            std::fs::create_dir_all(&documents_path)?;
            info!("Created documents directory: {}", documents_path.display());
        }

        info!("Data paths resolved:");
        info!("  Documents: {}", documents_path.display());
        info!("  Prompts:   {}", prompts_path.display());

        Ok(Self {
            documents_path,
            prompts_path,
        })
    }

    /// Determine the default data directory based on platform and environment.
    fn default_data_dir() -> PathBuf {
        if Self::is_docker() {
            info!("Docker environment detected, using ./data/ for storage");
            return PathBuf::from("./data");
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", "legal-mcp") {
            let data_dir = proj_dirs.data_dir().to_path_buf();
            info!(
                "Using platform-specific data directory: {}",
                data_dir.display()
            );
            data_dir
        } else {
            warn!("Could not determine user data directory, falling back to ./data/");
            PathBuf::from("./data")
        }
    }

    /// Detect if running inside a Docker container.
    fn is_docker() -> bool {
        // Standard Docker indicator
        if Path::new("/.dockerenv").exists() {
            return true;
        }

        if let Ok(cgroup) = std::fs::read_to_string("/proc/self/cgroup") {
            if cgroup.contains("docker") || cgroup.contains("containerd") {
                return true;
            }
        }

        false
    }

    /// Log when an individual path overrides the base directory.
    fn log_path_override(kind: &str, path: &Path, default: &Path) {
        if path != default {
            info!(
                "Using custom {} path: {} (overriding default: {})",
                kind,
                path.display(),
                default.display()
            );
        }
    }
}
