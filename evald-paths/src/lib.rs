//! XDG Base Directory paths for evald.
//!
//! The daemon keeps its models, datasets and record database under the
//! data directory and reads `config.toml` from the config directory.

use std::path::PathBuf;

const APP_DIR: &str = "evald";

/// Get the evald config directory.
///
/// Returns `$XDG_CONFIG_HOME/evald` if set, otherwise `~/.config/evald`.
///
/// # Examples
///
/// ```
/// use evald_paths::config_dir;
///
/// let config_file = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the evald data directory.
///
/// Returns `$XDG_DATA_HOME/evald` if set, otherwise `~/.local/share/evald`.
///
/// # Examples
///
/// ```
/// use evald_paths::data_dir;
///
/// let records = data_dir().join("records.db");
/// ```
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Default directory scanned for model checkpoints.
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// Default directory scanned for local datasets.
pub fn datasets_dir() -> PathBuf {
    data_dir().join("datasets")
}

/// Default location of the record database.
pub fn records_db_path() -> PathBuf {
    data_dir().join("records.db")
}

fn xdg_dir(env_var: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = std::env::var(env_var) {
        PathBuf::from(base).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join(APP_DIR)
    } else {
        PathBuf::from(home_relative).join(APP_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_evald() {
        let path = config_dir();
        assert!(
            path.ends_with("evald"),
            "config_dir should end with 'evald'"
        );
    }

    #[test]
    fn test_data_subdirectories_live_under_data_dir() {
        assert!(models_dir().parent().unwrap().ends_with("evald"));
        assert!(datasets_dir().parent().unwrap().ends_with("evald"));
        assert_eq!(records_db_path().file_name().unwrap(), "records.db");
    }

    #[test]
    fn test_dirs_respect_xdg_env() {
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
            std::env::set_var("XDG_DATA_HOME", "/tmp/test-data");
        }
        assert_eq!(config_dir(), PathBuf::from("/tmp/test-config/evald"));
        assert_eq!(models_dir(), PathBuf::from("/tmp/test-data/evald/models"));
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
            std::env::remove_var("XDG_DATA_HOME");
        }
    }
}
