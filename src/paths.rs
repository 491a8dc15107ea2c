//! Path resolution for stack and state files
//!
//! # Environment Variables
//!
//! - `LAKEFORM_STACK` - Stack file used when `--stack` is not given
//! - `LAKEFORM_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For the stack file:
//! 1. `--stack`
//! 2. `LAKEFORM_STACK` environment variable
//! 3. `./lakeform.toml`
//!
//! For the state file:
//! 1. `--state`
//! 2. `settings.state_file` in the stack (relative to the stack file)
//! 3. `<state_dir>/<stack-name>.state.json`
//!
//! For state_dir():
//! 1. `LAKEFORM_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/lakeform` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\lakeform`
//!    - macOS/Linux: `~/.local/state/lakeform`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the stack file
pub const ENV_STACK: &str = "LAKEFORM_STACK";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "LAKEFORM_STATE_DIR";

/// Default stack file name, looked up in the working directory
pub const DEFAULT_STACK_FILE: &str = "lakeform.toml";

/// Get the stack file path
pub fn stack_file(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return expand(path);
    }

    if let Ok(path) = std::env::var(ENV_STACK) {
        let path = expand(&path);
        log::debug!("Using stack file from {}: {}", ENV_STACK, path.display());
        return path;
    }

    PathBuf::from(DEFAULT_STACK_FILE)
}

/// Get the lakeform state directory path
///
/// Priority:
/// 1. `LAKEFORM_STATE_DIR` env var
/// 2. `XDG_STATE_HOME/lakeform`
/// 3. Platform default
pub fn state_dir() -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    // 2. Check XDG_STATE_HOME
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("lakeform");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. Platform default
    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("lakeform");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    // Unix default: ~/.local/state/lakeform
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("lakeform");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Get the applied-state file for a stack
pub fn state_file(
    explicit: Option<&str>,
    configured: Option<&str>,
    stack_dir: &Path,
    stack_name: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(path));
    }

    if let Some(path) = configured {
        let path = expand(path);
        return Ok(if path.is_relative() {
            stack_dir.join(path)
        } else {
            path
        });
    }

    Ok(state_dir()?.join(format!("{stack_name}.state.json")))
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```ignore
/// // Expands ~ to home directory
/// let home_path = paths::expand("~/lake/lakeform.toml");
///
/// // Expands environment variables
/// let var_path = paths::expand("$HOME/lake/lakeform.toml");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        match value {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    // Every test touching LAKEFORM_STATE_DIR or XDG_STATE_HOME lives here so
    // they never race each other.
    #[test]
    fn test_state_dir_priority() {
        with_env_var(ENV_STATE_DIR, Some("/custom/state/path"), || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state/path"));
        });

        with_env_var(ENV_STATE_DIR, None, || {
            with_env_var("XDG_STATE_HOME", Some("/tmp/xdg-state-test"), || {
                assert_eq!(
                    state_dir().unwrap(),
                    PathBuf::from("/tmp/xdg-state-test/lakeform")
                );
                let file = state_file(None, None, Path::new("/stack"), "lottery").unwrap();
                assert_eq!(
                    file,
                    PathBuf::from("/tmp/xdg-state-test/lakeform/lottery.state.json")
                );
            });

            #[cfg(unix)]
            with_env_var("XDG_STATE_HOME", None, || {
                let home = dirs::home_dir().unwrap();
                assert_eq!(
                    state_dir().unwrap(),
                    home.join(".local").join("state").join("lakeform")
                );
            });
        });
    }

    #[test]
    fn test_stack_file_priority() {
        assert_eq!(
            stack_file(Some("/lake/stack.toml")),
            PathBuf::from("/lake/stack.toml")
        );

        with_env_var(ENV_STACK, Some("/from/env.toml"), || {
            assert_eq!(stack_file(None), PathBuf::from("/from/env.toml"));
        });

        with_env_var(ENV_STACK, None, || {
            assert_eq!(stack_file(None), PathBuf::from(DEFAULT_STACK_FILE));
        });
    }

    #[test]
    fn test_state_file_explicit_wins() {
        let file = state_file(
            Some("/tmp/explicit.json"),
            Some("configured.json"),
            Path::new("/stack"),
            "lottery",
        )
        .unwrap();
        assert_eq!(file, PathBuf::from("/tmp/explicit.json"));
    }

    #[test]
    fn test_configured_state_file_is_relative_to_stack() {
        let file = state_file(None, Some("state/lake.json"), Path::new("/stack"), "lottery").unwrap();
        assert_eq!(file, PathBuf::from("/stack/state/lake.json"));

        let file = state_file(None, Some("/abs/lake.json"), Path::new("/stack"), "lottery").unwrap();
        assert_eq!(file, PathBuf::from("/abs/lake.json"));
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_with_env_var() {
        with_env_var("LAKEFORM_TEST_VAR", Some("test_value"), || {
            let result = expand("/path/$LAKEFORM_TEST_VAR/file");
            assert_eq!(result, PathBuf::from("/path/test_value/file"));
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        // Unknown env vars are left as-is by shellexpand::full
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
