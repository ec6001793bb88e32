//! Local path resolution for foreman
//!
//! Both directories resolve the same way: an explicit `FOREMAN_*`
//! override (with `~` and `$VAR` expanded), then the XDG variable, then
//! the XDG default under the home directory.
//!
//! | dir    | override             | XDG               | default                  |
//! |--------|----------------------|-------------------|--------------------------|
//! | config | `FOREMAN_CONFIG_DIR` | `XDG_CONFIG_HOME` | `~/.config/foreman`      |
//! | state  | `FOREMAN_STATE_DIR`  | `XDG_STATE_HOME`  | `~/.local/state/foreman` |

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const ENV_CONFIG_DIR: &str = "FOREMAN_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "FOREMAN_STATE_DIR";

const APP: &str = "foreman";

struct DirSpec {
    what: &'static str,
    override_var: &'static str,
    xdg_var: &'static str,
    under_home: &'static [&'static str],
}

const CONFIG: DirSpec = DirSpec {
    what: "config",
    override_var: ENV_CONFIG_DIR,
    xdg_var: "XDG_CONFIG_HOME",
    under_home: &[".config"],
};

const STATE: DirSpec = DirSpec {
    what: "state",
    override_var: ENV_STATE_DIR,
    xdg_var: "XDG_STATE_HOME",
    under_home: &[".local", "state"],
};

fn resolve(spec: &DirSpec) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(spec.override_var) {
        let path = expand(&dir);
        log::debug!("{} dir from {}: {}", spec.what, spec.override_var, path.display());
        return Ok(path);
    }

    if let Some(base) = std::env::var_os(spec.xdg_var).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(base).join(APP);
        log::debug!("{} dir from {}: {}", spec.what, spec.xdg_var, path.display());
        return Ok(path);
    }

    let mut path = dirs::home_dir().context("Could not determine home directory")?;
    path.extend(spec.under_home);
    path.push(APP);
    log::debug!("default {} dir: {}", spec.what, path.display());
    Ok(path)
}

/// Where `foreman.toml` is looked up when none is given
pub fn config_dir() -> Result<PathBuf> {
    resolve(&CONFIG)
}

/// Where the journal lives
pub fn state_dir() -> Result<PathBuf> {
    resolve(&STATE)
}

/// Expand `~` and environment variables in a local path
///
/// Unknown variables are left as they are.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with each `(var, value)` set, or removed for `None`, then
    /// put the previous values back
    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let saved: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        for (key, value) in vars {
            // SAFETY: ENV_LOCK keeps other tests in this module off the environment
            unsafe {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
        let result = f();
        for (key, value) in saved {
            // SAFETY: as above
            unsafe {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
        result
    }

    #[test]
    fn test_override_wins() {
        with_env(
            &[
                (ENV_CONFIG_DIR, Some("/custom/config")),
                ("XDG_CONFIG_HOME", Some("/xdg")),
            ],
            || assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/config")),
        );
        with_env(&[(ENV_STATE_DIR, Some("/custom/state"))], || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state"));
        });
    }

    #[test]
    fn test_override_is_expanded() {
        let home = dirs::home_dir().unwrap();
        with_env(&[(ENV_STATE_DIR, Some("~/ops/foreman-state"))], || {
            assert_eq!(state_dir().unwrap(), home.join("ops/foreman-state"));
        });
    }

    #[test]
    fn test_xdg_dirs() {
        with_env(
            &[
                (ENV_CONFIG_DIR, None),
                (ENV_STATE_DIR, None),
                ("XDG_CONFIG_HOME", Some("/tmp/xdg-config")),
                ("XDG_STATE_HOME", Some("/tmp/xdg-state")),
            ],
            || {
                assert_eq!(config_dir().unwrap(), PathBuf::from("/tmp/xdg-config/foreman"));
                assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/xdg-state/foreman"));
            },
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_defaults_under_home() {
        let home = dirs::home_dir().unwrap();
        with_env(
            &[
                (ENV_CONFIG_DIR, None),
                (ENV_STATE_DIR, None),
                ("XDG_CONFIG_HOME", None),
                ("XDG_STATE_HOME", None),
            ],
            || {
                assert_eq!(config_dir().unwrap(), home.join(".config/foreman"));
                assert_eq!(state_dir().unwrap(), home.join(".local/state/foreman"));
            },
        );
    }

    #[test]
    fn test_expand() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/test/path"), home.join("test").join("path"));
        assert_eq!(
            expand("/path/$NONEXISTENT_VAR_12345/file"),
            PathBuf::from("/path/$NONEXISTENT_VAR_12345/file")
        );
    }
}
