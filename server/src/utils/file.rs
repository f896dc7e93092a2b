//! Path helpers

use std::path::PathBuf;

/// Expand `~` and make relative paths absolute against the working directory
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if path.is_empty() {
        return cwd();
    }

    let expanded = match path.strip_prefix('~') {
        Some("") => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => dirs::home_dir()
            .map(|home| home.join(&rest[1..]))
            .unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    };

    if expanded.is_relative() {
        cwd().join(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_unchanged() {
        assert_eq!(expand_path("/etc/tracehouse"), PathBuf::from("/etc/tracehouse"));
    }

    #[test]
    fn test_relative_path_becomes_absolute() {
        let result = expand_path("./tracehouse.json");
        assert!(result.is_absolute());
        assert!(result.ends_with("tracehouse.json"));
    }

    #[test]
    fn test_tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
            assert_eq!(expand_path("~/.tracehouse"), home.join(".tracehouse"));
        }
    }

    #[test]
    fn test_tilde_user_is_not_expanded() {
        assert!(expand_path("~other/x").ends_with("~other/x"));
    }

    #[test]
    fn test_empty_is_cwd() {
        assert_eq!(expand_path("  "), std::env::current_dir().unwrap());
    }
}
