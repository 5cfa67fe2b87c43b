//! Storage levels.
//!
//! Records live at one of three levels, searched innermost first:
//!
//! ```text
//! project   ./.perfdb                  PERFDB_PROJECT_PREFIX
//! user      $HOME/.perfdb              PERFDB_USER_PREFIX
//! system    /usr/local/share/perfdb    PERFDB_SYSTEM_PREFIX
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A storage scope with its own root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageLevel {
    /// Per-project storage in the working directory.
    Project,
    /// Per-user storage in the home directory.
    User,
    /// Site-wide storage.
    System,
}

impl StorageLevel {
    /// All levels, innermost first.
    pub const ORDERED: [Self; 3] = [Self::Project, Self::User, Self::System];

    /// Returns the level name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::User => "user",
            Self::System => "system",
        }
    }

    /// Returns the environment variable that overrides this level's root.
    #[must_use]
    pub fn env_var(self) -> String {
        format!("PERFDB_{}_PREFIX", self.name().to_uppercase())
    }

    /// Resolves the root directory for this level.
    #[must_use]
    pub fn default_root(self) -> PathBuf {
        if let Some(prefix) = std::env::var_os(self.env_var()) {
            return PathBuf::from(prefix);
        }
        match self {
            Self::Project => PathBuf::from(".perfdb"),
            Self::User => std::env::var_os("HOME")
                .map_or_else(|| PathBuf::from("."), PathBuf::from)
                .join(".perfdb"),
            Self::System => PathBuf::from("/usr/local/share/perfdb"),
        }
    }
}

impl fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StorageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .into_iter()
            .find(|level| level.name() == s)
            .ok_or_else(|| format!("unknown storage level: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for level in StorageLevel::ORDERED {
            assert_eq!(level.name().parse::<StorageLevel>().unwrap(), level);
        }
        assert!("global".parse::<StorageLevel>().is_err());
    }

    #[test]
    fn env_var_names() {
        assert_eq!(StorageLevel::User.env_var(), "PERFDB_USER_PREFIX");
    }

    #[test]
    fn system_default() {
        if std::env::var_os(StorageLevel::System.env_var()).is_none() {
            assert_eq!(
                StorageLevel::System.default_root(),
                PathBuf::from("/usr/local/share/perfdb")
            );
        }
    }
}
