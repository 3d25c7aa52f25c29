use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

/// The script dialects this crate reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Fflow,
    Twee,
    /// Write-only.
    Renpy,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Fflow, Dialect::Twee, Dialect::Renpy];

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Fflow => "fflow",
            Dialect::Twee => "twee",
            Dialect::Renpy => "renpy",
        }
    }

    /// The first entry is the one written files get.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Dialect::Fflow => &[".fflow"],
            Dialect::Twee => &[".twee", ".tw"],
            Dialect::Renpy => &[".rpy"],
        }
    }

    pub fn can_parse(self) -> bool {
        !matches!(self, Dialect::Renpy)
    }

    /// Case-insensitive; `sugarcube` and `rpy` are accepted as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "fflow" => Some(Dialect::Fflow),
            "twee" | "sugarcube" => Some(Dialect::Twee),
            "renpy" | "rpy" => Some(Dialect::Renpy),
            _ => None,
        }
    }

    /// Accepts the extension with or without its leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        Self::ALL.into_iter().find(|d| {
            d.extensions()
                .iter()
                .any(|e| e.trim_start_matches('.') == ext)
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// A dialect name, or failing that a file extension.
    pub fn lookup(key: &str) -> Result<Self, Error> {
        Self::from_name(key)
            .or_else(|| Self::from_extension(key))
            .ok_or_else(|| Error::UnknownDialect(key.to_string()))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_extension() {
        assert_eq!(Dialect::from_name("TWEE"), Some(Dialect::Twee));
        assert_eq!(Dialect::from_name("sugarcube"), Some(Dialect::Twee));
        assert_eq!(Dialect::from_extension(".tw"), Some(Dialect::Twee));
        assert_eq!(Dialect::from_extension("RPY"), Some(Dialect::Renpy));
        assert_eq!(
            Dialect::from_path(Path::new("story/goblin_road.fflow")),
            Some(Dialect::Fflow)
        );
        assert_eq!(Dialect::from_path(Path::new("notes.txt")), None);
        assert_eq!("renpy".parse::<Dialect>().ok(), Some(Dialect::Renpy));
        assert!(matches!(
            Dialect::lookup("ink"),
            Err(Error::UnknownDialect(name)) if name == "ink"
        ));
    }

    #[test]
    fn test_renpy_is_write_only() {
        let readable: Vec<Dialect> = Dialect::ALL.into_iter().filter(|d| d.can_parse()).collect();
        assert_eq!(readable, vec![Dialect::Fflow, Dialect::Twee]);
        assert_eq!(Dialect::Renpy.to_string(), "renpy");
    }
}
