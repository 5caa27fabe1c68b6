//! TOML loop definitions.
//!
//! ```toml
//! [[loops]]
//! id = "drums"
//! length = 8
//! events = [[0, 2, "kick"], [4, 0.5, "snare"]]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::events::EventTemplate;
use crate::registry::LoopRegistry;

/// One loop entry of a loop file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopEntry {
    pub id: String,
    /// Cycle length; the registry default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default)]
    pub events: Vec<EventTemplate>,
}

/// A set of loops loaded from disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopFile {
    #[serde(default)]
    pub loops: Vec<LoopEntry>,
}

impl LoopFile {
    /// Read and parse a loop file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::LoopFile(format!("{}: {}", path.display(), e)))
    }

    /// Parse loop definitions from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let file: LoopFile = toml::from_str(content)?;
        for entry in &file.loops {
            if entry.id.is_empty() {
                return Err(Error::LoopFile("loop id must not be empty".to_string()));
            }
        }
        Ok(file)
    }

    /// Apply every entry to `registry` in file order.
    ///
    /// Entries without events delete the loop, like any other `set`.
    pub fn apply(&self, registry: &mut LoopRegistry) -> Result<()> {
        for entry in &self.loops {
            registry.set(entry.id.clone(), entry.events.clone(), entry.length)?;
        }
        log::info!("loaded {} loops", registry.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Arg;
    use std::io::Write;

    const DRUMS: &str = r#"
        [[loops]]
        id = "drums"
        length = 4
        events = [[0, 1, "kick"], { position = 2, duration = 0.5, args = ["snare", 0.7] }]

        [[loops]]
        id = "bass"
        events = [[0, 6, "c2"]]
    "#;

    #[test]
    fn test_parse_and_apply() {
        let file = LoopFile::parse(DRUMS).unwrap();
        assert_eq!(file.loops.len(), 2);
        assert_eq!(file.loops[1].length, None);

        let mut registry = LoopRegistry::new();
        file.apply(&mut registry).unwrap();
        assert_eq!(registry.ids(), ["drums".to_string(), "bass".to_string()]);
        assert_eq!(registry.length_of("drums"), Some(4.0));
        assert_eq!(registry.length_of("bass"), Some(8.0));
        let snare = &registry.get("drums").unwrap().events[1];
        assert_eq!(snare.args, vec![Arg::from("snare"), Arg::Number(0.7)]);
    }

    #[test]
    fn test_entry_without_events_deletes() {
        let file = LoopFile::parse(
            r#"
            [[loops]]
            id = "a"
            events = [[0, 1]]

            [[loops]]
            id = "a"
            "#,
        )
        .unwrap();
        let mut registry = LoopRegistry::new();
        file.apply(&mut registry).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_length_propagates() {
        let file = LoopFile::parse(
            r#"
            [[loops]]
            id = "a"
            length = -2
            events = [[0, 1]]
            "#,
        )
        .unwrap();
        let mut registry = LoopRegistry::new();
        assert!(matches!(
            file.apply(&mut registry),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let result = LoopFile::parse(
            r#"
            [[loops]]
            id = ""
            events = [[0, 1]]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "loops = 3").unwrap();
        let err = LoopFile::load(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
