//! Process-wide configuration space.
//!
//! Exposes keyed string accessors over two kinds of section: a single
//! `GENERAL` namespace (`dtype`, `device`, `torch_seed`, `artifact_root`),
//! a fixed `dsl` namespace holding grammar bodies and instruction text, and
//! any number of contract-scoped sections whose keys are open (defined by
//! whatever contract/wave file references them).
//!
//! Modeled as a process-wide singleton with explicit `init`/`current`
//! lifecycle, mirroring how the teacher treats config space, the artifact
//! driver registry, and other process-wide state: no hidden construction
//! order, and accessors that assert initialization rather than silently
//! default.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tsi_types::error::{CoreError, SemanticError};

pub const SECTION_GENERAL: &str = "GENERAL";
pub const SECTION_DSL: &str = "dsl";

/// Keys recognized in `GENERAL`; `update_config` rejects anything else so
/// that validation happens eagerly instead of lazily on first read.
pub const GENERAL_KEYS: &[&str] = &["dtype", "device", "torch_seed", "artifact_root"];

/// Keys recognized in `dsl`: three grammar bodies and their matching
/// instruction text, per §6.
pub const DSL_KEYS: &[&str] = &[
    "observation_sources_grammar",
    "observation_channels_grammar",
    "board_grammar",
    "observation_sources_dsl",
    "observation_channels_dsl",
    "board_dsl",
];

type Section = HashMap<String, String>;

/// A loaded configuration: `GENERAL`, `dsl`, and zero or more contract
/// sections, each a flat string-keyed map.
#[derive(Debug, Default)]
pub struct ConfigSpace {
    sections: RwLock<HashMap<String, Section>>,
}

impl ConfigSpace {
    pub fn empty() -> Self {
        Self {
            sections: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a TOML document of the shape:
    /// ```toml
    /// [GENERAL]
    /// dtype = "f32"
    ///
    /// [dsl]
    /// board_grammar = "..."
    ///
    /// [contracts.my_contract]
    /// schedule = "..."
    /// ```
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let raw: toml::Value = toml::from_str(text)
            .map_err(|e| CoreError::Semantic(SemanticError(format!("invalid config toml: {e}"))))?;
        let table = raw
            .as_table()
            .ok_or_else(|| CoreError::Semantic(SemanticError("config root must be a table".into())))?;

        let mut sections = HashMap::new();
        for (section_name, value) in table {
            let section_table = value.as_table().ok_or_else(|| {
                CoreError::Semantic(SemanticError(format!(
                    "section [{section_name}] must be a table of string keys"
                )))
            })?;
            let mut section = Section::new();
            flatten_section(section_name, "", section_table, &mut section)?;
            sections.insert(section_name.clone(), section);
        }
        Ok(Self {
            sections: RwLock::new(sections),
        })
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|_| CoreError::IoMissing(path.as_ref().display().to_string()))?;
        Self::parse(&text)
    }

    /// Looks up `section.key`. Returns `None` if the section or key is
    /// absent — there is no schema beyond the eager-validation performed by
    /// `update_config`.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections.read().get(section)?.get(key).cloned()
    }

    pub fn get_general(&self, key: &str) -> Option<String> {
        self.get(SECTION_GENERAL, key)
    }

    pub fn get_dsl(&self, key: &str) -> Option<String> {
        self.get(SECTION_DSL, key)
    }

    /// The sole mutator. Validates `key` against the enumerated allow-list
    /// for `GENERAL`/`dsl`; contract-scoped sections accept any key, since
    /// those are defined by whatever board file references them. Callers
    /// are responsible for serializing concurrent calls to this function
    /// (the config space itself is read-mostly).
    pub fn update_config(&self, section: &str, key: &str, value: impl Into<String>) -> Result<(), CoreError> {
        match section {
            SECTION_GENERAL if !GENERAL_KEYS.contains(&key) => {
                return Err(CoreError::Semantic(SemanticError(format!(
                    "unrecognized GENERAL key: {key}"
                ))));
            }
            SECTION_DSL if !DSL_KEYS.contains(&key) => {
                return Err(CoreError::Semantic(SemanticError(format!(
                    "unrecognized dsl key: {key}"
                ))));
            }
            _ => {}
        }
        self.sections
            .write()
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn section_keys(&self, section: &str) -> Vec<String> {
        self.sections
            .read()
            .get(section)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Contract sections may nest one level (`[contracts.my_contract]`); this
/// flattens any depth of table nesting into `section.key = value` pairs so
/// `get` stays a flat two-level lookup regardless of how the TOML author
/// chose to group things.
fn flatten_section(
    section_name: &str,
    prefix: &str,
    table: &toml::map::Map<String, toml::Value>,
    out: &mut Section,
) -> Result<(), CoreError> {
    for (k, v) in table {
        let flat_key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::Table(nested) => flatten_section(section_name, &flat_key, nested, out)?,
            toml::Value::String(s) => {
                out.insert(flat_key, s.clone());
            }
            other => {
                out.insert(flat_key, other.to_string());
            }
        }
    }
    Ok(())
}

static GLOBAL_CONFIG: OnceCell<ConfigSpace> = OnceCell::new();

/// Loads `path` and installs it as the process-wide config space. Must be
/// called exactly once before [`current`]; a second call is a no-op that
/// leaves the first configuration in place.
pub fn init(path: impl AsRef<Path>) -> Result<(), CoreError> {
    let space = ConfigSpace::load_file(path)?;
    let _ = GLOBAL_CONFIG.set(space);
    Ok(())
}

/// Installs `space` directly, bypassing file loading — used by tests and
/// by embedders that assemble configuration programmatically.
pub fn init_with(space: ConfigSpace) {
    let _ = GLOBAL_CONFIG.set(space);
}

/// The process-wide config space. Panics if [`init`]/[`init_with`] has not
/// been called yet: config space has no sensible default, and silently
/// returning an empty one would hide a startup ordering bug.
pub fn current() -> &'static ConfigSpace {
    GLOBAL_CONFIG
        .get()
        .expect("tsi_config::init must be called before tsi_config::current")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[GENERAL]
dtype = "f32"
device = "cpu"

[dsl]
board_grammar = "<board> ::= <contracts> ;"

[contracts.alpha]
schedule = "daily"
"#;

    #[test]
    fn parses_and_reads_back_flat_keys() {
        let cfg = ConfigSpace::parse(SAMPLE).unwrap();
        assert_eq!(cfg.get_general("dtype").as_deref(), Some("f32"));
        assert_eq!(
            cfg.get_dsl("board_grammar").as_deref(),
            Some("<board> ::= <contracts> ;")
        );
        assert_eq!(cfg.get("contracts.alpha", "schedule"), None);
    }

    #[test]
    fn nested_contract_tables_flatten_by_dotted_key() {
        let cfg = ConfigSpace::parse(SAMPLE).unwrap();
        assert_eq!(cfg.get("contracts", "alpha.schedule").as_deref(), Some("daily"));
    }

    #[test]
    fn update_config_rejects_unknown_general_key() {
        let cfg = ConfigSpace::empty();
        let err = cfg.update_config(SECTION_GENERAL, "bogus", "x").unwrap_err();
        assert_eq!(
            tsi_types::error::ErrorCode::code(&err),
            "SEMANTIC"
        );
    }

    #[test]
    fn update_config_accepts_known_general_key() {
        let cfg = ConfigSpace::empty();
        cfg.update_config(SECTION_GENERAL, "torch_seed", "42").unwrap();
        assert_eq!(cfg.get_general("torch_seed").as_deref(), Some("42"));
    }

    #[test]
    fn update_config_accepts_any_contract_scoped_key() {
        let cfg = ConfigSpace::empty();
        cfg.update_config("contracts", "anything_goes", "y").unwrap();
        assert_eq!(cfg.get("contracts", "anything_goes").as_deref(), Some("y"));
    }
}
