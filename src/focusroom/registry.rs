//! The participant registry: which personas exist and how the moderator refers
//! to them.
//!
//! Each entry binds a short numeric key (what the selection menu shows) to a
//! persona id (what the [`PersonaDirectory`](crate::PersonaDirectory) resolves),
//! a history key (where memory persists) and an `@mention` alias (how commands
//! name it). Two personas ship built in; custom ones are appended to a JSON
//! registry on disk by the persona-creation flow.
//!
//! Callers must rebuild the mention map from [`PersonaRegistry::mention_map`]
//! on every input line: custom participants can appear between turns, and a
//! cached table would go stale.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One participant the moderator can bring into a room. Immutable once
/// created; the persona-creation flow is the only writer of new entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Display name, e.g. "Lena".
    pub name: String,
    /// Stable persona id resolved through the directory.
    pub persona_id: String,
    /// Key the history store partitions this participant's memory under.
    pub history_key: String,
    /// Slugified mention (without the `@`), e.g. "rukmini_patel".
    pub mention: String,
    /// One-line description shown in the selection menu.
    #[serde(default)]
    pub brief: String,
}

/// Lowercase a name into a mention-safe slug: runs of non-alphanumerics
/// collapse to a single underscore.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

fn builtin_registry() -> BTreeMap<String, RegistryEntry> {
    let mut reg = BTreeMap::new();
    reg.insert(
        "1".to_string(),
        RegistryEntry {
            name: "Lena".to_string(),
            persona_id: "persona_german_transfer_student_23".to_string(),
            history_key: "session:lena:messages".to_string(),
            mention: "lena".to_string(),
            brief: "23yo · University Student · Berlin · casual gamer".to_string(),
        },
    );
    reg.insert(
        "2".to_string(),
        RegistryEntry {
            name: "Marcus".to_string(),
            persona_id: "persona_designer_dad_38_refined".to_string(),
            history_key: "session:marcus:messages".to_string(),
            mention: "marcus".to_string(),
            brief: "38yo · Product Designer · Portland · moderate gamer".to_string(),
        },
    );
    reg
}

/// Merged view over the built-in personas and the on-disk custom registry.
pub struct PersonaRegistry {
    custom_dir: PathBuf,
}

impl PersonaRegistry {
    /// `personas_dir` is the root persona directory; custom entries live in
    /// its `custom/` subdirectory.
    pub fn new(personas_dir: &Path) -> Self {
        PersonaRegistry {
            custom_dir: personas_dir.join("custom"),
        }
    }

    fn registry_path(&self) -> PathBuf {
        self.custom_dir.join("registry.json")
    }

    /// Keys reserved for the built-in personas.
    pub fn builtin_keys() -> [&'static str; 2] {
        ["1", "2"]
    }

    fn load_custom(&self) -> BTreeMap<String, RegistryEntry> {
        match fs::read_to_string(self.registry_path()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("PersonaRegistry: unreadable custom registry: {}", err);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn save_custom_registry(&self, registry: &BTreeMap<String, RegistryEntry>) -> io::Result<()> {
        fs::create_dir_all(&self.custom_dir)?;
        let payload = serde_json::to_string_pretty(registry)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(self.registry_path(), payload)
    }

    /// Built-in entries merged with custom entries. Custom keys shadow
    /// built-ins if they ever collide, which
    /// [`PersonaRegistry::next_available_key`] prevents.
    pub fn full_registry(&self) -> BTreeMap<String, RegistryEntry> {
        let mut merged = builtin_registry();
        merged.extend(self.load_custom());
        merged
    }

    /// `@mention` → registry key, all lowercase. Multi-word mentions also
    /// register a first-name alias when it is not already taken, so
    /// `@rukmini` resolves the persona saved as `@rukmini_patel`.
    pub fn mention_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (key, entry) in self.full_registry() {
            map.insert(format!("@{}", entry.mention), key.clone());
            if let Some(first) = entry.mention.split('_').next() {
                if first != entry.mention {
                    map.entry(format!("@{}", first)).or_insert(key);
                }
            }
        }
        map
    }

    /// The smallest numeric key not yet in use (built-ins included).
    pub fn next_available_key(&self) -> String {
        let custom = self.load_custom();
        let max = custom
            .keys()
            .filter_map(|k| k.parse::<u64>().ok())
            .chain([1, 2])
            .max()
            .unwrap_or(2);
        (max + 1).to_string()
    }

    /// Register a newly created custom persona and return its key. The
    /// persona document itself is upserted through the directory by the
    /// creation flow; this only records the lookup entry.
    pub fn save_custom_persona(
        &self,
        name: &str,
        persona_id: &str,
        brief: &str,
    ) -> io::Result<String> {
        let mut registry = self.load_custom();
        let key = self.next_available_key();
        let slug = slugify(name);
        let ts = Utc::now().format("%Y%m%d%H%M%S");
        registry.insert(
            key.clone(),
            RegistryEntry {
                name: name.to_string(),
                persona_id: persona_id.to_string(),
                history_key: format!("session:custom_{}_{}:messages", slug, ts),
                mention: slug,
                brief: brief.to_string(),
            },
        );
        self.save_custom_registry(&registry)?;
        Ok(key)
    }

    /// Update the display fields of a custom entry (rename keeps the history
    /// key so memory survives the edit).
    pub fn update_custom_persona(&self, key: &str, name: &str, brief: &str) -> io::Result<()> {
        let mut registry = self.load_custom();
        let entry = registry
            .get_mut(key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no custom persona '{}'", key)))?;
        entry.name = name.to_string();
        entry.mention = slugify(name);
        entry.brief = brief.to_string();
        self.save_custom_registry(&registry)
    }

    /// Remove a custom entry, returning it so the caller can clean up the
    /// persona document and history.
    pub fn delete_custom_persona(&self, key: &str) -> io::Result<RegistryEntry> {
        let mut registry = self.load_custom();
        let entry = registry
            .remove(key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no custom persona '{}'", key)))?;
        self.save_custom_registry(&registry)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Rukmini Patel"), "rukmini_patel");
        assert_eq!(slugify("  J.-P.  O'Neil "), "j_p_o_neil");
        assert_eq!(slugify("Lena"), "lena");
    }

    #[test]
    fn mention_map_has_builtin_aliases() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PersonaRegistry::new(tmp.path());
        let map = registry.mention_map();
        assert_eq!(map.get("@lena"), Some(&"1".to_string()));
        assert_eq!(map.get("@marcus"), Some(&"2".to_string()));
    }

    #[test]
    fn custom_persona_gets_first_name_alias() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PersonaRegistry::new(tmp.path());
        let key = registry
            .save_custom_persona("Rukmini Patel", "persona_rukmini", "34yo · Architect")
            .unwrap();
        assert_eq!(key, "3");

        let map = registry.mention_map();
        assert_eq!(map.get("@rukmini_patel"), Some(&key));
        assert_eq!(map.get("@rukmini"), Some(&key));
    }

    #[test]
    fn rename_keeps_the_history_key() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PersonaRegistry::new(tmp.path());
        let key = registry
            .save_custom_persona("Rukmini Patel", "persona_rukmini", "")
            .unwrap();
        let before = registry.full_registry().get(&key).unwrap().history_key.clone();

        registry
            .update_custom_persona(&key, "Rukmini Iyer", "35yo · Architect")
            .unwrap();
        let after = registry.full_registry().get(&key).cloned().unwrap();
        assert_eq!(after.name, "Rukmini Iyer");
        assert_eq!(after.mention, "rukmini_iyer");
        assert_eq!(after.history_key, before);
    }

    #[test]
    fn keys_monotonically_increase() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PersonaRegistry::new(tmp.path());
        let first = registry.save_custom_persona("A", "pa", "").unwrap();
        let second = registry.save_custom_persona("B", "pb", "").unwrap();
        assert_eq!(first, "3");
        assert_eq!(second, "4");

        registry.delete_custom_persona(&first).unwrap();
        // Deleting does not free the key for reuse within the same registry.
        let third = registry.save_custom_persona("C", "pc", "").unwrap();
        assert_eq!(third, "5");
    }
}
