//! Known browsers and how to recognise their executables.
//!
//! Recognition is a best-effort name match, not a security boundary: a
//! renamed or forked binary may be missed or misclassified.

use regex::Regex;

use super::ResolverError;
use crate::config::BrowserEntry;

/// One recognisable browser.
#[derive(Debug, Clone)]
pub struct BrowserSpec {
    /// Bundle identifier, shared with the extension's own detection.
    pub id: String,
    pub name: String,
    executable: Regex,
    /// Disabled browsers are still recognised as launchers but the hotkey
    /// is not intercepted while their windows are focused.
    pub enabled: bool,
    /// Cycle over tabs of every window rather than the focused one.
    pub combine_all_windows: bool,
}

impl BrowserSpec {
    fn new(id: &str, name: &str, executable: &str) -> Result<Self, ResolverError> {
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            executable: compile(id, executable)?,
            enabled: true,
            combine_all_windows: false,
        })
    }

    pub fn recognises(&self, executable: &str) -> bool {
        self.executable.is_match(executable)
    }
}

fn compile(id: &str, pattern: &str) -> Result<Regex, ResolverError> {
    Regex::new(&format!("(?i){pattern}")).map_err(|source| ResolverError::Pattern {
        browser: id.to_string(),
        source,
    })
}

const BUILTIN: &[(&str, &str, &str)] = &[
    ("org.chromium.Chromium", "Chromium", r"^chromium(-browser)?$"),
    ("com.google.Chrome", "Google Chrome", r"^(google-)?chrome(-stable|-beta|-unstable)?$"),
    ("com.brave.Browser", "Brave", r"^brave(-browser)?$"),
    ("com.microsoft.edgemac", "Microsoft Edge", r"^(microsoft-edge|msedge)(-stable|-beta|-dev)?$"),
    ("com.vivaldi.Vivaldi", "Vivaldi", r"^vivaldi(-bin|-stable)?$"),
    ("com.operasoftware.Opera", "Opera", r"^opera$"),
    ("org.chromium.Thorium", "Thorium", r"^thorium(-browser)?$"),
    ("net.imput.helium", "Helium", r"^helium$"),
];

#[derive(Debug, Clone)]
pub struct BrowserCatalog {
    browsers: Vec<BrowserSpec>,
}

impl BrowserCatalog {
    pub fn builtin() -> Self {
        let browsers = BUILTIN
            .iter()
            .map(|(id, name, pattern)| {
                BrowserSpec::new(id, name, pattern).expect("built-in browser patterns are valid")
            })
            .collect();
        Self { browsers }
    }

    /// Built-in catalog with `entries` applied on top. An entry whose id is
    /// already known overrides the given fields; a new id is appended and
    /// must carry an `executable` pattern.
    pub fn with_overrides(entries: &[BrowserEntry]) -> Result<Self, ResolverError> {
        let mut catalog = Self::builtin();

        for entry in entries {
            let index = match catalog.browsers.iter().position(|b| b.id == entry.id) {
                Some(index) => {
                    let spec = &mut catalog.browsers[index];
                    if let Some(name) = &entry.name {
                        spec.name = name.clone();
                    }
                    if let Some(pattern) = &entry.executable {
                        spec.executable = compile(&entry.id, pattern)?;
                    }
                    index
                }
                None => {
                    let pattern = entry
                        .executable
                        .as_deref()
                        .ok_or_else(|| ResolverError::MissingPattern(entry.id.clone()))?;
                    let name = entry.name.as_deref().unwrap_or(&entry.id);
                    catalog.browsers.push(BrowserSpec::new(&entry.id, name, pattern)?);
                    catalog.browsers.len() - 1
                }
            };

            let spec = &mut catalog.browsers[index];
            if let Some(enabled) = entry.enabled {
                spec.enabled = enabled;
            }
            if let Some(combine) = entry.combine_all_windows {
                spec.combine_all_windows = combine;
            }
        }

        Ok(catalog)
    }

    /// The browser whose executable name is `executable`, if any.
    pub fn identify(&self, executable: &str) -> Option<&BrowserSpec> {
        self.browsers.iter().find(|b| b.recognises(executable))
    }

    pub fn get(&self, id: &str) -> Option<&BrowserSpec> {
        self.browsers.iter().find(|b| b.id == id)
    }

    pub fn combine_all_windows(&self, id: &str) -> bool {
        self.get(id).is_some_and(|b| b.combine_all_windows)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BrowserSpec> {
        self.browsers.iter()
    }
}

impl Default for BrowserCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> BrowserEntry {
        BrowserEntry {
            id: id.to_string(),
            ..BrowserEntry::default()
        }
    }

    #[test]
    fn builtin_recognises_common_linux_executables() {
        let catalog = BrowserCatalog::builtin();
        let id = |exe: &str| catalog.identify(exe).map(|b| b.id.as_str());

        assert_eq!(id("chrome"), Some("com.google.Chrome"));
        assert_eq!(id("google-chrome-stable"), Some("com.google.Chrome"));
        assert_eq!(id("chromium"), Some("org.chromium.Chromium"));
        assert_eq!(id("brave"), Some("com.brave.Browser"));
        assert_eq!(id("msedge"), Some("com.microsoft.edgemac"));
        assert_eq!(id("vivaldi-bin"), Some("com.vivaldi.Vivaldi"));
        assert_eq!(id("bash"), None);
        assert_eq!(id("chrome_crashpad_handler"), None);
    }

    #[test]
    fn recognition_is_case_insensitive() {
        let catalog = BrowserCatalog::builtin();
        assert_eq!(
            catalog.identify("Brave").map(|b| b.id.as_str()),
            Some("com.brave.Browser")
        );
    }

    #[test]
    fn override_adjusts_existing_entry() {
        let catalog = BrowserCatalog::with_overrides(&[BrowserEntry {
            enabled: Some(false),
            combine_all_windows: Some(true),
            ..entry("com.google.Chrome")
        }])
        .unwrap();

        let chrome = catalog.get("com.google.Chrome").unwrap();
        assert!(!chrome.enabled);
        assert!(catalog.combine_all_windows("com.google.Chrome"));
        assert!(!catalog.combine_all_windows("com.brave.Browser"));
    }

    #[test]
    fn new_entry_requires_pattern() {
        let err = BrowserCatalog::with_overrides(&[entry("org.example.Forked")]).unwrap_err();
        assert!(matches!(err, ResolverError::MissingPattern(id) if id == "org.example.Forked"));
    }

    #[test]
    fn new_entry_with_pattern_is_recognised() {
        let catalog = BrowserCatalog::with_overrides(&[BrowserEntry {
            executable: Some("^forkium$".into()),
            ..entry("org.example.Forkium")
        }])
        .unwrap();
        assert_eq!(
            catalog.identify("forkium").map(|b| b.name.as_str()),
            Some("org.example.Forkium")
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = BrowserCatalog::with_overrides(&[BrowserEntry {
            executable: Some("(".into()),
            ..entry("com.google.Chrome")
        }])
        .unwrap_err();
        assert!(matches!(err, ResolverError::Pattern { .. }));
    }
}
