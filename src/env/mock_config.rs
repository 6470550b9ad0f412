//! Mock environment configuration: a sectioned key/value document with
//! `[DEFAULT]` fallback and `%(name)s` interpolation.
//!
//! The format matches the INI dialect lab software reads its machine
//! configuration from, so an application under test can be pointed at a
//! throwaway copy instead of the real one.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::{AlhError, Result};

/// Name of the fallback section.
pub const DEFAULT_SECTION: &str = "DEFAULT";
/// Nesting limit for `%(name)s` references.
pub const MAX_INTERPOLATION_DEPTH: usize = 10;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?:\(([^)]*)\)s|%)?").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// Ordered, sectioned configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    defaults: Section,
    sections: Vec<Section>,
}

/// Values substituted into [`MockConfig::template`].
#[derive(Debug, Clone)]
pub struct TemplateParams {
    pub experiment_name: String,
    pub shared_drive: PathBuf,
    pub suite_dir: PathBuf,
    pub analysislib: PathBuf,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConfig {
    pub fn new() -> Self {
        Self {
            defaults: Section::new(DEFAULT_SECTION),
            sections: Vec::new(),
        }
    }

    /// Parse INI text. Keys are case-insensitive and stored lower-cased.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Indented lines continue the previous value.
            if raw.starts_with([' ', '\t'])
                && let (Some(section), Some(key)) = (&current, &last_key)
            {
                let section = config.section_mut(section);
                let joined = format!("{}\n{trimmed}", section.get(key).unwrap_or_default());
                section.set(key.clone(), joined);
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| parse_error(lineno, raw))?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(parse_error(lineno, raw));
                }
                config.ensure_section(name);
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            let Some(section) = &current else {
                return Err(AlhError::ConfigParse {
                    context: "mock config",
                    details: format!("line {lineno}: entry outside of any section: {raw:?}"),
                });
            };
            let split = trimmed
                .find(['=', ':'])
                .ok_or_else(|| parse_error(lineno, raw))?;
            let key = trimmed[..split].trim().to_lowercase();
            if key.is_empty() {
                return Err(parse_error(lineno, raw));
            }
            let value = trimmed[split + 1..].trim().to_string();
            config.section_mut(section).set(key.clone(), value);
            last_key = Some(key);
        }

        Ok(config)
    }

    /// Read and parse a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| AlhError::io(path, source))?;
        Self::parse(&text)
    }

    /// Render back to INI text, `[DEFAULT]` first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in std::iter::once(&self.defaults).chain(&self.sections) {
            if section.name == DEFAULT_SECTION && section.entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "[{}]", section.name);
            for (key, value) in &section.entries {
                let value = value.replace('\n', "\n    ");
                let _ = writeln!(out, "{key} = {value}");
            }
            out.push('\n');
        }
        out
    }

    /// Write the rendered document, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| AlhError::io(parent, source))?;
        }
        fs::write(path, self.render()).map_err(|source| AlhError::io(path, source))
    }

    /// Set a raw (uninterpolated) value. Creates the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.ensure_section(section);
        self.section_mut(section)
            .set(key.to_lowercase(), value.into());
    }

    pub fn has_section(&self, section: &str) -> bool {
        section == DEFAULT_SECTION || self.sections.iter().any(|s| s.name == section)
    }

    /// Section names in document order, excluding `DEFAULT`.
    pub fn sections(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Keys visible in `section`, including inherited defaults.
    pub fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self.lookup_section(section).map_or_else(Vec::new, |s| {
            s.entries.iter().map(|(k, _)| k.clone()).collect()
        });
        for (key, _) in &self.defaults.entries {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Raw value without interpolation.
    pub fn get_raw(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.lookup_section(section)
            .and_then(|s| s.get(&key))
            .or_else(|| self.defaults.get(&key))
    }

    /// Interpolated value.
    pub fn get(&self, section: &str, key: &str) -> Result<String> {
        if !self.has_section(section) {
            return Err(interpolation_error(section, key, "no such section"));
        }
        let raw = self
            .get_raw(section, key)
            .ok_or_else(|| interpolation_error(section, key, "no such option"))?;
        self.interpolate(section, key, raw, 1)
    }

    pub fn get_u16(&self, section: &str, key: &str) -> Result<u16> {
        let value = self.get(section, key)?;
        value.trim().parse::<u16>().map_err(|e| {
            interpolation_error(section, key, &format!("{value:?} is not a port number: {e}"))
        })
    }

    pub fn get_path(&self, section: &str, key: &str) -> Result<PathBuf> {
        self.get(section, key).map(PathBuf::from)
    }

    /// The lab configuration layout used by provisioned test environments.
    pub fn template(params: &TemplateParams) -> Self {
        let mut cfg = Self::new();
        let defaults = [
            ("experiment_name", params.experiment_name.clone()),
            ("shared_drive", params.shared_drive.display().to_string()),
            (
                "experiment_shot_storage",
                "%(shared_drive)s/Experiments/%(experiment_name)s".to_string(),
            ),
            ("labscript_suite", params.suite_dir.display().to_string()),
            (
                "labscriptlib",
                "%(labscript_suite)s/userlib/labscriptlib/%(experiment_name)s".to_string(),
            ),
            ("analysislib", params.analysislib.display().to_string()),
            ("pythonlib", "%(labscript_suite)s/userlib/pythonlib".to_string()),
        ];
        for (key, value) in defaults {
            cfg.set(DEFAULT_SECTION, key, value);
        }

        cfg.set("servers", "zlock", "localhost");
        for (key, port) in [
            ("blacs", "42517"),
            ("lyse", "42519"),
            ("mise", "42520"),
            ("runviewer", "42521"),
            ("zlock", "7339"),
        ] {
            cfg.set("ports", key, port);
        }
        cfg.set("programs", "text_editor", "subl");
        cfg.set("programs", "text_editor_arguments", "{file}");
        cfg.set("programs", "hdf5_viewer", "hdfview");
        cfg.set("programs", "hdf5_viewer_arguments", "{file}");
        cfg.set(
            "paths",
            "connection_table_h5",
            "%(experiment_shot_storage)s/connectiontable.h5",
        );
        cfg.set(
            "paths",
            "connection_table_py",
            "%(labscriptlib)s/connectiontable.py",
        );
        cfg.set(
            "runmanager",
            "autoload_config_file",
            "%(experiment_shot_storage)s/runmanager.ini",
        );
        cfg.set("runmanager", "output_folder_format", "%%Y/%%m/%%d");
        cfg.set(
            "lyse",
            "autoload_config_file",
            "%(experiment_shot_storage)s/lyse.ini",
        );
        cfg
    }

    // ──────────────────── internals ────────────────────

    fn lookup_section(&self, section: &str) -> Option<&Section> {
        if section == DEFAULT_SECTION {
            return Some(&self.defaults);
        }
        self.sections.iter().find(|s| s.name == section)
    }

    fn ensure_section(&mut self, name: &str) {
        if !self.has_section(name) {
            self.sections.push(Section::new(name));
        }
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        if name == DEFAULT_SECTION {
            return &mut self.defaults;
        }
        let pos = match self.sections.iter().position(|s| s.name == name) {
            Some(pos) => pos,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos]
    }

    fn interpolate(&self, section: &str, key: &str, raw: &str, depth: usize) -> Result<String> {
        if depth > MAX_INTERPOLATION_DEPTH {
            return Err(interpolation_error(
                section,
                key,
                &format!("reference depth exceeds {MAX_INTERPOLATION_DEPTH}: {raw:?}"),
            ));
        }

        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(raw) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&raw[last..whole.start()]);
            last = whole.end();

            if whole.as_str() == "%%" {
                out.push('%');
            } else if let Some(name) = caps.get(1) {
                let name = name.as_str().to_lowercase();
                let referenced = self.get_raw(section, &name).ok_or_else(|| {
                    interpolation_error(
                        section,
                        key,
                        &format!("bad reference %({name})s: no such option"),
                    )
                })?;
                out.push_str(&self.interpolate(section, key, referenced, depth + 1)?);
            } else {
                return Err(interpolation_error(
                    section,
                    key,
                    &format!("'%' must be followed by '%' or '(', found {raw:?}"),
                ));
            }
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }
}

fn parse_error(lineno: usize, raw: &str) -> AlhError {
    AlhError::ConfigParse {
        context: "mock config",
        details: format!("line {lineno}: cannot parse {raw:?}"),
    }
}

fn interpolation_error(section: &str, key: &str, details: &str) -> AlhError {
    AlhError::Interpolation {
        section: section.to_string(),
        key: key.to_string(),
        details: details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MockConfig {
        MockConfig::template(&TemplateParams {
            experiment_name: "test_experiment".to_string(),
            shared_drive: PathBuf::from("/scratch/test_shared_drive"),
            suite_dir: PathBuf::from("/opt/suite"),
            analysislib: PathBuf::from("/scratch/test_analysislib"),
        })
    }

    #[test]
    fn template_interpolates_nested_defaults() {
        let cfg = sample();
        assert_eq!(
            cfg.get("paths", "connection_table_h5").unwrap(),
            "/scratch/test_shared_drive/Experiments/test_experiment/connectiontable.h5"
        );
        assert_eq!(
            cfg.get("lyse", "autoload_config_file").unwrap(),
            "/scratch/test_shared_drive/Experiments/test_experiment/lyse.ini"
        );
        assert_eq!(
            cfg.get("DEFAULT", "labscriptlib").unwrap(),
            "/opt/suite/userlib/labscriptlib/test_experiment"
        );
    }

    #[test]
    fn double_percent_is_literal() {
        assert_eq!(
            sample().get("runmanager", "output_folder_format").unwrap(),
            "%Y/%m/%d"
        );
    }

    #[test]
    fn typed_getters() {
        let cfg = sample();
        assert_eq!(cfg.get_u16("ports", "lyse").unwrap(), 42519);
        assert_eq!(
            cfg.get_path("DEFAULT", "analysislib").unwrap(),
            PathBuf::from("/scratch/test_analysislib")
        );
        assert_eq!(cfg.get("programs", "text_editor_arguments").unwrap(), "{file}");
        assert!(cfg.get_u16("servers", "zlock").is_err());
    }

    #[test]
    fn keys_are_case_insensitive() {
        let cfg = MockConfig::parse("[Ports]\nLyse = 1\n").unwrap();
        assert_eq!(cfg.get("Ports", "LYSE").unwrap(), "1");
        assert_eq!(cfg.keys("Ports"), vec!["lyse".to_string()]);
    }

    #[test]
    fn render_then_parse_preserves_values() {
        let cfg = sample();
        let reparsed = MockConfig::parse(&cfg.render()).unwrap();
        assert_eq!(reparsed, cfg);
        assert!(cfg.render().starts_with("[DEFAULT]\n"));
    }

    #[test]
    fn continuation_lines_join_with_newline() {
        let cfg = MockConfig::parse("[a]\nitems = one\n    two\n\tthree\n").unwrap();
        assert_eq!(cfg.get("a", "items").unwrap(), "one\ntwo\nthree");
        let reparsed = MockConfig::parse(&cfg.render()).unwrap();
        assert_eq!(reparsed.get("a", "items").unwrap(), "one\ntwo\nthree");
    }

    #[test]
    fn missing_section_and_option_are_errors() {
        let cfg = sample();
        assert_eq!(cfg.get("nope", "x").unwrap_err().code(), "ALH-1101");
        assert!(
            cfg.get("ports", "missing")
                .unwrap_err()
                .to_string()
                .contains("no such option")
        );
    }

    #[test]
    fn bad_percent_and_cycles_are_rejected() {
        let mut cfg = MockConfig::new();
        cfg.set("a", "bare", "100% sure");
        assert!(cfg.get("a", "bare").unwrap_err().to_string().contains("'%'"));

        cfg.set("a", "x", "%(y)s");
        cfg.set("a", "y", "%(x)s");
        let err = cfg.get("a", "x").unwrap_err();
        assert!(err.to_string().contains("depth"), "{err}");
    }

    #[test]
    fn entries_before_any_section_are_rejected() {
        let err = MockConfig::parse("orphan = 1\n[a]\n").unwrap_err();
        assert_eq!(err.code(), "ALH-1003");
    }

    #[test]
    fn write_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch").join("mock_config.ini");
        let cfg = sample();
        cfg.write_to(&path).unwrap();
        assert_eq!(MockConfig::load(&path).unwrap(), cfg);
    }
}
