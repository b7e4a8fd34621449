// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

//! Flat key/value configuration, persisted as `key=value` lines.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use regex::Regex;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "gdb-front.ini";

/// How a configuration value is edited and validated by a front end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKind {
    Text,
    File,
    Bool,
}

/// One flat configuration entry.
#[derive(Clone, Debug)]
pub struct ConfigPair {
    pub key: &'static str,
    pub value: String,
    pub kind: ConfigKind,
}

impl ConfigPair {
    fn new(key: &'static str, kind: ConfigKind) -> Self {
        ConfigPair {
            key,
            value: String::new(),
            kind,
        }
    }
}

/// The configuration surface: the debugger to spawn, the executable to
/// debug, and the display font. Unknown keys in the file are ignored.
#[derive(Clone, Debug)]
pub struct Config {
    entries: Vec<ConfigPair>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            entries: vec![
                ConfigPair::new("gdb_path", ConfigKind::File),
                ConfigPair::new("gdb_args", ConfigKind::Text),
                ConfigPair::new("debug_exe_path", ConfigKind::File),
                ConfigPair::new("debug_exe_args", ConfigKind::Text),
                ConfigPair::new("font_filename", ConfigKind::File),
                ConfigPair::new("font_size", ConfigKind::Text),
            ],
        }
    }
}

impl Config {
    pub fn entries(&self) -> &[ConfigPair] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> &str {
        self.entries
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.value.as_str())
            .unwrap_or("")
    }

    /// Sets a known key; returns false for unknown ones.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        match self.entries.iter_mut().find(|pair| pair.key == key) {
            Some(pair) => {
                pair.value = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Loads the file at `path` over the defaults. A missing file is not an
    /// error; a malformed line is skipped.
    pub fn load(path: &Path) -> io::Result<Config> {
        let mut config = Config::default();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(config),
            Err(err) => return Err(err),
        };
        let line_re = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$").unwrap();
        for line in text.lines() {
            if line.trim_start().starts_with('#') {
                continue;
            }
            if let Some(caps) = line_re.captures(line) {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                if !config.set(key, value) {
                    log::debug!("ignoring unknown config key {key}");
                }
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut out = String::new();
        for pair in &self.entries {
            let _ = writeln!(out, "{}={}", pair.key, pair.value);
        }
        fs::write(path, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/gdb-front.ini")).unwrap();
        assert_eq!(config.get("gdb_path"), "");
        assert_eq!(config.entries().len(), 6);
    }

    #[test]
    fn roundtrip() {
        let path = std::env::temp_dir().join("gdb-front-config-test.ini");
        let mut config = Config::default();
        assert!(config.set("gdb_path", "/usr/bin/gdb"));
        assert!(config.set("gdb_args", "-q -nx"));
        assert!(!config.set("bogus", "1"));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.get("gdb_path"), "/usr/bin/gdb");
        assert_eq!(loaded.get("gdb_args"), "-q -nx");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn malformed_and_unknown_lines_are_skipped() {
        let path = std::env::temp_dir().join("gdb-front-config-junk.ini");
        fs::write(
            &path,
            "# comment\ngdb_path = /bin/gdb\nnot a pair\nmystery=1\nfont_size=13\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.get("gdb_path"), "/bin/gdb");
        assert_eq!(config.get("font_size"), "13");
        let _ = fs::remove_file(&path);
    }
}
