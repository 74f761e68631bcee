//! Repository configuration: the `config` file at the repository root and
//! the `[remote "<name>"]` sections that describe pull sources.
//!
//! The on-disk format is GKeyFile-style INI (`[section]` / `[section
//! "subsection"]` headers, `key=value` lines, `#` and `;` comments). No
//! crate in the dependency stack parses this dialect, so it is hand-rolled
//! here; the format itself is tiny enough that a generic TOML/INI library
//! would buy nothing.

use std::collections::BTreeMap;
use std::str::FromStr;

use camino::Utf8Path;

use crate::error::Error;
use crate::error::Result;

/// Bare stores real filesystem objects; archive-z2 stores compressed
/// blobs with metadata headers, suitable for read-only HTTP serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoMode {
    Bare,
    ArchiveZ2,
}

impl FromStr for RepoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bare" => Ok(Self::Bare),
            "archive-z2" => Ok(Self::ArchiveZ2),
            // The legacy spelling from older archives is rejected rather
            // than silently aliased, so config errors surface early.
            "archive" => Err(Error::InvalidConfig(
                "mode 'archive' is no longer supported; use 'archive-z2'".into(),
            )),
            other => Err(Error::InvalidConfig(format!("unknown repo mode '{other}'"))),
        }
    }
}

impl RepoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bare => "bare",
            Self::ArchiveZ2 => "archive-z2",
        }
    }
}

/// A parsed `[remote "name"]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    pub gpg_verify: bool,
    pub tls_permissive: bool,
    /// Ref name globs to restrict the pull to, empty meaning "all branches".
    pub branches: Vec<String>,
}

/// The parsed `config` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: RepoMode,
    pub parent: Option<String>,
    pub enable_uncompressed_cache: bool,
    pub remotes: BTreeMap<String, RemoteConfig>,
}

impl Config {
    pub fn remote(&self, name: &str) -> Result<&RemoteConfig> {
        self.remotes
            .get(name)
            .ok_or_else(|| Error::InvalidConfig(format!("no remote named '{name}'")))
    }

    pub fn default_contents(mode: RepoMode) -> String {
        format!("[core]\nrepo_version=1\nmode={}\n", mode.as_str())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let sections = parse_sections(text)?;

        let core = sections
            .iter()
            .find(|s| s.name == "core" && s.subsection.is_none())
            .ok_or_else(|| Error::InvalidConfig("config has no [core] section".into()))?;
        let repo_version = core.get("repo_version").unwrap_or("1");
        if repo_version != "1" {
            return Err(Error::InvalidConfig(format!(
                "unsupported repo_version '{repo_version}'"
            )));
        }
        let mode = core
            .get("mode")
            .map(RepoMode::from_str)
            .transpose()?
            .unwrap_or(RepoMode::Bare);
        let parent = core.get("parent").map(str::to_owned);
        let enable_uncompressed_cache = core
            .get("enable-uncompressed-cache")
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let mut remotes = BTreeMap::new();
        for section in &sections {
            if section.name != "remote" {
                continue;
            }
            let Some(name) = &section.subsection else {
                return Err(Error::InvalidConfig(
                    "[remote] section requires a quoted name".into(),
                ));
            };
            let url = section
                .get("url")
                .ok_or_else(|| {
                    Error::InvalidConfig(format!("remote '{name}' has no url"))
                })?
                .to_owned();
            let gpg_verify = section
                .get("gpg-verify")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(true);
            let tls_permissive = section
                .get("tls-permissive")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false);
            let branches = section
                .get("branches")
                .map(|v| v.split(';').map(str::to_owned).collect())
                .unwrap_or_default();
            remotes.insert(
                name.clone(),
                RemoteConfig {
                    name: name.clone(),
                    url,
                    gpg_verify,
                    tls_permissive,
                    branches,
                },
            );
        }

        Ok(Self {
            mode,
            parent,
            enable_uncompressed_cache,
            remotes,
        })
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&text)
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::InvalidConfig(format!("invalid boolean '{other}'"))),
    }
}

struct Section {
    name: String,
    subsection: Option<String>,
    entries: BTreeMap<String, String>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// Parses `[section]` / `[section "subsection"]` headers and `key=value`
/// entries. `#` and `;` start a comment that runs to end of line; blank
/// lines are ignored. Values are not quote-aware beyond the subsection name
/// itself, matching the narrow GKeyFile subset actually used here.
fn parse_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            let (name, subsection) = parse_header(header).ok_or_else(|| {
                Error::InvalidConfig(format!("invalid section header on line {}", lineno + 1))
            })?;
            current = Some(Section {
                name,
                subsection,
                entries: BTreeMap::new(),
            });
            continue;
        }
        let Some(section) = current.as_mut() else {
            return Err(Error::InvalidConfig(format!(
                "entry outside of any section on line {}",
                lineno + 1
            )));
        };
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::InvalidConfig(format!("expected 'key=value' on line {}", lineno + 1))
        })?;
        section
            .entries
            .insert(key.trim().to_owned(), value.trim().to_owned());
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }
    Ok(sections)
}

fn strip_comment(line: &str) -> &str {
    let cut = line
        .find(['#', ';'])
        .unwrap_or(line.len());
    &line[..cut]
}

fn parse_header(header: &str) -> Option<(String, Option<String>)> {
    let header = header.trim();
    match header.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let rest = rest.trim();
            let quoted = rest.strip_prefix('"')?.strip_suffix('"')?;
            Some((name.to_owned(), Some(quoted.to_owned())))
        }
        None => Some((header.to_owned(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_remote_sections() {
        let text = r#"
            [core]
            repo_version=1
            mode=archive-z2
            enable-uncompressed-cache=true

            [remote "origin"]
            url=https://example.invalid/repo
            gpg-verify=false
            branches=stable/x86_64;stable/aarch64
        "#;
        let config = Config::parse(text).unwrap();
        assert_eq!(config.mode, RepoMode::ArchiveZ2);
        assert!(config.enable_uncompressed_cache);
        let remote = config.remote("origin").unwrap();
        assert_eq!(remote.url, "https://example.invalid/repo");
        assert!(!remote.gpg_verify);
        assert_eq!(remote.branches, vec!["stable/x86_64", "stable/aarch64"]);
    }

    #[test]
    fn defaults_to_bare_and_gpg_verify_true() {
        let config = Config::parse("[core]\nrepo_version=1\n\n[remote \"r\"]\nurl=u\n").unwrap();
        assert_eq!(config.mode, RepoMode::Bare);
        assert!(config.remote("r").unwrap().gpg_verify);
    }

    #[test]
    fn rejects_legacy_archive_mode() {
        let err = Config::parse("[core]\nrepo_version=1\nmode=archive\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn rejects_missing_core_section() {
        assert!(Config::parse("[remote \"r\"]\nurl=u\n").is_err());
    }

    #[test]
    fn rejects_entry_outside_section() {
        assert!(Config::parse("key=value\n").is_err());
    }

    #[test]
    fn default_contents_round_trips() {
        let text = Config::default_contents(RepoMode::Bare);
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.mode, RepoMode::Bare);
    }
}
