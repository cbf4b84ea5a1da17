//! Minimal reader for OpenSSH client configuration files.
//!
//! Only the directives that influence how `lxdev` reaches a container are
//! interpreted: `HostName`, `User`, `Port` and `ProxyCommand`, and only to
//! describe the connection in log lines. The `ssh` binary reads the same file
//! and remains the authority, including for `Match` and `Include`. Matching follows
//! `ssh_config(5)`: `Host` patterns support `*`, `?` and `!` negation, keywords
//! are case-insensitive, and the first value obtained for a keyword wins.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while reading an SSH config file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshConfigError {
    /// Raised when the file exists but cannot be read.
    #[error("failed to read ssh config {path}: {message}")]
    Read {
        /// Path that was read.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a `Port` directive is not a valid TCP port.
    #[error("invalid Port value '{value}' on line {line} of ssh config")]
    InvalidPort {
        /// One-based line number of the directive.
        line: usize,
        /// Value that failed to parse.
        value: String,
    },
}

/// Per-host overrides extracted from the config.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostDirectives {
    /// Real hostname to connect to.
    pub hostname: Option<String>,
    /// Login user.
    pub user: Option<String>,
    /// TCP port.
    pub port: Option<u16>,
    /// Command whose stdio carries the connection.
    pub proxy_command: Option<String>,
}

#[derive(Clone, Debug)]
enum Selector {
    Host(Vec<String>),
    /// `Match` blocks are not evaluated and never apply.
    Match,
}

#[derive(Clone, Debug)]
struct Block {
    selector: Selector,
    directives: Vec<(String, String)>,
}

/// Parsed SSH client configuration.
#[derive(Clone, Debug, Default)]
pub struct SshConfig {
    blocks: Vec<Block>,
}

impl SshConfig {
    /// Reads `path`, returning `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Read`] when the file cannot be read, or any
    /// parse error from [`SshConfig::parse`].
    pub fn load(path: &Utf8Path) -> Result<Option<Self>, SshConfigError> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = read_to_string_ambient(path).map_err(|message| SshConfigError::Read {
            path: path.to_string(),
            message,
        })?;
        Self::parse(&text).map(Some)
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::InvalidPort`] when a `Port` value is not a
    /// number between 1 and 65535.
    pub fn parse(text: &str) -> Result<Self, SshConfigError> {
        let mut blocks = vec![Block {
            selector: Selector::Host(vec![String::from("*")]),
            directives: Vec::new(),
        }];

        for (index, raw) in text.lines().enumerate() {
            let Some((keyword, value)) = split_directive(raw) else {
                continue;
            };
            match keyword.as_str() {
                "host" => blocks.push(Block {
                    selector: Selector::Host(
                        value.split_whitespace().map(str::to_owned).collect(),
                    ),
                    directives: Vec::new(),
                }),
                "match" => blocks.push(Block {
                    selector: Selector::Match,
                    directives: Vec::new(),
                }),
                _ => {
                    if keyword == "port" {
                        parse_port(&value, index + 1)?;
                    }
                    if let Some(block) = blocks.last_mut() {
                        block.directives.push((keyword, value));
                    }
                }
            }
        }

        Ok(Self { blocks })
    }

    /// Collects the directives that apply to `host`.
    #[must_use]
    pub fn lookup(&self, host: &str) -> HostDirectives {
        let mut found = HostDirectives::default();
        for block in self.blocks.iter().filter(|block| block.applies_to(host)) {
            for (keyword, value) in &block.directives {
                match keyword.as_str() {
                    "hostname" => fill(&mut found.hostname, value),
                    "user" => fill(&mut found.user, value),
                    "proxycommand" => fill(&mut found.proxy_command, value),
                    "port" if found.port.is_none() => {
                        found.port = value.parse().ok();
                    }
                    _ => {}
                }
            }
        }
        found
    }
}

impl Block {
    fn applies_to(&self, host: &str) -> bool {
        let Selector::Host(patterns) = &self.selector else {
            return false;
        };
        let mut matched = false;
        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if wildcard_match(negated, host) {
                    return false;
                }
            } else if wildcard_match(pattern, host) {
                matched = true;
            }
        }
        matched
    }
}

fn fill(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_owned());
    }
}

fn parse_port(value: &str, line: usize) -> Result<u16, SshConfigError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(SshConfigError::InvalidPort {
            line,
            value: value.to_owned(),
        }),
    }
}

/// Splits a config line into a lower-cased keyword and its unquoted value.
fn split_directive(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split_at = line.find(|ch: char| ch.is_whitespace() || ch == '=')?;
    let (keyword, rest) = line.split_at(split_at);
    let value = rest
        .trim_start()
        .strip_prefix('=')
        .unwrap_or_else(|| rest.trim_start())
        .trim();
    let unquoted = value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value);
    if unquoted.is_empty() {
        return None;
    }
    Some((keyword.to_lowercase(), unquoted.to_owned()))
}

/// Matches `text` against a pattern where `*` spans any run of characters
/// and `?` matches exactly one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&ch) if ch == '?' || text.get(t) == Some(&ch) => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|ch| *ch == '*'))
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let parent = path
        .parent()
        .ok_or_else(|| format!("path has no parent directory: {path}"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
