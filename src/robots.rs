//! robots.txt parsing and path evaluation.
//!
//! Supports the directives that matter for deciding whether a path may be
//! fetched: `User-agent`, `Allow` and `Disallow`. Everything else (sitemaps,
//! crawl-delay, host) is ignored.
//!
//! Matching rules:
//! - the most specific group wins: a group naming our product token, else `*`
//! - within the group the longest matching pattern decides; `Allow` wins ties
//! - `*` matches any run of characters, a trailing `$` anchors the end
//! - an empty `Disallow:` allows everything

use thiserror::Error;

/// Documents above this size are refused rather than partially evaluated.
pub const MAX_ROBOTS_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RobotsError {
    #[error("robots.txt is {0} bytes, above the 512 KiB limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// A parsed robots.txt document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    /// Rules that allow every path (no robots.txt published).
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(body: &str) -> Result<Self, RobotsError> {
        if body.len() > MAX_ROBOTS_BYTES {
            return Err(RobotsError::TooLarge(body.len()));
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        // Consecutive user-agent lines share one group.
        let mut last_was_agent = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !last_was_agent && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    if current.agents.is_empty() {
                        continue;
                    }
                    if value.is_empty() {
                        // "Disallow:" with no path allows everything; nothing to record.
                        continue;
                    }
                    current.rules.push(Rule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Ok(Self { groups })
    }

    /// Whether `agent` may fetch `path` (path plus optional query).
    pub fn is_allowed(&self, agent: &str, path: &str) -> bool {
        let token = product_token(agent);
        let specific: Vec<&Group> = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && *a == token))
            .collect();
        let applicable: Vec<&Group> = if specific.is_empty() {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            specific
        };

        let path = if path.is_empty() { "/" } else { path };
        let mut best: Option<(usize, bool)> = None;
        for rule in applicable.iter().flat_map(|g| g.rules.iter()) {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len => Some((best_len, best_allow)),
                Some((best_len, best_allow)) if best_len == len => {
                    Some((best_len, best_allow || rule.allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

/// `"NewsFanout/0.1 (+https://x)"` -> `"newsfanout"`.
fn product_token(agent: &str) -> String {
    agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();

    let Some(first) = parts.first() else {
        return true;
    };
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    if parts.len() == 1 {
        return !anchored || pos == path.len();
    }

    let last_index = parts.len() - 1;
    for (i, part) in parts.iter().enumerate().skip(1) {
        if i == last_index && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(offset) => pos += offset + part.len(),
            None => return false,
        }
    }
    true
}
