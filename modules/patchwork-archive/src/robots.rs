// Minimal robots.txt gate. One cached ruleset per host; only the
// wildcard agent group matters to us. A missing or unreadable
// robots.txt allows everything.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// Disallow prefixes for `User-agent: *`, one entry per host.
#[derive(Debug, Clone, Default)]
pub(crate) struct HostRules {
    disallow: Vec<String>,
}

impl HostRules {
    pub(crate) fn allows(&self, path: &str) -> bool {
        !self
            .disallow
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

/// Parse the wildcard group out of a robots.txt body.
pub(crate) fn parse_rules(body: &str) -> HostRules {
    let mut rules = HostRules::default();
    let mut in_wildcard_group = false;
    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "user-agent" => in_wildcard_group = value == "*",
            "disallow" if in_wildcard_group => {
                if !value.is_empty() {
                    rules.disallow.push(value.to_string());
                }
            }
            _ => {}
        }
    }
    rules
}

pub(crate) struct RobotsCache {
    http: reqwest::Client,
    by_host: Mutex<HashMap<String, Arc<HostRules>>>,
}

impl RobotsCache {
    pub(crate) fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            by_host: Mutex::new(HashMap::new()),
        }
    }

    /// True when `User-agent: *` rules permit fetching `path` on this host.
    pub(crate) async fn allows(&self, scheme: &str, host: &str, path: &str) -> bool {
        let rules = self.rules_for(scheme, host).await;
        rules.allows(path)
    }

    async fn rules_for(&self, scheme: &str, host: &str) -> Arc<HostRules> {
        {
            let cache = self.by_host.lock().await;
            if let Some(rules) = cache.get(host) {
                return rules.clone();
            }
        }

        let url = format!("{scheme}://{host}/robots.txt");
        let rules = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => parse_rules(&body),
                Err(_) => HostRules::default(),
            },
            Ok(_) | Err(_) => {
                debug!(host, "No readable robots.txt, allowing all");
                HostRules::default()
            }
        };

        let rules = Arc::new(rules);
        self.by_host.lock().await.insert(host.to_string(), rules.clone());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rules_allow_everything() {
        let rules = parse_rules("");
        assert!(rules.allows("/anything"));
    }

    #[test]
    fn wildcard_disallow_blocks_prefix() {
        let rules = parse_rules("User-agent: *\nDisallow: /private/");
        assert!(!rules.allows("/private/page"));
        assert!(rules.allows("/public/page"));
    }

    #[test]
    fn other_agent_groups_are_ignored() {
        let rules = parse_rules("User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nDisallow: /tmp/");
        assert!(rules.allows("/home"));
        assert!(!rules.allows("/tmp/x"));
    }

    #[test]
    fn comments_and_blank_disallow_are_skipped() {
        let rules = parse_rules("User-agent: * # everyone\nDisallow:\nDisallow: /x # keep out");
        assert!(rules.allows("/anything"));
        assert!(!rules.allows("/x/y"));
    }
}
