//! Named access lists and the allow/block policy evaluated against them.
//!
//! Lists are shared by every service and replaced as a whole on reload.
//! Readers take a snapshot through `ArcSwap` and never wait on a reload.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;

use crate::error::{ProxyError, Result};

/// How list membership is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// No restriction
    #[default]
    Default,
    /// Admit only members of a configured list
    Allow,
    /// Admit only non-members of every configured list
    Block,
}

impl AccessMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "default" | "off" => Ok(AccessMode::Default),
            "allow" => Ok(AccessMode::Allow),
            "block" => Ok(AccessMode::Block),
            other => Err(ProxyError::config(format!("unknown access mode '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Default => "default",
            AccessMode::Allow => "allow",
            AccessMode::Block => "block",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of every named list
#[derive(Debug, Default)]
pub struct AccessLists {
    lists: HashMap<String, HashSet<String>>,
}

impl AccessLists {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let lists = entries
            .into_iter()
            .map(|(tag, values)| (tag.into(), values.into_iter().collect()))
            .collect();
        Self { lists }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.lists.contains_key(tag)
    }

    /// A missing tag behaves as an empty list
    pub fn contains(&self, tag: &str, value: &str) -> bool {
        self.lists.get(tag).is_some_and(|set| set.contains(value))
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// Access mode plus the list tags it is evaluated against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub mode: AccessMode,
    pub tags: Vec<String>,
}

/// Outcome of a policy check, named the way it is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Policy disabled
    Unrestricted,
    /// Allow mode, member
    Allowed,
    /// Allow mode, not a member
    Denied,
    /// Block mode, not a member
    Passed,
    /// Block mode, member
    Blocked,
}

impl Verdict {
    pub fn admits(&self) -> bool {
        matches!(self, Verdict::Unrestricted | Verdict::Allowed | Verdict::Passed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Unrestricted => "DEFAULT",
            Verdict::Allowed => "ALLOW",
            Verdict::Denied => "DENY",
            Verdict::Passed => "PASS",
            Verdict::Blocked => "REJECT",
        }
    }
}

impl AccessPolicy {
    pub fn new(mode: AccessMode, tags: Vec<String>) -> Self {
        Self { mode, tags }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != AccessMode::Default
    }

    pub fn evaluate(&self, lists: &AccessLists, value: &str) -> Verdict {
        if self.mode == AccessMode::Default {
            return Verdict::Unrestricted;
        }
        let hit = self.tags.iter().any(|tag| lists.contains(tag, value));
        match (self.mode, hit) {
            (AccessMode::Allow, true) => Verdict::Allowed,
            (AccessMode::Allow, false) => Verdict::Denied,
            (AccessMode::Block, true) => Verdict::Blocked,
            (AccessMode::Block, false) => Verdict::Passed,
            (AccessMode::Default, _) => Verdict::Unrestricted,
        }
    }

    pub fn permits(&self, lists: &AccessLists, value: &str) -> bool {
        self.evaluate(lists, value).admits()
    }

    /// Tags this policy references that `lists` does not define
    pub fn missing_tags<'a>(&'a self, lists: &AccessLists) -> Vec<&'a str> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.tags
            .iter()
            .filter(|tag| !lists.has_tag(tag))
            .map(String::as_str)
            .collect()
    }
}

/// Hot-swappable holder of the current lists
pub struct ListStore {
    current: ArcSwap<AccessLists>,
    reload_lock: Mutex<()>,
}

impl ListStore {
    pub fn new(lists: AccessLists) -> Self {
        Self {
            current: ArcSwap::from_pointee(lists),
            reload_lock: Mutex::new(()),
        }
    }

    /// Current snapshot; stays valid even if a reload happens meanwhile
    pub fn snapshot(&self) -> Arc<AccessLists> {
        self.current.load_full()
    }

    /// Replace the lists, unless a tag in `required_tags` would disappear
    ///
    /// Reloads are serialized; readers only see the old or the new map.
    pub fn replace<'a, I>(&self, lists: AccessLists, required_tags: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let _guard = self.lock_reload()?;
        self.swap(lists, required_tags)
    }

    /// Re-read the `Lists` section of a config file and swap it in
    ///
    /// The read, parse and swap all happen under the reload lock, so the
    /// last reload to start is the last one installed. On any failure the
    /// current lists stay active. Returns the number of lists loaded.
    pub fn reload_from<'a, I>(&self, path: &Path, required_tags: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let _guard = self.lock_reload()?;
        let lists = crate::config::ConfigFile::load(path)?.access_lists();
        let count = lists.len();
        self.swap(lists, required_tags)?;
        Ok(count)
    }

    fn lock_reload(&self) -> Result<MutexGuard<'_, ()>> {
        self.reload_lock
            .lock()
            .map_err(|_| ProxyError::Other("list reload lock poisoned".to_string()))
    }

    /// Caller holds the reload lock
    fn swap<'a, I>(&self, lists: AccessLists, required_tags: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let missing: Vec<&str> = required_tags
            .into_iter()
            .filter(|tag| !lists.has_tag(tag))
            .collect();
        if !missing.is_empty() {
            return Err(ProxyError::config(format!(
                "reloaded lists are missing tags still in use: {}",
                missing.join(", ")
            )));
        }

        self.current.store(Arc::new(lists));
        Ok(())
    }
}

impl Default for ListStore {
    fn default() -> Self {
        Self::new(AccessLists::default())
    }
}
