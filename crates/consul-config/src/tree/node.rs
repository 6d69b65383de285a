//! Nested configuration values

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator of configuration paths
const PATH_DELIMITER: char = '.';

/// Separator of KV key hierarchies
pub(crate) const KEY_DELIMITER: char = '/';

/// Translate a KV key into a configuration path (`a/b/c` → `a.b.c`)
pub fn translate_key(key: &str) -> String {
    key.replace(KEY_DELIMITER, &PATH_DELIMITER.to_string())
}

/// A configuration value: either a scalar or a map of child nodes
///
/// When a path is both a scalar and the parent of other paths, the map wins,
/// regardless of the order in which the paths were set. A scalar wins over an
/// empty map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigNode {
    Value(String),
    Map(BTreeMap<String, ConfigNode>),
}

impl Default for ConfigNode {
    fn default() -> Self {
        Self::map()
    }
}

impl From<&str> for ConfigNode {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<String> for ConfigNode {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl ConfigNode {
    /// Empty map
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(value) => Some(value),
            Self::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigNode>> {
        match self {
            Self::Map(map) => Some(map),
            Self::Value(_) => None,
        }
    }

    /// True for an empty map
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Map(map) if map.is_empty())
    }

    /// Set `node` at a dotted path, merging with what is already there
    ///
    /// Empty segments are ignored, so `a..b` is the same path as `a.b`.
    pub fn set(&mut self, path: &str, node: ConfigNode) {
        self.set_segments(split_path(path), node);
    }

    /// Set `node` under explicit path segments (segments may contain dots)
    pub fn set_segments<'a>(&mut self, segments: impl IntoIterator<Item = &'a str>, node: ConfigNode) {
        let mut current = self;
        for segment in segments {
            if let Self::Value(_) = current {
                *current = Self::map();
            }
            if let Self::Map(map) = current {
                current = map.entry(segment.to_string()).or_insert_with(Self::map);
            }
        }
        current.merge(node);
    }

    /// Merge `other` into this node
    pub fn merge(&mut self, other: ConfigNode) {
        match other {
            Self::Map(theirs) => {
                if let Self::Map(mine) = self {
                    for (key, node) in theirs {
                        match mine.entry(key) {
                            Entry::Occupied(mut entry) => entry.get_mut().merge(node),
                            Entry::Vacant(entry) => {
                                entry.insert(node);
                            }
                        }
                    }
                } else if !theirs.is_empty() {
                    *self = Self::Map(theirs);
                }
            }
            Self::Value(value) => {
                // A non-empty map keeps its children
                if !matches!(self, Self::Map(mine) if !mine.is_empty()) {
                    *self = Self::Value(value);
                }
            }
        }
    }

    /// Node at a dotted path
    pub fn get(&self, path: &str) -> Option<&ConfigNode> {
        split_path(path).try_fold(self, |node, segment| node.as_map()?.get(segment))
    }

    /// Scalar at a dotted path
    pub fn get_value(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_value()
    }

    /// Nest this node under a dotted root path
    pub fn rooted(self, root: &str) -> ConfigNode {
        let mut tree = Self::map();
        tree.set(root, self);
        tree
    }

    /// Flatten into `path → value` pairs
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into(&self, prefix: String, out: &mut BTreeMap<String, String>) {
        match self {
            Self::Value(value) => {
                out.insert(prefix, value.clone());
            }
            Self::Map(map) => {
                for (key, node) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}{}{}", prefix, PATH_DELIMITER, key)
                    };
                    node.flatten_into(path, out);
                }
            }
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_DELIMITER).filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translate_key() {
        assert_eq!(translate_key("a/b/c"), "a.b.c");
        assert_eq!(translate_key("plain"), "plain");
        assert_eq!(translate_key("folder/"), "folder.");
        assert_eq!(translate_key(""), "");
    }

    #[test]
    fn test_set_and_get() {
        let mut tree = ConfigNode::map();
        tree.set("app.db.host", "localhost".into());
        tree.set("app.db.port", "5432".into());

        assert_eq!(tree.get_value("app.db.host"), Some("localhost"));
        assert_eq!(tree.get_value("app.db.port"), Some("5432"));
        assert!(tree.get("app.db").unwrap().as_map().is_some());
        assert!(tree.get("app.missing").is_none());
        assert!(tree.get_value("app").is_none());
    }

    #[test]
    fn test_map_wins_over_scalar_in_any_order() {
        let mut first = ConfigNode::map();
        first.set("a", "1".into());
        first.set("a.b", "2".into());

        let mut second = ConfigNode::map();
        second.set("a.b", "2".into());
        second.set("a", "1".into());

        assert_eq!(first, second);
        assert_eq!(first.get_value("a.b"), Some("2"));
    }

    #[test]
    fn test_last_scalar_wins() {
        let mut tree = ConfigNode::map();
        tree.set("a.b", "1".into());
        tree.set("a.b", "2".into());
        assert_eq!(tree.get_value("a.b"), Some("2"));
    }

    #[test]
    fn test_folder_creates_empty_map() {
        let mut tree = ConfigNode::map();
        tree.set("app.empty.", ConfigNode::map());
        assert!(tree.get("app.empty").unwrap().is_empty());

        // An empty folder never hides a scalar
        tree.set("app.empty", "x".into());
        tree.set("app.empty.", ConfigNode::map());
        assert_eq!(tree.get_value("app.empty"), Some("x"));
    }

    #[test]
    fn test_segments_with_dots() {
        let mut tree = ConfigNode::map();
        tree.set_segments(["my.client", "store"], "v".into());
        assert_eq!(tree.as_map().unwrap()["my.client"].get_value("store"), Some("v"));
    }

    #[test]
    fn test_rooted_and_serialized() {
        let mut tree = ConfigNode::map();
        tree.set("c1.store.app.db.host", "localhost".into());

        let rooted = tree.rooted("consul.clients");
        assert_eq!(
            serde_json::to_value(&rooted).unwrap(),
            json!({"consul": {"clients": {"c1": {"store": {"app": {"db": {"host": "localhost"}}}}}}})
        );
        assert_eq!(
            rooted.flatten().get("consul.clients.c1.store.app.db.host").map(String::as_str),
            Some("localhost")
        );
    }
}
