//! The arrangement tree.
//!
//! Nodes live in an arena owned by [`GroupTree`] and are addressed by
//! [`NodeId`]. A node's identity is its [`GroupKey`]; everything else about it
//! is a display or sorting hint in its [`NodeProps`].

use std::collections::BTreeMap;

use serde_json::Value;

use tabdrome_shared::{NormalizedTab, Serial, Suid};

/// Node property naming how children are ordered.
pub const SORT_CHILDREN_BY: &str = "sort_children_by";
/// `sort_children_by` value selecting the clustered root ordering.
pub const SORT_ROOT: &str = "root";
/// Root-level cluster of a node.
pub const ROOT_SORT_GROUP: &str = "root_sort_group";
/// Ordering key within a root-level cluster.
pub const ROOT_SORT_KEY: &str = "root_sort_key";

// ---------------------------------------------------------------------------
// GroupKey
// ---------------------------------------------------------------------------

/// The defining properties of a node. Two nodes under the same parent are the
/// same node iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Root,
    Tab {
        suid: Suid,
    },
    Domain {
        domain: String,
    },
    /// Keyed by URL, or by label for crumbs that have no URL.
    Breadcrumb {
        url: Option<String>,
        label: Option<String>,
    },
}

impl GroupKey {
    pub fn breadcrumb(url: Option<String>, label: Option<String>) -> Self {
        match url {
            Some(url) => GroupKey::Breadcrumb {
                url: Some(url),
                label: None,
            },
            None => GroupKey::Breadcrumb { url: None, label },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GroupKey::Root => "root",
            GroupKey::Tab { .. } => "tab",
            GroupKey::Domain { .. } => "domain",
            GroupKey::Breadcrumb { .. } => "breadcrumb",
        }
    }

    /// Defining fields in fixed order, `type` first.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("type", self.kind().to_string())];
        match self {
            GroupKey::Root => {}
            GroupKey::Tab { suid } => fields.push(("tab_suid", suid.to_string())),
            GroupKey::Domain { domain } => fields.push(("domain", domain.clone())),
            GroupKey::Breadcrumb { url, label } => {
                if let Some(url) = url {
                    fields.push(("url", url.clone()));
                }
                if let Some(label) = label {
                    fields.push(("label", label.clone()));
                }
            }
        }
        fields
    }

    /// Deterministic id relative to the parent: `key=value` pairs joined
    /// with `;`. `%`, `;` and `=` inside values are percent-encoded.
    pub fn rel_id(&self) -> String {
        self.fields()
            .into_iter()
            .map(|(k, v)| format!("{k}={}", escape_rel_value(&v)))
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn escape_rel_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// NodeProps
// ---------------------------------------------------------------------------

/// Non-defining node properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeProps(BTreeMap<String, Value>);

impl NodeProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Overwrite with every entry of `other`.
    pub fn merge(&mut self, other: NodeProps) {
        self.0.extend(other.0);
    }

    /// Take entries of `weak` only for keys not already set.
    pub fn fill_missing(&mut self, weak: NodeProps) {
        for (k, v) in weak.0 {
            self.0.entry(k).or_insert(v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// GroupTree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub key: GroupKey,
    pub props: NodeProps,
    /// Explicit serial. Nodes without one report the max of their subtree.
    pub serial: Option<Serial>,
    pub tab: Option<NormalizedTab>,
    pub children: Vec<NodeId>,
}

impl GroupNode {
    fn new(key: GroupKey, props: NodeProps) -> Self {
        Self {
            key,
            props,
            serial: None,
            tab: None,
            children: Vec::new(),
        }
    }
}

/// One arrangement pass's tree. Rebuilt from scratch on every pass.
#[derive(Debug, Clone)]
pub struct GroupTree {
    nodes: Vec<GroupNode>,
}

impl Default for GroupTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTree {
    /// A tree holding only a root that orders its children by root cluster.
    pub fn new() -> Self {
        let root = GroupNode::new(
            GroupKey::Root,
            NodeProps::new().with(SORT_CHILDREN_BY, SORT_ROOT),
        );
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &GroupNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut GroupNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Find the child of `parent` with `key`, or create it.
    ///
    /// A new node takes `extra`, then `weak` for keys `extra` left unset. An
    /// existing node only takes `weak` entries for keys it does not have, so a
    /// strong value set earlier is never replaced by a weaker one.
    pub fn get_or_create_group(
        &mut self,
        parent: NodeId,
        key: GroupKey,
        extra: NodeProps,
        weak: NodeProps,
    ) -> NodeId {
        let existing = self
            .node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).key == key);

        if let Some(id) = existing {
            self.node_mut(id).props.fill_missing(weak);
            return id;
        }

        let mut props = extra;
        props.fill_missing(weak);
        let id = NodeId(self.nodes.len());
        self.nodes.push(GroupNode::new(key, props));
        self.node_mut(parent).children.push(id);
        id
    }

    /// Unconditionally set a property, for fixups after lookup.
    pub fn set_prop(&mut self, id: NodeId, key: &str, value: impl Into<Value>) {
        self.node_mut(id).props.set(key, value);
    }

    pub fn set_serial(&mut self, id: NodeId, serial: Serial) {
        self.node_mut(id).serial = Some(serial);
    }

    /// Attach a tab to a node. The node's serial becomes the tab's.
    pub fn set_tab(&mut self, id: NodeId, tab: &NormalizedTab) {
        let node = self.node_mut(id);
        node.serial = Some(tab.serial);
        node.tab = Some(tab.clone());
    }
}
