//! Turning a [`GroupTree`] into the ordered, inert form handed to the UI.
//!
//! Every node carries:
//!
//! - `group_rel_id`: its key's deterministic id, stable across passes
//! - `serial`: its explicit serial, else the max over its children
//! - `hash`: SHA-256 over the rel ids of all descendants in output order
//!
//! `serial` alone cannot reveal that a child disappeared, since removing a
//! leaf never raises a max. The hash changes whenever the set of descendants
//! does.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use tabdrome_shared::Serial;

use crate::node::{
    GroupNode, GroupTree, NodeId, ROOT_SORT_GROUP, ROOT_SORT_KEY, SORT_CHILDREN_BY, SORT_ROOT,
};

/// Root clusters in display order. Unknown clusters sort after these.
pub const ROOT_SORT_GROUP_ORDER: [&str; 3] = ["pinned", "domain-clustered", "normal"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub group_rel_id: String,
    pub serial: Serial,
    pub hash: String,
    pub node_props: Map<String, Value>,
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    /// Depth-first search for a node by rel id.
    pub fn find(&self, group_rel_id: &str) -> Option<&SerializedNode> {
        if self.group_rel_id == group_rel_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(group_rel_id))
    }

    /// Rel ids of the direct children, in order.
    pub fn child_ids(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.group_rel_id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Numbers before strings, absent first. Mixed or structured values tie.
fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(_)), Some(Value::String(_))) => Ordering::Less,
        (Some(Value::String(_)), Some(Value::Number(_))) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn root_group_rank(node: &GroupNode) -> usize {
    node.props
        .get_str(ROOT_SORT_GROUP)
        .and_then(|g| ROOT_SORT_GROUP_ORDER.iter().position(|o| *o == g))
        .unwrap_or(ROOT_SORT_GROUP_ORDER.len())
}

/// Children of `id` in output order. Sorting is stable, so nodes without a
/// distinguishing key keep insertion order.
fn sorted_children(tree: &GroupTree, id: NodeId) -> Vec<NodeId> {
    let node = tree.node(id);
    let mut children = node.children.clone();
    match node.props.get_str(SORT_CHILDREN_BY) {
        Some(SORT_ROOT) => children.sort_by(|&a, &b| {
            let (a, b) = (tree.node(a), tree.node(b));
            root_group_rank(a).cmp(&root_group_rank(b)).then_with(|| {
                cmp_values(a.props.get(ROOT_SORT_KEY), b.props.get(ROOT_SORT_KEY))
            })
        }),
        Some(field) => children.sort_by(|&a, &b| {
            cmp_values(tree.node(a).props.get(field), tree.node(b).props.get(field))
        }),
        None => {}
    }
    children
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl GroupTree {
    /// Serialize the whole tree. `serial` is the root's explicit serial.
    pub fn serialize(&self, serial: Serial) -> SerializedNode {
        let mut root = self.serialize_node(self.root());
        root.serial = serial;
        root
    }

    fn serialize_node(&self, id: NodeId) -> SerializedNode {
        let node = self.node(id);
        let children: Vec<SerializedNode> = sorted_children(self, id)
            .into_iter()
            .map(|child| self.serialize_node(child))
            .collect();

        let serial = node
            .serial
            .unwrap_or_else(|| children.iter().map(|c| c.serial).max().unwrap_or(0));

        let mut hasher = Sha256::new();
        for child in &children {
            feed_rel_ids(&mut hasher, child);
        }

        let mut node_props = Map::new();
        for (k, v) in node.key.fields() {
            node_props.insert(k.to_string(), Value::String(v));
        }
        for (k, v) in node.props.iter() {
            node_props.insert(k.clone(), v.clone());
        }
        if let Some(tab) = &node.tab {
            node_props.insert(
                "tab".into(),
                serde_json::to_value(tab).unwrap_or(Value::Null),
            );
        }

        SerializedNode {
            group_rel_id: node.key.rel_id(),
            serial,
            hash: format!("{:x}", hasher.finalize()),
            node_props,
            children,
        }
    }
}

fn feed_rel_ids(hasher: &mut Sha256, node: &SerializedNode) {
    hasher.update(node.group_rel_id.as_bytes());
    hasher.update(b"\n");
    for child in &node.children {
        feed_rel_ids(hasher, child);
    }
}

#[cfg(test)]
mod tests {
    use tabdrome_shared::Suid;

    use super::*;
    use crate::node::{GroupKey, NodeProps};

    fn tab_key(n: u32) -> GroupKey {
        GroupKey::Tab {
            suid: Suid(format!("!{n}")),
        }
    }

    fn leaf(tree: &mut GroupTree, parent: NodeId, n: u32, group: &str, key: i64, serial: Serial) {
        let id = tree.get_or_create_group(
            parent,
            tab_key(n),
            NodeProps::new()
                .with(ROOT_SORT_GROUP, group)
                .with(ROOT_SORT_KEY, key),
            NodeProps::new(),
        );
        tree.set_serial(id, serial);
    }

    #[test]
    fn root_children_cluster_by_group_then_key() {
        let mut tree = GroupTree::new();
        let root = tree.root();
        leaf(&mut tree, root, 1, "normal", 2, 1);
        leaf(&mut tree, root, 2, "pinned", 0, 1);
        leaf(&mut tree, root, 3, "normal", 1, 1);
        leaf(&mut tree, root, 4, "mystery", 0, 1);
        tree.get_or_create_group(
            root,
            GroupKey::Domain {
                domain: "a.example".into(),
            },
            NodeProps::new()
                .with(ROOT_SORT_GROUP, "domain-clustered")
                .with(ROOT_SORT_KEY, "example.a"),
            NodeProps::new(),
        );

        let out = tree.serialize(9);
        assert_eq!(
            out.child_ids(),
            vec![
                "type=tab;tab_suid=!2",
                "type=domain;domain=a.example",
                "type=tab;tab_suid=!3",
                "type=tab;tab_suid=!1",
                "type=tab;tab_suid=!4",
            ]
        );
        assert_eq!(out.serial, 9);
    }

    #[test]
    fn field_sort_and_declaration_order() {
        let mut tree = GroupTree::new();
        let root = tree.root();
        let by_text = tree.get_or_create_group(
            root,
            GroupKey::Domain { domain: "x".into() },
            NodeProps::new().with(SORT_CHILDREN_BY, "text"),
            NodeProps::new(),
        );
        let unsorted = tree.get_or_create_group(
            root,
            GroupKey::Domain { domain: "y".into() },
            NodeProps::new(),
            NodeProps::new(),
        );
        for (parent, labels) in [(by_text, ["b", "c", "a"]), (unsorted, ["b", "c", "a"])] {
            for label in labels {
                tree.get_or_create_group(
                    parent,
                    GroupKey::breadcrumb(None, Some(label.into())),
                    NodeProps::new().with("text", label),
                    NodeProps::new(),
                );
            }
        }

        let out = tree.serialize(1);
        let sorted = out.find("type=domain;domain=x").unwrap();
        assert_eq!(
            sorted.child_ids(),
            vec!["type=breadcrumb;label=a", "type=breadcrumb;label=b", "type=breadcrumb;label=c"]
        );
        let kept = out.find("type=domain;domain=y").unwrap();
        assert_eq!(
            kept.child_ids(),
            vec!["type=breadcrumb;label=b", "type=breadcrumb;label=c", "type=breadcrumb;label=a"]
        );
    }

    #[test]
    fn serial_is_explicit_or_max_of_children() {
        let mut tree = GroupTree::new();
        let root = tree.root();
        let domain = tree.get_or_create_group(
            root,
            GroupKey::Domain { domain: "a".into() },
            NodeProps::new(),
            NodeProps::new(),
        );
        leaf(&mut tree, domain, 1, "normal", 0, 4);
        leaf(&mut tree, domain, 2, "normal", 1, 7);

        let out = tree.serialize(20);
        assert_eq!(out.serial, 20);
        assert_eq!(out.children[0].serial, 7);
        assert_eq!(out.children[0].children[0].serial, 4);
    }

    #[test]
    fn removing_a_leaf_changes_hash_not_serial() {
        let build = |with_old_leaf: bool| {
            let mut tree = GroupTree::new();
            let root = tree.root();
            let domain = tree.get_or_create_group(
                root,
                GroupKey::Domain { domain: "a".into() },
                NodeProps::new(),
                NodeProps::new(),
            );
            if with_old_leaf {
                leaf(&mut tree, domain, 1, "normal", 0, 3);
            }
            leaf(&mut tree, domain, 2, "normal", 1, 8);
            tree.serialize(10)
        };

        let before = build(true);
        let after = build(false);
        let (b, a) = (&before.children[0], &after.children[0]);
        assert_eq!(b.serial, a.serial);
        assert_ne!(b.hash, a.hash);
        assert_ne!(before.hash, after.hash);
        // Unchanged subtrees hash identically.
        assert_eq!(b.children.last().unwrap().hash, a.children[0].hash);
    }

    #[test]
    fn node_props_include_defining_fields() {
        let mut tree = GroupTree::new();
        let root = tree.root();
        tree.get_or_create_group(
            root,
            GroupKey::Domain {
                domain: "a.example".into(),
            },
            NodeProps::new().with("text", "a.example"),
            NodeProps::new(),
        );
        let out = tree.serialize(1);
        let props = &out.children[0].node_props;
        assert_eq!(props["type"], "domain");
        assert_eq!(props["domain"], "a.example");
        assert_eq!(props["text"], "a.example");

        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("groupRelId").is_some());
        assert!(json.get("nodeProps").is_some());
    }
}
