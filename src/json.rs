//! Rendering structures as JSON.
//!
//! Each node becomes an object of the form
//!
//! ```json
//! {
//!   "name": "Makefile",
//!   "path": ["jq-1.6", "Makefile"],
//!   "path_key": "jq-1.6/Makefile",
//!   "metadata": [{"key": "size", "value": 12345}],
//!   "children": [...]
//! }
//! ```
//!
//! where `children` is omitted for flattened nodes.

use std::io;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::result::*;
use crate::tree::TreeNode;

/// What we render in place of a value that has no faithful JSON form.
pub const INVALID_PLACEHOLDER: &str = "<#Invalid#>";

/// The value half of a [`Metadata`](crate::tree::Metadata) pair
///
/// Built structures only carry integer sizes. The other variants are for callers
/// who attach their own metadata with [`TreeNode::add_metadata()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Integer(u64),
    Text(String),
    /// Something we couldn't represent, like text that isn't UTF-8.
    /// Rendered as [`INVALID_PLACEHOLDER`] instead of failing the whole document.
    Invalid,
}

impl MetadataValue {
    /// Text from raw bytes, or `Invalid` if they aren't UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => MetadataValue::Text(s.to_owned()),
            Err(_) => MetadataValue::Invalid,
        }
    }
}

impl From<u64> for MetadataValue {
    fn from(i: u64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_owned())
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetadataValue::Integer(i) => serializer.serialize_u64(*i),
            MetadataValue::Text(s) => serializer.serialize_str(s),
            MetadataValue::Invalid => serializer.serialize_str(INVALID_PLACEHOLDER),
        }
    }
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_count = if self.is_flattened() { 4 } else { 5 };
        let mut node = serializer.serialize_struct("TreeNode", field_count)?;
        node.serialize_field("name", self.name())?;
        node.serialize_field("path", self.path())?;
        node.serialize_field("path_key", &self.path_key())?;
        node.serialize_field("metadata", self.metadata())?;
        if self.is_flattened() {
            node.skip_field("children")?;
        } else {
            node.serialize_field("children", self.children())?;
        }
        node.end()
    }
}

/// Renders the nodes as a compact JSON array.
pub fn to_json(nodes: &[TreeNode]) -> ArchiveResult<String> {
    Ok(serde_json::to_string(nodes)?)
}

/// Renders the nodes as an indented JSON array.
pub fn to_json_pretty(nodes: &[TreeNode]) -> ArchiveResult<String> {
    Ok(serde_json::to_string_pretty(nodes)?)
}

/// Renders the nodes as a JSON value, for callers that want to
/// inspect or embed the structure rather than write it out.
pub fn to_value(nodes: &[TreeNode]) -> ArchiveResult<serde_json::Value> {
    Ok(serde_json::to_value(nodes)?)
}

/// Writes the nodes as a JSON array to `writer`.
pub fn to_writer<W>(writer: W, nodes: &[TreeNode], pretty: bool) -> ArchiveResult<()>
where
    W: io::Write,
{
    if pretty {
        serde_json::to_writer_pretty(writer, nodes)?;
    } else {
        serde_json::to_writer(writer, nodes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use serde_json::{json, Value};

    use crate::read::{ArchiveEntry, ZipEntry};
    use crate::tree::{build, Metadata};

    fn entries() -> Vec<ArchiveEntry> {
        [("dir/a.txt", 10), ("dir/b.txt", 20), ("other.txt", 5)]
            .into_iter()
            .map(|(name, size)| ZipEntry::new(name, size).into())
            .collect()
    }

    #[test]
    fn flattened_shape() {
        let flat = build(&entries(), true);
        let value = to_value(&flat).unwrap();
        assert_eq!(
            value[0],
            json!({
                "name": "a.txt",
                "path": ["dir", "a.txt"],
                "path_key": "dir/a.txt",
                "metadata": [{"key": "size", "value": 10}],
            })
        );
        let objects = value.as_array().unwrap();
        assert_eq!(objects.len(), 3);
        assert!(objects.iter().all(|o| o.get("children").is_none()));
    }

    #[test]
    fn nested_shape() {
        let tree = build(&entries(), false);
        let value = to_value(&tree).unwrap();
        let top = value.as_array().unwrap();
        assert_eq!(top.len(), 2);

        let dir_children = top[0]["children"].as_array().unwrap();
        assert_eq!(dir_children.len(), 2);
        assert_eq!(dir_children[0]["name"], "a.txt");
        assert_eq!(dir_children[0]["metadata"], json!([{"key": "size", "value": 10}]));
        assert_eq!(dir_children[1]["name"], "b.txt");
        assert_eq!(dir_children[1]["metadata"], json!([{"key": "size", "value": 20}]));
        assert_eq!(dir_children[1]["children"], json!([]));

        assert_eq!(top[1]["name"], "other.txt");
        assert_eq!(top[1]["children"], json!([]));
    }

    #[test]
    fn field_order() {
        let flat = build(&entries(), true);
        let rendered = to_json(&flat[2..]).unwrap();
        assert_eq!(
            rendered,
            r#"[{"name":"other.txt","path":["other.txt"],"path_key":"other.txt","metadata":[{"key":"size","value":5}]}]"#
        );
    }

    type Edges = Vec<(Option<String>, String)>;

    /// Collects (parent path_key, path_key) for every node in rendered JSON, depth first
    fn rendered_edges(nodes: &Value, parent: Option<&str>, out: &mut Edges) {
        for node in nodes.as_array().unwrap() {
            let key = node["path_key"].as_str().unwrap();
            out.push((parent.map(str::to_owned), key.to_owned()));
            rendered_edges(&node["children"], Some(key), out);
        }
    }

    fn tree_edges(nodes: &[TreeNode], parent: Option<&str>, out: &mut Edges) {
        for node in nodes {
            let key = node.path_key();
            out.push((parent.map(str::to_owned), key.clone()));
            tree_edges(node.children(), Some(&key), out);
        }
    }

    #[test]
    fn json_round_trip_keeps_relationships() {
        let entries: Vec<ArchiveEntry> = [("a/x", 1), ("b/y/z", 2), ("b/w", 4), ("c", 3)]
            .into_iter()
            .map(|(name, size)| ZipEntry::new(name, size).into())
            .collect();
        let tree = build(&entries, false);

        let mut expected = Edges::new();
        tree_edges(&tree, None, &mut expected);

        let reparsed: Value = serde_json::from_str(&to_json_pretty(&tree).unwrap()).unwrap();
        let mut actual = Edges::new();
        rendered_edges(&reparsed, None, &mut actual);

        assert_eq!(actual, expected);
        // a, a/x, b, b/y, b/y/z, b/w, c
        assert_eq!(actual.len(), 7);
        let keys: HashSet<&str> = actual.iter().map(|(_, key)| key.as_str()).collect();
        let expected_keys: HashSet<String> = tree
            .iter()
            .flat_map(|top| top.traverse())
            .map(|node| node.path_key())
            .collect();
        assert_eq!(keys.len(), expected_keys.len());
        assert!(expected_keys.iter().all(|k| keys.contains(k.as_str())));
    }

    #[test]
    fn invalid_values_get_a_placeholder() {
        let value = MetadataValue::from_bytes(b"\xff\xfe");
        assert_eq!(value, MetadataValue::Invalid);
        let rendered = serde_json::to_string(&Metadata::new("comment", value)).unwrap();
        assert_eq!(rendered, r#"{"key":"comment","value":"<#Invalid#>"}"#);

        let text = MetadataValue::from_bytes(b"fine");
        assert_eq!(text, MetadataValue::Text(String::from("fine")));
    }

    #[test]
    fn attached_metadata_is_rendered() {
        let mut flat = build(&entries(), true);
        flat[2]
            .add_metadata(Metadata::new("owner", "root"))
            .add_metadata(Metadata::new("comment", MetadataValue::from_bytes(b"\xff")));
        let value = to_value(&flat[2..]).unwrap();
        assert_eq!(
            value[0]["metadata"],
            json!([
                {"key": "size", "value": 5},
                {"key": "owner", "value": "root"},
                {"key": "comment", "value": "<#Invalid#>"},
            ])
        );
    }

    #[test]
    fn writer_output_matches_string() {
        let flat = build(&entries(), true);
        let mut written = Vec::new();
        to_writer(&mut written, &flat, false).unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), to_json(&flat).unwrap());
    }

    #[test]
    fn empty_structure() {
        assert_eq!(to_json(&[]).unwrap(), "[]");
    }
}
