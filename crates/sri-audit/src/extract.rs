//! DOM walk for the tag extractor.
//!
//! The browser hands back one node tree covering the top document and every
//! frame document beneath it. [`find_tag_nodes`] flattens that tree into the
//! `<script>`/`<link>` nodes it contains, each paired with the URL of the
//! document that directly holds it. Attribute values are fetched separately
//! per node and folded with [`pair_attributes`].

use crate::types::{Attributes, AuditError, AuditResult, ElementKind};
use serde::{Deserialize, Serialize};

/// A DOM node as reported by `DOM.getDocument`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    pub node_id: i64,
    #[serde(default)]
    pub node_name: String,
    /// Set on document nodes only.
    #[serde(default, rename = "documentURL")]
    pub document_url: Option<String>,
    /// Base URL for completing relative URLs; set on document nodes.
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub children: Vec<DomNode>,
    /// Set on frame owner elements whose document is attached.
    #[serde(default)]
    pub content_document: Option<Box<DomNode>>,
    #[serde(default)]
    pub shadow_roots: Vec<DomNode>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// A matched element awaiting attribute retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagNode {
    pub element: ElementKind,
    pub node_id: i64,
    pub document: String,
    /// Base URL of the owning document, when it differs from `document`.
    pub base_url: Option<String>,
}

/// Document identity in effect while walking a subtree.
#[derive(Debug, Clone)]
struct Scope {
    document: String,
    base_url: Option<String>,
}

impl Scope {
    /// Scope for `node`: its own if it is a document, else `inherited`.
    fn enter(node: &DomNode, inherited: &Scope) -> Scope {
        match &node.document_url {
            Some(document) => Scope {
                document: document.clone(),
                base_url: node.base_url.clone().filter(|b| b != document),
            },
            None => inherited.clone(),
        }
    }
}

/// Collect every script/link node under `root`, across nested frames.
///
/// `fallback_document` is used when the root carries no document URL.
/// Nodes come out in document order, each frame's tags where the frame sits.
pub fn find_tag_nodes(root: &DomNode, fallback_document: &str) -> Vec<TagNode> {
    let mut found = Vec::new();
    let fallback = Scope {
        document: fallback_document.to_string(),
        base_url: None,
    };
    let mut stack: Vec<(&DomNode, Scope)> = vec![(root, Scope::enter(root, &fallback))];

    while let Some((node, scope)) = stack.pop() {
        if let Some(element) = ElementKind::from_node_name(&node.node_name) {
            found.push(TagNode {
                element,
                node_id: node.node_id,
                document: scope.document.clone(),
                base_url: scope.base_url.clone(),
            });
        }

        // Pushed in reverse so nodes pop in document order.
        for child in node.children.iter().rev() {
            stack.push((child, Scope::enter(child, &scope)));
        }
        for shadow in node.shadow_roots.iter().rev() {
            stack.push((shadow, scope.clone()));
        }
        if let Some(content) = node.content_document.as_deref() {
            // Tags under a frame belong to the frame's own document.
            stack.push((content, Scope::enter(content, &scope)));
        }
    }

    found
}

/// Fold a flat `[name, value, name, value, ...]` list into a mapping.
///
/// Odd-length lists are rejected rather than mis-paired. When a name repeats,
/// the first value wins, as in HTML parsing.
pub fn pair_attributes(node_id: i64, flat: &[String]) -> AuditResult<Attributes> {
    if flat.len() % 2 != 0 {
        return Err(AuditError::OddAttributeList {
            node_id,
            len: flat.len(),
        });
    }
    let mut attrs = Attributes::new();
    for pair in flat.chunks_exact(2) {
        attrs
            .entry(pair[0].clone())
            .or_insert_with(|| pair[1].clone());
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_finds_tags_across_nested_frames() {
        let tree: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "nodeName": "#document",
            "documentURL": "https://top.example/",
            "children": [{
                "nodeId": 2,
                "nodeName": "HTML",
                "children": [
                    { "nodeId": 3, "nodeName": "HEAD", "children": [
                        { "nodeId": 4, "nodeName": "LINK", "attributes": ["rel", "stylesheet"] },
                        { "nodeId": 5, "nodeName": "SCRIPT" }
                    ]},
                    { "nodeId": 6, "nodeName": "BODY", "children": [{
                        "nodeId": 7,
                        "nodeName": "IFRAME",
                        "contentDocument": {
                            "nodeId": 8,
                            "nodeName": "#document",
                            "documentURL": "https://frame.example/inner.html",
                            "children": [{ "nodeId": 9, "nodeName": "HTML", "children": [
                                { "nodeId": 10, "nodeName": "SCRIPT" },
                                { "nodeId": 11, "nodeName": "IFRAME", "contentDocument": {
                                    "nodeId": 12,
                                    "nodeName": "#document",
                                    "documentURL": "https://deep.example/",
                                    "children": [{ "nodeId": 13, "nodeName": "LINK" }]
                                }}
                            ]}]
                        }
                    }]}
                ]
            }]
        }))
        .unwrap();

        let mut nodes = find_tag_nodes(&tree, "https://fallback.example/");
        nodes.sort_by_key(|n| n.node_id);

        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0].node_id, 4);
        assert_eq!(nodes[0].element, ElementKind::Link);
        assert_eq!(nodes[0].document, "https://top.example/");
        assert_eq!(nodes[1].document, "https://top.example/");
        assert_eq!(nodes[2].node_id, 10);
        assert_eq!(nodes[2].document, "https://frame.example/inner.html");
        assert_eq!(nodes[3].node_id, 13);
        assert_eq!(nodes[3].document, "https://deep.example/");
    }

    #[test]
    fn test_tags_come_out_in_document_order() {
        let tree: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "nodeName": "#document",
            "documentURL": "https://top.example/",
            "children": [
                { "nodeId": 2, "nodeName": "SCRIPT" },
                { "nodeId": 3, "nodeName": "IFRAME", "contentDocument": {
                    "nodeId": 4,
                    "nodeName": "#document",
                    "documentURL": "https://frame.example/",
                    "children": [{ "nodeId": 5, "nodeName": "LINK" }]
                }},
                { "nodeId": 6, "nodeName": "LINK" }
            ]
        }))
        .unwrap();
        let ids: Vec<i64> = find_tag_nodes(&tree, "unused")
            .iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec![2, 5, 6]);
    }

    #[test]
    fn test_srcdoc_frame_and_base_href_carry_base_url() {
        let tree: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "nodeName": "#document",
            "documentURL": "https://top.example/page.html",
            "baseURL": "https://cdn.top.example/assets/",
            "children": [
                { "nodeId": 2, "nodeName": "SCRIPT" },
                { "nodeId": 3, "nodeName": "IFRAME", "contentDocument": {
                    "nodeId": 4,
                    "nodeName": "#document",
                    "documentURL": "about:srcdoc",
                    "baseURL": "https://top.example/page.html",
                    "children": [{ "nodeId": 5, "nodeName": "SCRIPT" }]
                }},
                { "nodeId": 6, "nodeName": "IFRAME", "contentDocument": {
                    "nodeId": 7,
                    "nodeName": "#document",
                    "documentURL": "https://frame.example/",
                    "baseURL": "https://frame.example/",
                    "children": [{ "nodeId": 8, "nodeName": "LINK" }]
                }}
            ]
        }))
        .unwrap();

        let nodes = find_tag_nodes(&tree, "unused");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].document, "https://top.example/page.html");
        assert_eq!(nodes[0].base_url.as_deref(), Some("https://cdn.top.example/assets/"));
        assert_eq!(nodes[1].document, "about:srcdoc");
        assert_eq!(nodes[1].base_url.as_deref(), Some("https://top.example/page.html"));
        // Same as the document URL: nothing extra to carry.
        assert_eq!(nodes[2].base_url, None);
    }

    #[test]
    fn test_root_without_document_url_uses_fallback() {
        let tree: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "nodeName": "#document",
            "children": [{ "nodeId": 2, "nodeName": "SCRIPT" }]
        }))
        .unwrap();
        let nodes = find_tag_nodes(&tree, "https://fallback.example/");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].document, "https://fallback.example/");
    }

    #[test]
    fn test_shadow_root_tags_keep_host_document() {
        let tree: DomNode = serde_json::from_value(json!({
            "nodeId": 1,
            "nodeName": "#document",
            "documentURL": "https://top.example/",
            "children": [{
                "nodeId": 2,
                "nodeName": "MY-WIDGET",
                "shadowRoots": [{ "nodeId": 3, "nodeName": "#document-fragment", "children": [
                    { "nodeId": 4, "nodeName": "LINK" }
                ]}]
            }]
        }))
        .unwrap();
        let nodes = find_tag_nodes(&tree, "unused");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].document, "https://top.example/");
    }

    #[test]
    fn test_pair_attributes() {
        let attrs = pair_attributes(
            1,
            &strings(&["src", "/a.js", "integrity", "sha384-abc", "crossorigin", "anonymous"]),
        )
        .unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs["src"], "/a.js");
        assert_eq!(attrs["integrity"], "sha384-abc");
        assert_eq!(attrs["crossorigin"], "anonymous");
    }

    #[test]
    fn test_pair_attributes_rejects_odd_length() {
        let err = pair_attributes(7, &strings(&["src", "/a.js", "async"])).unwrap_err();
        assert!(matches!(err, AuditError::OddAttributeList { node_id: 7, len: 3 }));
    }

    #[test]
    fn test_pair_attributes_empty_and_duplicates() {
        assert!(pair_attributes(1, &[]).unwrap().is_empty());
        let attrs = pair_attributes(1, &strings(&["src", "/first.js", "src", "/second.js"])).unwrap();
        assert_eq!(attrs["src"], "/first.js");
    }
}
