//! sri-audit: core library for auditing Subresource Integrity and CORS
//! attributes on `<script>` and `<link>` tags.
//!
//! A crawl yields tags, network requests and browser diagnostics; this crate
//! correlates them per resource and classifies each resource's SRI posture.

pub mod correlate;
pub mod extract;
pub mod label;
pub mod origin;
pub mod types;

pub use correlate::correlate;
pub use extract::{find_tag_nodes, pair_attributes, DomNode, TagNode};
pub use label::{label, LabelBase, Labeler};
pub use origin::parse_target;
pub use types::*;
