//! Snapshot `<script>`/`<link>` tags from every frame of the page.

use super::{Collector, CollectorKind};
use crate::renderer::{ProtocolDomain, RenderContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sri_audit::{find_tag_nodes, pair_attributes, Tag};
use tracing::Span;

pub struct DomTagCollector {
    /// Document URL used when the root node does not report one.
    fallback_document: String,
    span: Span,
}

impl DomTagCollector {
    pub fn new(fallback_document: impl Into<String>, span: Span) -> Self {
        Self {
            fallback_document: fallback_document.into(),
            span,
        }
    }
}

#[async_trait]
impl Collector for DomTagCollector {
    type Output = Vec<Tag>;

    fn kind(&self) -> CollectorKind {
        CollectorKind::DomTags
    }

    async fn attach(&mut self, ctx: &dyn RenderContext) -> Result<()> {
        ctx.enable(ProtocolDomain::Page).await?;
        ctx.enable(ProtocolDomain::Dom).await?;
        Ok(())
    }

    async fn collect(self, ctx: &dyn RenderContext) -> Result<Vec<Tag>> {
        let root = ctx.document().await.context("failed to fetch document")?;
        let nodes = find_tag_nodes(&root, &self.fallback_document);

        let mut tags = Vec::with_capacity(nodes.len());
        for node in nodes {
            let flat = ctx.attributes(node.node_id).await?;
            let attributes = pair_attributes(node.node_id, &flat)?;
            tags.push(Tag {
                element: node.element,
                attributes,
                document: node.document,
                base_url: node.base_url,
            });
        }

        tracing::debug!(parent: &self.span, collector = %self.kind(), count = tags.len(), "collected tags");
        Ok(tags)
    }
}
