//! Diagram layout. All diagram containers of one message go to the layout
//! collaborator as a single batch; a rejected batch turns every container of
//! that message into an inline error indicator.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use futures::future::try_join_all;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::display::ContainerUpdate;
use super::formatter::escape_html;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramNode {
    pub id: String,
    pub source: String,
}

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("diagram {id}: {message}")]
    Layout { id: String, message: String },
    #[error("diagram service unreachable: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait DiagramLayout: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lay out every node. Returns the replacement markup per container; nodes
    /// that keep their current content are simply omitted.
    async fn run(&self, nodes: &[DiagramNode]) -> Result<Vec<ContainerUpdate>, DiagramError>;
}

/// Leaves diagram sources in place for the page's mermaid library.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientSideLayout;

#[async_trait]
impl DiagramLayout for ClientSideLayout {
    fn name(&self) -> &'static str {
        "client"
    }

    async fn run(&self, _nodes: &[DiagramNode]) -> Result<Vec<ContainerUpdate>, DiagramError> {
        Ok(Vec::new())
    }
}

/// Server-side SVG rendering through a mermaid.ink compatible service.
#[derive(Debug, Clone)]
pub struct MermaidInkLayout {
    client: Client,
    base_url: String,
}

impl MermaidInkLayout {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn render_one(&self, node: &DiagramNode) -> Result<ContainerUpdate, DiagramError> {
        let url = format!("{}/svg/{}", self.base_url, URL_SAFE.encode(&node.source));
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!("layout service returned {}", status)
            } else {
                body.trim().to_string()
            };
            return Err(DiagramError::Layout {
                id: node.id.clone(),
                message,
            });
        }
        Ok(ContainerUpdate {
            id: node.id.clone(),
            html: response.text().await?,
        })
    }
}

#[async_trait]
impl DiagramLayout for MermaidInkLayout {
    fn name(&self) -> &'static str {
        "mermaid-ink"
    }

    async fn run(&self, nodes: &[DiagramNode]) -> Result<Vec<ContainerUpdate>, DiagramError> {
        try_join_all(nodes.iter().map(|node| self.render_one(node))).await
    }
}

pub struct DiagramRenderer;

impl DiagramRenderer {
    /// Submit one message's diagrams. Never fails: a rejected batch becomes an
    /// error indicator in each container.
    #[instrument(skip_all, fields(layout = layout.name(), count = nodes.len()))]
    pub async fn render(layout: &dyn DiagramLayout, nodes: &[DiagramNode]) -> Vec<ContainerUpdate> {
        if nodes.is_empty() {
            return Vec::new();
        }
        match layout.run(nodes).await {
            Ok(updates) => {
                debug!(updated = updates.len(), "Diagram batch laid out");
                updates
            }
            Err(e) => {
                warn!(error = %e, "Diagram batch failed");
                let html = error_indicator(&e.to_string());
                nodes
                    .iter()
                    .map(|node| ContainerUpdate {
                        id: node.id.clone(),
                        html: html.clone(),
                    })
                    .collect()
            }
        }
    }
}

/// Inline markup shown in place of a diagram or chart that failed to render.
pub fn error_indicator(message: &str) -> String {
    format!(
        "<div class=\"diagram-error\">⚠️ 図解エラー: {}</div>",
        escape_html(message)
    )
}
