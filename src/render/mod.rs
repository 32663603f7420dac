//! Reply rendering pipeline.
//!
//! A reply goes through [`extractor`] (fenced `mermaid`/`chart` blocks become
//! placeholder tokens), [`formatter`] (prose markup), and [`reinserter`]
//! (tokens become containers). The result is appended to the
//! [`display::MessageBoard`], after which diagrams are laid out as one batch
//! and charts are drawn as their containers report being attached.

pub mod chart;
pub mod diagram;
pub mod display;
pub mod extractor;
pub mod formatter;
pub mod reinserter;

use serde::Serialize;
use tracing::{debug, warn};

use chart::{ChartBackend, ChartConfig, ChartRenderer};
use diagram::DiagramNode;
use display::{ContainerUpdate, MessageBoard, MessageId};
use extractor::IdAllocator;

/// Kind of a fenced block, named by the word right after the opening fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Diagram,
    Chart,
}

impl BlockKind {
    pub const ALL: [BlockKind; 2] = [BlockKind::Diagram, BlockKind::Chart];

    /// Word following the opening fence, also used as the id prefix.
    pub fn marker(self) -> &'static str {
        match self {
            BlockKind::Diagram => "mermaid",
            BlockKind::Chart => "chart",
        }
    }

    fn token_label(self) -> &'static str {
        match self {
            BlockKind::Diagram => "DIAGRAM_",
            BlockKind::Chart => "CHART_",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedBlock {
    pub kind: BlockKind,
    pub id: String,
    pub payload: String,
    #[serde(skip)]
    pub placeholder: String,
}

/// Final markup of one reply plus the blocks that still need rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub html: String,
    pub blocks: Vec<ExtractedBlock>,
}

impl RenderedMessage {
    pub fn ids_of(&self, kind: BlockKind) -> Vec<String> {
        self.blocks
            .iter()
            .filter(|b| b.kind == kind)
            .map(|b| b.id.clone())
            .collect()
    }
}

/// Run extraction, formatting and reinsertion over one reply.
pub fn render_reply(raw: &str, ids: &mut IdAllocator) -> RenderedMessage {
    let extraction = extractor::extract(raw, ids);
    let formatted = formatter::format_text(&extraction.text);
    let html = reinserter::reinsert(&formatted, &extraction.blocks);
    debug!(blocks = extraction.blocks.len(), "Rendered reply");
    RenderedMessage {
        html,
        blocks: extraction.blocks,
    }
}

/// Per-conversation rendering context: id allocation, the displayed messages
/// and the live chart instances.
pub struct RenderSession {
    ids: IdAllocator,
    board: MessageBoard,
    charts: ChartRenderer,
}

impl RenderSession {
    pub fn new(chart_backend: Box<dyn ChartBackend>) -> Self {
        Self {
            ids: IdAllocator::default(),
            board: MessageBoard::default(),
            charts: ChartRenderer::new(chart_backend),
        }
    }

    /// Render a reply and append it to the board. Returns the message id, the
    /// rendered message, and the diagram batch to submit for layout.
    pub fn present(&mut self, raw: &str) -> (MessageId, RenderedMessage, Vec<DiagramNode>) {
        let rendered = render_reply(raw, &mut self.ids);
        let message_id = self.board.append(&rendered);
        let nodes = rendered
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Diagram)
            .map(|b| DiagramNode {
                id: b.id.clone(),
                source: b.payload.clone(),
            })
            .collect();
        (message_id, rendered, nodes)
    }

    /// Apply diagram layout results. Containers removed in the meantime are
    /// skipped.
    pub fn apply_updates(&mut self, updates: &[ContainerUpdate]) -> Vec<ContainerUpdate> {
        updates
            .iter()
            .filter(|u| self.board.set_content(&u.id, u.html.clone()))
            .cloned()
            .collect()
    }

    /// Display-layer signal: the container `id` is in the page and measured.
    /// Draws the chart bound to it, if any.
    pub fn on_container_attached(&mut self, id: &str, width: u32, height: u32) -> ChartDraw {
        if self.board.attach(id, width, height).is_none() {
            debug!(%id, "Attach signal for unknown container ignored");
            return ChartDraw::Missing;
        }
        match self.charts.draw(&self.board, id) {
            Ok(Some(config)) => ChartDraw::Drawn(config),
            Ok(None) => ChartDraw::Missing,
            Err(e) => {
                warn!(%id, error = %e, "Chart rendering failed");
                let html = diagram::error_indicator(&e.to_string());
                self.board.set_content(id, html.clone());
                ChartDraw::Failed(ContainerUpdate {
                    id: id.to_string(),
                    html,
                })
            }
        }
    }

    /// Remove every message, disposing their charts.
    pub fn clear(&mut self) {
        for id in self.board.clear() {
            self.charts.dispose(&id);
        }
    }

    pub fn remove_message(&mut self, message: MessageId) {
        for id in self.board.remove(message) {
            self.charts.dispose(&id);
        }
    }

    pub fn board(&self) -> &MessageBoard {
        &self.board
    }

    pub fn live_charts(&self) -> usize {
        self.charts.live()
    }
}

/// Outcome of a chart draw triggered by an attach signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartDraw {
    Drawn(ChartConfig),
    Missing,
    Failed(ContainerUpdate),
}
