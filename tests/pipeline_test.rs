use std::sync::{Arc, Mutex};

use chatvrm::render::chart::{
    ChartBackend, ChartConfig, ChartError, ChartInstance, ChartJsBackend, ChartSpec, ChartSpecError,
    DEFAULT_CHART_TITLE,
};
use chatvrm::render::display::Surface;
use chatvrm::render::extractor::{extract, IdAllocator};
use chatvrm::render::{formatter, reinserter, render_reply, BlockKind, ChartDraw, RenderSession};

const CHART: &str = "type: line\nlabels: [\"Jan\",\"Feb\"]\ndata: [10,20]\ntitle: Growth";

fn reply_with_blocks() -> String {
    format!(
        "最初に流れ図です\n```mermaid\ngraph LR\nA-->B\n```\n次にグラフ\n```chart\n{}\n```\n最後にもう一つ\n```mermaid\nsequenceDiagram\nA->>B: hi\n```\n以上",
        CHART
    )
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct RecordingBackend {
    log: EventLog,
    created: Mutex<usize>,
}

struct RecordedInstance {
    n: usize,
    config: ChartConfig,
    log: EventLog,
}

impl ChartBackend for RecordingBackend {
    fn create(&self, _surface: Surface, config: ChartConfig) -> Result<Box<dyn ChartInstance>, ChartError> {
        let mut created = self.created.lock().unwrap();
        let n = *created;
        *created += 1;
        self.log.push(format!("create {}", n));
        Ok(Box::new(RecordedInstance {
            n,
            config,
            log: self.log.clone(),
        }))
    }
}

impl ChartInstance for RecordedInstance {
    fn config(&self) -> &ChartConfig {
        &self.config
    }

    fn dispose(&mut self) {
        self.log.push(format!("dispose {}", self.n));
    }
}

#[test]
fn test_plain_text_passes_through_extraction() {
    let mut ids = IdAllocator::default();
    for text in ["", "just prose", "inline `code` and **bold**", "```rust\nfn main() {}\n```"] {
        let extraction = extract(text, &mut ids);
        assert_eq!(extraction.text, text);
        assert!(extraction.blocks.is_empty());
    }
}

#[test]
fn test_blocks_come_back_in_source_order_with_unique_tokens() {
    let mut ids = IdAllocator::default();
    let raw = reply_with_blocks();
    let extraction = extract(&raw, &mut ids);

    let kinds: Vec<BlockKind> = extraction.blocks.iter().map(|b| b.kind).collect();
    assert_eq!(kinds, vec![BlockKind::Diagram, BlockKind::Chart, BlockKind::Diagram]);
    assert_eq!(extraction.blocks[0].payload, "graph LR\nA-->B");
    assert_eq!(extraction.blocks[1].payload, CHART);
    assert_eq!(extraction.blocks[2].payload, "sequenceDiagram\nA->>B: hi");

    for block in &extraction.blocks {
        assert_eq!(extraction.text.matches(&block.placeholder).count(), 1);
    }
    let mut tokens: Vec<&str> = extraction.blocks.iter().map(|b| b.placeholder.as_str()).collect();
    tokens.dedup();
    assert_eq!(tokens.len(), 3);
    assert!(!extraction.text.contains("```"));
}

#[test]
fn test_round_trip_keeps_payloads_verbatim() {
    let mut session = RenderSession::new(Box::new(ChartJsBackend));
    let raw = reply_with_blocks();
    let (_, rendered, nodes) = session.present(&raw);

    assert_eq!(nodes.len(), 2);
    for block in &rendered.blocks {
        match block.kind {
            BlockKind::Diagram => {
                let expected = format!("<div class=\"mermaid-diagram\" id=\"{}\">{}</div>", block.id, block.payload);
                assert!(rendered.html.contains(&expected), "missing {}", expected);
            }
            BlockKind::Chart => {
                assert!(rendered.html.contains(&format!("<canvas id=\"{}\"", block.id)));
                assert_eq!(session.board().container(&block.id).unwrap().payload, block.payload);
            }
        }
    }
}

#[test]
fn test_stages_compose_like_render_reply() {
    let raw = "**注意**: <script>\n```mermaid\ngraph TD\nA-->B\n```";
    let mut ids = IdAllocator::default();
    let extraction = extract(raw, &mut ids);
    let html = reinserter::reinsert(&formatter::format_text(&extraction.text), &extraction.blocks);

    assert!(html.starts_with("<strong>注意</strong>: &lt;script&gt;<br>"));
    assert!(html.contains("graph TD\nA-->B</div>"));
}

#[test]
fn test_chart_parsing_is_idempotent() {
    assert_eq!(ChartSpec::parse(CHART), ChartSpec::parse(CHART));
}

#[test]
fn test_chart_payload_scenario() {
    let spec = ChartSpec::parse(CHART).unwrap();
    assert_eq!(spec.chart_type, "line");
    assert_eq!(spec.labels, vec!["Jan", "Feb"]);
    assert_eq!(spec.data, vec![10.0, 20.0]);
    assert_eq!(spec.title, "Growth");
}

#[test]
fn test_chart_defaults() {
    let spec = ChartSpec::parse("labels: [\"a\"]\ndata: [1]").unwrap();
    assert_eq!(spec.chart_type, "bar");
    assert_eq!(spec.title, DEFAULT_CHART_TITLE);
}

#[test]
fn test_malformed_array_is_a_named_error() {
    let err = ChartSpec::parse("labels: [\"a\", ]\ndata: [1]").unwrap_err();
    assert!(matches!(err, ChartSpecError::Malformed { key: "labels", .. }));
}

#[test]
fn test_mismatched_lengths_truncate() {
    let spec = ChartSpec::parse("labels: [\"a\", \"b\", \"c\"]\ndata: [1, 2]").unwrap();
    let config = spec.to_config();
    assert_eq!(config.data.labels, vec!["a", "b"]);
    assert_eq!(config.data.datasets[0].data, vec![1.0, 2.0]);
}

#[test]
fn test_explain_step_scenario() {
    let raw = "Explain **this** step\n```mermaid\ngraph TD\nA-->B\n```\ndone";
    let rendered = render_reply(raw, &mut IdAllocator::default());

    assert_eq!(rendered.blocks.len(), 1);
    assert_eq!(rendered.blocks[0].payload, "graph TD\nA-->B");
    let container = format!(
        "<div class=\"mermaid-diagram\" id=\"{}\">graph TD\nA-->B</div>",
        rendered.blocks[0].id
    );
    assert_eq!(
        rendered.html,
        format!("Explain <strong>this</strong> step<br>{}<br>done", container)
    );
}

#[test]
fn test_redraw_disposes_previous_instance_first() {
    let log = EventLog::default();
    let backend = RecordingBackend {
        log: log.clone(),
        created: Mutex::new(0),
    };
    let mut session = RenderSession::new(Box::new(backend));
    let (_, rendered, _) = session.present(&format!("```chart\n{}\n```", CHART));
    let id = rendered.ids_of(BlockKind::Chart).remove(0);

    assert!(matches!(session.on_container_attached(&id, 640, 320), ChartDraw::Drawn(_)));
    assert!(matches!(session.on_container_attached(&id, 800, 400), ChartDraw::Drawn(_)));

    assert_eq!(log.events(), vec!["create 0", "dispose 0", "create 1"]);
    assert_eq!(session.live_charts(), 1);
}

#[test]
fn test_attach_for_missing_container_is_a_noop() {
    let mut session = RenderSession::new(Box::new(ChartJsBackend));
    assert_eq!(session.on_container_attached("chart-0-0", 100, 100), ChartDraw::Missing);

    let (message, rendered, _) = session.present(&format!("```chart\n{}\n```", CHART));
    let id = rendered.ids_of(BlockKind::Chart).remove(0);
    session.remove_message(message);
    assert_eq!(session.on_container_attached(&id, 100, 100), ChartDraw::Missing);
    assert_eq!(session.live_charts(), 0);
}

#[test]
fn test_existing_token_text_is_not_replaced() {
    let raw = "___DIAGRAM_0___ stays\n```mermaid\ngraph TD\n```";
    let rendered = render_reply(raw, &mut IdAllocator::default());
    assert!(rendered.html.starts_with("___DIAGRAM_0___ stays<br>"));
    assert_eq!(rendered.html.matches("mermaid-diagram").count(), 1);
}

#[test]
fn test_short_link_glued_to_fence_keeps_the_chart() {
    let rendered = render_reply("see https://youtu.be/abc```chart\ndata: [1]\n```", &mut IdAllocator::default());
    let id = &rendered.blocks[0].id;
    assert_eq!(
        rendered.html,
        format!(
            "see https://youtu.be/abc<div class=\"chart-container\"><canvas id=\"{}\" class=\"chart-canvas\"></canvas></div>",
            id
        )
    );
}

#[test]
fn test_reinsertion_order_does_not_matter() {
    let raw = "```mermaid\nA\n```DIAGRAM_1__ text ```mermaid\nB\n```";
    let extraction = extract(raw, &mut IdAllocator::default());
    let formatted = formatter::format_text(&extraction.text);
    let reversed: Vec<_> = extraction.blocks.iter().rev().cloned().collect();

    let forward = reinserter::reinsert(&formatted, &extraction.blocks);
    assert_eq!(forward, reinserter::reinsert(&formatted, &reversed));
    assert!(forward.contains("A</div>DIAGRAM_1__ text <div"));
    assert!(forward.ends_with(">B</div>"));
}
