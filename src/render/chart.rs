//! Chart blocks: the `type:/labels:/data:/title:` DSL, the declarative config
//! handed to the charting backend, and the registry of live chart instances.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::display::{MessageBoard, Surface};
use super::BlockKind;

pub const DEFAULT_CHART_TYPE: &str = "bar";
pub const DEFAULT_CHART_TITLE: &str = "グラフ";
pub const MAX_ARRAY_ITEMS: usize = 256;

/// Fill colors, assigned to data points in this order.
pub const PALETTE: [&str; 6] = [
    "rgba(255, 99, 132, 0.8)",
    "rgba(54, 162, 235, 0.8)",
    "rgba(255, 206, 86, 0.8)",
    "rgba(75, 192, 192, 0.8)",
    "rgba(153, 102, 255, 0.8)",
    "rgba(255, 159, 64, 0.8)",
];

const AXISLESS_TYPES: [&str; 3] = ["pie", "doughnut", "donut"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChartSpecError {
    #[error("`{key}:` line has no array literal")]
    MissingArray { key: &'static str },
    #[error("malformed `{key}:` array at column {column}: {reason}")]
    Malformed {
        key: &'static str,
        column: usize,
        reason: String,
    },
    #[error("`{key}:` item {index} is not a {expected}")]
    InvalidItem {
        key: &'static str,
        index: usize,
        expected: &'static str,
    },
    #[error("`{key}:` array has more than {max} items")]
    TooManyItems { key: &'static str, max: usize },
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error(transparent)]
    Spec(#[from] ChartSpecError),
    #[error("container {0} is not a chart")]
    NotAChart(String),
    #[error("container {0} has not been measured yet")]
    NotAttached(String),
    #[error("chart surface {id} has no area ({width}x{height})")]
    EmptySurface { id: String, width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub chart_type: String,
    pub labels: Vec<String>,
    pub data: Vec<f64>,
    pub title: String,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            chart_type: DEFAULT_CHART_TYPE.to_string(),
            labels: Vec::new(),
            data: Vec::new(),
            title: DEFAULT_CHART_TITLE.to_string(),
        }
    }
}

impl ChartSpec {
    pub fn parse(payload: &str) -> Result<Self, ChartSpecError> {
        let mut spec = ChartSpec::default();
        for line in payload.lines().map(str::trim) {
            if line.starts_with("type:") {
                if let Some((_, value)) = line.split_once(':') {
                    spec.chart_type = value.trim().to_string();
                }
            } else if line.starts_with("labels:") {
                spec.labels = array_items(line, "labels")?
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| match item {
                        Value::String(label) => Ok(label),
                        // Numeric labels keep their source spelling.
                        Value::Number(n) => Ok(n.to_string()),
                        _ => Err(ChartSpecError::InvalidItem {
                            key: "labels",
                            index,
                            expected: "string or number",
                        }),
                    })
                    .collect::<Result<_, _>>()?;
            } else if line.starts_with("data:") {
                spec.data = array_items(line, "data")?
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        item.as_f64().ok_or(ChartSpecError::InvalidItem {
                            key: "data",
                            index,
                            expected: "number",
                        })
                    })
                    .collect::<Result<_, _>>()?;
            } else if let Some(value) = line.strip_prefix("title:") {
                spec.title = value.trim().to_string();
            }
        }
        Ok(spec)
    }

    pub fn is_axisless(&self) -> bool {
        AXISLESS_TYPES.contains(&self.chart_type.as_str())
    }

    /// Declarative config for the charting backend. Labels and data are
    /// truncated to the shorter of the two.
    pub fn to_config(&self) -> ChartConfig {
        let len = if self.labels.is_empty() {
            self.data.len()
        } else {
            self.labels.len().min(self.data.len())
        };
        if !self.labels.is_empty() && self.labels.len() != self.data.len() {
            warn!(
                labels = self.labels.len(),
                data = self.data.len(),
                "Chart labels and data differ in length; truncating"
            );
        }

        let background: Vec<String> = (0..len)
            .map(|i| PALETTE[i % PALETTE.len()].to_string())
            .collect();
        let border = background.iter().map(|c| c.replace("0.8", "1")).collect();

        ChartConfig {
            chart_type: self.chart_type.clone(),
            data: ChartData {
                labels: self.labels.iter().take(len).cloned().collect(),
                datasets: vec![Dataset {
                    label: self.title.clone(),
                    data: self.data[..len].to_vec(),
                    background_color: background,
                    border_color: border,
                    border_width: 2,
                }],
            },
            options: ChartOptions {
                responsive: true,
                maintain_aspect_ratio: true,
                plugins: Plugins {
                    legend: Legend {
                        display: true,
                        position: "top",
                    },
                    title: Title {
                        display: true,
                        text: self.title.clone(),
                        font: Font {
                            size: 16,
                            weight: "bold",
                        },
                    },
                },
                scales: if self.is_axisless() {
                    None
                } else {
                    Some(Scales {
                        y: Axis { begin_at_zero: true },
                    })
                },
            },
        }
    }
}

// Chart.js configuration shape.

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub chart_type: String,
    pub data: ChartData,
    pub options: ChartOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
    pub background_color: Vec<String>,
    pub border_color: Vec<String>,
    pub border_width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartOptions {
    pub responsive: bool,
    pub maintain_aspect_ratio: bool,
    pub plugins: Plugins,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scales: Option<Scales>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plugins {
    pub legend: Legend,
    pub title: Title,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub display: bool,
    pub position: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Title {
    pub display: bool,
    pub text: String,
    pub font: Font,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Font {
    pub size: u32,
    pub weight: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scales {
    pub y: Axis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Axis {
    pub begin_at_zero: bool,
}

/// Charting collaborator.
pub trait ChartBackend: Send + Sync {
    fn create(
        &self,
        surface: Surface,
        config: ChartConfig,
    ) -> Result<Box<dyn ChartInstance>, ChartError>;
}

pub trait ChartInstance: Send {
    fn config(&self) -> &ChartConfig;
    fn dispose(&mut self);
}

/// Backend for the browser's Chart.js: the instance holds the config the page
/// draws with.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChartJsBackend;

struct ChartJsInstance {
    config: ChartConfig,
}

impl ChartBackend for ChartJsBackend {
    fn create(
        &self,
        _surface: Surface,
        config: ChartConfig,
    ) -> Result<Box<dyn ChartInstance>, ChartError> {
        Ok(Box::new(ChartJsInstance { config }))
    }
}

impl ChartInstance for ChartJsInstance {
    fn config(&self) -> &ChartConfig {
        &self.config
    }

    fn dispose(&mut self) {
        debug!(chart_type = %self.config.chart_type, "Disposing chart");
    }
}

/// Draws charts into board containers and keeps one live instance per id.
pub struct ChartRenderer {
    backend: Box<dyn ChartBackend>,
    instances: HashMap<String, Box<dyn ChartInstance>>,
}

impl ChartRenderer {
    pub fn new(backend: Box<dyn ChartBackend>) -> Self {
        Self {
            backend,
            instances: HashMap::new(),
        }
    }

    /// Draw the chart bound to container `id`. A container that no longer
    /// exists is not an error.
    pub fn draw(&mut self, board: &MessageBoard, id: &str) -> Result<Option<ChartConfig>, ChartError> {
        let Some(container) = board.container(id) else {
            return Ok(None);
        };
        if container.kind != BlockKind::Chart {
            return Err(ChartError::NotAChart(id.to_string()));
        }
        let surface = container
            .surface
            .ok_or_else(|| ChartError::NotAttached(id.to_string()))?;
        if surface.width == 0 || surface.height == 0 {
            return Err(ChartError::EmptySurface {
                id: id.to_string(),
                width: surface.width,
                height: surface.height,
            });
        }

        let spec = ChartSpec::parse(&container.payload)?;
        self.dispose(id);
        let instance = self.backend.create(surface, spec.to_config())?;
        let config = instance.config().clone();
        self.instances.insert(id.to_string(), instance);
        debug!(%id, chart_type = %config.chart_type, "Chart drawn");
        Ok(Some(config))
    }

    pub fn dispose(&mut self, id: &str) {
        if let Some(mut previous) = self.instances.remove(id) {
            previous.dispose();
        }
    }

    pub fn live(&self) -> usize {
        self.instances.len()
    }
}

/// The JSON array following `key:`, bounded to `MAX_ARRAY_ITEMS` entries.
fn array_items(line: &str, key: &'static str) -> Result<Vec<Value>, ChartSpecError> {
    let start = line.find('[').ok_or(ChartSpecError::MissingArray { key })?;
    let items: Vec<Value> = serde_json::from_str(&line[start..]).map_err(|e| {
        let message = e.to_string();
        ChartSpecError::Malformed {
            key,
            column: line[..start].chars().count() + e.column(),
            reason: message
                .split(" at line ")
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    })?;
    if items.len() > MAX_ARRAY_ITEMS {
        return Err(ChartSpecError::TooManyItems {
            key,
            max: MAX_ARRAY_ITEMS,
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{extractor::IdAllocator, render_reply};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_full_payload() {
        let spec =
            ChartSpec::parse("type: line\nlabels: [\"Jan\",\"Feb\"]\ndata: [10,20]\ntitle: Growth")
                .unwrap();
        assert_eq!(
            spec,
            ChartSpec {
                chart_type: "line".to_string(),
                labels: vec!["Jan".to_string(), "Feb".to_string()],
                data: vec![10.0, 20.0],
                title: "Growth".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_is_idempotent() {
        let payload = "  type: pie \n labels: [\"a\", \"b\\\"c\"]\n data: [1.5, -2e3]\n title: 売上";
        assert_eq!(ChartSpec::parse(payload), ChartSpec::parse(payload));
    }

    #[test]
    fn test_defaults() {
        let spec = ChartSpec::parse("labels: [\"x\"]\ndata: [1]").unwrap();
        assert_eq!(spec.chart_type, "bar");
        assert_eq!(spec.title, DEFAULT_CHART_TITLE);

        let empty = ChartSpec::parse("").unwrap();
        assert!(empty.labels.is_empty());
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_unrecognized_lines_ignored() {
        let spec = ChartSpec::parse("color: red\n# comment\ndata: [4]").unwrap();
        assert_eq!(spec.data, vec![4.0]);
    }

    #[test]
    fn test_title_keeps_colons() {
        let spec = ChartSpec::parse("title: Q1: 売上").unwrap();
        assert_eq!(spec.title, "Q1: 売上");
    }

    #[test]
    fn test_numeric_labels_keep_source_text() {
        let spec = ChartSpec::parse("labels: [2023, 2024, \"2025\"]").unwrap();
        assert_eq!(spec.labels, vec!["2023", "2024", "2025"]);
    }

    #[test]
    fn test_unicode_escapes() {
        let spec = ChartSpec::parse(r#"labels: ["\u0041", "\ud83d\ude00"]"#).unwrap();
        assert_eq!(spec.labels, vec!["A", "😀"]);
    }

    #[test]
    fn test_missing_bracket_is_named_error() {
        assert_eq!(
            ChartSpec::parse("data: 1, 2"),
            Err(ChartSpecError::MissingArray { key: "data" })
        );
    }

    #[test]
    fn test_malformed_literals_are_rejected() {
        for payload in [
            "data: [1, 2",
            "data: [1,]",
            "data: [01]",
            "data: [1e]",
            "labels: [a, b]",
            "labels: ['a']",
            "labels: [\"unterminated]",
            "data: [1] trailing",
        ] {
            assert!(
                matches!(ChartSpec::parse(payload), Err(ChartSpecError::Malformed { .. })),
                "{payload} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_column_points_into_line() {
        match ChartSpec::parse("data: [1, x]") {
            Err(ChartSpecError::Malformed { key, column, reason }) => {
                assert_eq!(key, "data");
                assert_eq!(column, 11);
                assert!(!reason.contains("line"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wrong_item_types_are_rejected() {
        assert_eq!(
            ChartSpec::parse("data: [1, \"a\"]"),
            Err(ChartSpecError::InvalidItem {
                key: "data",
                index: 1,
                expected: "number"
            })
        );
        assert_eq!(
            ChartSpec::parse("labels: [\"a\", null]"),
            Err(ChartSpecError::InvalidItem {
                key: "labels",
                index: 1,
                expected: "string or number"
            })
        );
        assert!(matches!(
            ChartSpec::parse("data: [[1]]"),
            Err(ChartSpecError::InvalidItem { .. })
        ));
    }

    #[test]
    fn test_item_limit() {
        let items = vec!["1"; MAX_ARRAY_ITEMS + 1].join(",");
        assert_eq!(
            ChartSpec::parse(&format!("data: [{items}]")),
            Err(ChartSpecError::TooManyItems {
                key: "data",
                max: MAX_ARRAY_ITEMS
            })
        );
    }

    #[test]
    fn test_config_palette_cycles() {
        let spec = ChartSpec {
            data: (0..8).map(f64::from).collect(),
            ..ChartSpec::default()
        };
        let config = spec.to_config();
        let dataset = &config.data.datasets[0];
        assert_eq!(dataset.background_color.len(), 8);
        assert_eq!(dataset.background_color[0], PALETTE[0]);
        assert_eq!(dataset.background_color[6], PALETTE[0]);
        assert_eq!(dataset.background_color[7], PALETTE[1]);
        assert_eq!(dataset.border_color[1], "rgba(54, 162, 235, 1)");
        assert_eq!(dataset.label, DEFAULT_CHART_TITLE);
    }

    #[test]
    fn test_config_truncates_mismatched_lengths() {
        let spec = ChartSpec::parse("labels: [\"a\", \"b\", \"c\"]\ndata: [1, 2]").unwrap();
        let config = spec.to_config();
        assert_eq!(config.data.labels, vec!["a", "b"]);
        assert_eq!(config.data.datasets[0].data, vec![1.0, 2.0]);
    }

    #[test]
    fn test_pie_has_no_axes() {
        let pie = ChartSpec::parse("type: pie").unwrap().to_config();
        let json = serde_json::to_value(&pie).unwrap();
        assert!(json["options"].get("scales").is_none());

        let bar = ChartSpec::parse("type: bar").unwrap().to_config();
        let json = serde_json::to_value(&bar).unwrap();
        assert_eq!(json["options"]["scales"]["y"]["beginAtZero"], true);
        assert_eq!(json["type"], "bar");
        assert_eq!(json["options"]["plugins"]["title"]["font"]["weight"], "bold");
    }

    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        live: Arc<AtomicUsize>,
    }

    struct RecordedInstance {
        n: usize,
        config: ChartConfig,
        events: Arc<Mutex<Vec<String>>>,
        live: Arc<AtomicUsize>,
    }

    impl ChartBackend for Recorder {
        fn create(
            &self,
            _surface: Surface,
            config: ChartConfig,
        ) -> Result<Box<dyn ChartInstance>, ChartError> {
            let n = self.events.lock().unwrap().len();
            self.events.lock().unwrap().push(format!("create {n}"));
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordedInstance {
                n,
                config,
                events: self.events.clone(),
                live: self.live.clone(),
            }))
        }
    }

    impl ChartInstance for RecordedInstance {
        fn config(&self) -> &ChartConfig {
            &self.config
        }

        fn dispose(&mut self) {
            self.events.lock().unwrap().push(format!("dispose {}", self.n));
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_redraw_disposes_previous_instance_first() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let live = Arc::new(AtomicUsize::new(0));
        let mut renderer = ChartRenderer::new(Box::new(Recorder {
            events: events.clone(),
            live: live.clone(),
        }));
        let mut board = MessageBoard::default();
        let rendered = render_reply("```chart\ndata: [1]\n```", &mut IdAllocator::default());
        board.append(&rendered);
        let id = &rendered.blocks[0].id;
        board.attach(id, 100, 100);

        renderer.draw(&board, id).unwrap();
        renderer.draw(&board, id).unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["create 0", "dispose 0", "create 2"]);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.live(), 1);
    }

    #[test]
    fn test_missing_container_is_silent() {
        let mut renderer = ChartRenderer::new(Box::new(ChartJsBackend));
        let board = MessageBoard::default();
        assert!(matches!(renderer.draw(&board, "chart-1-0"), Ok(None)));
    }

    #[test]
    fn test_unmeasured_or_empty_surface_is_rejected() {
        let mut renderer = ChartRenderer::new(Box::new(ChartJsBackend));
        let mut board = MessageBoard::default();
        let rendered = render_reply("```chart\ndata: [1]\n```", &mut IdAllocator::default());
        board.append(&rendered);
        let id = &rendered.blocks[0].id;

        assert!(matches!(renderer.draw(&board, id), Err(ChartError::NotAttached(_))));
        board.attach(id, 0, 120);
        assert!(matches!(renderer.draw(&board, id), Err(ChartError::EmptySurface { .. })));
    }
}
