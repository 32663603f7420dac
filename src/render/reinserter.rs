use tracing::warn;

use super::{BlockKind, ExtractedBlock};

/// Replace every placeholder token with its container markup.
pub fn reinsert(formatted: &str, blocks: &[ExtractedBlock]) -> String {
    let mut html = formatted.to_string();
    for block in blocks {
        if !html.contains(&block.placeholder) {
            warn!(id = %block.id, "Placeholder missing from formatted text");
            continue;
        }
        html = html.replacen(&block.placeholder, &container(block), 1);
    }
    html
}

pub fn container(block: &ExtractedBlock) -> String {
    match block.kind {
        BlockKind::Diagram => format!(
            "<div class=\"mermaid-diagram\" id=\"{}\">{}</div>",
            block.id, block.payload
        ),
        BlockKind::Chart => format!(
            "<div class=\"chart-container\"><canvas id=\"{}\" class=\"chart-canvas\"></canvas></div>",
            block.id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: BlockKind, n: usize, payload: &str) -> ExtractedBlock {
        let label = match kind {
            BlockKind::Diagram => "DIAGRAM",
            BlockKind::Chart => "CHART",
        };
        ExtractedBlock {
            kind,
            id: format!("{}-1-{}", kind.marker(), n),
            payload: payload.to_string(),
            placeholder: format!("\u{E000}{}_{}\u{E001}", label, n),
        }
    }

    #[test]
    fn test_order_independent() {
        let blocks = vec![
            block(BlockKind::Diagram, 0, "graph TD"),
            block(BlockKind::Chart, 1, "data: [1]"),
        ];
        let text = "\u{E000}CHART_1\u{E001}<br>\u{E000}DIAGRAM_0\u{E001}";
        let forward = reinsert(text, &blocks);
        let reversed: Vec<_> = blocks.iter().rev().cloned().collect();

        assert_eq!(forward, reinsert(text, &reversed));
        assert_eq!(
            forward,
            "<div class=\"chart-container\"><canvas id=\"chart-1-1\" class=\"chart-canvas\"></canvas></div>\
             <br><div class=\"mermaid-diagram\" id=\"mermaid-1-0\">graph TD</div>"
        );
    }

    #[test]
    fn test_chart_payload_not_embedded() {
        let html = reinsert("\u{E000}CHART_0\u{E001}", &[block(BlockKind::Chart, 0, "title: secret")]);
        assert!(!html.contains("secret"));
    }

    #[test]
    fn test_missing_placeholder_is_skipped() {
        let html = reinsert("plain", &[block(BlockKind::Diagram, 0, "graph")]);
        assert_eq!(html, "plain");
    }
}
