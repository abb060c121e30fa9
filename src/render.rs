use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use futures::StreamExt;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::GraphView;

pub const CANVAS_WIDTH: u32 = 1200;
pub const CANVAS_HEIGHT: u32 = 800;

/// Output doubles the canvas resolution via the device scale factor.
const DEVICE_SCALE_FACTOR: u32 = 2;
const LAYOUT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_LAYOUT_TIMEOUT: Duration = Duration::from_secs(20);

/// Cosmetic knobs for the rendered graph. Each is independently
/// defaulted and clamped to a sane range before use.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStyle {
    pub line_width: f64,
    pub node_size: f64,
    pub font_size: f64,
    pub opacity: f64,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            line_width: 2.0,
            node_size: 40.0,
            font_size: 12.0,
            opacity: 0.9,
        }
    }
}

impl RenderStyle {
    pub fn clamped(self) -> Self {
        Self {
            line_width: self.line_width.clamp(1.0, 50.0),
            node_size: self.node_size.clamp(8.0, 120.0),
            font_size: self.font_size.clamp(6.0, 48.0),
            opacity: self.opacity.clamp(0.05, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub const fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub const fn file_name(self) -> &'static str {
        match self {
            ImageFormat::Png => "graph.png",
            ImageFormat::Jpeg => "graph.jpg",
        }
    }

    fn capture_format(self) -> CaptureScreenshotFormat {
        match self {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        }
    }
}

/// Narrow seam around the rendering toolchain so the layout engine and
/// browser automation stay swappable implementation details.
#[async_trait]
pub trait GraphRenderer: Send + Sync {
    async fn render(
        &self,
        view: &GraphView,
        style: RenderStyle,
        format: ImageFormat,
    ) -> Result<Vec<u8>>;
}

/// Renders by loading a self-contained HTML page into a headless
/// Chromium instance and screenshotting the laid-out canvas. One
/// browser per request, torn down on every exit path.
pub struct ChromiumRenderer {
    layout_timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new() -> Self {
        Self {
            layout_timeout: DEFAULT_LAYOUT_TIMEOUT,
        }
    }

    pub fn with_layout_timeout(layout_timeout: Duration) -> Self {
        Self { layout_timeout }
    }

    async fn capture(
        &self,
        browser: &Browser,
        html: String,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| render_err("Failed to open rendering surface", err))?;
        page.set_content(html)
            .await
            .map_err(|err| render_err("Failed to load graph page", err))?;

        let deadline = tokio::time::Instant::now() + self.layout_timeout;
        loop {
            let settled = page
                .evaluate("window.__layoutDone === true")
                .await
                .ok()
                .and_then(|value| value.into_value::<bool>().ok())
                .unwrap_or(false);
            if settled {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LibError::render(
                    "Graph layout did not settle in time",
                    anyhow!("layout flag not set within {:?}", self.layout_timeout),
                ));
            }
            tokio::time::sleep(LAYOUT_POLL_INTERVAL).await;
        }

        let element = page
            .find_element("#graph-canvas")
            .await
            .map_err(|err| render_err("Failed to locate graph canvas", err))?;
        element
            .screenshot(format.capture_format())
            .await
            .map_err(|err| render_err("Failed to capture graph image", err))
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphRenderer for ChromiumRenderer {
    async fn render(
        &self,
        view: &GraphView,
        style: RenderStyle,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let html = build_graph_page(view, style.clamped());

        let browser_config = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--window-size={CANVAS_WIDTH},{CANVAS_HEIGHT}"))
            .arg(format!("--force-device-scale-factor={DEVICE_SCALE_FACTOR}"))
            .build()
            .map_err(|err| {
                LibError::render(
                    "Failed to configure rendering surface",
                    anyhow!("browser config: {}", err),
                )
            })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|err| render_err("Failed to start rendering surface", err))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = self.capture(&browser, html, format).await;

        // Teardown runs on success and failure alike.
        let mut browser = browser;
        if let Err(err) = browser.close().await {
            tracing::warn!(error = %err, "failed to close rendering surface cleanly");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}

fn render_err(public: &'static str, err: impl std::error::Error + Send + Sync + 'static) -> LibError {
    LibError::render(public, anyhow!(err))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageGraph<'a> {
    nodes: &'a [crate::models::GraphNode],
    edges: &'a [crate::models::GraphEdge],
    style: RenderStyle,
    width: u32,
    height: u32,
}

/// Builds the self-contained page: graph description serialized into
/// the inline script, a bounded force-directed layout with circular
/// seeding, and a completion flag the pipeline polls for.
pub fn build_graph_page(view: &GraphView, style: RenderStyle) -> String {
    let graph = PageGraph {
        nodes: &view.nodes,
        edges: &view.edges,
        style,
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
    };
    let payload = serde_json::to_string(&graph)
        .unwrap_or_else(|_| "{\"nodes\":[],\"edges\":[]}".to_string())
        // Keep the serialized payload from terminating the script block.
        .replace("</", "<\\/");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  html, body {{ margin: 0; padding: 0; background: #ffffff; }}
  #graph-canvas {{ display: block; }}
</style>
</head>
<body>
<canvas id="graph-canvas" width="{width}" height="{height}"></canvas>
<script>
const GRAPH = {payload};
const ITERATIONS = 300;

function layout(nodes, edges, width, height) {{
  const count = nodes.length;
  nodes.forEach((node, idx) => {{
    const angle = (2 * Math.PI * idx) / Math.max(count, 1);
    node.x = width / 2 + (Math.min(width, height) / 3) * Math.cos(angle);
    node.y = height / 2 + (Math.min(width, height) / 3) * Math.sin(angle);
  }});
  const byId = new Map(nodes.map((node) => [node.id, node]));

  for (let step = 0; step < ITERATIONS; step += 1) {{
    const cooling = 1 - step / ITERATIONS;
    for (const a of nodes) {{
      let fx = 0;
      let fy = 0;
      for (const b of nodes) {{
        if (a === b) continue;
        const dx = a.x - b.x;
        const dy = a.y - b.y;
        const dist2 = Math.max(dx * dx + dy * dy, 1);
        fx += (dx / dist2) * 8000;
        fy += (dy / dist2) * 8000;
      }}
      for (const edge of edges) {{
        let other = null;
        if (edge.from === a.id) other = byId.get(edge.to);
        if (edge.to === a.id) other = byId.get(edge.from);
        if (!other) continue;
        fx += (other.x - a.x) * 0.02;
        fy += (other.y - a.y) * 0.02;
      }}
      fx += (width / 2 - a.x) * 0.005;
      fy += (height / 2 - a.y) * 0.005;
      a.x += fx * cooling;
      a.y += fy * cooling;
      a.x = Math.min(Math.max(a.x, 40), width - 40);
      a.y = Math.min(Math.max(a.y, 40), height - 40);
    }}
  }}
}}

function draw() {{
  const canvas = document.getElementById('graph-canvas');
  const ctx = canvas.getContext('2d');
  const {{ nodes, edges, style, width, height }} = GRAPH;
  const byId = new Map(nodes.map((node) => [node.id, node]));

  layout(nodes, edges, width, height);

  ctx.clearRect(0, 0, width, height);
  ctx.globalAlpha = style.opacity;

  ctx.strokeStyle = '#8a8a8a';
  ctx.lineWidth = style.lineWidth;
  for (const edge of edges) {{
    const from = byId.get(edge.from);
    const to = byId.get(edge.to);
    if (!from || !to) continue;
    ctx.beginPath();
    ctx.moveTo(from.x, from.y);
    ctx.lineTo(to.x, to.y);
    ctx.stroke();
  }}

  ctx.font = style.fontSize + 'px sans-serif';
  ctx.textAlign = 'center';
  for (const node of nodes) {{
    ctx.fillStyle = '#4a78c2';
    ctx.beginPath();
    ctx.arc(node.x, node.y, style.nodeSize / 2, 0, 2 * Math.PI);
    ctx.fill();
    ctx.fillStyle = '#1a1a1a';
    ctx.fillText(node.label, node.x, node.y + style.nodeSize / 2 + style.fontSize);
  }}

  window.__layoutDone = true;
}}

draw();
</script>
</body>
</html>
"#,
        width = CANVAS_WIDTH,
        height = CANVAS_HEIGHT,
        payload = payload,
    )
}
