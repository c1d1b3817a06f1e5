//! Built-in pure-Rust page engine.
//!
//! Fetches the document over HTTP, parses it with scraper, lays it out as
//! wireframe blocks, and paints those into the capture surface. The
//! document-height query runs through a small JavaScript hook so full-page
//! measurement follows the same expression a browser-backed engine would
//! evaluate.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use scraper::Html;

use crate::engine::layout::{self, BlockKind};
use crate::engine::{PageEngine, PagePolicy, Painter, Viewport};
use crate::error::{Error, Result};
use crate::params::RenderJob;

const DEFAULT_UA: &str = concat!("pagecap/", env!("CARGO_PKG_VERSION"));

// Bodies past this size are truncated before parsing; the wireframe layout
// never needs more.
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

const PAGE_BG: [u8; 3] = [255, 255, 255];
const BLOCK_BG: [u8; 3] = [244, 244, 244];
const BLOCK_FRAME: [u8; 3] = [210, 210, 210];
const HEADING_INK: [u8; 3] = [60, 60, 60];
const PARAGRAPH_INK: [u8; 3] = [130, 130, 130];

// The height expression evaluated by the scripting hook, fed with the
// metrics of the laid-out document.
const HEIGHT_SCRIPT: &str = "var d = document;\n\
    Math.max(Math.max(d.body.scrollHeight, d.documentElement.scrollHeight),\n\
    Math.max(d.body.offsetHeight, d.documentElement.offsetHeight),\n\
    Math.max(d.body.clientHeight, d.documentElement.clientHeight));";

pub struct HtmlEngine {
    client: Client,
    policy: PagePolicy,
    viewport: Viewport,
    zoom: f32,
    document: Option<Html>,
}

impl HtmlEngine {
    pub fn new(load_timeout: Duration) -> Result<Self> {
        let policy = PagePolicy::locked();
        let mut builder = Client::builder().timeout(load_timeout);
        if policy.private_browsing {
            // No referer leakage, no cookie jar; every load starts clean.
            builder = builder.referer(false);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Initialization(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy,
            viewport: Viewport {
                width: 0,
                height: 0,
            },
            zoom: 1.0,
            document: None,
        })
    }

    fn document(&self) -> Result<&Html> {
        self.document
            .as_ref()
            .ok_or_else(|| Error::Load("no document loaded".to_string()))
    }

    // Evaluate the height expression against a `document` object carrying the
    // laid-out metrics. Mirrors what a DOM-backed engine reports: scroll and
    // offset heights are the content's natural height, client height is the
    // viewport.
    fn evaluate_height(&self, natural: u32) -> Result<u32> {
        let metrics = format!(
            "var document = {{\n\
                 body: {{ scrollHeight: {n}, offsetHeight: {n}, clientHeight: {n} }},\n\
                 documentElement: {{ scrollHeight: {n}, offsetHeight: {n}, clientHeight: {v} }}\n\
             }};\n",
            n = natural,
            v = self.viewport.height,
        );
        let source = format!("{}{}", metrics, HEIGHT_SCRIPT);

        let mut context = boa_engine::Context::default();
        let value = context
            .eval(boa_engine::Source::from_bytes(source.as_bytes()))
            .map_err(|e| Error::Load(format!("height script failed: {}", e)))?;

        let rendered = format!("{}", value.display());
        Ok(rendered.parse::<f64>().unwrap_or(0.0).max(0.0) as u32)
    }
}

impl PageEngine for HtmlEngine {
    fn load_page(&mut self, job: &RenderJob) -> Result<()> {
        let ua = job.ua.as_deref().unwrap_or(DEFAULT_UA);
        let response = self
            .client
            .get(&job.url)
            .header(reqwest::header::USER_AGENT, ua)
            .send()
            .map_err(|e| Error::Load(format!("failed to fetch {}: {}", job.url, e)))?;

        let mut raw = Vec::new();
        response
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| Error::Load(format!("failed to read response body: {}", e)))?;

        self.document = Some(Html::parse_document(&String::from_utf8_lossy(&raw)));
        self.zoom = job.zoom;
        Ok(())
    }

    fn measure_height(&mut self) -> Result<u32> {
        if !self.policy.scripts_enabled {
            return Ok(0);
        }
        let natural = {
            let document = self.document()?;
            layout::layout_document(document, self.viewport.width, self.zoom).natural_height
        };
        self.evaluate_height(natural)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn paint(&mut self, painter: &mut Painter<'_>) -> Result<()> {
        let layout = {
            let document = self.document()?;
            layout::layout_document(document, self.viewport.width, self.zoom)
        };

        painter.clear(PAGE_BG);
        for block in &layout.blocks {
            let rect = &block.rect;
            painter.fill_rect(rect.x, rect.y, rect.width, rect.height, BLOCK_BG);
            painter.frame_rect(rect.x, rect.y, rect.width, rect.height, BLOCK_FRAME);

            let ink = match block.kind {
                BlockKind::Heading => HEADING_INK,
                BlockKind::Paragraph => PARAGRAPH_INK,
            };
            let padding = block.cell / 2 + 2;
            let mut line_y = rect.y.saturating_add(padding);
            for line in &block.lines {
                let glyphs = line.chars().count().min(u32::MAX as usize) as u32;
                let bar_width = glyphs
                    .saturating_mul(block.cell)
                    .min(rect.width.saturating_sub(padding.saturating_mul(2)));
                if bar_width > 0 {
                    painter.fill_rect(
                        rect.x.saturating_add(padding),
                        line_y,
                        bar_width,
                        block.cell.saturating_sub(1).max(1),
                        ink,
                    );
                }
                line_y = line_y.saturating_add(block.cell.saturating_add(2));
            }
        }
        Ok(())
    }
}
