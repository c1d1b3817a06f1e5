//! Block layout of a parsed HTML document.
//!
//! Stacks headings and paragraphs vertically as wireframe blocks: enough
//! structure to produce a deterministic raster of the page and to measure
//! its natural height for full-page captures.

use scraper::{Html, Selector};

// Base glyph cell in pixels before scale and zoom are applied.
const GLYPH: u32 = 8;
const PAGE_MARGIN: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading,
    Paragraph,
}

/// One laid-out text block with its wrapped lines.
#[derive(Debug, Clone)]
pub struct Block {
    pub rect: Rect,
    pub lines: Vec<String>,
    pub kind: BlockKind,
    /// Glyph cell size for this block, zoom already applied
    pub cell: u32,
}

#[derive(Debug, Clone)]
pub struct PageLayout {
    pub blocks: Vec<Block>,
    /// Bottom of the last block plus margin; what the page would report as
    /// its scroll height
    pub natural_height: u32,
}

/// Lay the document out at the given content width and zoom factor.
pub fn layout_document(document: &Html, width: u32, zoom: f32) -> PageLayout {
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };
    let cell = ((GLYPH as f32) * zoom).round().max(1.0) as u32;
    let content_width = width.saturating_sub(PAGE_MARGIN * 2).max(cell);

    let mut blocks = Vec::new();
    let mut y = PAGE_MARGIN;

    let heading_sel = Selector::parse("h1, h2, h3").unwrap();
    let title_sel = Selector::parse("title").unwrap();
    let para_sel = Selector::parse("p, li, pre, blockquote").unwrap();

    let mut texts: Vec<(BlockKind, String)> = Vec::new();
    let heading = document
        .select(&heading_sel)
        .next()
        .or_else(|| document.select(&title_sel).next());
    if let Some(heading) = heading {
        let text = heading.text().collect::<String>();
        if !text.trim().is_empty() {
            texts.push((BlockKind::Heading, text.trim().to_string()));
        }
    }
    for node in document.select(&para_sel) {
        let text = node.text().collect::<String>();
        if !text.trim().is_empty() {
            texts.push((BlockKind::Paragraph, text.trim().to_string()));
        }
    }
    // Pages without any block elements still get their body text as one block.
    if texts.is_empty() {
        let body_sel = Selector::parse("body").unwrap();
        if let Some(body) = document.select(&body_sel).next() {
            let text = body.text().collect::<String>();
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                texts.push((BlockKind::Paragraph, collapsed));
            }
        }
    }

    for (kind, text) in texts {
        let scale = match kind {
            BlockKind::Heading => 2,
            BlockKind::Paragraph => 1,
        };
        let block_cell = cell.saturating_mul(scale);
        let padding = block_cell / 2 + 2;
        let chars_per_line = (content_width.saturating_sub(padding.saturating_mul(2))
            / block_cell)
            .max(1) as usize;
        let lines = wrap(&text, chars_per_line);
        // Saturating: pathological documents or zoom factors must pin the
        // metrics at u32::MAX, not wrap around.
        let height = (lines.len() as u32)
            .saturating_mul(block_cell.saturating_add(2))
            .saturating_add(padding.saturating_mul(2));

        blocks.push(Block {
            rect: Rect {
                x: PAGE_MARGIN,
                y,
                width: content_width,
                height,
            },
            lines,
            kind,
            cell: block_cell,
        });
        y = y.saturating_add(height).saturating_add(PAGE_MARGIN);
    }

    PageLayout {
        blocks,
        natural_height: y,
    }
}

fn wrap(text: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > chars_per_line {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
