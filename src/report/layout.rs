//! Page layout in millimetres, origin at the bottom-left corner of an A4 page.
//!
//! Text width is estimated from an average Helvetica glyph width, which is
//! good enough for wrapping labels and values in the report tables.

use super::{APP_TITLE, Block, Document, TableStyle};

pub const PAGE_WIDTH: f32 = 210.0;
pub const PAGE_HEIGHT: f32 = 297.0;

const MARGIN_X: f32 = 15.0;
const CONTENT_TOP: f32 = 272.0;
const CONTENT_BOTTOM: f32 = 24.0;
const HEADER_HEIGHT: f32 = 17.0;
const LABEL_COLUMN: f32 = 55.0;
const CELL_PADDING: f32 = 2.0;
const PT_TO_MM: f32 = 0.3528;
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb8(pub u8, pub u8, pub u8);

pub const HEADER_BG: Rgb8 = Rgb8(0x1e, 0x40, 0xaf);
pub const WHITE: Rgb8 = Rgb8(0xff, 0xff, 0xff);
pub const SUBHEADER_TEXT: Rgb8 = Rgb8(0x7c, 0x3a, 0xed);
pub const DOMAIN_TEXT: Rgb8 = Rgb8(0xef, 0x44, 0x44);
pub const LABEL_TEXT: Rgb8 = Rgb8(0x37, 0x41, 0x51);
pub const VALUE_TEXT: Rgb8 = Rgb8(0x1f, 0x29, 0x37);
pub const FOOTER_TEXT: Rgb8 = Rgb8(0x6b, 0x72, 0x80);
pub const GRID_LINES: Rgb8 = Rgb8(0xe5, 0xe7, 0xeb);

impl TableStyle {
    fn background(self) -> Option<Rgb8> {
        match self {
            TableStyle::Plain => None,
            TableStyle::Summary | TableStyle::Contact => Some(Rgb8(0xf3, 0xf4, 0xf6)),
            TableStyle::Domain => Some(Rgb8(0xf0, 0xf9, 0xff)),
            TableStyle::NameServer | TableStyle::Suspicious => Some(Rgb8(0xfe, 0xf3, 0xc7)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text { x: f32, y: f32, size: f32, style: FontStyle, color: Rgb8, text: String },
    Rect { x: f32, y: f32, width: f32, height: f32, fill: Rgb8 },
    Line { x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb8 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub ops: Vec<DrawOp>,
}

#[cfg(test)]
impl PageLayout {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Keep what the PDF base fonts can encode (Latin-1 plus a few typographic
/// substitutes); emojis and other symbols are dropped.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201c}' | '\u{201d}' => out.push('"'),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{2022}' => out.push('-'),
            '\t' | '\n' | '\r' => out.push(' '),
            c if (c as u32) < 0x20 => {}
            c if (c as u32) <= 0xff => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * AVG_GLYPH_WIDTH * PT_TO_MM
}

fn line_height(size: f32) -> f32 {
    size * PT_TO_MM * 1.35
}

/// Greedy word wrap; words longer than a line are split.
pub fn wrap(text: &str, max_width: f32, size: f32) -> Vec<String> {
    let max_chars = ((max_width / (size * AVG_GLYPH_WIDTH * PT_TO_MM)).floor() as usize).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct Cursor {
    pages: Vec<PageLayout>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self { pages: vec![PageLayout::default()], y: CONTENT_TOP }
    }

    fn page(&mut self) -> &mut PageLayout {
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn new_page(&mut self) {
        self.pages.push(PageLayout::default());
        self.y = CONTENT_TOP;
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < CONTENT_BOTTOM && self.y < CONTENT_TOP {
            self.new_page();
        }
    }

    fn paragraph(&mut self, text: &str, size: f32, style: FontStyle, color: Rgb8, indent: f32) {
        let width = PAGE_WIDTH - 2.0 * MARGIN_X - indent;
        let lh = line_height(size);
        for line in wrap(&sanitize(text), width, size) {
            self.ensure(lh);
            self.y -= lh;
            let y = self.y + lh * 0.25;
            self.page().ops.push(DrawOp::Text { x: MARGIN_X + indent, y, size, style, color, text: line });
        }
    }

    /// Text lines of height `lh` that still fit in a table row on this page.
    fn lines_fitting(&self, lh: f32) -> usize {
        ((self.y - CONTENT_BOTTOM - 2.0 * CELL_PADDING) / lh).floor().max(0.0) as usize
    }

    fn table_row(&mut self, label: &str, value: &str, style: TableStyle) {
        let size = 9.0;
        let lh = line_height(size);
        let value_width = PAGE_WIDTH - 2.0 * MARGIN_X - LABEL_COLUMN;
        let label_lines = wrap(&sanitize(label), LABEL_COLUMN - 2.0 * CELL_PADDING, size);
        let value_lines = wrap(&sanitize(value), value_width - 2.0 * CELL_PADDING, size);
        let rows = label_lines.len().max(value_lines.len()).max(1);
        let per_page = ((CONTENT_TOP - CONTENT_BOTTOM - 2.0 * CELL_PADDING) / lh).floor() as usize;

        // A row moves to the next page when it fits there; a row taller than
        // a page is split and continues on the following pages.
        let mut first = 0;
        while first < rows {
            let remaining = rows - first;
            let mut available = self.lines_fitting(lh);
            if available < remaining && (remaining <= per_page || available == 0) && self.y < CONTENT_TOP {
                self.new_page();
                available = self.lines_fitting(lh);
            }
            let count = remaining.min(available.max(1));
            self.row_slice(&label_lines, &value_lines, first, count, style);
            first += count;
        }
    }

    /// Draw lines `first..first + count` of a table row at the cursor.
    fn row_slice(&mut self, labels: &[String], values: &[String], first: usize, count: usize, style: TableStyle) {
        let size = 9.0;
        let lh = line_height(size);
        let height = count as f32 * lh + 2.0 * CELL_PADDING;
        let top = self.y;
        let bottom = top - height;
        let full_width = PAGE_WIDTH - 2.0 * MARGIN_X;

        let page = self.page();
        if let Some(fill) = style.background() {
            page.ops.push(DrawOp::Rect { x: MARGIN_X, y: bottom, width: full_width, height, fill });
        }
        page.ops.push(DrawOp::Line {
            x1: MARGIN_X,
            y1: bottom,
            x2: MARGIN_X + full_width,
            y2: bottom,
            color: GRID_LINES,
        });
        let columns = [
            (labels, MARGIN_X + CELL_PADDING, FontStyle::Bold, LABEL_TEXT),
            (values, MARGIN_X + LABEL_COLUMN + CELL_PADDING, FontStyle::Regular, VALUE_TEXT),
        ];
        for (lines, x, font, color) in columns {
            for (i, line) in lines.iter().skip(first).take(count).enumerate() {
                page.ops.push(DrawOp::Text {
                    x,
                    y: top - CELL_PADDING - (i as f32 + 1.0) * lh + lh * 0.25,
                    size,
                    style: font,
                    color,
                    text: line.clone(),
                });
            }
        }
        self.y = bottom;
    }
}

fn decorate(page: &mut PageLayout, number: usize, doc: &Document) {
    page.ops.insert(
        0,
        DrawOp::Rect {
            x: 0.0,
            y: PAGE_HEIGHT - HEADER_HEIGHT,
            width: PAGE_WIDTH,
            height: HEADER_HEIGHT,
            fill: HEADER_BG,
        },
    );
    let band_text_y = PAGE_HEIGHT - HEADER_HEIGHT / 2.0 - 1.5;
    page.ops.push(DrawOp::Text {
        x: MARGIN_X,
        y: band_text_y,
        size: 12.0,
        style: FontStyle::Bold,
        color: WHITE,
        text: sanitize(APP_TITLE),
    });
    page.ops.push(DrawOp::Text {
        x: PAGE_WIDTH - MARGIN_X - 18.0,
        y: band_text_y,
        size: 10.0,
        style: FontStyle::Regular,
        color: WHITE,
        text: format!("Page {number}"),
    });

    page.ops.push(DrawOp::Line {
        x1: MARGIN_X,
        y1: 18.0,
        x2: PAGE_WIDTH - MARGIN_X,
        y2: 18.0,
        color: FOOTER_TEXT,
    });
    page.ops.push(DrawOp::Text {
        x: MARGIN_X,
        y: 12.0,
        size: 8.0,
        style: FontStyle::Italic,
        color: FOOTER_TEXT,
        text: "Confidentiel - Tunisian Customs Authority".to_string(),
    });
    page.ops.push(DrawOp::Text {
        x: PAGE_WIDTH - MARGIN_X - 48.0,
        y: 12.0,
        size: 8.0,
        style: FontStyle::Italic,
        color: FOOTER_TEXT,
        text: sanitize(&format!("Généré le {}", doc.generated_at.format("%d/%m/%Y à %H:%M"))),
    });
}

/// Lay the document out page by page, header band and footer included.
pub fn layout(doc: &Document) -> Vec<PageLayout> {
    let mut cursor = Cursor::new();

    for block in &doc.blocks {
        match block {
            Block::Title(text) => cursor.paragraph(text, 16.0, FontStyle::Bold, SUBHEADER_TEXT, 0.0),
            Block::Heading(text) => cursor.paragraph(text, 13.0, FontStyle::Bold, DOMAIN_TEXT, 0.0),
            Block::Label(text) => {
                cursor.y -= 1.5;
                cursor.paragraph(text, 11.0, FontStyle::Bold, LABEL_TEXT, 0.0)
            }
            Block::Text(text) => cursor.paragraph(text, 10.0, FontStyle::Regular, VALUE_TEXT, 0.0),
            Block::Bullet(text) => {
                cursor.paragraph(&format!("- {text}"), 10.0, FontStyle::Regular, VALUE_TEXT, 4.0)
            }
            Block::Footnote(text) => cursor.paragraph(text, 8.0, FontStyle::Italic, FOOTER_TEXT, 0.0),
            Block::Table { rows, style } => {
                for (label, value) in rows {
                    cursor.table_row(label, value, *style);
                }
            }
            Block::Spacer(mm) => {
                if cursor.y - mm < CONTENT_BOTTOM {
                    cursor.new_page();
                } else {
                    cursor.y -= mm;
                }
            }
            Block::PageBreak => cursor.new_page(),
        }
    }

    let mut pages = cursor.pages;
    for (i, page) in pages.iter_mut().enumerate() {
        decorate(page, i + 1, doc);
    }
    pages
}
