//! PDF reports: a small document model, the two French-language reports built
//! on it, and a printpdf renderer.

use chrono::NaiveDateTime;
use thiserror::Error;

pub mod content;
pub mod layout;
pub mod pdf;

pub use content::{analysis_document, whois_document};
pub use pdf::render_pdf;

pub const APP_TITLE: &str = "Douane - Détecteur de Produits Illicites";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("PDF rendering failed: {0}")]
    Pdf(String),
    #[error("could not write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Background palette of a two-column table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    Plain,
    Summary,
    Domain,
    Contact,
    NameServer,
    Suspicious,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Heading(String),
    Label(String),
    Text(String),
    Bullet(String),
    Table { rows: Vec<(String, String)>, style: TableStyle },
    /// Vertical gap in millimetres
    Spacer(f32),
    PageBreak,
    Footnote(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub generated_at: NaiveDateTime,
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new(title: impl Into<String>, generated_at: NaiveDateTime) -> Self {
        Self { title: title.into(), generated_at, blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn table(&mut self, rows: Vec<(String, String)>, style: TableStyle) {
        if !rows.is_empty() {
            self.blocks.push(Block::Table { rows, style });
        }
    }

    /// Every piece of text in reading order; handy for assertions and logs.
    pub fn plain_text(&self) -> String {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Title(t)
                | Block::Heading(t)
                | Block::Label(t)
                | Block::Text(t)
                | Block::Bullet(t)
                | Block::Footnote(t) => out.push(t.clone()),
                Block::Table { rows, .. } => {
                    out.extend(rows.iter().map(|(label, value)| format!("{label} {value}")))
                }
                Block::Spacer(_) | Block::PageBreak => {}
            }
        }
        out.join("\n")
    }
}

fn file_stem_part(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_whitespace() || matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

pub fn whois_file_name(domain: &str, now: NaiveDateTime) -> String {
    format!("whois_{}_{}.pdf", file_stem_part(domain), now.format("%Y%m%d_%H%M%S"))
}

pub fn analysis_file_name(category: &str, now: NaiveDateTime) -> String {
    format!("analyse_produits_{}_{}.pdf", file_stem_part(category), now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 3).unwrap().and_hms_opt(14, 5, 9).unwrap()
    }

    #[test]
    fn file_names_carry_timestamp() {
        assert_eq!(whois_file_name("shop.tn", at()), "whois_shop.tn_20250603_140509.pdf");
        assert_eq!(
            analysis_file_name("produits électroniques", at()),
            "analyse_produits_produits_électroniques_20250603_140509.pdf"
        );
    }

    #[test]
    fn empty_tables_are_skipped() {
        let mut doc = Document::new("t", at());
        doc.table(Vec::new(), TableStyle::Plain);
        doc.table(vec![("a".into(), "b".into())], TableStyle::Summary);
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.plain_text(), "a b");
    }
}
