use printpdf::path::{PaintMode, WindingOrder};
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point, Polygon, Rgb,
};
use tracing::debug;

use super::layout::{DrawOp, FontStyle, PAGE_HEIGHT, PAGE_WIDTH, Rgb8, layout};
use super::{Document, ReportError};

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

impl Fonts {
    fn get(&self, style: FontStyle) -> &IndirectFontRef {
        match style {
            FontStyle::Regular => &self.regular,
            FontStyle::Bold => &self.bold,
            FontStyle::Italic => &self.italic,
        }
    }
}

fn color(rgb: Rgb8) -> Color {
    Color::Rgb(Rgb::new(
        rgb.0 as f32 / 255.0,
        rgb.1 as f32 / 255.0,
        rgb.2 as f32 / 255.0,
        None,
    ))
}

fn pdf_error(e: impl std::fmt::Debug) -> ReportError {
    ReportError::Pdf(format!("{e:?}"))
}

fn point(x: f32, y: f32) -> (Point, bool) {
    (Point::new(Mm(x), Mm(y)), false)
}

fn draw(layer: &PdfLayerReference, fonts: &Fonts, op: &DrawOp) {
    match op {
        DrawOp::Rect { x, y, width, height, fill } => {
            layer.set_fill_color(color(*fill));
            layer.add_polygon(Polygon {
                rings: vec![vec![
                    point(*x, *y),
                    point(x + width, *y),
                    point(x + width, y + height),
                    point(*x, y + height),
                ]],
                mode: PaintMode::Fill,
                winding_order: WindingOrder::NonZero,
            });
        }
        DrawOp::Line { x1, y1, x2, y2, color: stroke } => {
            layer.set_outline_color(color(*stroke));
            layer.set_outline_thickness(0.5);
            layer.add_line(Line { points: vec![point(*x1, *y1), point(*x2, *y2)], is_closed: false });
        }
        DrawOp::Text { x, y, size, style, color: fill, text } => {
            layer.set_fill_color(color(*fill));
            layer.use_text(text.as_str(), *size, Mm(*x), Mm(*y), fonts.get(*style));
        }
    }
}

/// Render a document to PDF bytes (A4, Helvetica family).
pub fn render_pdf(doc: &Document) -> Result<Vec<u8>, ReportError> {
    let pages = layout(doc);
    let (pdf, first_page, first_layer) =
        PdfDocument::new(doc.title.as_str(), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Contenu");

    let fonts = Fonts {
        regular: pdf.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: pdf.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
        italic: pdf.add_builtin_font(BuiltinFont::HelveticaOblique).map_err(pdf_error)?,
    };

    for (i, page) in pages.iter().enumerate() {
        let (page_index, layer_index) = if i == 0 {
            (first_page, first_layer)
        } else {
            pdf.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Contenu")
        };
        let layer = pdf.get_page(page_index).get_layer(layer_index);
        for op in &page.ops {
            draw(&layer, &fonts, op);
        }
    }

    debug!("Rendered '{}' on {} pages", doc.title, pages.len());
    pdf.save_to_bytes().map_err(pdf_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Block, TableStyle};
    use chrono::NaiveDate;

    #[test]
    fn renders_a_multi_page_pdf() {
        let at = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let mut doc = Document::new("Rapport", at);
        doc.push(Block::Title("Rapport d'Analyse Automatisée".into()));
        doc.push(Block::Table {
            rows: vec![("Produits analysés:".into(), "2".into())],
            style: TableStyle::Summary,
        });
        doc.push(Block::PageBreak);
        doc.push(Block::Bullet("Prix anormalement bas 🚨".into()));

        let bytes = render_pdf(&doc).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() > 500);
    }
}
