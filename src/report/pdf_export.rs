use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use super::{ReportError, ReportTable};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;
const ROW_HEIGHT: f32 = 6.0;
const BODY_SIZE: f32 = 9.0;
const TITLE_SIZE: f32 = 14.0;
/// Rough Helvetica advance at `BODY_SIZE`, used to clip long cells.
const CHAR_WIDTH_MM: f32 = 1.8;

pub const ROWS_PER_PAGE: usize = 40;

pub fn page_count(rows: usize) -> usize {
    rows.div_ceil(ROWS_PER_PAGE).max(1)
}

/// Clips `text` to `max_chars`, marking the cut with "..".
fn fit(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(2);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("..");
    out
}

fn pdf_error<E: std::fmt::Debug>(e: E) -> ReportError {
    ReportError::Pdf(format!("{:?}", e))
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

fn draw_row(
    layer: &PdfLayerReference,
    cells: &[String],
    y: f32,
    column_width: f32,
    font: &IndirectFontRef,
) {
    let max_chars = (column_width / CHAR_WIDTH_MM) as usize;
    for (i, cell) in cells.iter().enumerate() {
        let x = MARGIN + column_width * i as f32;
        layer.use_text(fit(cell, max_chars), BODY_SIZE, Mm(x), Mm(y), font);
    }
}

fn draw_page(
    layer: &PdfLayerReference,
    table: &ReportTable,
    rows: &[Vec<String>],
    page_no: usize,
    pages: usize,
    fonts: &Fonts,
) {
    let columns = table.headers.len().max(1) as f32;
    let column_width = (PAGE_WIDTH - 2.0 * MARGIN) / columns;

    let mut y = PAGE_HEIGHT - MARGIN;
    layer.use_text(table.title.as_str(), TITLE_SIZE, Mm(MARGIN), Mm(y), &fonts.bold);

    y -= ROW_HEIGHT * 2.0;
    draw_row(layer, &table.headers, y, column_width, &fonts.bold);

    for row in rows {
        y -= ROW_HEIGHT;
        draw_row(layer, row, y, column_width, &fonts.regular);
    }

    layer.use_text(
        format!("Page {} of {}", page_no, pages),
        BODY_SIZE,
        Mm(PAGE_WIDTH - MARGIN - 25.0),
        Mm(MARGIN / 2.0),
        &fonts.regular,
    );
}

/// A4 portrait, `ROWS_PER_PAGE` rows per page, title and header repeated on
/// every page.
pub fn to_pdf(table: &ReportTable) -> Result<Vec<u8>, ReportError> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        table.title.as_str(),
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Page 1",
    );
    let fonts = Fonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
    };

    let pages = page_count(table.rows.len());
    let mut chunks = table.rows.chunks(ROWS_PER_PAGE);

    let layer = doc.get_page(first_page).get_layer(first_layer);
    draw_page(&layer, table, chunks.next().unwrap_or(&[]), 1, pages, &fonts);

    for (i, chunk) in chunks.enumerate() {
        let page_no = i + 2;
        let (page, layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), format!("Page {}", page_no));
        let layer = doc.get_page(page).get_layer(layer);
        draw_page(&layer, table, chunk, page_no, pages, &fonts);
    }

    doc.save_to_bytes().map_err(pdf_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_hold_a_fixed_number_of_rows() {
        assert_eq!(page_count(0), 1);
        assert_eq!(page_count(ROWS_PER_PAGE), 1);
        assert_eq!(page_count(ROWS_PER_PAGE + 1), 2);
        assert_eq!(page_count(ROWS_PER_PAGE * 3), 3);
    }

    #[test]
    fn long_cells_are_clipped() {
        assert_eq!(fit("Cement", 10), "Cement");
        assert_eq!(fit("Galvanized iron sheet", 10), "Galvaniz..");
    }

    #[test]
    fn renders_a_pdf_document() {
        let mut table = ReportTable::new("Deliveries by status", ["Status", "Count"]);
        for i in 0..(ROWS_PER_PAGE + 5) {
            table.push_row(vec![format!("status-{}", i), i.to_string()]);
        }
        let bytes = to_pdf(&table).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
