//! PDF rendering of billing documents.
//!
//! Layout is a single A4 column drawn with the built-in Helvetica faces.
//! Those faces only cover Latin-1, so other characters print as `?`.

use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::io::BufWriter;

use crate::models::{DocumentDetail, DocumentType};
use crate::services::metrics::{PDF_RENDERED_TOTAL, PDF_RENDER_DURATION};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN_LEFT: f32 = 15.0;
const MARGIN_RIGHT: f32 = 195.0;
const TOP: f32 = 282.0;
const BOTTOM: f32 = 25.0;

const X_DESC: f32 = 15.0;
const X_QTY: f32 = 118.0;
const X_UNIT: f32 = 140.0;
const X_TOTAL: f32 = 170.0;
const DESC_WRAP: usize = 55;

const CURRENCY: &str = "ILS";

/// Render on the blocking pool; layout is CPU-bound.
pub async fn render_document_pdf(detail: DocumentDetail) -> Result<Vec<u8>, AppError> {
    let kind = detail.document.kind();
    let timer = PDF_RENDER_DURATION
        .with_label_values(&[kind.as_str()])
        .start_timer();

    let bytes = tokio::task::spawn_blocking(move || render_document(&detail))
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("PDF render task failed: {}", e)))??;

    timer.observe_duration();
    PDF_RENDERED_TOTAL.with_label_values(&[kind.as_str()]).inc();

    Ok(bytes)
}

/// Render a document to PDF bytes.
pub fn render_document(detail: &DocumentDetail) -> Result<Vec<u8>, AppError> {
    let document = &detail.document;
    let kind = document.kind();
    let title = format!("{} #{}", kind.title(), document.document_number);

    let mut page = PageWriter::new(&title)?;

    // Business header
    let business = &detail.user;
    page.text(&business.business_name, 16.0, MARGIN_LEFT, true);
    page.text(&title, 14.0, 125.0, true);
    page.advance(7.0);
    if let Some(address) = &business.address {
        page.text(address, 10.0, MARGIN_LEFT, false);
    }
    page.text(
        &format!("Issue date: {}", document.issue_date.format("%d/%m/%Y")),
        10.0,
        125.0,
        false,
    );
    page.advance(5.0);
    if let Some(phone) = &business.phone {
        page.text(&format!("Phone: {}", phone), 10.0, MARGIN_LEFT, false);
    }
    if let Some(due) = document.due_date {
        page.text(
            &format!("Due date: {}", due.format("%d/%m/%Y")),
            10.0,
            125.0,
            false,
        );
    }
    page.advance(5.0);
    if let Some(business_id) = &business.business_id {
        page.text(&format!("Business ID: {}", business_id), 10.0, MARGIN_LEFT, false);
    }
    page.text(&format!("Status: {}", document.status), 10.0, 125.0, false);
    page.advance(5.0);
    page.text(&business.email, 10.0, MARGIN_LEFT, false);
    page.advance(6.0);
    page.rule();
    page.advance(9.0);

    // Client block
    let client = &detail.client;
    page.text("Bill to:", 12.0, MARGIN_LEFT, true);
    page.advance(6.0);
    page.text(&client.name, 10.0, MARGIN_LEFT, false);
    page.advance(5.0);
    let client_lines = [
        client.business_id.as_ref().map(|id| format!("Business ID: {}", id)),
        match (&client.address, &client.city) {
            (Some(address), Some(city)) => Some(format!("{}, {}", address, city)),
            (Some(address), None) => Some(address.clone()),
            (None, Some(city)) => Some(city.clone()),
            (None, None) => None,
        },
        client.phone.as_ref().map(|p| format!("Phone: {}", p)),
        client.email.clone(),
    ];
    for line in client_lines.into_iter().flatten() {
        page.text(&line, 10.0, MARGIN_LEFT, false);
        page.advance(5.0);
    }
    page.advance(6.0);

    // Items table
    page.table_header();
    for (idx, entry) in detail.items.iter().enumerate() {
        let item = &entry.item;
        let lines = wrap(&format!("{}. {}", idx + 1, item.description), DESC_WRAP);
        let row_height = 6.0 + 4.5 * (lines.len().saturating_sub(1) as f32);
        if page.needs_break(row_height) {
            page.new_page();
            page.table_header();
        }

        page.text(&format_quantity(item.quantity), 10.0, X_QTY, false);
        page.text(&format_money(item.unit_price), 10.0, X_UNIT, false);
        page.text(&format_money(item.total), 10.0, X_TOTAL, true);
        for (n, line) in lines.iter().enumerate() {
            if n > 0 {
                page.advance(4.5);
            }
            page.text(line, 10.0, X_DESC, false);
        }
        page.advance(6.0);
    }

    // Totals
    if page.needs_break(30.0) {
        page.new_page();
    }
    page.advance(-2.0);
    page.rule();
    page.advance(8.0);
    page.text("Subtotal:", 11.0, X_UNIT - 10.0, false);
    page.text(&format_money(document.subtotal), 11.0, X_TOTAL, true);
    if kind != DocumentType::Quote {
        page.advance(6.0);
        page.text(
            &format!("VAT ({}%):", document.vat_rate.normalize()),
            11.0,
            X_UNIT - 10.0,
            false,
        );
        page.text(&format_money(document.vat_amount), 11.0, X_TOTAL, true);
    }
    page.advance(7.0);
    page.text("TOTAL:", 13.0, X_UNIT - 10.0, true);
    page.text(
        &format!("{} {}", format_money(document.total), CURRENCY),
        13.0,
        X_TOTAL - 5.0,
        true,
    );

    // Notes
    if let Some(notes) = document.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        page.advance(14.0);
        if page.needs_break(12.0) {
            page.new_page();
        }
        page.text("Notes:", 11.0, MARGIN_LEFT, true);
        page.advance(6.0);
        for raw in notes.lines() {
            for line in wrap(raw, 90) {
                if page.needs_break(5.0) {
                    page.new_page();
                }
                page.text(&line, 10.0, MARGIN_LEFT, false);
                page.advance(5.0);
            }
        }
    }

    page.finish()
}

/// Cursor over the current page; breaks onto fresh pages on demand.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    font_bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, AppError> {
        let (doc, page, layer) =
            PdfDocument::new(pdf_text(title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let layer = doc.get_page(page).get_layer(layer);

        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to load font: {}", e)))?;
        let font_bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to load font: {}", e)))?;

        Ok(Self {
            doc,
            layer,
            font,
            font_bold,
            y: TOP,
            pages: 1,
        })
    }

    fn text(&self, text: &str, size: f32, x: f32, bold: bool) {
        let font = if bold { &self.font_bold } else { &self.font };
        self.layer
            .use_text(pdf_text(text), size, Mm(x), Mm(self.y), font);
    }

    fn advance(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn rule(&self) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(MARGIN_LEFT), Mm(self.y)), false),
                (Point::new(Mm(MARGIN_RIGHT), Mm(self.y)), false),
            ],
            is_closed: false,
        });
    }

    fn needs_break(&self, height: f32) -> bool {
        self.y - height < BOTTOM
    }

    fn new_page(&mut self) {
        self.footer();
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = TOP;
        self.pages += 1;
    }

    fn table_header(&mut self) {
        self.text("Description", 10.0, X_DESC, true);
        self.text("Qty", 10.0, X_QTY, true);
        self.text("Unit price", 10.0, X_UNIT, true);
        self.text("Total", 10.0, X_TOTAL, true);
        self.advance(3.5);
        self.rule();
        self.advance(6.5);
    }

    fn footer(&self) {
        self.layer.use_text(
            format!("Page {}", self.pages),
            8.0,
            Mm(MARGIN_RIGHT - 15.0),
            Mm(12.0),
            &self.font,
        );
    }

    fn finish(self) -> Result<Vec<u8>, AppError> {
        self.footer();

        let mut writer = BufWriter::new(Vec::<u8>::new());
        self.doc
            .save(&mut writer)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to write PDF: {}", e)))?;
        writer
            .into_inner()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to flush PDF: {}", e)))
    }
}

/// Replace characters the built-in fonts cannot encode.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\t' => ' ',
            ' '..='~' | '\u{a0}'..='\u{ff}' => c,
            _ => '?',
        })
        .collect()
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// `1234.5` -> `1,234.50`.
pub fn format_money(value: Decimal) -> String {
    let fixed = format!("{:.2}", value.round_dp(2));
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", sign, grouped, frac_part)
}

fn format_quantity(value: Decimal) -> String {
    value.normalize().to_string()
}
