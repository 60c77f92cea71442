//! PDF report of collected captures
//!
//! A4 pages, top to bottom: three caption lines per capture followed by the
//! snapshot scaled to a fixed width. Positions are laid out in millimetres
//! from the top-left corner and converted to PDF points when written.
//!
//! Caption text is either drawn by the host (a [`TextRasterizer`] returning a
//! PNG, which keeps Hangul legible) or set in the built-in Helvetica font,
//! which only covers WinAnsi characters.

use std::cmp::Ordering;

use cg_core::artifact::decode_data_uri;
use cg_core::{Artifact, ArtifactKind, CaptureRecord, Labels, ModerationStore};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use crate::ExportError;

// =============================================================================
// Layout
// =============================================================================

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const LEFT_MM: f32 = 10.0;
const TOP_MM: f32 = 10.0;
/// A capture starting below this line goes to a new page
const PAGE_BREAK_MM: f32 = 250.0;
const IMAGE_OFFSET_MM: f32 = 15.0;
const IMAGE_WIDTH_MM: f32 = 180.0;
const ITEM_GAP_MM: f32 = 25.0;
const FAILED_ADVANCE_MM: f32 = 20.0;
/// Offset and height of each caption line
const CAPTION_LINES: [(f32, f32); 3] = [(0.0, 4.0), (5.0, 3.0), (9.0, 4.0)];

const JPEG_QUALITY: u8 = 90;
const FONT: Name<'static> = Name(b"F1");

fn pt(mm: f32) -> f32 {
    mm * 72.0 / 25.4
}

/// Where one capture block starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub page: usize,
    pub y: f32,
}

/// Place capture blocks given the drawn height of each snapshot, `None` for
/// snapshots that could not be decoded.
pub fn layout(heights: &[Option<f32>]) -> Vec<Slot> {
    let mut page = 0;
    let mut y = TOP_MM;
    heights
        .iter()
        .map(|height| {
            if y > PAGE_BREAK_MM {
                page += 1;
                y = TOP_MM;
            }
            let slot = Slot { page, y };
            y += match height {
                Some(height) => height + ITEM_GAP_MM,
                None => FAILED_ADVANCE_MM,
            };
            slot
        })
        .collect()
}

// =============================================================================
// Options
// =============================================================================

/// Order of captures in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Draws one caption line into a PNG data URI.
pub trait TextRasterizer {
    fn rasterize(&self, text: &str) -> Result<String, ExportError>;
}

/// How caption lines are written.
#[derive(Clone, Copy, Default)]
pub enum TextMode<'a> {
    /// Built-in Helvetica; characters outside WinAnsi print as `?`
    #[default]
    BuiltinFont,
    /// Host-drawn images, falling back to the built-in font on failure
    Raster(&'a dyn TextRasterizer),
}

#[derive(Clone, Default)]
pub struct PdfOptions<'a> {
    pub order: CaptureOrder,
    /// Restrict the report to these comment ids
    pub ids: Option<Vec<String>>,
    pub text: TextMode<'a>,
    pub labels: Labels,
}

pub fn pdf_filename(date: &str) -> String {
    format!("chzzk_comment_report_{}.pdf", date)
}

/// Captures in report order, optionally restricted to a subset of ids.
pub fn select_captures<'s>(
    store: &'s ModerationStore,
    order: CaptureOrder,
    ids: Option<&[String]>,
) -> Vec<&'s CaptureRecord> {
    let mut records: Vec<&CaptureRecord> = store
        .capture_records()
        .filter(|record| ids.map_or(true, |ids| ids.contains(&record.comment_id)))
        .collect();
    let oldest_first = |a: &&CaptureRecord, b: &&CaptureRecord| -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.captured_at.cmp(&b.captured_at))
    };
    match order {
        CaptureOrder::OldestFirst => records.sort_by(oldest_first),
        CaptureOrder::NewestFirst => records.sort_by(|a, b| oldest_first(b, a)),
    }
    records
}

/// The three caption lines of the `index`-th capture.
pub fn caption_lines(index: usize, record: &CaptureRecord, labels: &Labels) -> [String; 3] {
    let or = |value: &str, fallback: &str| {
        if value.is_empty() {
            fallback.to_string()
        } else {
            value.to_string()
        }
    };
    [
        format!(
            "[{}] {} | {} | URL: {}",
            index + 1,
            or(&record.streamer_name, &labels.unknown),
            or(&record.title, &labels.untitled),
            record.page_url
        ),
        format!("캡처일: {}", record.captured_at),
        format!(
            "User: {} (UID: {})",
            or(&record.display_name, &labels.unknown),
            record.author_id
        ),
    ]
}

/// Map text to WinAnsi bytes, replacing what the encoding lacks.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            code @ (0x20..=0x7e | 0xa0..=0xff) => code as u8,
            _ => b'?',
        })
        .collect()
}

// =============================================================================
// Images
// =============================================================================

/// A snapshot re-encoded as baseline JPEG on a white background.
struct JpegImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl JpegImage {
    fn from_data_uri(uri: &str) -> Result<Self, ExportError> {
        let bytes = decode_data_uri(uri).ok_or(ExportError::InvalidDataUri)?;
        let rgba = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(ExportError::EmptyImage);
        }

        let mut rgb = RgbImage::new(width, height);
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = u32::from(pixel[3]);
            let over_white = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
            rgb.put_pixel(x, y, Rgb([over_white(pixel[0]), over_white(pixel[1]), over_white(pixel[2])]));
        }

        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY).encode_image(&rgb)?;
        Ok(Self { data, width, height })
    }

    /// Drawn height in millimetres at `width_mm`, keeping the aspect ratio.
    fn height_at(&self, width_mm: f32) -> f32 {
        self.height as f32 * width_mm / self.width as f32
    }
}

// =============================================================================
// Document Writer
// =============================================================================

struct PageContent {
    content: Content,
    x_objects: Vec<(String, Ref)>,
    uses_font: bool,
}

struct DocumentWriter {
    pdf: Pdf,
    next_id: i32,
    pages: Vec<PageContent>,
}

impl DocumentWriter {
    fn new(page_count: usize) -> Self {
        Self {
            pdf: Pdf::new(),
            next_id: 1,
            pages: (0..page_count)
                .map(|_| PageContent {
                    content: Content::new(),
                    x_objects: Vec::new(),
                    uses_font: false,
                })
                .collect(),
        }
    }

    fn alloc(&mut self) -> Ref {
        let id = Ref::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn image(&mut self, page: usize, x: f32, y: f32, width: f32, height: f32, image: &JpegImage) {
        let id = self.alloc();
        {
            let mut xobject = self.pdf.image_xobject(id, &image.data);
            xobject.filter(Filter::DctDecode);
            xobject.width(image.width as i32);
            xobject.height(image.height as i32);
            xobject.color_space().device_rgb();
            xobject.bits_per_component(8);
        }

        let name = format!("Im{}", id.get());
        let page = &mut self.pages[page];
        page.content
            .save_state()
            .transform([pt(width), 0.0, 0.0, pt(height), pt(x), pt(PAGE_HEIGHT_MM - y - height)])
            .x_object(Name(name.as_bytes()))
            .restore_state();
        page.x_objects.push((name, id));
    }

    /// A caption line image `height` tall, as wide as its aspect ratio asks.
    fn line_image(&mut self, page: usize, x: f32, y: f32, height: f32, image: &JpegImage) {
        let width = image.width as f32 * height / image.height as f32;
        self.image(page, x, y, width, height, image);
    }

    /// A caption line in the built-in font, filling `height` of line box.
    fn text(&mut self, page: usize, x: f32, y: f32, height: f32, text: &str) {
        let bytes = win_ansi(text);
        let page = &mut self.pages[page];
        page.content
            .begin_text()
            .set_font(FONT, pt(height) * 0.8)
            .next_line(pt(x), pt(PAGE_HEIGHT_MM - y - height * 0.8))
            .show(Str(&bytes))
            .end_text();
        page.uses_font = true;
    }

    fn finish(mut self) -> Vec<u8> {
        let catalog_id = self.alloc();
        let tree_id = self.alloc();
        let font_id = self.alloc();
        let pages = std::mem::take(&mut self.pages);
        let ids: Vec<(Ref, Ref)> = pages.iter().map(|_| (self.alloc(), self.alloc())).collect();

        let mut pdf = self.pdf;
        pdf.catalog(catalog_id).pages(tree_id);
        pdf.pages(tree_id)
            .kids(ids.iter().map(|(page_id, _)| *page_id))
            .count(ids.len() as i32);
        if pages.iter().any(|page| page.uses_font) {
            pdf.type1_font(font_id)
                .base_font(Name(b"Helvetica"))
                .encoding_predefined(Name(b"WinAnsiEncoding"));
        }

        for (page_content, (page_id, content_id)) in pages.into_iter().zip(ids) {
            {
                let mut page = pdf.page(page_id);
                page.media_box(Rect::new(0.0, 0.0, pt(PAGE_WIDTH_MM), pt(PAGE_HEIGHT_MM)));
                page.parent(tree_id);
                page.contents(content_id);
                let mut resources = page.resources();
                if page_content.uses_font {
                    resources.fonts().pair(FONT, font_id);
                }
                resources
                    .x_objects()
                    .pairs(page_content.x_objects.iter().map(|(name, id)| (Name(name.as_bytes()), *id)));
            }
            // The page dictionary is written once its writer drops.
            pdf.stream(content_id, &page_content.content.finish());
        }
        pdf.finish()
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render captures, in the given order, into a PDF document.
///
/// Snapshots that fail to decode are logged and leave a gap; they never abort
/// the report.
pub fn render_pdf(records: &[&CaptureRecord], options: &PdfOptions<'_>) -> Result<Vec<u8>, ExportError> {
    if records.is_empty() {
        return Err(ExportError::NoCaptures);
    }

    let images: Vec<Option<JpegImage>> = records
        .iter()
        .map(|record| match JpegImage::from_data_uri(&record.image) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("pdf: capture {} skipped: {}", record.comment_id, e);
                None
            }
        })
        .collect();
    let heights: Vec<Option<f32>> = images
        .iter()
        .map(|image| image.as_ref().map(|image| image.height_at(IMAGE_WIDTH_MM)))
        .collect();
    let slots = layout(&heights);
    let page_count = slots.last().map_or(1, |slot| slot.page + 1);

    let mut writer = DocumentWriter::new(page_count);
    for (index, ((record, image), slot)) in records.iter().zip(&images).zip(&slots).enumerate() {
        let lines = caption_lines(index, record, &options.labels);
        for ((offset, height), line) in CAPTION_LINES.iter().zip(&lines) {
            let y = slot.y + offset;
            let raster = match options.text {
                TextMode::BuiltinFont => None,
                TextMode::Raster(rasterizer) => match rasterizer
                    .rasterize(line)
                    .and_then(|uri| JpegImage::from_data_uri(&uri))
                {
                    Ok(image) => Some(image),
                    Err(e) => {
                        log::warn!("pdf: caption drawn with built-in font: {}", e);
                        None
                    }
                },
            };
            match raster {
                Some(image) => writer.line_image(slot.page, LEFT_MM, y, *height, &image),
                None => writer.text(slot.page, LEFT_MM, y, *height, line),
            }
        }
        if let Some(image) = image {
            let height = image.height_at(IMAGE_WIDTH_MM);
            writer.image(slot.page, LEFT_MM, slot.y + IMAGE_OFFSET_MM, IMAGE_WIDTH_MM, height, image);
        }
    }

    log::info!("pdf: {} captures on {} pages", records.len(), page_count);
    Ok(writer.finish())
}

/// Build the PDF artifact from the store's captures.
pub fn export_pdf(store: &ModerationStore, options: &PdfOptions<'_>, date: &str) -> Result<Artifact, ExportError> {
    let records = select_captures(store, options.order, options.ids.as_deref());
    let bytes = render_pdf(&records, options)?;
    Ok(Artifact::from_bytes(ArtifactKind::Pdf, &pdf_filename(date), bytes))
}
