//! Minimal PDF 1.4 writer.
//!
//! Supports exactly what the report needs: base-14 Helvetica text in WinAnsi
//! encoding, filled rectangles, stroked lines and image XObjects. Page content
//! streams are written uncompressed; image samples arrive already encoded
//! (DCT or Flate). The object layout is fixed:
//!
//! ```text
//! 1 catalog · 2 page tree · 3 F1 · 4 F2 · 5 info · images… · (page, contents)…
//! ```

use std::fmt::Write as _;

use super::font::{encode_win_ansi, StandardFont};
use super::layout::Rgb;

/// Magic header every produced buffer starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const INFO_ID: usize = 5;
const FIRST_IMAGE_ID: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    DeviceRgb,
    DeviceGray,
}

impl ColorSpace {
    fn name(self) -> &'static str {
        match self {
            ColorSpace::DeviceRgb => "DeviceRGB",
            ColorSpace::DeviceGray => "DeviceGray",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    /// JPEG bytes passed through unchanged.
    Dct,
    /// zlib-compressed samples.
    Flate,
}

impl ImageFilter {
    fn entry(self) -> &'static str {
        match self {
            ImageFilter::Dct => " /Filter /DCTDecode",
            ImageFilter::Flate => " /Filter /FlateDecode",
        }
    }
}

/// An image ready to be embedded as an XObject.
#[derive(Debug, Clone)]
pub struct PdfImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub filter: ImageFilter,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct PdfPage {
    content: Vec<u8>,
    images: Vec<usize>,
}

/// An in-progress document. Drawing calls target the most recently added page.
#[derive(Debug)]
pub struct PdfDocument {
    width: f64,
    height: f64,
    title: Option<String>,
    pages: Vec<PdfPage>,
    images: Vec<PdfImage>,
}

impl PdfDocument {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            title: None,
            pages: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    /// Starts a new page and returns its zero-based index.
    pub fn add_page(&mut self) -> usize {
        self.pages.push(PdfPage::default());
        self.pages.len() - 1
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_mut(&mut self, index: usize) -> &mut PdfPage {
        if self.pages.is_empty() {
            self.pages.push(PdfPage::default());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[index.min(last)]
    }

    fn current(&self) -> usize {
        self.pages.len().saturating_sub(1)
    }

    /// Draws `text` with its baseline at `(x, y)` on the current page.
    pub fn text(&mut self, font: StandardFont, size: f64, color: Rgb, x: f64, y: f64, text: &str) {
        let page = self.current();
        self.text_on(page, font, size, color, x, y, text);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn text_on(
        &mut self,
        page: usize,
        font: StandardFont,
        size: f64,
        color: Rgb,
        x: f64,
        y: f64,
        text: &str,
    ) {
        let mut ops = String::new();
        let _ = write!(
            ops,
            "BT /{} {} Tf {} rg {} {} Td (",
            font.resource_name(),
            num(size),
            color_ops(color),
            num(x),
            num(y)
        );
        let content = &mut self.page_mut(page).content;
        content.extend_from_slice(ops.as_bytes());
        content.extend_from_slice(&escape_string(&encode_win_ansi(text)));
        content.extend_from_slice(b") Tj ET\n");
    }

    pub fn fill_rect(&mut self, color: Rgb, x: f64, y: f64, width: f64, height: f64) {
        let ops = format!(
            "q {} rg {} {} {} {} re f Q\n",
            color_ops(color),
            num(x),
            num(y),
            num(width),
            num(height)
        );
        let page = self.current();
        self.page_mut(page).content.extend_from_slice(ops.as_bytes());
    }

    pub fn line(&mut self, color: Rgb, stroke: f64, from: (f64, f64), to: (f64, f64)) {
        let ops = format!(
            "q {} RG {} w {} {} m {} {} l S Q\n",
            color_ops(color),
            num(stroke),
            num(from.0),
            num(from.1),
            num(to.0),
            num(to.1)
        );
        let page = self.current();
        self.page_mut(page).content.extend_from_slice(ops.as_bytes());
    }

    /// Registers an image and returns its handle for [`draw_image`](Self::draw_image).
    pub fn add_image(&mut self, image: PdfImage) -> usize {
        self.images.push(image);
        self.images.len() - 1
    }

    /// Draws a registered image with its lower-left corner at `(x, y)`.
    pub fn draw_image(&mut self, handle: usize, x: f64, y: f64, width: f64, height: f64) {
        let ops = format!(
            "q {} 0 0 {} {} {} cm /Im{} Do Q\n",
            num(width),
            num(height),
            num(x),
            num(y),
            handle + 1
        );
        let page = self.current();
        let page = self.page_mut(page);
        page.content.extend_from_slice(ops.as_bytes());
        if !page.images.contains(&handle) {
            page.images.push(handle);
        }
    }

    /// Serializes the document. An empty document still gets one blank page.
    pub fn finish(mut self) -> Vec<u8> {
        if self.pages.is_empty() {
            self.pages.push(PdfPage::default());
        }
        let first_page_id = FIRST_IMAGE_ID + self.images.len();
        let page_ids: Vec<usize> = (0..self.pages.len())
            .map(|i| first_page_id + 2 * i)
            .collect();
        let total_objects = first_page_id + 2 * self.pages.len() - 1;

        let mut out: Vec<u8> = Vec::with_capacity(
            4096 + self.images.iter().map(|i| i.data.len()).sum::<usize>(),
        );
        out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        let mut offsets = vec![0usize; total_objects + 1];

        let kids = page_ids
            .iter()
            .map(|id| format!("{id} 0 R"))
            .collect::<Vec<_>>()
            .join(" ");
        write_object(
            &mut out,
            &mut offsets,
            CATALOG_ID,
            format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>").as_bytes(),
        );
        write_object(
            &mut out,
            &mut offsets,
            PAGES_ID,
            format!(
                "<< /Type /Pages /Kids [{kids}] /Count {} >>",
                self.pages.len()
            )
            .as_bytes(),
        );
        for (i, font) in StandardFont::ALL.iter().enumerate() {
            write_object(
                &mut out,
                &mut offsets,
                3 + i,
                format!(
                    "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                    font.base_font()
                )
                .as_bytes(),
            );
        }
        let mut info = b"<< /Producer (monthly-report)".to_vec();
        if let Some(title) = &self.title {
            info.extend_from_slice(b" /Title (");
            info.extend_from_slice(&escape_string(&encode_win_ansi(title)));
            info.push(b')');
        }
        info.extend_from_slice(b" >>");
        write_object(&mut out, &mut offsets, INFO_ID, &info);

        for (i, image) in self.images.iter().enumerate() {
            let filter = image.filter.entry();
            let dict = format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /{} /BitsPerComponent 8{filter} /Length {} >>",
                image.width,
                image.height,
                image.color_space.name(),
                image.data.len()
            );
            write_stream(&mut out, &mut offsets, FIRST_IMAGE_ID + i, &dict, &image.data);
        }

        for (page, page_id) in self.pages.iter().zip(&page_ids) {
            let xobjects = page
                .images
                .iter()
                .map(|h| format!("/Im{} {} 0 R", h + 1, FIRST_IMAGE_ID + h))
                .collect::<Vec<_>>()
                .join(" ");
            let page_dict = format!(
                "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 3 0 R /F2 4 0 R >> /XObject << {xobjects} >> >> /Contents {} 0 R >>",
                num(self.width),
                num(self.height),
                page_id + 1
            );
            write_object(&mut out, &mut offsets, *page_id, page_dict.as_bytes());
            let dict = format!("<< /Length {} >>", page.content.len());
            write_stream(&mut out, &mut offsets, page_id + 1, &dict, &page.content);
        }

        let xref_offset = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", total_objects + 1);
        for offset in &offsets[1..] {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root {CATALOG_ID} 0 R /Info {INFO_ID} 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            total_objects + 1
        );
        out.extend_from_slice(xref.as_bytes());
        out
    }
}

fn write_object(out: &mut Vec<u8>, offsets: &mut [usize], id: usize, body: &[u8]) {
    offsets[id] = out.len();
    out.extend_from_slice(format!("{id} 0 obj\n").as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
}

fn write_stream(out: &mut Vec<u8>, offsets: &mut [usize], id: usize, dict: &str, data: &[u8]) {
    offsets[id] = out.len();
    out.extend_from_slice(format!("{id} 0 obj\n{dict}\nstream\n").as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream\nendobj\n");
}

fn escape_string(bytes: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if matches!(b, b'(' | b')' | b'\\') {
            escaped.push(b'\\');
        }
        escaped.push(b);
    }
    escaped
}

fn color_ops(color: Rgb) -> String {
    format!("{} {} {}", num(color.r), num(color.g), num(color.b))
}

/// Formats a coordinate with at most two decimals and no trailing zeros.
fn num(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    let text = format!("{rounded:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
