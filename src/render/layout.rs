//! Page geometry, typography defaults and cosmetic overrides.
//!
//! Overrides are cosmetic: a malformed hex color or an unknown page size
//! falls back to the default and is logged at debug level, never rejected.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageSize {
    #[default]
    Letter,
    A4,
}

impl PageSize {
    /// `(width, height)` in PDF points.
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PageSize::Letter => (612.0, 792.0),
            PageSize::A4 => (595.28, 841.89),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "LETTER" => Some(PageSize::Letter),
            "A4" => Some(PageSize::A4),
            _ => None,
        }
    }
}

/// An RGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);
    pub const GREY: Rgb = Rgb::new(0.45, 0.45, 0.45);
    pub const LIGHT_GREY: Rgb = Rgb::new(0.82, 0.82, 0.82);
    pub const ERROR_RED: Rgb = Rgb::new(0.75, 0.1, 0.1);
    /// Default brand color, `#1F4E79`.
    pub const BRAND: Rgb = Rgb::new(31.0 / 255.0, 78.0 / 255.0, 121.0 / 255.0);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Parses `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().strip_prefix('#').unwrap_or(hex.trim());
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::new(
            f64::from(channel(0)?) / 255.0,
            f64::from(channel(2)?) / 255.0,
            f64::from(channel(4)?) / 255.0,
        ))
    }
}

/// Optional caller-supplied layout overrides, loosely typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOverrides {
    #[serde(default)]
    pub page_size: Option<String>,
    #[serde(default)]
    pub margin: Option<f64>,
    #[serde(default)]
    pub primary_color: Option<String>,
}

/// Complete layout specification used by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSpec {
    pub page_size: PageSize,
    pub margin: f64,
    pub primary_color: Rgb,
    /// Font sizes for heading levels 1, 2 and 3.
    pub heading_sizes: [f64; 3],
    pub body_size: f64,
    pub caption_size: f64,
    pub table_size: f64,
    pub date_column_width: f64,
    pub amount_column_width: f64,
    pub column_gutter: f64,
    pub bullet_indent: f64,
    pub image_max_height: f64,
    pub footer_size: f64,
}

impl Default for LayoutSpec {
    fn default() -> Self {
        Self {
            page_size: PageSize::Letter,
            margin: 40.0,
            primary_color: Rgb::BRAND,
            heading_sizes: [18.0, 14.0, 12.0],
            body_size: 11.0,
            caption_size: 9.0,
            table_size: 10.0,
            date_column_width: 72.0,
            amount_column_width: 90.0,
            column_gutter: 8.0,
            bullet_indent: 14.0,
            image_max_height: 320.0,
            footer_size: 8.0,
        }
    }
}

impl LayoutSpec {
    /// Applies overrides on top of `self`, silently keeping the current value
    /// for anything malformed.
    pub fn with_overrides(mut self, overrides: &LayoutOverrides) -> Self {
        if let Some(name) = overrides.page_size.as_deref() {
            match PageSize::parse(name) {
                Some(size) => self.page_size = size,
                None => debug!(page_size = %name, "layout_override_ignored"),
            }
        }
        if let Some(margin) = overrides.margin {
            let (width, height) = self.page_size.dimensions();
            if margin.is_finite() && margin >= 0.0 && margin * 2.0 < width.min(height) / 2.0 {
                self.margin = margin;
            } else {
                debug!(margin, "layout_override_ignored");
            }
        }
        if let Some(hex) = overrides.primary_color.as_deref() {
            match Rgb::from_hex(hex) {
                Some(color) => self.primary_color = color,
                None => debug!(primary_color = %hex, "layout_override_ignored"),
            }
        }
        self
    }

    pub fn page_width(&self) -> f64 {
        self.page_size.dimensions().0
    }

    pub fn page_height(&self) -> f64 {
        self.page_size.dimensions().1
    }

    /// Cursor position at the top of a fresh page.
    pub fn top(&self) -> f64 {
        self.page_height() - self.margin
    }

    pub fn content_width(&self) -> f64 {
        self.page_width() - 2.0 * self.margin
    }

    pub fn content_height(&self) -> f64 {
        self.page_height() - 2.0 * self.margin
    }

    pub fn heading_size(&self, level: u8) -> f64 {
        let index = usize::from(level.clamp(1, 3)) - 1;
        self.heading_sizes[index]
    }

    /// Width of the wrapping concept column: what remains after the date and
    /// amount columns and the two gutters.
    pub fn concept_column_width(&self) -> f64 {
        (self.content_width()
            - self.date_column_width
            - self.amount_column_width
            - 2.0 * self.column_gutter)
            .max(20.0)
    }
}
