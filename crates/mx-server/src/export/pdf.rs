use std::path::PathBuf;

use chrono::DateTime;
use printpdf::{BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument};
use tracing::error;

use mx_common::error::ExportError;

use crate::export::files::DownloadSet;

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const TOP_MARGIN_MM: f64 = 12.0;
const SIDE_MARGIN_MM: f64 = 10.0;

/// Target printed image height; narrow images are clamped by the printable
/// width instead.
const IMAGE_HEIGHT_MM: f64 = 250.0;

const CAPTION_FONT_PT: f64 = 10.0;
const MM_PER_INCH: f64 = 25.4;

/// One page of the export, in final page order.
#[derive(Debug, Clone)]
pub struct PdfItem {
    pub path: PathBuf,
    pub name: String,
    /// Normalized to Unix milliseconds; zero when upstream gave nothing.
    pub uploaded_at_ms: i64,
}

/// Upstream descriptors carry uploaded_at in either seconds or milliseconds.
pub fn normalize_timestamp_ms(uploaded_at: i64) -> i64 {
    if uploaded_at > 1_000_000_000_000 {
        uploaded_at
    } else if uploaded_at > 0 {
        uploaded_at * 1000
    } else {
        0
    }
}

/// Flatten the downloaded manifest into page items, newest first. Items with
/// an unknown timestamp sort last.
pub fn collect_items(set: &DownloadSet) -> Vec<PdfItem> {
    let mut items: Vec<PdfItem> = set
        .files()
        .map(|file| PdfItem {
            path: file.path.clone(),
            name: file.descriptor.name.clone(),
            uploaded_at_ms: normalize_timestamp_ms(file.descriptor.uploaded_at),
        })
        .collect();

    items.sort_by(|a, b| b.uploaded_at_ms.cmp(&a.uploaded_at_ms));
    items
}

fn caption_timestamp(uploaded_at_ms: i64) -> String {
    match DateTime::from_timestamp_millis(uploaded_at_ms) {
        Some(ts) if uploaded_at_ms > 0 => ts.format("%H:%M %d.%m.%Y").to_string(),
        _ => "unknown".into(),
    }
}

/// Compose a portrait A4 document with one page per image. Images that fail
/// to decode at composition time leave their page empty and are logged, the
/// way stale manifest entries are tolerated elsewhere.
pub fn generate(items: &[PdfItem], captions: bool) -> Result<Vec<u8>, ExportError> {
    if items.is_empty() {
        return Err(ExportError::Internal(
            "no valid images found for pdf generation".into(),
        ));
    }

    let (doc, first_page, first_layer) = PdfDocument::new(
        "media export",
        Mm(PAGE_WIDTH_MM as f32),
        Mm(PAGE_HEIGHT_MM as f32),
        "page 1",
    );

    let font = if captions {
        Some(
            doc.add_builtin_font(BuiltinFont::Helvetica)
                .map_err(|err| ExportError::Internal(format!("load builtin font: {err}")))?,
        )
    } else {
        None
    };

    for (index, item) in items.iter().enumerate() {
        let (page, layer) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(
                Mm(PAGE_WIDTH_MM as f32),
                Mm(PAGE_HEIGHT_MM as f32),
                format!("page {}", index + 1),
            )
        };
        let layer = doc.get_page(page).get_layer(layer);

        place_image(&layer, item);

        if let Some(font) = &font {
            place_caption(&layer, item, font);
        }
    }

    doc.save_to_bytes()
        .map_err(|err| ExportError::Internal(format!("render pdf: {err}")))
}

fn place_image(layer: &printpdf::PdfLayerReference, item: &PdfItem) {
    let decoded = match image::open(&item.path) {
        Ok(img) => img,
        Err(err) => {
            error!(path = %item.path.display(), error = %err, "error adding image to pdf");
            return;
        }
    };

    let (px_w, px_h) = (decoded.width() as f64, decoded.height() as f64);
    if px_w <= 0.0 || px_h <= 0.0 {
        error!(path = %item.path.display(), "image has empty dimensions");
        return;
    }

    let mut target_h = IMAGE_HEIGHT_MM;
    let mut target_w = px_w / px_h * target_h;
    let max_w = PAGE_WIDTH_MM - 2.0 * SIDE_MARGIN_MM;
    if target_w > max_w {
        target_w = max_w;
        target_h = px_h / px_w * target_w;
    }

    let dpi = px_h * MM_PER_INCH / target_h;
    let x = (PAGE_WIDTH_MM - target_w) / 2.0;
    let y = PAGE_HEIGHT_MM - TOP_MARGIN_MM - target_h;

    let image = Image::from_dynamic_image(&decoded);
    image.add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(x as f32)),
            translate_y: Some(Mm(y as f32)),
            dpi: Some(dpi as f32),
            ..Default::default()
        },
    );
}

fn place_caption(
    layer: &printpdf::PdfLayerReference,
    item: &PdfItem,
    font: &IndirectFontRef,
) {
    layer.use_text(
        item.name.clone(),
        CAPTION_FONT_PT as f32,
        Mm(SIDE_MARGIN_MM as f32),
        Mm(20.0),
        font,
    );
    layer.use_text(
        caption_timestamp(item.uploaded_at_ms),
        CAPTION_FONT_PT as f32,
        Mm(SIDE_MARGIN_MM as f32),
        Mm(14.0),
        font,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn write_png(dir: &std::path::Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .save(&path)
            .unwrap();
        path
    }

    fn item(path: PathBuf, uploaded_at_ms: i64) -> PdfItem {
        PdfItem {
            path,
            name: "shot".into(),
            uploaded_at_ms,
        }
    }

    #[test]
    fn timestamps_normalize_seconds_to_millis() {
        assert_eq!(normalize_timestamp_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(0), 0);
        assert_eq!(normalize_timestamp_ms(-5), 0);
    }

    #[test]
    fn items_sort_newest_first_with_unknown_last() {
        let mut items = vec![
            item(PathBuf::from("a"), 1_000),
            item(PathBuf::from("b"), 0),
            item(PathBuf::from("c"), 2_000),
        ];
        items.sort_by(|a, b| b.uploaded_at_ms.cmp(&a.uploaded_at_ms));

        let order: Vec<_> = items.iter().map(|i| i.path.to_str().unwrap()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn caption_timestamp_formats_or_falls_back() {
        assert_eq!(caption_timestamp(0), "unknown");
        let formatted = caption_timestamp(1_700_000_000_000);
        assert!(formatted.contains('.'), "unexpected format: {formatted}");
    }

    #[test]
    fn single_image_produces_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "one.png", 32, 24);

        let bytes = generate(&[item(path, 1_700_000_000_000)], false).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn captioned_variant_also_renders() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_png(dir.path(), "one.png", 32, 24);
        let second = write_png(dir.path(), "two.png", 24, 32);

        let bytes = generate(
            &[item(first, 2_000), item(second, 1_000)],
            true,
        )
        .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn zero_items_is_an_error() {
        assert!(generate(&[], false).is_err());
    }
}
