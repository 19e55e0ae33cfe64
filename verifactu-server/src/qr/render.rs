//! 二维码渲染 (PNG / SVG / ESC/POS)
//!
//! 纠错等级 M，最小 200px，2 个模块的留白。
//! 渲染失败返回 [`RenderError`]，与业务错误分开处理。

use base64::Engine;
use image::{ImageBuffer, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use shared::error::{AppError, ErrorCode};
use std::fmt::Write as _;
use std::io::Cursor;
use thiserror::Error;

/// Minimum rendered size in pixels
pub const QR_SIZE_PX: u32 = 200;

/// Quiet zone in modules
pub const QR_MARGIN_MODULES: u32 = 2;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("SVG encoding failed: {0}")]
    Svg(#[from] std::fmt::Error),
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::with_message(ErrorCode::QrRenderFailed, err.to_string())
    }
}

/// Module grid with the quiet zone applied
struct Matrix {
    modules: u32,
    dark: Vec<bool>,
}

impl Matrix {
    fn encode(data: &str) -> Result<Self, RenderError> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)?;
        let width = code.width() as u32;
        let modules = width + 2 * QR_MARGIN_MODULES;

        let mut dark = vec![false; (modules * modules) as usize];
        for (i, color) in code.to_colors().into_iter().enumerate() {
            if color == Color::Dark {
                let (x, y) = (i as u32 % width, i as u32 / width);
                let idx = (y + QR_MARGIN_MODULES) * modules + (x + QR_MARGIN_MODULES);
                dark[idx as usize] = true;
            }
        }
        Ok(Self { modules, dark })
    }

    fn is_dark(&self, x: u32, y: u32) -> bool {
        self.dark[(y * self.modules + x) as usize]
    }

    /// Pixels per module so the image is at least [`QR_SIZE_PX`] wide
    fn scale(&self) -> u32 {
        QR_SIZE_PX.div_ceil(self.modules).max(1)
    }
}

/// PNG bytes
pub fn render_png(data: &str) -> Result<Vec<u8>, RenderError> {
    let matrix = Matrix::encode(data)?;
    let scale = matrix.scale();
    let size = matrix.modules * scale;

    let img = ImageBuffer::from_fn(size, size, |px, py| {
        if matrix.is_dark(px / scale, py / scale) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// `data:image/png;base64,...` for HTML embedding
pub fn render_data_url(data: &str) -> Result<String, RenderError> {
    let png = render_png(data)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Standalone SVG document
pub fn render_svg(data: &str) -> Result<String, RenderError> {
    let matrix = Matrix::encode(data)?;
    let scale = matrix.scale();
    let size = matrix.modules * scale;

    let mut path = String::new();
    for y in 0..matrix.modules {
        for x in 0..matrix.modules {
            if matrix.is_dark(x, y) {
                write!(path, "M{},{}h{}v{}h-{}z", x * scale, y * scale, scale, scale, scale)?;
            }
        }
    }

    let mut svg = String::new();
    write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?><svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{size}" height="{size}" viewBox="0 0 {size} {size}" shape-rendering="crispEdges"><rect width="100%" height="100%" fill="#ffffff"/><path fill="#000000" d="{path}"/></svg>"##
    )?;
    Ok(svg)
}

/// ESC/POS `GS ( k` sequence (model 2, EC level M) for thermal printers
///
/// `module_size` is clamped to 1-16 dots.
pub fn render_escpos(data: &str, module_size: u8) -> Result<Vec<u8>, RenderError> {
    // printer-side encoding; validate that the data fits a QR symbol first
    QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)?;
    let size = module_size.clamp(1, 16);

    let mut buf = Vec::with_capacity(data.len() + 40);
    // Function 165: select model 2
    buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
    // Function 167: module size
    buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]);
    // Function 169: error correction M
    buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x31]);

    // Function 180: store data
    let bytes = data.as_bytes();
    let len = bytes.len() + 3;
    let p_l = (len & 0xFF) as u8;
    let p_h = ((len >> 8) & 0xFF) as u8;
    buf.extend_from_slice(&[0x1D, 0x28, 0x6B, p_l, p_h, 0x31, 0x50, 0x30]);
    buf.extend_from_slice(bytes);

    // Function 181: print
    buf.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://prewww1.aeat.es/wlpl/TIKE-CONT/ValidarQR?nif=B12345678&numserie=A-0001&fecha=01-03-2024&importe=121.50&huella=0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF";

    #[test]
    fn test_png_dimensions() {
        let png = render_png(URL).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert!(img.width() >= QR_SIZE_PX);
        assert_eq!(img.width(), img.height());
        // quiet zone is light
        assert_eq!(img.to_luma8().get_pixel(0, 0).0, [255]);
    }

    #[test]
    fn test_svg_document() {
        let svg = render_svg(URL).unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
        assert!(svg.contains("<path"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_data_url_prefix() {
        assert!(render_data_url(URL).unwrap().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_escpos_store_length() {
        let bytes = render_escpos(URL, 20).unwrap();
        // module size clamped
        assert_eq!(bytes[16], 16);
        let len = URL.len() + 3;
        let store = [0x1D, 0x28, 0x6B, (len & 0xFF) as u8, (len >> 8) as u8, 0x31, 0x50, 0x30];
        assert!(bytes.windows(store.len()).any(|w| w == store));
        assert!(bytes.ends_with(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]));
    }

    #[test]
    fn test_oversized_payload_is_render_error() {
        let huge = "x".repeat(5000);
        assert!(matches!(render_png(&huge), Err(RenderError::Encode(_))));
        assert!(render_escpos(&huge, 4).is_err());
    }
}
