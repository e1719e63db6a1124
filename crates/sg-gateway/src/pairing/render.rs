//! Rendering pairing payloads into something a browser can display

use base64::{engine::general_purpose::STANDARD, Engine as _};
use qrcode::render::svg;
use qrcode::QrCode;
use thiserror::Error;

/// Rendering failures
#[derive(Debug, Error)]
pub enum RenderError {
    /// Payload does not fit in a QR code
    #[error("Failed to encode pairing payload: {0}")]
    Encode(#[from] qrcode::types::QrError),
}

/// Turns a raw pairing payload into a displayable string
pub trait ChallengeRenderer: Send + Sync {
    /// Render `payload`
    fn render(&self, payload: &str) -> Result<String, RenderError>;
}

/// Renders the payload as a QR code in an SVG `data:` URL
#[derive(Debug, Clone)]
pub struct QrSvgRenderer {
    /// Minimum width and height of the image, in pixels
    pub min_size: u32,
}

impl Default for QrSvgRenderer {
    fn default() -> Self {
        Self { min_size: 256 }
    }
}

impl ChallengeRenderer for QrSvgRenderer {
    fn render(&self, payload: &str) -> Result<String, RenderError> {
        let code = QrCode::new(payload.as_bytes())?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(self.min_size, self.min_size)
            .build();
        Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
    }
}
