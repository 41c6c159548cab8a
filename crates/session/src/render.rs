//! Turn a raw pairing challenge into a displayable image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::types::QrError;
use qrcode::QrCode;

const DATA_URL_PREFIX: &str = "data:image/svg+xml;base64,";

/// Encode `raw` as a QR code and return it as an SVG data URL that a
/// browser can drop straight into an `<img src>`.
pub fn qr_data_url(raw: &str) -> Result<String, QrError> {
    let code = QrCode::new(raw.as_bytes())?;
    let image = code
        .render()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();
    Ok(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(image)))
}
