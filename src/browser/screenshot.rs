// Screenshot payload decoding: the backend answers with a data URL.
use base64::Engine as _;

use crate::browser::types::Screenshot;
use crate::errors::{PilotError, PilotResult};

/// Decodes `data:<mime>;base64,<payload>` into raw image bytes.
/// A bare base64 string is accepted and assumed to be PNG.
pub fn decode_data_url(data_url: &str) -> PilotResult<Screenshot> {
    let (mime_type, payload) = match data_url.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| PilotError::Backend("screenshot data URL has no payload".into()))?;
            let mime_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| PilotError::Backend(format!("unsupported screenshot encoding: {header}")))?;
            (mime_type.to_string(), payload)
        }
        None => ("image/png".to_string(), data_url),
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| PilotError::Backend(format!("screenshot is not valid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(PilotError::Backend("screenshot is empty".into()));
    }

    Ok(Screenshot { mime_type, bytes })
}
