// Model-grid to viewport coordinate mapping.
use crate::browser::backend::BrowserBackend;
use crate::browser::types::Viewport;

/// Side length of the normalized grid the vision model reasons in.
pub const MODEL_GRID: f64 = 1000.0;

/// Maps a point on the 0–1000 model grid to viewport pixels.
pub fn scale(x: f64, y: f64, viewport: Viewport) -> (i64, i64) {
    let px = (x / MODEL_GRID * viewport.width as f64).round() as i64;
    let py = (y / MODEL_GRID * viewport.height as f64).round() as i64;
    (px, py)
}

/// Scales against the live viewport. The viewport is fetched fresh on every call
/// since it can change between actions; if that fails the input is passed through.
pub async fn scale_live(backend: &BrowserBackend, x: f64, y: f64) -> (i64, i64) {
    match backend.page_context().await {
        Ok(ctx) => {
            let (px, py) = scale(x, y, ctx.viewport);
            tracing::debug!(x, y, px, py, width = ctx.viewport.width, height = ctx.viewport.height, "scaled model coordinates");
            (px, py)
        }
        Err(e) => {
            tracing::warn!(error = %e, x, y, "viewport unavailable, using unscaled coordinates");
            (x.round() as i64, y.round() as i64)
        }
    }
}
