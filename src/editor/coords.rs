//! Time ↔ pixel mapping for the timeline.
//!
//! `zoom` is pixels per second. Rendering and hit-testing share these
//! helpers so the two can never disagree.

pub const MIN_ZOOM: f64 = 10.0;
pub const MAX_ZOOM: f64 = 200.0;
pub const DEFAULT_ZOOM: f64 = 50.0;

pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_nan() {
        return DEFAULT_ZOOM;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

pub fn time_to_pixel(time: f64, zoom: f64) -> f64 {
    time * zoom
}

pub fn pixel_to_time(pixel: f64, zoom: f64) -> f64 {
    pixel / zoom
}

/// Time delta for a horizontal pointer movement
pub fn delta_to_time(dx: f64, zoom: f64) -> f64 {
    pixel_to_time(dx, zoom)
}
