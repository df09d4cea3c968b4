pub const SECONDS_PER_HOUR: u32 = 3_600;

/// Scale factor between a volumetric fraction (m3 per m3) and ppm.
pub const PARTS_PER_MILLION: f64 = 1e6;

/// Convert a volume flow given in m3/h to m3/s.
pub fn cubic_metres_per_hour_to_per_second(flow: f64) -> f64 {
    flow / SECONDS_PER_HOUR as f64
}
