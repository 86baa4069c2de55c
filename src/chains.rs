//! Drawing geometry: chains of 2D points and the operations the client and
//! demo apply to them before a drawing reaches the machine.
//!
//! A [`Chain`] is one continuous pen-down path; a [`Drawing`] is the ordered
//! list of chains produced by one generator invocation. Drawings are transient:
//! generated per attempt, clamped and unit-converted by the client, and
//! discarded after the run.

use serde::{Deserialize, Serialize};

/// A single 2D coordinate in table or machine units
pub type Point = (f64, f64);

/// One continuous pen-down path
pub type Chain = Vec<Point>;

/// Ordered collection of chains forming one drawing
pub type Drawing = Vec<Chain>;

/// Millimeters per inch
const MM_PER_INCH: f64 = 25.4;

/// Length units understood by the table and machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Inches,
    Mm,
}

impl Units {
    /// Multiplicative factor converting `self` into `other`
    pub fn factor_to(self, other: Units) -> f64 {
        match (self, other) {
            (Units::Inches, Units::Mm) => MM_PER_INCH,
            (Units::Mm, Units::Inches) => 1.0 / MM_PER_INCH,
            _ => 1.0,
        }
    }
}

/// Axis-aligned bounding box used to clamp drawings to the table
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Clamp a point into the box
    pub fn clamp(&self, p: Point) -> Point {
        (
            p.0.clamp(self.min.0, self.max.0),
            p.1.clamp(self.min.1, self.max.1),
        )
    }

    /// Whether the point lies inside the box (inclusive)
    pub fn contains(&self, p: Point) -> bool {
        p.0 >= self.min.0 && p.0 <= self.max.0 && p.1 >= self.min.1 && p.1 <= self.max.1
    }
}

/// Clamp every point of every chain into the bounding box
pub fn bound(drawing: &Drawing, bbox: &BoundingBox) -> Drawing {
    drawing
        .iter()
        .map(|chain| chain.iter().map(|&p| bbox.clamp(p)).collect())
        .collect()
}

/// Convert every coordinate from one unit system to another
pub fn convert_units(drawing: &Drawing, from: Units, to: Units) -> Drawing {
    let k = from.factor_to(to);
    drawing
        .iter()
        .map(|chain| chain.iter().map(|&(x, y)| (x * k, y * k)).collect())
        .collect()
}

/// Result of a machining-time estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeEstimate {
    /// Estimated wall time in seconds
    pub seconds: f64,
    /// Total path length in drawing units
    pub distance: f64,
    /// Number of points in the drawing
    pub points: usize,
}

/// Estimate how long the machine will take to draw `drawing`.
///
/// The drawing is clamped to `bbox` first so the estimate matches what the
/// machine will actually run. Each segment is modeled as a trapezoidal move:
/// accelerate at `accel` (units/s^2) toward the feed rate (units/minute),
/// cruise if the segment is long enough to reach it, decelerate. The ball also
/// travels between the end of one chain and the start of the next, so those
/// transitions are counted as segments too.
pub fn estimate_machining_time(
    drawing: &Drawing,
    bbox: &BoundingBox,
    feed: f64,
    accel: f64,
) -> TimeEstimate {
    let bounded = bound(drawing, bbox);
    let v = feed / 60.0;

    let mut seconds = 0.0;
    let mut distance = 0.0;
    let mut points = 0;
    let mut prev: Option<Point> = None;

    for chain in &bounded {
        for &p in chain {
            if let Some(q) = prev {
                let d = ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt();
                distance += d;
                seconds += segment_time(d, v, accel);
            }
            prev = Some(p);
            points += 1;
        }
    }

    TimeEstimate {
        seconds,
        distance,
        points,
    }
}

/// Time for one straight segment of length `d` at cruise speed `v`,
/// accelerating and decelerating at `accel`.
fn segment_time(d: f64, v: f64, accel: f64) -> f64 {
    if d <= 0.0 || v <= 0.0 || accel <= 0.0 {
        return 0.0;
    }
    // Distance needed to accelerate to cruise speed and back down
    let ramp = v * v / accel;
    if d >= ramp {
        d / v + v / accel
    } else {
        2.0 * (d / accel).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Drawing {
        vec![vec![
            (0.0, 0.0),
            (side, 0.0),
            (side, side),
            (0.0, side),
            (0.0, 0.0),
        ]]
    }

    #[test]
    fn test_units_round_trip() {
        let k = Units::Inches.factor_to(Units::Mm) * Units::Mm.factor_to(Units::Inches);
        assert!((k - 1.0).abs() < 1e-12);
        assert_eq!(Units::Mm.factor_to(Units::Mm), 1.0);
    }

    #[test]
    fn test_units_wire_names() {
        assert_eq!(serde_json::to_string(&Units::Inches).unwrap(), "\"inches\"");
        assert_eq!(serde_json::to_string(&Units::Mm).unwrap(), "\"mm\"");
    }

    #[test]
    fn test_bound_clamps_outliers() {
        let bbox = BoundingBox::new((0.0, 0.0), (10.0, 10.0));
        let drawing: Drawing = vec![vec![(-5.0, 5.0), (15.0, 20.0), (3.0, 4.0)]];
        let bounded = bound(&drawing, &bbox);
        assert_eq!(bounded[0][0], (0.0, 5.0));
        assert_eq!(bounded[0][1], (10.0, 10.0));
        assert_eq!(bounded[0][2], (3.0, 4.0));
        assert!(bounded[0].iter().all(|&p| bbox.contains(p)));
    }

    #[test]
    fn test_convert_inches_to_mm() {
        let drawing: Drawing = vec![vec![(1.0, 2.0)]];
        let converted = convert_units(&drawing, Units::Inches, Units::Mm);
        assert_eq!(converted[0][0], (25.4, 50.8));
    }

    #[test]
    fn test_estimate_long_segment() {
        // 100mm line at 2000 mm/min (33.33 mm/s), accel 3000 mm/s^2.
        // Long enough to cruise: t = d/v + v/a.
        let drawing: Drawing = vec![vec![(0.0, 0.0), (100.0, 0.0)]];
        let bbox = BoundingBox::new((0.0, 0.0), (400.0, 300.0));
        let est = estimate_machining_time(&drawing, &bbox, 2000.0, 3000.0);
        let v = 2000.0 / 60.0;
        let expected = 100.0 / v + v / 3000.0;
        assert!((est.seconds - expected).abs() < 1e-9);
        assert_eq!(est.points, 2);
        assert!((est.distance - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_counts_chain_transitions() {
        let one: Drawing = vec![vec![(0.0, 0.0), (10.0, 0.0)], vec![(10.0, 10.0), (0.0, 10.0)]];
        let bbox = BoundingBox::new((0.0, 0.0), (50.0, 50.0));
        let est = estimate_machining_time(&one, &bbox, 2000.0, 3000.0);
        // 10 + 10 (transition) + 10
        assert!((est.distance - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_scales_with_size() {
        let bbox = BoundingBox::new((0.0, 0.0), (500.0, 500.0));
        let small = estimate_machining_time(&square(50.0), &bbox, 2000.0, 3000.0);
        let large = estimate_machining_time(&square(200.0), &bbox, 2000.0, 3000.0);
        assert!(large.seconds > small.seconds);
        assert!(large.distance > small.distance);
    }

    #[test]
    fn test_estimate_clamps_before_measuring() {
        // A drawing far outside the box collapses onto its edge; the
        // estimate must reflect the clamped geometry, not the raw one.
        let drawing: Drawing = vec![vec![(0.0, 1000.0), (100.0, 1000.0)]];
        let bbox = BoundingBox::new((0.0, 0.0), (50.0, 50.0));
        let est = estimate_machining_time(&drawing, &bbox, 2000.0, 3000.0);
        assert!((est.distance - 50.0).abs() < 1e-9);
    }
}
