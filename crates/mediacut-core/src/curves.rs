// crates/mediacut-core/src/curves.rs
//
// Named keypoint curves scoped to an event's length. Each curve is a scalar
// function of time (ms) defined by interpolated keypoints; events evaluate
// every curve at `pos - event.start` and feed the results into like-named
// blueprint inputs.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Per-segment easing applied between a keypoint and its successor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ease {
    #[default]
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    /// Hold the left keypoint's value until the next keypoint.
    Hold,
}

impl Ease {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::InQuad => t * t,
            Self::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
            Self::Hold => 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Position on the curve's x-range, in milliseconds.
    pub x:     i64,
    pub value: f64,
    #[serde(default)]
    pub ease:  Ease,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Curve {
    pub name:          String,
    #[serde(default)]
    pub default_value: f64,
    /// Sorted ascending by `x`. May be empty - evaluation falls back to
    /// `default_value`.
    #[serde(default)]
    pub points:        Vec<KeyPoint>,
}

impl Curve {
    pub fn new(name: impl Into<String>, default_value: f64) -> Self {
        Self { name: name.into(), default_value, points: Vec::new() }
    }

    /// Insert or replace the keypoint at `point.x`, keeping sort order.
    pub fn set_point(&mut self, point: KeyPoint) {
        match self.points.binary_search_by_key(&point.x, |p| p.x) {
            Ok(i) => self.points[i] = point,
            Err(i) => self.points.insert(i, point),
        }
    }

    pub fn remove_point(&mut self, x: i64) -> bool {
        match self.points.binary_search_by_key(&x, |p| p.x) {
            Ok(i) => {
                self.points.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Evaluate the curve at `x`. Outside the keypoint span the nearest
    /// endpoint value holds; between keypoints the segment's easing applies.
    pub fn value_at(&self, x: i64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return self.default_value,
        };
        if x <= first.x {
            return first.value;
        }
        if x >= last.x {
            return last.value;
        }
        // Invariant: first.x < x < last.x, so a bracketing pair exists.
        let hi = self.points.partition_point(|p| p.x <= x);
        let a = &self.points[hi - 1];
        let b = &self.points[hi];
        if a.ease == Ease::Hold {
            return a.value;
        }
        let t = (x - a.x) as f64 / (b.x - a.x) as f64;
        a.value + (b.value - a.value) * a.ease.apply(t)
    }
}

/// The ordered set of named curves owned by one event.
///
/// The x-range always spans `[min_x, max_x]` = `[0, event length]`; resizing
/// the owning event rescales the keypoints proportionally (the editor
/// contract for trimming an event without losing its animation shape).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPointSet {
    pub min_x:  i64,
    pub max_x:  i64,
    #[serde(default)]
    pub curves: Vec<Curve>,
}

impl KeyPointSet {
    pub fn new(min_x: i64, max_x: i64) -> Self {
        Self { min_x, max_x, curves: Vec::new() }
    }

    pub fn curve_count(&self) -> usize {
        self.curves.len()
    }

    pub fn curve_name(&self, index: usize) -> Option<&str> {
        self.curves.get(index).map(|c| c.name.as_str())
    }

    pub fn curve(&self, name: &str) -> Option<&Curve> {
        self.curves.iter().find(|c| c.name == name)
    }

    pub fn curve_mut(&mut self, name: &str) -> Option<&mut Curve> {
        self.curves.iter_mut().find(|c| c.name == name)
    }

    /// Add a named curve; fails if the name is already taken.
    pub fn add_curve(&mut self, name: impl Into<String>, default_value: f64) -> EngineResult<&mut Curve> {
        let name = name.into();
        if self.curve(&name).is_some() {
            return Err(EngineError::already_exists(format!("curve '{name}'")));
        }
        self.curves.push(Curve::new(name, default_value));
        Ok(self.curves.last_mut().unwrap())
    }

    pub fn remove_curve(&mut self, name: &str) -> bool {
        let before = self.curves.len();
        self.curves.retain(|c| c.name != name);
        self.curves.len() != before
    }

    /// Evaluate the curve at `index` at position `x` (clamped to the range).
    pub fn value_by_index(&self, index: usize, x: i64) -> f64 {
        self.curves
            .get(index)
            .map(|c| c.value_at(x.clamp(self.min_x, self.max_x)))
            .unwrap_or(0.0)
    }

    /// Evaluate the named curve at `x`; 0.0 for unknown names.
    pub fn value(&self, name: &str, x: i64) -> f64 {
        self.curve(name)
            .map(|c| c.value_at(x.clamp(self.min_x, self.max_x)))
            .unwrap_or(0.0)
    }

    /// Replace the x-range. With `scale_existing`, keypoints are remapped
    /// proportionally into the new span; otherwise they are clamped into it.
    pub fn set_range_x(&mut self, min_x: i64, max_x: i64, scale_existing: bool) {
        let old_span = (self.max_x - self.min_x).max(1);
        let new_span = max_x - min_x;
        for curve in &mut self.curves {
            for p in &mut curve.points {
                p.x = if scale_existing {
                    min_x + (p.x - self.min_x) * new_span / old_span
                } else {
                    p.x.clamp(min_x, max_x)
                };
            }
            // Rescaling with integer division can collapse neighbours onto
            // the same x; keep the list strictly sorted and deduplicated.
            curve.points.dedup_by_key(|p| p.x);
        }
        self.min_x = min_x;
        self.max_x = max_x;
    }

    pub fn save_as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("KeyPointSet serialization is infallible")
    }

    pub fn load_from_json(json: &serde_json::Value) -> EngineResult<Self> {
        serde_json::from_value(json.clone())
            .map_err(|e| EngineError::ParseFailed(format!("keypoint json: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_curve() -> Curve {
        let mut c = Curve::new("gain", 1.0);
        c.set_point(KeyPoint { x: 0, value: 1.0, ease: Ease::Linear });
        c.set_point(KeyPoint { x: 100, value: 2.0, ease: Ease::Linear });
        c
    }

    #[test]
    fn linear_interpolation_between_keypoints() {
        let c = gain_curve();
        assert_eq!(c.value_at(50), 1.5);
        assert_eq!(c.value_at(25), 1.25);
    }

    #[test]
    fn endpoints_hold_outside_span() {
        let c = gain_curve();
        assert_eq!(c.value_at(-10), 1.0);
        assert_eq!(c.value_at(500), 2.0);
    }

    #[test]
    fn hold_ease_is_constant_between_keys() {
        let mut c = Curve::new("v", 0.0);
        c.set_point(KeyPoint { x: 0, value: 3.0, ease: Ease::Hold });
        c.set_point(KeyPoint { x: 10, value: 7.0, ease: Ease::Linear });
        assert_eq!(c.value_at(5), 3.0);
        assert_eq!(c.value_at(10), 7.0);
    }

    #[test]
    fn empty_curve_returns_default() {
        let c = Curve::new("empty", 0.25);
        assert_eq!(c.value_at(42), 0.25);
    }

    #[test]
    fn set_range_rescales_points() {
        let mut set = KeyPointSet::new(0, 100);
        set.add_curve("gain", 1.0).unwrap();
        set.curve_mut("gain").unwrap().set_point(KeyPoint { x: 50, value: 2.0, ease: Ease::Linear });
        set.set_range_x(0, 200, true);
        assert_eq!(set.curve("gain").unwrap().points[0].x, 100);
    }

    #[test]
    fn duplicate_curve_name_rejected() {
        let mut set = KeyPointSet::new(0, 100);
        set.add_curve("gain", 1.0).unwrap();
        assert!(matches!(
            set.add_curve("gain", 0.0),
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[test]
    fn json_round_trip_preserves_points() {
        let mut set = KeyPointSet::new(0, 100);
        set.add_curve("gain", 1.0).unwrap();
        set.curve_mut("gain").unwrap().set_point(KeyPoint { x: 30, value: 1.3, ease: Ease::OutQuad });
        let json = set.save_as_json();
        let back = KeyPointSet::load_from_json(&json).unwrap();
        assert_eq!(back.curve("gain").unwrap().points, set.curve("gain").unwrap().points);
        assert_eq!(back.max_x, 100);
    }
}
