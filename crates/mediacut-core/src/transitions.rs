// crates/mediacut-core/src/transitions.rs
//
// Transition algorithms used when a track renders the overlap region of two
// clips. Implementors are pure pixel code over RGBA `VideoFrame`s - no
// decoder types cross this boundary.
//
// To add a transition:
//   1. Implement `VideoTransition` below (kind, label, apply).
//   2. Add one line to `declare_transitions!`.
// The registry and the track's overlap compositing pick it up from there.

use std::collections::HashMap;

use crate::frame::VideoFrame;

macro_rules! declare_transitions {
    ( $( $ty:ident ),* $(,)? ) => {
        fn make_entries() -> Vec<Box<dyn VideoTransition>> {
            vec![ $( Box::new($ty) ),* ]
        }
    };
}

declare_transitions! {
    Crossfade,
}

/// Discriminant used as the registry key. `Cut` never has an entry - callers
/// short-circuit on it before consulting the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Cut,
    Crossfade,
}

/// Algorithm contract for overlap transitions.
///
/// # Alpha convention
/// `alpha = 0.0` → 100 % front clip (the one that starts earlier),
/// `alpha = 1.0` → 100 % rear clip. The track computes alpha from the read
/// position inside the overlap.
pub trait VideoTransition: Send + Sync {
    fn kind(&self) -> TransitionKind;

    fn label(&self) -> &'static str;

    /// Blend `front` and `rear` at `alpha` and return the result.
    ///
    /// Either input may be an empty frame (a clip that failed to decode);
    /// implementations fall back to the other input in that case.
    fn apply(&self, front: &VideoFrame, rear: &VideoFrame, alpha: f32) -> VideoFrame;
}

/// All registered transitions in stable display order.
pub fn registered() -> Vec<Box<dyn VideoTransition>> {
    make_entries()
}

/// Registry keyed by kind for O(1) lookup during rendering.
pub fn registry() -> HashMap<TransitionKind, Box<dyn VideoTransition>> {
    make_entries().into_iter().map(|t| (t.kind(), t)).collect()
}

// ── Blend math ────────────────────────────────────────────────────────────────

#[inline]
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Smooth-step cubic ease-in/out. Zero derivative at both endpoints, so the
/// dissolve has no visible pop at either edge of the overlap.
#[inline]
pub fn ease_in_out(t: f32) -> f32 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}

/// Blend two gamma-encoded byte values at `alpha` ∈ [0, 1].
/// Operates in gamma-encoded byte space - the right approximation for SDR.
#[inline]
pub fn blend_byte(a: u8, b: u8, alpha: f32) -> u8 {
    ((1.0 - alpha) * a as f32 + alpha * b as f32).round() as u8
}

// ── Crossfade ─────────────────────────────────────────────────────────────────

/// Linear dissolve with smooth-step easing.
pub struct Crossfade;

impl VideoTransition for Crossfade {
    fn kind(&self) -> TransitionKind {
        TransitionKind::Crossfade
    }

    fn label(&self) -> &'static str {
        "Dissolve"
    }

    fn apply(&self, front: &VideoFrame, rear: &VideoFrame, alpha: f32) -> VideoFrame {
        if front.is_empty() {
            return rear.clone();
        }
        if rear.is_empty() || front.data.len() != rear.data.len() {
            return front.clone();
        }
        let eased = ease_in_out(alpha);
        let mut out = front.clone();
        for (o, (&a, &b)) in out.data.iter_mut().zip(front.data.iter().zip(rear.data.iter())) {
            *o = blend_byte(a, b, eased);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> VideoFrame {
        let mut f = VideoFrame::new(2, 2, 0);
        f.data = vec![value; 16];
        f
    }

    #[test]
    fn crossfade_endpoints_select_pure_inputs() {
        let cf = Crossfade;
        let a = frame(100);
        let b = frame(200);
        assert!(cf.apply(&a, &b, 0.0).data.iter().all(|&v| v == 100));
        assert!(cf.apply(&a, &b, 1.0).data.iter().all(|&v| v == 200));
    }

    #[test]
    fn crossfade_midpoint_is_symmetric() {
        let cf = Crossfade;
        // ease_in_out(0.5) = 0.5 → blend_byte(0, 200, 0.5) = 100
        let out = cf.apply(&frame(0), &frame(200), 0.5);
        assert!(out.data.iter().all(|&v| v == 100));
    }

    #[test]
    fn crossfade_falls_back_on_empty_input() {
        let cf = Crossfade;
        let a = frame(42);
        let out = cf.apply(&a, &VideoFrame::empty(0), 0.9);
        assert_eq!(out.data, a.data);
        let out = cf.apply(&VideoFrame::empty(0), &a, 0.1);
        assert_eq!(out.data, a.data);
    }

    #[test]
    fn registry_contains_crossfade_but_not_cut() {
        let reg = registry();
        assert!(reg.contains_key(&TransitionKind::Crossfade));
        assert!(!reg.contains_key(&TransitionKind::Cut));
    }
}
