//! Edge detection and the small pieces of pure per-sample logic the
//! edge-crossing coordinator (spec.md §4.G) builds on: the movement
//! history ring, the edge detector itself, double-click promotion, and
//! cursor clamping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Which screen edge a crossing happened on. Deliberately excludes
/// "server"/"center" — those aren't directions a cursor can cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

impl Edge {
    pub fn as_screen_position(&self) -> crate::protocol::ScreenPosition {
        use crate::protocol::ScreenPosition as P;
        match self {
            Edge::Left => P::Left,
            Edge::Right => P::Right,
            Edge::Top => P::Top,
            Edge::Bottom => P::Bottom,
        }
    }
}

/// Bounded ring of recent `(x, y)` cursor samples (spec.md §3 "Edge
/// Movement History"). Default capacity 8.
pub struct MovementHistory {
    capacity: usize,
    samples: VecDeque<(f64, f64)>,
}

impl MovementHistory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), samples: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, sample: (f64, f64)) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn as_slice(&self) -> Vec<(f64, f64)> {
        self.samples.iter().copied().collect()
    }
}

impl Default for MovementHistory {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Default consecutive-pair agreement ratio required to fire an edge.
pub const DEFAULT_DIRECTION_RATIO: f64 = 0.85;
/// Default minimum sample count required to fire an edge on the server.
pub const DEFAULT_MIN_SAMPLES: usize = 6;

/// Pure edge-detection function (spec.md §4.G, §8.6).
///
/// `samples` is the movement history with the current position as its
/// last element. Returns `None` if dragging, if there aren't enough
/// samples, if the current position isn't within 1px of an edge, or if
/// motion toward that edge isn't consistent enough. X is checked before Y;
/// if X fires, Y is never evaluated.
pub fn detect_edge(
    samples: &[(f64, f64)],
    screen_w: f64,
    screen_h: f64,
    is_dragging: bool,
    direction_ratio: f64,
    min_samples: usize,
) -> Option<Edge> {
    if is_dragging {
        return None;
    }
    if samples.len() < 2 || samples.len() < min_samples {
        return None;
    }
    let (cx, cy) = *samples.last().expect("len checked above");

    if cx <= 1.0 && agrees(samples, direction_ratio, |d| d.0 < 0.0) {
        return Some(Edge::Left);
    }
    if cx >= screen_w - 1.0 && agrees(samples, direction_ratio, |d| d.0 > 0.0) {
        return Some(Edge::Right);
    }
    if cy <= 1.0 && agrees(samples, direction_ratio, |d| d.1 < 0.0) {
        return Some(Edge::Top);
    }
    if cy >= screen_h - 1.0 && agrees(samples, direction_ratio, |d| d.1 > 0.0) {
        return Some(Edge::Bottom);
    }
    None
}

fn agrees(samples: &[(f64, f64)], ratio: f64, outward: impl Fn((f64, f64)) -> bool) -> bool {
    let pairs = samples.len() - 1;
    if pairs == 0 {
        return false;
    }
    let threshold = (ratio * pairs as f64).ceil() as usize;
    let agreeing = samples
        .windows(2)
        .filter(|w| outward((w[1].0 - w[0].0, w[1].1 - w[0].1)))
        .count();
    agreeing >= threshold
}

/// Normalize a first-crossing mouse position per the "enters from the
/// opposite edge" convention (spec.md §4.G). `(x, y)` is the triggering
/// position in screen-pixel space.
pub fn normalize_first_crossing(edge: Edge, x: f64, y: f64, screen_w: f64, screen_h: f64) -> (f64, f64) {
    match edge {
        Edge::Left => (1.0, y / screen_h),
        Edge::Right => (0.0, y / screen_h),
        Edge::Top => (x / screen_w, 1.0),
        Edge::Bottom => (x / screen_w, 0.0),
    }
}

/// The client-side return-crossing normalization: when the client detects
/// its own local edge is the one that faces back toward the server, this
/// maps that edge to the coordinate sent back to the server.
///
/// `neighbor` is the screen_position the server considers this client to
/// be at (e.g. a client configured as the server's "left" neighbor).
pub fn normalize_return_crossing(
    local_edge: Edge,
    neighbor: crate::protocol::ScreenPosition,
    x: f64,
    y: f64,
) -> Option<(f64, f64)> {
    use crate::protocol::ScreenPosition as P;
    match (neighbor, local_edge) {
        (P::Left, Edge::Right) => Some((0.0, y)),
        (P::Right, Edge::Left) => Some((1.0, y)),
        (P::Top, Edge::Bottom) => Some((x, 0.0)),
        (P::Bottom, Edge::Top) => Some((x, 1.0)),
        _ => None,
    }
}

/// Clamp an injected position to `[0, w) x [0, h)` on the overshoot axis
/// only, to avoid "sticky pointers" on platforms whose injector doesn't
/// bound coordinates (spec.md §4.G).
pub fn clamp_position(x: f64, y: f64, w: f64, h: f64) -> (f64, f64) {
    (x.clamp(0.0, (w - 1.0).max(0.0)), y.clamp(0.0, (h - 1.0).max(0.0)))
}

/// Mouse button identifiers for double/triple-click promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Tracks consecutive same-button presses within [`MULTI_CLICK_WINDOW`] to
/// promote them into double/triple clicks (spec.md §4.G "Double-click
/// detection"), and whether a drag is currently in progress.
pub struct ClickTracker {
    last_button: Option<MouseButton>,
    last_press_at: Option<Instant>,
    streak: u32,
    dragging: bool,
}

pub const MULTI_CLICK_WINDOW: Duration = Duration::from_millis(150);

impl Default for ClickTracker {
    fn default() -> Self {
        Self { last_button: None, last_press_at: None, streak: 0, dragging: false }
    }
}

impl ClickTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press of `button` at `now` and return the click count
    /// (1 = single, 2 = double, 3 = triple; caps at 3).
    pub fn on_press(&mut self, button: MouseButton, now: Instant) -> u32 {
        let continues = self.last_button == Some(button)
            && self.last_press_at.map(|t| now.duration_since(t) <= MULTI_CLICK_WINDOW).unwrap_or(false);
        self.streak = if continues { (self.streak + 1).min(3) } else { 1 };
        self.last_button = Some(button);
        self.last_press_at = Some(now);
        if matches!(button, MouseButton::Left | MouseButton::Right) {
            self.dragging = true;
        }
        self.streak
    }

    /// Record a release; clears the drag flag. A release beyond the
    /// multi-click window, or a press of a different button, resets the
    /// streak (the latter happens naturally in `on_press`).
    pub fn on_release(&mut self, now: Instant) {
        self.dragging = false;
        if self.last_press_at.map(|t| now.duration_since(t) > MULTI_CLICK_WINDOW).unwrap_or(false) {
            self.streak = 0;
            self.last_button = None;
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_left(n: usize, start_x: f64, y: f64) -> Vec<(f64, f64)> {
        (0..n).map(|i| (start_x - i as f64 * 50.0, y)).collect()
    }

    #[test]
    fn fires_left_edge_with_enough_consistent_samples() {
        let samples = ramp_left(6, 250.0, 500.0);
        // Last sample should land at x = 250 - 5*50 = 0.
        assert_eq!(*samples.last().unwrap(), (0.0, 500.0));
        let edge = detect_edge(&samples, 1920.0, 1080.0, false, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, Some(Edge::Left));
    }

    #[test]
    fn dragging_suppresses_crossing() {
        let samples = ramp_left(6, 250.0, 500.0);
        let edge = detect_edge(&samples, 1920.0, 1080.0, true, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, None);
    }

    #[test]
    fn too_few_samples_does_not_fire() {
        let samples = ramp_left(3, 250.0, 500.0);
        let edge = detect_edge(&samples, 1920.0, 1080.0, false, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, None);
    }

    #[test]
    fn not_near_edge_does_not_fire() {
        let samples: Vec<(f64, f64)> = (0..6).map(|i| (500.0 - i as f64 * 2.0, 500.0)).collect();
        let edge = detect_edge(&samples, 1920.0, 1080.0, false, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, None);
    }

    #[test]
    fn inconsistent_direction_does_not_fire() {
        // Oscillating samples ending at the left edge: direction agreement
        // is well under the 0.85 threshold.
        let samples = vec![(40.0, 500.0), (0.0, 500.0), (40.0, 500.0), (0.0, 500.0), (40.0, 500.0), (0.0, 500.0)];
        let edge = detect_edge(&samples, 1920.0, 1080.0, false, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, None);
    }

    #[test]
    fn x_axis_priority_over_y_axis() {
        // Sample both at the left edge and the top edge simultaneously;
        // left (X axis) must win.
        let samples: Vec<(f64, f64)> = (0..6).map(|i| (250.0 - i as f64 * 50.0, 50.0 - i as f64 * 10.0)).collect();
        let edge = detect_edge(&samples, 1920.0, 1080.0, false, DEFAULT_DIRECTION_RATIO, DEFAULT_MIN_SAMPLES);
        assert_eq!(edge, Some(Edge::Left));
    }

    #[test]
    fn first_crossing_normalization_matches_opposite_edge_convention() {
        assert_eq!(normalize_first_crossing(Edge::Left, 0.0, 540.0, 1920.0, 1080.0), (1.0, 0.5));
        assert_eq!(normalize_first_crossing(Edge::Right, 1919.0, 540.0, 1920.0, 1080.0), (0.0, 0.5));
        assert_eq!(normalize_first_crossing(Edge::Top, 960.0, 0.0, 1920.0, 1080.0), (0.5, 1.0));
        assert_eq!(normalize_first_crossing(Edge::Bottom, 960.0, 1079.0, 1920.0, 1080.0), (0.5, 0.0));
    }

    #[test]
    fn movement_history_is_bounded() {
        let mut history = MovementHistory::new(3);
        for i in 0..5 {
            history.push((i as f64, 0.0));
        }
        assert_eq!(history.as_slice(), vec![(2.0, 0.0), (3.0, 0.0), (4.0, 0.0)]);
    }

    #[test]
    fn double_and_triple_click_promotion() {
        let mut tracker = ClickTracker::new();
        let t0 = Instant::now();
        assert_eq!(tracker.on_press(MouseButton::Left, t0), 1);
        assert_eq!(tracker.on_press(MouseButton::Left, t0 + Duration::from_millis(50)), 2);
        assert_eq!(tracker.on_press(MouseButton::Left, t0 + Duration::from_millis(100)), 3);
        // A 4th press within the window caps at triple.
        assert_eq!(tracker.on_press(MouseButton::Left, t0 + Duration::from_millis(120)), 3);
    }

    #[test]
    fn different_button_resets_streak() {
        let mut tracker = ClickTracker::new();
        let t0 = Instant::now();
        tracker.on_press(MouseButton::Left, t0);
        assert_eq!(tracker.on_press(MouseButton::Right, t0 + Duration::from_millis(10)), 1);
    }

    #[test]
    fn dragging_flag_tracks_button_hold() {
        let mut tracker = ClickTracker::new();
        let t0 = Instant::now();
        tracker.on_press(MouseButton::Left, t0);
        assert!(tracker.is_dragging());
        tracker.on_release(t0 + Duration::from_millis(10));
        assert!(!tracker.is_dragging());
    }

    #[test]
    fn clamp_keeps_overshoot_within_bounds() {
        assert_eq!(clamp_position(-5.0, 50.0, 1920.0, 1080.0), (0.0, 50.0));
        assert_eq!(clamp_position(1925.0, 50.0, 1920.0, 1080.0), (1919.0, 50.0));
    }
}
