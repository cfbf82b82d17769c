//! Motor-level timing: pointer paths, keystrokes and scroll bursts.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    /// Offset from the start of the movement.
    pub at: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MousePath {
    pub points: Vec<PathPoint>,
    pub duration: Duration,
}

/// Fitts's law movement time in seconds.
pub fn fitts_time(distance: f64, a: f64, b: f64, target_width: f64) -> f64 {
    a + b * (distance / target_width + 1.0).log2()
}

/// Curved path from `start` to `target`, bowing sideways along a half sine.
pub fn mouse_path<R: Rng + ?Sized>(
    rng: &mut R,
    start: Point,
    target: Point,
    a: f64,
    b: f64,
    target_width: f64,
) -> MousePath {
    let distance = start.distance_to(&target);
    let total = fitts_time(distance, a, b, target_width);
    let total = if total.is_finite() { total.max(0.0) } else { 0.0 };
    let duration = Duration::from_secs_f64(total);

    if distance == 0.0 {
        return MousePath {
            points: vec![PathPoint {
                x: target.x,
                y: target.y,
                at: duration,
            }],
            duration,
        };
    }

    let segments = ((distance / 100.0) as usize).max(5);
    let (dx, dy) = (target.x - start.x, target.y - start.y);
    let (nx, ny) = (-dy / distance, dx / distance);
    let amplitude = rng.gen_range(5.0..20.0) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

    let mut points = Vec::with_capacity(segments + 1);
    for i in 0..segments {
        let s = i as f64 / segments as f64;
        let bow = (s * PI).sin() * amplitude;
        points.push(PathPoint {
            x: start.x + dx * s + nx * bow,
            y: start.y + dy * s + ny * bow,
            at: Duration::from_secs_f64(total * s),
        });
    }
    points.push(PathPoint {
        x: target.x,
        y: target.y,
        at: duration,
    });

    MousePath { points, duration }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingSkill {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl TypingSkill {
    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0.0..100.0) {
            roll if roll < 20.0 => TypingSkill::Beginner,
            roll if roll < 80.0 => TypingSkill::Intermediate,
            roll if roll < 95.0 => TypingSkill::Advanced,
            _ => TypingSkill::Expert,
        }
    }

    pub fn wpm_range(self) -> (f64, f64) {
        match self {
            TypingSkill::Beginner => (23.0, 35.0),
            TypingSkill::Intermediate => (36.0, 60.0),
            TypingSkill::Advanced => (61.0, 80.0),
            TypingSkill::Expert => (81.0, 120.0),
        }
    }

    pub fn error_rate_range(self) -> (f64, f64) {
        match self {
            TypingSkill::Beginner => (0.038, 0.082),
            TypingSkill::Intermediate => (0.013, 0.042),
            TypingSkill::Advanced => (0.018, 0.052),
            TypingSkill::Expert => (0.004, 0.016),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Char(char),
    Backspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keystroke {
    pub key: Key,
    pub delay: Duration,
    pub is_typo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPattern {
    pub keystrokes: Vec<Keystroke>,
    pub total: Duration,
    pub errors: usize,
    pub corrections: usize,
    pub skill: TypingSkill,
    pub wpm: f64,
}

const QWERTY_NEIGHBOURS: &[(char, &[char])] = &[
    ('q', &['w', 'a']),
    ('w', &['q', 'e', 's']),
    ('e', &['w', 'r', 'd']),
    ('r', &['e', 't', 'f']),
    ('t', &['r', 'y', 'g']),
    ('y', &['t', 'u', 'h']),
    ('u', &['y', 'i', 'j']),
    ('i', &['u', 'o', 'k']),
    ('o', &['i', 'p', 'l']),
    ('p', &['o', 'l']),
    ('a', &['q', 's', 'z']),
    ('s', &['a', 'w', 'd', 'x']),
    ('d', &['s', 'e', 'f', 'c']),
    ('f', &['d', 'r', 'g', 'v']),
    ('g', &['f', 't', 'h', 'b']),
    ('h', &['g', 'y', 'j', 'n']),
    ('j', &['h', 'u', 'k', 'm']),
    ('k', &['j', 'i', 'l']),
    ('l', &['k', 'o', 'p']),
    ('z', &['a', 'x']),
    ('x', &['z', 's', 'c']),
    ('c', &['x', 'd', 'v']),
    ('v', &['c', 'f', 'b']),
    ('b', &['v', 'g', 'n']),
    ('n', &['b', 'h', 'm']),
    ('m', &['n', 'j']),
];

/// A physically adjacent key, preserving case. Non-letters have none.
pub fn nearby_key<R: Rng + ?Sized>(rng: &mut R, c: char) -> Option<char> {
    let lower = c.to_ascii_lowercase();
    let (_, neighbours) = QWERTY_NEIGHBOURS.iter().find(|(key, _)| *key == lower)?;
    let typo = *neighbours.choose(rng)?;
    Some(if c.is_ascii_uppercase() {
        typo.to_ascii_uppercase()
    } else {
        typo
    })
}

/// Keystroke plan for `text`. `speed` scales words per minute and
/// `error_scale` the typo probability.
pub fn typing_pattern<R: Rng + ?Sized>(
    rng: &mut R,
    text: &str,
    speed: f64,
    error_scale: f64,
) -> TypingPattern {
    let skill = TypingSkill::pick(rng);
    let (wpm_lo, wpm_hi) = skill.wpm_range();
    let (err_lo, err_hi) = skill.error_rate_range();
    let wpm = rng.gen_range(wpm_lo..=wpm_hi) * speed.max(0.05);
    let error_rate = (rng.gen_range(err_lo..=err_hi) * error_scale).clamp(0.0, 1.0);

    let mut pattern = TypingPattern {
        keystrokes: Vec::new(),
        total: Duration::ZERO,
        errors: 0,
        corrections: 0,
        skill,
        wpm,
    };
    if text.is_empty() {
        return pattern;
    }

    let chars_per_second = wpm * 5.0 / 60.0 * rng.gen_range(0.8..1.2);
    for c in text.chars() {
        let mut delay = rng.gen_range(0.6..1.4) / chars_per_second;
        if c == ' ' {
            delay *= rng.gen_range(1.5..4.5);
        } else if c.is_ascii_digit() {
            delay *= rng.gen_range(1.4..2.2);
        } else if !c.is_alphanumeric() {
            delay *= rng.gen_range(1.3..2.8);
        }
        if c.is_uppercase() {
            delay *= rng.gen_range(1.2..2.0);
        }

        if rng.r#gen::<f64>() < error_rate
            && let Some(typo) = nearby_key(rng, c)
        {
            push_key(&mut pattern, Key::Char(typo), delay, true);
            let correction = delay * rng.gen_range(0.3..2.0);
            push_key(&mut pattern, Key::Backspace, correction, false);
            pattern.errors += 1;
            pattern.corrections += 1;
        }
        push_key(&mut pattern, Key::Char(c), delay, false);
    }
    pattern
}

fn push_key(pattern: &mut TypingPattern, key: Key, delay_secs: f64, is_typo: bool) {
    let delay = Duration::from_secs_f64(delay_secs);
    pattern.total += delay;
    pattern.keystrokes.push(Keystroke {
        key,
        delay,
        is_typo,
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    /// Offset from the start of the plan.
    pub at: Duration,
    /// Absolute position after this event.
    pub position: u32,
    pub delta: u32,
    pub duration: Duration,
}

/// Scroll plan that reaches `content_height` in bursts of wheel events
/// separated by reading pauses.
pub fn scroll_pattern<R: Rng + ?Sized>(
    rng: &mut R,
    content_height: u32,
    scroll_speed: f64,
    attention_span: f64,
    thumb_scrolling: bool,
) -> Vec<ScrollEvent> {
    let mut events = Vec::new();
    let mut position = 0u32;
    let mut elapsed = Duration::ZERO;

    while position < content_height {
        let mut distance = match rng.gen_range(0.0..100.0) {
            roll if roll < 10.0 => rng.gen_range(35.0..205.0),
            roll if roll < 60.0 => rng.gen_range(160.0..680.0),
            roll if roll < 85.0 => rng.gen_range(620.0..1235.0),
            _ => rng.gen_range(1170.0..2550.0),
        } * scroll_speed;
        if thumb_scrolling {
            distance *= rng.gen_range(0.7..1.8);
        }

        let ticks: u32 = rng.gen_range(2..=5);
        let per_tick = ((distance / f64::from(ticks)) as u32).max(1);
        for _ in 0..ticks {
            let step = per_tick.min(content_height - position);
            if step == 0 {
                break;
            }
            let duration = Duration::from_millis(rng.gen_range(16..=50));
            position += step;
            events.push(ScrollEvent {
                at: elapsed,
                position,
                delta: step,
                duration,
            });
            elapsed += duration;
        }

        let interest = match rng.gen_range(0.0..100.0) {
            roll if roll < 15.0 => rng.gen_range(3.0..8.0),
            roll if roll < 30.0 => rng.gen_range(1.5..3.0),
            roll if roll < 85.0 => rng.gen_range(0.8..1.5),
            _ => rng.gen_range(0.2..0.5),
        };
        let pause = rng.gen_range(0.3..5.5) * interest * attention_span;
        elapsed += Duration::from_secs_f64(pause.max(0.0));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn fitts_path_properties() {
        let mut rng = StdRng::seed_from_u64(3);
        let start = Point::new(10.0, 10.0);
        let target = Point::new(810.0, 610.0);
        let path = mouse_path(&mut rng, start, target, 0.1, 0.15, 50.0);

        let expected = 0.1 + 0.15 * (1000.0f64 / 50.0 + 1.0).log2();
        assert!((path.duration.as_secs_f64() - expected).abs() < 1e-6);
        assert!(path.points.len() >= 5);
        assert!(path.points.windows(2).all(|w| w[0].at < w[1].at));

        let last = path.points.last().unwrap();
        assert_eq!((last.x, last.y), (target.x, target.y));
        assert_eq!(last.at, path.duration);
    }

    #[test]
    fn zero_distance_is_single_point() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = Point::new(5.0, 5.0);
        let path = mouse_path(&mut rng, p, p, 0.1, 0.15, 50.0);
        assert_eq!(path.points.len(), 1);
        assert!((path.duration.as_secs_f64() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn negative_movement_time_clamps_to_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = Point::new(5.0, 5.0);
        let still = mouse_path(&mut rng, p, p, -1.0, 0.15, 50.0);
        assert_eq!(still.duration, Duration::ZERO);

        let moved = mouse_path(&mut rng, p, Point::new(300.0, 5.0), -5.0, 0.15, 50.0);
        assert_eq!(moved.duration, Duration::ZERO);
        assert_eq!(moved.points.last().unwrap().x, 300.0);
    }

    #[test]
    fn typos_are_corrected() {
        let mut rng = StdRng::seed_from_u64(8);
        let text = "the quick brown fox jumps over the lazy dog";
        let pattern = typing_pattern(&mut rng, text, 1.0, 100.0);
        assert!(pattern.errors > 0);
        assert_eq!(pattern.errors, pattern.corrections);
        assert_eq!(pattern.keystrokes.len(), text.chars().count() + 2 * pattern.errors);

        let typed: String = pattern
            .keystrokes
            .iter()
            .filter(|k| !k.is_typo)
            .filter_map(|k| match k.key {
                Key::Char(c) => Some(c),
                Key::Backspace => None,
            })
            .collect();
        assert_eq!(typed, text);

        for (i, stroke) in pattern.keystrokes.iter().enumerate() {
            if stroke.is_typo {
                assert_eq!(pattern.keystrokes[i + 1].key, Key::Backspace);
            }
        }
        let sum: Duration = pattern.keystrokes.iter().map(|k| k.delay).sum();
        assert_eq!(sum, pattern.total);
    }

    #[test]
    fn empty_text_types_nothing() {
        let mut rng = StdRng::seed_from_u64(8);
        let pattern = typing_pattern(&mut rng, "", 1.0, 1.0);
        assert!(pattern.keystrokes.is_empty());
        assert_eq!(pattern.total, Duration::ZERO);
        assert_eq!(pattern.errors, 0);
    }

    #[test]
    fn scroll_reaches_bottom() {
        let mut rng = StdRng::seed_from_u64(5);
        let events = scroll_pattern(&mut rng, 5000, 1.0, 1.0, false);
        assert_eq!(events.last().unwrap().position, 5000);
        assert!(events.windows(2).all(|w| w[0].at < w[1].at));
        assert!(events.windows(2).all(|w| w[0].position < w[1].position));
        let total: u32 = events.iter().map(|e| e.delta).sum();
        assert_eq!(total, 5000);

        assert!(scroll_pattern(&mut rng, 0, 1.0, 1.0, false).is_empty());
    }
}
