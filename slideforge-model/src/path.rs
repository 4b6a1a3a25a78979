//! Vector path commands.
//!
//! A region outline is an ordered command sequence in the classic
//! move/line/quad/cubic/close vocabulary. Coordinates are `f32` in the
//! document; geometric computation happens in `f64` after flattening.

use serde::{Deserialize, Serialize};

pub type Pt = [f32; 2];

pub fn length(a: Pt, b: Pt) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dx * dx + dy * dy).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "to", rename_all = "snake_case")]
pub enum PathCommand {
    Move(Pt),
    Line(Pt),
    Quad(Pt, Pt),
    Curve(Pt, Pt, Pt),
    Close,
}

impl PathCommand {
    /// End point of the command; `None` for `Close`.
    pub fn end(&self) -> Option<Pt> {
        match *self {
            PathCommand::Move(p) | PathCommand::Line(p) => Some(p),
            PathCommand::Quad(_, p) | PathCommand::Curve(_, _, p) => Some(p),
            PathCommand::Close => None,
        }
    }

    /// Approximate arc length of the command starting at `from`.
    ///
    /// Curves use the damped control-polygon estimate (0.7 for quadratics,
    /// 0.5 for cubics); moves and closes contribute nothing. Good enough for
    /// picking the locally shortest edge during simplification.
    pub fn arc_length_from(&self, from: Pt) -> f32 {
        match *self {
            PathCommand::Move(_) | PathCommand::Close => 0.0,
            PathCommand::Line(p) => length(from, p),
            PathCommand::Quad(c, p) => 0.7 * (length(from, c) + length(c, p)),
            PathCommand::Curve(c1, c2, p) => {
                0.5 * (length(from, c1) + length(c1, c2) + length(c2, p))
            }
        }
    }

    /// True for commands that may be dropped by simplification.
    pub fn is_movable(&self) -> bool {
        !matches!(self, PathCommand::Move(_) | PathCommand::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_points() {
        assert_eq!(PathCommand::Move([1.0, 2.0]).end(), Some([1.0, 2.0]));
        assert_eq!(PathCommand::Quad([0.0, 0.0], [3.0, 4.0]).end(), Some([3.0, 4.0]));
        assert_eq!(PathCommand::Close.end(), None);
    }

    #[test]
    fn test_line_arc_length() {
        let cmd = PathCommand::Line([3.0, 4.0]);
        assert_eq!(cmd.arc_length_from([0.0, 0.0]), 5.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let commands = vec![
            PathCommand::Move([0.0, 0.0]),
            PathCommand::Quad([5.0, 0.0], [5.0, 5.0]),
            PathCommand::Curve([5.0, 8.0], [2.0, 8.0], [0.0, 5.0]),
            PathCommand::Close,
        ];
        let json = serde_json::to_string(&commands).unwrap();
        let back: Vec<PathCommand> = serde_json::from_str(&json).unwrap();
        assert_eq!(commands, back);
    }
}
