//! Wire framing for the radio channel.
//!
//! Every frame is one line: a two character kind tag, tab separated fields and a
//! trailing newline. Stamped kinds end with `sent_at` and the sender id.
//!
//! | Tag | Kind | Fields |
//! |-----|------|--------|
//! | `xx` | state | `x y heading sent_at sender` |
//! | `tt` | heading | `heading sent_at sender` |
//! | `oo` | obstacles | `"x1:y1 x2:y2 ..." sent_at sender` |
//! | `xo` | state + obstacles | `x y heading "x1:y1 ..." sent_at sender` |
//! | `up` | wake | `sent_at sender` |
//! | `ss` | sleep | `sent_at sender` |
//! | `mm` | text | free text, delivered verbatim |

use crate::error::ParseError;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Sender time and identity attached to every non-text frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    /// Sender's clock at send time, in seconds.
    pub sent_at: f64,
    pub sender: String,
}

impl Stamp {
    pub fn new(sent_at: f64, sender: impl Into<String>) -> Self {
        Self {
            sent_at,
            sender: sender.into(),
        }
    }
}

/// Message kinds, identified on the wire by their two character tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    State,
    Heading,
    Obstacles,
    StateObstacles,
    Wake,
    Sleep,
    Text,
}

impl Kind {
    pub const fn tag(self) -> &'static str {
        match self {
            Kind::State => "xx",
            Kind::Heading => "tt",
            Kind::Obstacles => "oo",
            Kind::StateObstacles => "xo",
            Kind::Wake => "up",
            Kind::Sleep => "ss",
            Kind::Text => "mm",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "xx" => Kind::State,
            "tt" => Kind::Heading,
            "oo" => Kind::Obstacles,
            "xo" => Kind::StateObstacles,
            "up" => Kind::Wake,
            "ss" => Kind::Sleep,
            "mm" => Kind::Text,
            _ => return None,
        })
    }

    /// Periodic status kinds. Only the freshest pending one is ever sent.
    pub const fn is_low_priority(self) -> bool {
        matches!(
            self,
            Kind::State | Kind::Heading | Kind::Obstacles | Kind::StateObstacles
        )
    }

    const fn name(self) -> &'static str {
        match self {
            Kind::State => "state",
            Kind::Heading => "heading",
            Kind::Obstacles => "obstacles",
            Kind::StateObstacles => "state+obstacles",
            Kind::Wake => "wake",
            Kind::Sleep => "sleep",
            Kind::Text => "text",
        }
    }
}

/// A decoded radio frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    State {
        position: Vec2,
        heading: f32,
        stamp: Stamp,
    },
    Heading {
        heading: f32,
        stamp: Stamp,
    },
    Obstacles {
        points: Vec<Vec2>,
        stamp: Stamp,
    },
    StateObstacles {
        position: Vec2,
        heading: f32,
        points: Vec<Vec2>,
        stamp: Stamp,
    },
    Wake(Stamp),
    Sleep(Stamp),
    Text(String),
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Message::State { .. } => Kind::State,
            Message::Heading { .. } => Kind::Heading,
            Message::Obstacles { .. } => Kind::Obstacles,
            Message::StateObstacles { .. } => Kind::StateObstacles,
            Message::Wake(_) => Kind::Wake,
            Message::Sleep(_) => Kind::Sleep,
            Message::Text(_) => Kind::Text,
        }
    }

    pub fn stamp(&self) -> Option<&Stamp> {
        match self {
            Message::State { stamp, .. }
            | Message::Heading { stamp, .. }
            | Message::Obstacles { stamp, .. }
            | Message::StateObstacles { stamp, .. }
            | Message::Wake(stamp)
            | Message::Sleep(stamp) => Some(stamp),
            Message::Text(_) => None,
        }
    }

    /// Renders the frame, newline included.
    ///
    /// Newlines inside text payloads would split the frame, so a trailing one is
    /// dropped and inner ones become spaces.
    pub fn encode(&self) -> String {
        let mut out = String::from(self.kind().tag());
        match self {
            Message::State {
                position,
                heading,
                stamp,
            } => {
                let _ = write!(out, "{:.5}\t{:.5}\t{:.5}", position.x, position.y, heading);
                push_stamp(&mut out, stamp);
            }
            Message::Heading { heading, stamp } => {
                let _ = write!(out, "{heading:.5}");
                push_stamp(&mut out, stamp);
            }
            Message::Obstacles { points, stamp } => {
                push_points(&mut out, points);
                push_stamp(&mut out, stamp);
            }
            Message::StateObstacles {
                position,
                heading,
                points,
                stamp,
            } => {
                let _ = write!(out, "{:.5}\t{:.5}\t{:.5}\t", position.x, position.y, heading);
                push_points(&mut out, points);
                push_stamp(&mut out, stamp);
            }
            Message::Wake(stamp) | Message::Sleep(stamp) => {
                let _ = write!(out, "{:.5}\t{}", stamp.sent_at, stamp.sender);
            }
            Message::Text(text) => {
                out.push_str(&text.trim_end_matches(['\r', '\n']).replace('\n', " "));
            }
        }
        out.push('\n');
        out
    }

    /// Parses one frame. The line terminator is optional.
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let tag = line.get(..2).ok_or(ParseError::Truncated)?;
        let kind = Kind::from_tag(tag).ok_or_else(|| ParseError::UnknownKind(tag.to_string()))?;
        let body = &line[2..];
        let expected = match kind {
            Kind::State => 5,
            Kind::Heading | Kind::Obstacles => 3,
            Kind::StateObstacles => 6,
            Kind::Wake | Kind::Sleep => 2,
            Kind::Text => return Ok(Message::Text(body.to_string())),
        };
        let body = body.strip_prefix('\t').unwrap_or(body);
        let fields: Vec<&str> = body.split('\t').collect();
        if fields.len() != expected {
            return Err(ParseError::FieldCount {
                kind: kind.name(),
                expected,
                found: fields.len(),
            });
        }
        let stamp = parse_stamp(&fields[expected - 2..])?;

        Ok(match kind {
            Kind::State => Message::State {
                position: Vec2::new(number(fields[0], "x")?, number(fields[1], "y")?),
                heading: number(fields[2], "heading")?,
                stamp,
            },
            Kind::Heading => Message::Heading {
                heading: number(fields[0], "heading")?,
                stamp,
            },
            Kind::Obstacles => Message::Obstacles {
                points: parse_points(fields[0])?,
                stamp,
            },
            Kind::StateObstacles => Message::StateObstacles {
                position: Vec2::new(number(fields[0], "x")?, number(fields[1], "y")?),
                heading: number(fields[2], "heading")?,
                points: parse_points(fields[3])?,
                stamp,
            },
            Kind::Wake => Message::Wake(stamp),
            Kind::Sleep => Message::Sleep(stamp),
            Kind::Text => Message::Text(body.to_string()),
        })
    }
}

fn push_stamp(out: &mut String, stamp: &Stamp) {
    let _ = write!(out, "\t{:.5}\t{}", stamp.sent_at, stamp.sender);
}

fn push_points(out: &mut String, points: &[Vec2]) {
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:.2}:{:.2}", p.x, p.y);
    }
}

fn number(field: &str, name: &'static str) -> Result<f32, ParseError> {
    field
        .trim()
        .parse()
        .map_err(|source| ParseError::Number { field: name, source })
}

fn parse_stamp(fields: &[&str]) -> Result<Stamp, ParseError> {
    let sent_at = fields[0]
        .trim()
        .parse::<f64>()
        .map_err(|source| ParseError::Number {
            field: "sent_at",
            source,
        })?;
    let sender = fields[1].trim();
    if sender.is_empty() {
        return Err(ParseError::MissingSender);
    }
    Ok(Stamp::new(sent_at, sender))
}

fn parse_points(field: &str) -> Result<Vec<Vec2>, ParseError> {
    field
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair
                .split_once(':')
                .ok_or_else(|| ParseError::ObstaclePair(pair.to_string()))?;
            Ok(Vec2::new(number(x, "obstacle x")?, number(y, "obstacle y")?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_frame_layout() {
        let msg = Message::State {
            position: Vec2::new(1.5, -2.0),
            heading: 0.25,
            stamp: Stamp::new(100.0, "R01"),
        };
        assert_eq!(msg.encode(), "xx1.50000\t-2.00000\t0.25000\t100.00000\tR01\n");
    }

    #[test]
    fn decodes_legacy_tab_after_tag() {
        let msg = Message::decode("xx\t0.5\t1.0\t3.1\t42.0\tR7\n").unwrap();
        assert_eq!(
            msg,
            Message::State {
                position: Vec2::new(0.5, 1.0),
                heading: 3.1,
                stamp: Stamp::new(42.0, "R7"),
            }
        );
    }

    #[test]
    fn obstacle_field_carries_pairs() {
        let msg = Message::decode("oo1.00:2.00 -3.50:0.25\t10.0\tA\n").unwrap();
        assert_eq!(
            msg,
            Message::Obstacles {
                points: vec![Vec2::new(1.0, 2.0), Vec2::new(-3.5, 0.25)],
                stamp: Stamp::new(10.0, "A"),
            }
        );
        let empty = Message::decode("xo1\t2\t0\t\t10.0\tA").unwrap();
        assert!(matches!(empty, Message::StateObstacles { ref points, .. } if points.is_empty()));
    }

    #[test]
    fn text_is_verbatim_and_single_line() {
        assert_eq!(
            Message::decode("mmgoto 1.00 2.00\n").unwrap(),
            Message::Text("goto 1.00 2.00".into())
        );
        assert_eq!(Message::Text("a\nb\n".into()).encode(), "mma b\n");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Message::decode("x"), Err(ParseError::Truncated));
        assert!(matches!(Message::decode("zz1\t2"), Err(ParseError::UnknownKind(k)) if k == "zz"));
        assert!(matches!(
            Message::decode("xx1\t2\t3\tR1"),
            Err(ParseError::FieldCount { expected: 5, found: 4, .. })
        ));
        assert!(matches!(
            Message::decode("tt1.0\tnope\tR1"),
            Err(ParseError::Number { field: "sent_at", .. })
        ));
        assert_eq!(Message::decode("up1.0\t \n"), Err(ParseError::MissingSender));
        assert!(matches!(
            Message::decode("oo1.0;2.0\t1.0\tR1"),
            Err(ParseError::ObstaclePair(_))
        ));
    }
}
