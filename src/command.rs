//! Operator commands carried inside text frames.

use crate::error::CommandError;
use glam::Vec2;
use std::fmt;
use std::str::FromStr;

/// Operator command carried in a text frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Terminate the receiving agent's run loop.
    Stop,
    /// Rendezvous waypoint.
    Goto(Vec2),
    /// A beacon was sighted at this location.
    Light(Vec2),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;
        match verb {
            "stop" => Ok(Command::Stop),
            "goto" => point("goto", &mut words).map(Command::Goto),
            "light" => point("light", &mut words).map(Command::Light),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn point<'a>(
    name: &'static str,
    words: &mut impl Iterator<Item = &'a str>,
) -> Result<Vec2, CommandError> {
    match (words.next(), words.next()) {
        (Some(x), Some(y)) => Ok(Vec2::new(x.parse::<f32>()?, y.parse::<f32>()?)),
        _ => Err(CommandError::MissingCoordinates(name)),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Stop => write!(f, "stop"),
            Command::Goto(p) => write!(f, "goto {:.2} {:.2}", p.x, p.y),
            Command::Light(p) => write!(f, "light {:.2} {:.2}", p.x, p.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!(
            "goto 1.50 -2.00\n".parse::<Command>(),
            Ok(Command::Goto(Vec2::new(1.5, -2.0)))
        );
        assert_eq!(
            "  light 3 4".parse::<Command>(),
            Ok(Command::Light(Vec2::new(3.0, 4.0)))
        );
        assert_eq!(
            "goto 1.0".parse::<Command>(),
            Err(CommandError::MissingCoordinates("goto"))
        );
        assert!(matches!("goto a b".parse::<Command>(), Err(CommandError::Coordinate(_))));
        assert!(matches!("dance".parse::<Command>(), Err(CommandError::Unknown(_))));
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
    }

    #[test]
    fn display_matches_parser() {
        let cmd = Command::Goto(Vec2::new(0.25, 7.0));
        assert_eq!(cmd.to_string(), "goto 0.25 7.00");
        assert_eq!(cmd.to_string().parse::<Command>(), Ok(cmd));
    }
}
