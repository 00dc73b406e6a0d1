pub mod protocol;

pub use protocol::{parse, Command, Parser};

use std::fmt;

pub const NAME_MAX_LEN: usize = 31;
pub const ARG_MAX_LEN: usize = 31;
pub const MSG_MAX_SIZE: usize = 512;
pub const MSG_MAX_RECIPIENTS: usize = 16;

pub const DEFAULT_ROWS: usize = 9;
pub const DEFAULT_COLS: usize = 9;

/// One of the two sides of a game. The first player to join plays `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    A,
    B,
}

impl Team {
    /// The character stones of this team are shown with.
    pub fn marker(self) -> char {
        match self {
            Team::A => 'O',
            Team::B => 'X',
        }
    }

    pub fn from_marker(marker: char) -> Option<Team> {
        match marker {
            'O' => Some(Team::A),
            'X' => Some(Team::B),
            _ => None,
        }
    }

    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}

/// Server to client lines. `Display` renders the CRLF-terminated wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error(Option<String>),
    GotJoin(String),
    GotLeave,
    /// Coordinates exactly as the mover typed them, leading zeros included.
    GotMove { row: String, col: String },
    GotWinner(Team),
}

impl Reply {
    pub fn error(detail: impl fmt::Display) -> Self {
        Reply::Error(Some(detail.to_string()))
    }

    /// Parses a single server line, with or without its terminator.
    pub fn from_line(line: &str) -> Option<Reply> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (keyword, rest) = match line.split_once(' ') {
            Some((keyword, rest)) => (keyword, Some(rest)),
            None => (line, None),
        };

        match (keyword, rest) {
            ("OK", None) => Some(Reply::Ok),
            ("ERROR", detail) => Some(Reply::Error(detail.map(str::to_string))),
            ("GOTJOIN", Some(name)) => Some(Reply::GotJoin(name.to_string())),
            ("GOTLEAVE", None) => Some(Reply::GotLeave),
            ("GOTMOVE", Some(args)) => {
                let (row, col) = args.split_once(' ')?;
                if !is_coordinate(row) || !is_coordinate(col) {
                    return None;
                }
                Some(Reply::GotMove {
                    row: row.to_string(),
                    col: col.to_string(),
                })
            }
            ("GOTWINNER", Some(team)) => {
                let mut chars = team.chars();
                match (chars.next(), chars.next()) {
                    (Some(marker), None) => Team::from_marker(marker).map(Reply::GotWinner),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn is_coordinate(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK\r\n"),
            Reply::Error(None) => write!(f, "ERROR\r\n"),
            Reply::Error(Some(detail)) => write!(f, "ERROR {}\r\n", detail),
            Reply::GotJoin(name) => write!(f, "GOTJOIN {}\r\n", name),
            Reply::GotLeave => write!(f, "GOTLEAVE\r\n"),
            Reply::GotMove { row, col } => write!(f, "GOTMOVE {} {}\r\n", row, col),
            Reply::GotWinner(team) => write!(f, "GOTWINNER {}\r\n", team),
        }
    }
}
