//! Client to server line protocol
//!
//! Commands are case-sensitive keywords optionally followed by arguments:
//! `JOIN`, `LEAVE`, `LOGOUT`, `LOGIN <name>` and `MOVE <row> <col>`.
//! Whitespace is space, tab, CR, LF and the zero byte, which some clients
//! leave behind when they send fixed-size buffers.
//!
//! The parser makes a single forward pass over a byte buffer without
//! backtracking. Anything that is not exactly one well-formed command,
//! surrounded by optional whitespace, parses to [`Command::Error`].

use crate::{ARG_MAX_LEN, NAME_MAX_LEN};

/// A parsed client command. Arguments are only guaranteed to have the right
/// character class; range checks belong to whoever applies the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Error,
    Login(String),
    Logout,
    Join,
    Leave,
    Move { row: String, col: String },
}

fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0)
}

/// Cursor over a received frame.
pub struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the first byte not consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Parses one command and requires the rest of the buffer to be whitespace.
    pub fn command(&mut self) -> Command {
        let command = match self.skip_space() {
            Some(b'J') => self.join(),
            Some(b'L') => self.l_command(),
            Some(b'M') => self.move_command(),
            _ => Command::Error,
        };

        if self.skip_space().is_some() {
            return Command::Error;
        }

        command
    }

    fn join(&mut self) -> Command {
        if self.literal(b"JOIN") {
            Command::Join
        } else {
            Command::Error
        }
    }

    // LEAVE, LOGOUT and LOGIN share a prefix, so read the whole word first.
    fn l_command(&mut self) -> Command {
        let word = self.take_while(|b| b.is_ascii_alphabetic(), usize::MAX);
        match word.as_str() {
            "LEAVE" => Command::Leave,
            "LOGOUT" => Command::Logout,
            "LOGIN" => {
                self.skip_space();
                let name = self.take_while(|b| b.is_ascii_alphanumeric(), NAME_MAX_LEN);
                if name.is_empty() {
                    Command::Error
                } else {
                    Command::Login(name)
                }
            }
            _ => Command::Error,
        }
    }

    fn move_command(&mut self) -> Command {
        if !self.literal(b"MOVE") {
            return Command::Error;
        }

        self.skip_space();
        let row = self.take_while(|b| b.is_ascii_digit(), ARG_MAX_LEN);
        self.skip_space();
        let col = self.take_while(|b| b.is_ascii_digit(), ARG_MAX_LEN);

        if row.is_empty() || col.is_empty() {
            return Command::Error;
        }

        Command::Move { row, col }
    }

    /// Skips whitespace and returns the next significant byte without consuming it.
    fn skip_space(&mut self) -> Option<u8> {
        while let Some(&byte) = self.buf.get(self.pos) {
            if !is_space(byte) {
                return Some(byte);
            }
            self.pos += 1;
        }
        None
    }

    /// Consumes bytes for as long as they match `expected`.
    fn literal(&mut self, expected: &[u8]) -> bool {
        for &want in expected {
            match self.buf.get(self.pos) {
                Some(&byte) if byte == want => self.pos += 1,
                _ => return false,
            }
        }
        true
    }

    /// Consumes the whole run of bytes accepted by `accept`, keeping at most `limit`.
    fn take_while(&mut self, accept: impl Fn(u8) -> bool, limit: usize) -> String {
        let mut taken = String::new();
        while let Some(&byte) = self.buf.get(self.pos) {
            if !accept(byte) {
                break;
            }
            if taken.len() < limit {
                taken.push(byte as char);
            }
            self.pos += 1;
        }
        taken
    }
}

/// Parses a whole frame into a single command.
pub fn parse(buf: &[u8]) -> Command {
    Parser::new(buf).command()
}
