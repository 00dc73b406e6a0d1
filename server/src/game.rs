//! Lobby and rules for a single game of Atari Go
//!
//! The session holds at most two members. The first member plays team A and
//! moves first. After every accepted move the whole board is scanned for a
//! group without liberties; the first one found loses the game for its team.
//!
//! Nothing here knows about connections or message delivery, which lets the
//! rules be exercised directly in tests.

use crate::board::{Board, Cell, Grid, Pos};
use crate::client_manager::ClientId;
use crate::error::{JoinError, MoveError};
use log::info;
use shared::Team;

pub const MAX_MEMBERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    WaitingForSecond,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: ClientId,
    pub team: Team,
}

/// Result of an accepted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub pos: Pos,
    pub team: Team,
    pub winner: Option<Team>,
}

pub struct GameSession {
    board: Board,
    visited: Grid<bool>,
    members: Vec<Member>,
    turn: Team,
    winner: Option<Team>,
}

impl GameSession {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            board: Board::new(rows, cols),
            visited: Grid::new(rows, cols),
            members: Vec::with_capacity(MAX_MEMBERS),
            turn: Team::A,
            winner: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn turn(&self) -> Team {
        self.turn
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    /// The winning team, once the game has finished.
    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn phase(&self) -> Phase {
        if self.winner.is_some() {
            return Phase::Finished;
        }
        match self.members.len() {
            0 => Phase::Empty,
            1 => Phase::WaitingForSecond,
            _ => Phase::InProgress,
        }
    }

    pub fn is_member(&self, id: ClientId) -> bool {
        self.members.iter().any(|member| member.id == id)
    }

    pub fn team_of(&self, id: ClientId) -> Option<Team> {
        self.members
            .iter()
            .find(|member| member.id == id)
            .map(|member| member.team)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_MEMBERS
    }

    pub fn join(&mut self, id: ClientId) -> Result<Team, JoinError> {
        if self.is_member(id) {
            return Err(JoinError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(JoinError::Full);
        }

        self.members.push(Member { id, team: Team::A });
        self.assign_teams();

        let team = self.members[self.members.len() - 1].team;
        info!("Client {} joined the lobby as team {}", id, team);
        Ok(team)
    }

    /// Removes `id` from the lobby. Returns false if it was not a member.
    ///
    /// Once the last member leaves, the board is wiped for the next game.
    pub fn leave(&mut self, id: ClientId) -> bool {
        let Some(index) = self.members.iter().position(|member| member.id == id) else {
            return false;
        };

        self.members.swap_remove(index);
        self.assign_teams();
        info!("Client {} left the lobby", id);

        if self.members.is_empty() {
            self.reset();
        }

        true
    }

    pub fn play_move(
        &mut self,
        id: ClientId,
        row_text: &str,
        col_text: &str,
    ) -> Result<Placement, MoveError> {
        if !self.is_full() {
            return Err(MoveError::NotStarted);
        }
        if self.is_over() {
            return Err(MoveError::GameOver);
        }

        let team = self.team_of(id).ok_or(MoveError::NotMember)?;
        if team != self.turn {
            return Err(MoveError::NotYourTurn);
        }

        let row = parse_coordinate(row_text)?;
        let col = parse_coordinate(col_text)?;
        let pos = Pos::new(row, col);

        if !self.board.contains(pos) {
            return Err(MoveError::OutOfBounds { row, col });
        }
        if self.board.get(pos) != Cell::Empty {
            return Err(MoveError::Occupied);
        }

        self.board.set(Cell::Stone(team), pos);
        self.turn = team.opponent();

        if let Some(loser) = self.find_loser() {
            let winner = loser.opponent();
            self.winner = Some(winner);
            info!("Team {} has no liberties, team {} wins", loser, winner);
        }

        Ok(Placement {
            pos,
            team,
            winner: self.winner,
        })
    }

    /// Wipes the board and starts over with team A to move.
    pub fn reset(&mut self) {
        self.board.clear();
        self.visited.clear();
        self.turn = Team::A;
        self.winner = None;
    }

    // Members keep join order, so slot 0 is always team A.
    fn assign_teams(&mut self) {
        for (index, member) in self.members.iter_mut().enumerate() {
            member.team = if index == 0 { Team::A } else { Team::B };
        }
    }

    /// Scans the board in row-major order and returns the team owning the
    /// first group found without a liberty.
    fn find_loser(&mut self) -> Option<Team> {
        self.visited.clear();

        let mut loser = None;
        for pos in self.board.positions() {
            let Cell::Stone(team) = self.board.get(pos) else {
                continue;
            };
            if self.visited.get(pos) {
                continue;
            }
            if !group_has_liberty(&self.board, &mut self.visited, team, pos) {
                loser = Some(team);
                break;
            }
        }

        self.visited.clear();
        loser
    }
}

/// Walks the group of `team` stones connected to `start` and reports whether
/// any of them touches an empty cell. Every stone of the group ends up marked
/// in `visited`.
fn group_has_liberty(board: &Board, visited: &mut Grid<bool>, team: Team, start: Pos) -> bool {
    let mut stack = vec![start];
    visited.set(true, start);
    let mut has_liberty = false;

    while let Some(pos) = stack.pop() {
        for neighbor in board.neighbors(pos) {
            match board.get(neighbor) {
                Cell::Empty => has_liberty = true,
                Cell::Stone(owner) if owner == team && !visited.get(neighbor) => {
                    visited.set(true, neighbor);
                    stack.push(neighbor);
                }
                Cell::Stone(_) => {}
            }
        }
    }

    has_liberty
}

/// Digits only, no sign, must fit in a `usize`.
fn parse_coordinate(text: &str) -> Result<usize, MoveError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoveError::InvalidCoordinate(text.to_string()));
    }
    text.parse()
        .map_err(|_| MoveError::InvalidCoordinate(text.to_string()))
}
