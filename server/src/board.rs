use shared::Team;
use std::fmt;

/// A position on the board. Row 0 is the top, column 0 the left edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Stone(Team),
}

/// Dense row-major grid with fixed dimensions.
///
/// Indexing out of bounds panics; callers check `contains` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T: Copy + Default> Grid<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![T::default(); rows * cols],
        }
    }

    pub fn get(&self, pos: Pos) -> T {
        self.cells[self.index(pos)]
    }

    pub fn set(&mut self, value: T, pos: Pos) {
        let index = self.index(pos);
        self.cells[index] = value;
    }

    /// Resets every cell to `T::default()`.
    pub fn clear(&mut self) {
        self.cells.fill(T::default());
    }
}

impl<T> Grid<T> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    /// Orthogonal neighbours of `pos` that lie on the grid: up, down, left, right.
    pub fn neighbors(&self, pos: Pos) -> impl Iterator<Item = Pos> + '_ {
        let up = pos.row.checked_sub(1).map(|row| Pos::new(row, pos.col));
        let down = pos.row.checked_add(1).map(|row| Pos::new(row, pos.col));
        let left = pos.col.checked_sub(1).map(|col| Pos::new(pos.row, col));
        let right = pos.col.checked_add(1).map(|col| Pos::new(pos.row, col));

        [up, down, left, right]
            .into_iter()
            .flatten()
            .filter(move |neighbor| self.contains(*neighbor))
    }

    /// Every position in scan order: lowest row first, then lowest column.
    pub fn positions(&self) -> impl Iterator<Item = Pos> {
        let cols = self.cols;
        (0..self.rows).flat_map(move |row| (0..cols).map(move |col| Pos::new(row, col)))
    }

    fn index(&self, pos: Pos) -> usize {
        assert!(
            self.contains(pos),
            "position ({}, {}) outside {}x{} grid",
            pos.row,
            pos.col,
            self.rows,
            self.cols
        );
        pos.row * self.cols + pos.col
    }
}

pub type Board = Grid<Cell>;

/// Diagnostic rendering: columns separated by a space, rows by a newline,
/// empty cells as `.`, no trailing newline.
impl fmt::Display for Grid<Cell> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            if row > 0 {
                writeln!(f)?;
            }
            for col in 0..self.cols {
                if col > 0 {
                    write!(f, " ")?;
                }
                match self.get(Pos::new(row, col)) {
                    Cell::Empty => write!(f, ".")?,
                    Cell::Stone(team) => write!(f, "{}", team.marker())?,
                }
            }
        }
        Ok(())
    }
}
