//! Board positions parsed from the placement field of a `[[FEN: ...]]` marker.
//!
//! This is a renderer only. Nothing here knows chess rules; malformed
//! placements degrade to whatever cells can be derived.

pub const BOARD_SIZE: usize = 8;

const EMPTY_RANK: &str = "8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shade {
    Light,
    Dark,
}

impl Shade {
    pub fn at(rank: usize, col: usize) -> Self {
        if (rank + col) % 2 == 1 {
            Shade::Dark
        } else {
            Shade::Light
        }
    }
}

/// Side owning a piece code: uppercase is white, everything else black.
pub fn piece_side(code: char) -> Side {
    if code.is_uppercase() {
        Side::White
    } else {
        Side::Black
    }
}

/// Unicode glyph for a piece code. Unknown codes render as themselves.
pub fn piece_glyph(code: char) -> char {
    match code {
        'K' => '♔',
        'Q' => '♕',
        'R' => '♖',
        'B' => '♗',
        'N' => '♘',
        'P' => '♙',
        'k' => '♚',
        'q' => '♛',
        'r' => '♜',
        'b' => '♝',
        'n' => '♞',
        'p' => '♟',
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub rank: usize,
    pub col: usize,
    pub piece: Option<char>,
    pub shade: Shade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardPosition {
    ranks: Vec<Vec<Option<char>>>,
    side_to_move: Option<String>,
}

impl BoardPosition {
    /// Parses a marker payload such as `8/8/8/4k3/8/8/8/4K3 w`.
    ///
    /// Always yields eight ranks. A missing rank is empty; each digit
    /// character expands to that many empty cells and any other character is
    /// one occupied cell. Ranks are not clipped or padded to eight cells.
    pub fn parse(payload: &str) -> Self {
        let mut fields = payload.split(' ');
        let placement = fields.next().unwrap_or_default();
        let side_to_move = fields.next().map(str::to_string);
        let rows: Vec<&str> = placement.split('/').collect();

        let ranks = (0..BOARD_SIZE)
            .map(|idx| {
                let row = rows
                    .get(idx)
                    .copied()
                    .filter(|row| !row.is_empty())
                    .unwrap_or(EMPTY_RANK);
                expand_rank(row)
            })
            .collect();

        Self {
            ranks,
            side_to_move,
        }
    }

    pub fn ranks(&self) -> &[Vec<Option<char>>] {
        &self.ranks
    }

    pub fn side_to_move(&self) -> Option<&str> {
        self.side_to_move.as_deref()
    }

    /// Only a side field of exactly `w` reads as white to move.
    pub fn side_label(&self) -> &'static str {
        if self.side_to_move() == Some("w") {
            "White to move"
        } else {
            "Black to move"
        }
    }

    pub fn piece_at(&self, rank: usize, col: usize) -> Option<char> {
        self.ranks.get(rank)?.get(col).copied().flatten()
    }

    /// Every derived cell, top rank first, left to right.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.ranks.iter().enumerate().flat_map(|(rank, row)| {
            row.iter().enumerate().map(move |(col, piece)| Cell {
                rank,
                col,
                piece: *piece,
                shade: Shade::at(rank, col),
            })
        })
    }

    pub fn occupied(&self) -> usize {
        self.cells().filter(|cell| cell.piece.is_some()).count()
    }

    /// Fixed-width rendering: ranks are clipped or padded to eight columns.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("  ┌────────────────┐\n");
        for (rank, row) in self.ranks.iter().enumerate() {
            out.push_str(&format!("{} │", BOARD_SIZE - rank));
            for col in 0..BOARD_SIZE {
                let piece = row.get(col).copied().flatten();
                let symbol = match (piece, Shade::at(rank, col)) {
                    (Some(code), _) => piece_glyph(code),
                    (None, Shade::Light) => '·',
                    (None, Shade::Dark) => '░',
                };
                out.push(symbol);
                out.push(' ');
            }
            out.push_str("│\n");
        }
        out.push_str("  └────────────────┘\n");
        out.push_str("   a b c d e f g h\n");
        out.push_str(&format!("   {}\n", self.side_label()));
        out
    }

    /// HTML grid fragment, eight columns wide.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<div class='board'><div class='grid'>");
        for (rank, row) in self.ranks.iter().enumerate() {
            for col in 0..BOARD_SIZE {
                let shade = match Shade::at(rank, col) {
                    Shade::Light => "light",
                    Shade::Dark => "dark",
                };
                match row.get(col).copied().flatten() {
                    Some(code) => {
                        let side = match piece_side(code) {
                            Side::White => "white",
                            Side::Black => "black",
                        };
                        out.push_str(&format!(
                            "<div class='sq {shade}'><span class='{side}'>{}</span></div>",
                            piece_glyph(code)
                        ));
                    }
                    None => out.push_str(&format!("<div class='sq {shade}'></div>")),
                }
            }
        }
        out.push_str(&format!(
            "</div><div class='to-move'>{}</div></div>",
            self.side_label()
        ));
        out
    }
}

fn expand_rank(row: &str) -> Vec<Option<char>> {
    let mut cells = Vec::with_capacity(BOARD_SIZE);
    for ch in row.chars() {
        match ch.to_digit(10) {
            Some(count) => cells.extend(std::iter::repeat(None).take(count as usize)),
            None => cells.push(Some(ch)),
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::{piece_glyph, BoardPosition, Shade};

    #[test]
    fn two_kings_scenario() {
        let board = BoardPosition::parse("8/8/8/4k3/8/8/8/4K3 w");
        assert_eq!(board.occupied(), 2);
        assert_eq!(board.piece_at(3, 4), Some('k'));
        assert_eq!(board.piece_at(7, 4), Some('K'));
        assert_eq!(board.side_label(), "White to move");
    }

    #[test]
    fn well_formed_placement_yields_64_cells_in_input_order() {
        let board = BoardPosition::parse("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let cells: Vec<_> = board.cells().collect();
        assert_eq!(cells.len(), 64);
        let top: String = cells[..8].iter().filter_map(|cell| cell.piece).collect();
        let bottom: String = cells[56..].iter().filter_map(|cell| cell.piece).collect();
        assert_eq!(top, "rnbqkbnr");
        assert_eq!(bottom, "RNBQKBNR");
        assert_eq!(board.occupied(), 32);
        assert_eq!(board.side_to_move(), Some("w"));
    }

    #[test]
    fn side_field_must_be_exactly_w_for_white() {
        assert_eq!(
            BoardPosition::parse("8/8/8/8/8/8/8/8 white").side_label(),
            "Black to move"
        );
        assert_eq!(
            BoardPosition::parse("8/8/8/8/8/8/8/8 W").side_label(),
            "Black to move"
        );
        assert_eq!(
            BoardPosition::parse("8/8/8/8/8/8/8/8 w").side_label(),
            "White to move"
        );
    }

    #[test]
    fn missing_and_short_ranks_degrade_without_panicking() {
        let board = BoardPosition::parse("4k3/8");
        assert_eq!(board.ranks().len(), 8);
        assert!(board.ranks()[2..].iter().all(|rank| rank.len() == 8));
        assert_eq!(board.occupied(), 1);
        assert_eq!(board.side_label(), "Black to move");

        let short = BoardPosition::parse("3/8/8/8/8/8/8/8 b");
        assert_eq!(short.ranks()[0].len(), 3);
        assert!(short.to_text().lines().count() > 8);
    }

    #[test]
    fn odd_characters_never_raise() {
        for payload in ["", " ", "///////////", "zz?!/9x/--", "8/8/8/8/8/8/8/8/8/8", "💥"] {
            let board = BoardPosition::parse(payload);
            assert_eq!(board.ranks().len(), 8);
            let _ = board.to_text();
            let _ = board.to_html();
        }
    }

    #[test]
    fn overlong_rank_keeps_extra_cells_but_text_clips_them() {
        let board = BoardPosition::parse("pppppppppp");
        assert_eq!(board.ranks()[0].len(), 10);
        let first_row = board.to_text().lines().nth(1).unwrap_or_default().to_string();
        assert_eq!(first_row.matches(piece_glyph('p')).count(), 8);
    }

    #[test]
    fn shading_alternates_by_rank_and_column() {
        assert_eq!(Shade::at(0, 0), Shade::Light);
        assert_eq!(Shade::at(0, 1), Shade::Dark);
        assert_eq!(Shade::at(7, 7), Shade::Light);
        assert_eq!(Shade::at(3, 4), Shade::Dark);
    }
}
