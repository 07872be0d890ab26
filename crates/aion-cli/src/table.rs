//! Box-drawn tables for strategy listings.

use colored::Colorize;

/// Collects rows and renders them with Unicode borders.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row, padding or truncating it to the header count.
    pub fn row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = cells
            .into_iter()
            .map(Into::into)
            .take(self.headers.len())
            .collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .fold(h.chars().count(), usize::max)
            })
            .collect()
    }

    fn border(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(&self, cells: &[String], widths: &[usize], bold: bool) -> String {
        let cells: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, &width)| {
                let padded = format!("{cell:<width$}");
                if bold {
                    format!(" {} ", padded.bold())
                } else {
                    format!(" {padded} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut lines = vec![
            Self::border(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            self.line(&self.headers, &widths, true),
            Self::border(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        for row in &self.rows {
            lines.push(self.line(row, &widths, false));
        }
        lines.push(Self::border(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
