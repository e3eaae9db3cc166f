use crate::core::db::RowSet;

/// Results Grid Module
///
/// Renders a row set as an aligned plain-text table for the sample output.

/// Text shown for SQL NULL.
pub const NULL_DISPLAY: &str = "";

/// Represents the entire grid structure.
#[derive(Debug, Clone, Default)]
pub struct ResultsGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultsGrid {
    /// Creates a new, empty ResultsGrid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a grid from a query result.
    pub fn from_row_set(rows: &RowSet) -> Self {
        let mut grid = ResultsGrid::new();
        grid.set_headers(rows.columns.clone());
        for row in &rows.rows {
            grid.add_row(
                row.iter()
                    .map(|field| field.clone().unwrap_or_else(|| NULL_DISPLAY.to_string()))
                    .collect(),
            );
        }
        grid
    }

    /// Sets the headers for the grid.
    pub fn set_headers(&mut self, headers: Vec<String>) {
        self.headers = headers;
    }

    /// Adds a row to the grid. Each row is represented as a vector of strings.
    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        (0..columns)
            .map(|i| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .chain(self.headers.get(i))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Renders the grid with left-aligned, padded columns, a header underline,
    /// and a trailing row count.
    pub fn render(&self) -> String {
        if self.headers.is_empty() && self.rows.is_empty() {
            return String::new();
        }
        let widths = self.column_widths();
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&render_line(&self.headers, &widths));
            output.push('\n');
            let underline: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            output.push_str(&underline.join("-+-"));
            output.push('\n');
        }
        for row in &self.rows {
            output.push_str(&render_line(row, &widths));
            output.push('\n');
        }
        let noun = if self.rows.len() == 1 { "row" } else { "rows" };
        output.push_str(&format!("({} {})\n", self.rows.len(), noun));
        output
    }
}

fn render_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(i, width)| {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            format!("{:<width$}", cell, width = *width)
        })
        .collect();
    padded.join(" | ").trim_end().to_string()
}
