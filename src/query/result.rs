//! Query result sets

use serde::Serialize;

use crate::types::Value;

/// Materialized query result: a header plus rows of values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    /// Output column headers, in select order
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Build a result set from a header and rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Result set with a header and no rows
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as CSV with a header line
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.join(","));
        out.push('\n');
        for row in &self.rows {
            let rendered: Vec<String> = row.iter().map(csv_field).collect();
            out.push_str(&rendered.join(","));
            out.push('\n');
        }
        out
    }

    /// Render as an aligned text table for terminal output
    pub fn to_table(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(Value::render).collect())
            .collect();
        for row in &rendered {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }

        let mut out = String::new();
        let line = |cells: &[String], widths: &[usize], out: &mut String| {
            let padded: Vec<String> = cells
                .iter()
                .zip(widths)
                .map(|(c, w)| format!("{:<width$}", c, width = w))
                .collect();
            out.push_str(padded.join(" | ").trim_end());
            out.push('\n');
        };
        line(&self.columns, &widths, &mut out);
        out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
        out.push('\n');
        for row in &rendered {
            line(row, &widths, &mut out);
        }
        out
    }

    /// Rough in-memory size, used by the cache's byte bound
    pub fn approx_size_bytes(&self) -> usize {
        let header: usize = self.columns.iter().map(|c| c.len() + 24).sum();
        let cells: usize = self
            .rows
            .iter()
            .flat_map(|row| row.iter())
            .map(|v| match v {
                Value::Str(s) => s.len() + 32,
                _ => 32,
            })
            .sum();
        header + cells
    }
}

fn csv_field(value: &Value) -> String {
    let s = value.render();
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s
    }
}
