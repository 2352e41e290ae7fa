use crate::{ColumnCell, StudentId};
use prettytable::{Cell, Row, Table};
use std::collections::{BTreeMap, BTreeSet};

/// Renders one privacy tier of a gradebook: a row per student, a column per gradebook column.
/// WARNING: Not intended to have a stable output. Use for debugging purposes only.
pub fn render_cells(cells: &[ColumnCell], is_private: bool) -> Table {
    let tier: Vec<&ColumnCell> = cells
        .iter()
        .filter(|cell| cell.is_private == is_private)
        .collect();

    let slugs: BTreeSet<&str> = tier.iter().map(|cell| cell.column_slug.as_str()).collect();
    let mut rows: BTreeMap<StudentId, BTreeMap<&str, &ColumnCell>> = BTreeMap::new();
    for cell in &tier {
        rows.entry(cell.student_id)
            .or_default()
            .insert(cell.column_slug.as_str(), cell);
    }

    let mut table = Table::new();
    let mut header = vec![Cell::new("student")];
    header.extend(slugs.iter().map(|slug| Cell::new(slug)));
    table.add_row(Row::new(header));

    for (student_id, by_slug) in rows {
        let mut row = vec![Cell::new(&student_id.to_string())];
        for slug in &slugs {
            let content = by_slug.get(slug).map(|cell| format_cell(cell)).unwrap_or_default();
            row.push(Cell::new(&content));
        }
        table.add_row(Row::new(row));
    }

    table
}

pub fn print_cells(cells: &[ColumnCell], is_private: bool) {
    render_cells(cells, is_private).printstd();
}

fn format_cell(cell: &ColumnCell) -> String {
    let mut content = match cell.effective_score() {
        Some(score) => format!("{}", score),
        None => "-".to_string(),
    };
    if cell.score_override.is_some() {
        content.push_str(" (override)");
    }
    if cell.is_missing {
        content.push_str(" missing");
    }
    if cell.incomplete_values.is_some() {
        content.push('*');
    }

    content
}
