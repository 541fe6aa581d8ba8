use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use cube_cli::types::{InspectResult, LongResult};
use cube_common::format_decimal;
use cube_match::{MatchPair, MatchResult, UnmatchReport};
use cube_model::Value;

pub fn print_inspect(result: &InspectResult) {
    println!("Input: {}", result.input.display());
    println!(
        "Sites: {}  Observations: {}",
        result.sites, result.observations
    );
    let mut table = Table::new();
    table.set_header(vec![header_cell("Column"), header_cell("Role")]);
    apply_table_style(&mut table);
    for (columns, role, color) in [
        (&result.invariant, "invariant", Color::Blue),
        (&result.variant, "variant", Color::Green),
        (&result.ignored, "all null", Color::DarkGrey),
    ] {
        for column in columns {
            table.add_row(vec![Cell::new(column), Cell::new(role).fg(color)]);
        }
    }
    println!("{table}");
}

pub fn print_long(result: &LongResult) {
    println!(
        "Sites: {}  Observations: {}",
        result.sites, result.observations
    );
    println!("Observations CSV: {}", result.observations_csv.display());
    println!("Sidecar CSV: {}", result.sidecar_csv.display());
}

pub fn print_match(result: &MatchResult) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Group"),
        header_cell("Major"),
        header_cell("Minor"),
        header_cell("Distance (km)"),
        header_cell("Matched peaks"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    align_column(&mut table, 3, CellAlignment::Right);
    align_column(&mut table, 4, CellAlignment::Right);
    for pair in &result.pairs {
        table.add_row(pair_row(pair));
    }
    println!("{table}");

    let diagnostics = &result.diagnostics;
    println!(
        "Pairs: {}  Groups: {}  Sites: {}",
        result.pairs.len(),
        group_count(&result.pairs),
        result.dataset.len()
    );
    if !diagnostics.all_paired() {
        eprintln!(
            "Unpaired: {} major, {} minor",
            diagnostics.unmatched_major, diagnostics.unmatched_minor
        );
    }
}

pub fn print_unmatch(report: &UnmatchReport) {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Side"), header_cell("Key")]);
    apply_table_style(&mut table);
    for (side, keys) in [("major", &report.major_only), ("minor", &report.minor_only)] {
        for key in keys {
            table.add_row(vec![Cell::new(side), key_cell(key)]);
        }
    }
    if report.is_empty() {
        println!("Both panels hold the same keys.");
    } else {
        println!("{table}");
    }
    println!(
        "Major only: {}  Minor only: {}",
        report.major_only.len(),
        report.minor_only.len()
    );
}

fn pair_row(pair: &MatchPair) -> Vec<Cell> {
    vec![
        Cell::new(pair.group),
        key_cell(&pair.major).add_attribute(Attribute::Bold),
        key_cell(&pair.minor),
        pair.distance
            .map_or_else(|| dim_cell("-"), |d| Cell::new(format_decimal(d, 3))),
        pair.match_count
            .map_or_else(|| dim_cell("-"), |count| Cell::new(count)),
    ]
}

fn group_count(pairs: &[MatchPair]) -> usize {
    let mut groups: Vec<usize> = pairs.iter().map(|p| p.group).collect();
    groups.sort_unstable();
    groups.dedup();
    groups.len()
}

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn key_cell(key: &Value) -> Cell {
    Cell::new(key).fg(Color::Blue)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances_are_rounded_for_display() {
        assert_eq!(format_decimal(110.574_389, 3), "110.574");
        assert_eq!(format_decimal(12.0, 3), "12");
    }

    #[test]
    fn groups_are_counted_once() {
        let pairs = vec![
            MatchPair::new(1, "A", "a"),
            MatchPair::new(1, "A", "b"),
            MatchPair::new(2, "B", "c"),
        ];
        assert_eq!(group_count(&pairs), 2);
    }
}
