//! Tabular view of a reference graph.

use std::fmt;

use serde::Serialize;

use crate::cell::Cell;
use crate::value::Value;

/// Column headers, in display order.
pub const COLUMNS: [&str; 5] = ["id", "function", "args", "kwargs", "node"];

/// One rendered row per graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub id: String,
    pub function: String,
    pub args: String,
    pub kwargs: String,
    pub node: String,
}

impl TableRow {
    /// Renders a cell; embedded cells show up as `@id`.
    pub fn from_cell(cell: &Cell) -> Self {
        let flat = cell.dereferenced();
        TableRow {
            id: cell.key().to_string(),
            function: flat.function().to_string(),
            args: Value::List(flat.arguments().to_vec()).to_string(),
            kwargs: Value::Map(flat.kwargs().clone()).to_string(),
            node: cell.node().to_string(),
        }
    }

    fn fields(&self) -> [&str; 5] {
        [
            self.id.as_str(),
            self.function.as_str(),
            self.args.as_str(),
            self.kwargs.as_str(),
            self.node.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up the row with the given rendered id.
    pub fn row(&self, id: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.id == id)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths = COLUMNS.map(|c| c.chars().count());
        for row in &self.rows {
            for (w, field) in widths.iter_mut().zip(row.fields()) {
                *w = (*w).max(field.chars().count());
            }
        }

        let write_line = |f: &mut fmt::Formatter<'_>, fields: [&str; 5]| -> fmt::Result {
            let line = fields
                .iter()
                .zip(widths)
                .map(|(field, w)| format!("{field:<w$}"))
                .collect::<Vec<_>>()
                .join(" | ");
            writeln!(f, "{}", line.trim_end())
        };

        write_line(f, COLUMNS)?;
        let rule = widths.map(|w| "-".repeat(w));
        write_line(f, rule.each_ref().map(String::as_str))?;
        for row in &self.rows {
            write_line(f, row.fields())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BuiltinOp;

    #[test]
    fn row_uses_references() {
        let a = Cell::new("a", 1);
        let c = Cell::new("c", BuiltinOp::Add.function())
            .arg(a)
            .arg(2)
            .kwarg("k", "v");
        let row = TableRow::from_cell(&c);
        assert_eq!(row.id, "c");
        assert_eq!(row.function, "add");
        assert_eq!(row.args, "[@a, 2]");
        assert_eq!(row.kwargs, "{k: v}");
        assert_eq!(row.node, "c");
    }

    #[test]
    fn display_aligns_columns() {
        let table = Table {
            rows: vec![
                TableRow::from_cell(&Cell::new("a", 1)),
                TableRow::from_cell(&Cell::new("total", BuiltinOp::Sum.function()).arg(Value::list(["@a"]))),
            ],
        };
        let expected = "\
id    | function | args   | kwargs | node
----- | -------- | ------ | ------ | -----
a     | 1        | []     | {}     | a
total | sum      | [[@a]] | {}     | total
";
        assert_eq!(table.to_string(), expected);
    }
}
