use super::{ReportError, ReportTable};

/// Header row followed by the data rows. The title is not part of the CSV.
pub fn to_csv(table: &ReportTable) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush().map_err(csv::Error::from)?;

    writer
        .into_inner()
        .map_err(|e| ReportError::Csv(csv::Error::from(e.into_error())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_cells_with_commas() {
        let mut table = ReportTable::new("Inventory", ["SKU", "Name", "Stock"]);
        table.push_row(vec!["RB-10".into(), "Rebar, 10mm".into(), "120".into()]);
        table.push_row(vec!["CEM-40".into(), "Cement 40kg".into(), "8".into()]);

        let out = String::from_utf8(to_csv(&table).unwrap()).unwrap();
        assert_eq!(
            out,
            "SKU,Name,Stock\nRB-10,\"Rebar, 10mm\",120\nCEM-40,Cement 40kg,8\n"
        );
    }

    #[test]
    fn empty_table_still_has_headers() {
        let table = ReportTable::new("Sales", ["Date", "Count", "Total"]);
        let out = String::from_utf8(to_csv(&table).unwrap()).unwrap();
        assert_eq!(out, "Date,Count,Total\n");
    }
}
