use exovet::delimited::{self, ParseIssue};

const CELLS: &[&str] = &[
    "K1",
    "0,34",
    "line one\nline two",
    "say \"hi\"",
    "\"",
    "",
    " padded ",
    "crlf\r\ninside",
    "ünïcode ☉",
];

#[test]
fn scenario_quoted_comma() {
    let table = delimited::parse("id,depth\nK1,0.12\nK2,\"0,34\"\n");
    assert_eq!(table.headers, vec!["id", "depth"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].get("id"), Some("K1"));
    assert_eq!(table.rows[0].get("depth"), Some("0.12"));
    assert_eq!(table.rows[1].get("id"), Some("K2"));
    assert_eq!(table.rows[1].get("depth"), Some("0,34"));
    assert!(table.issues.is_empty());
}

#[test]
fn every_record_has_one_value_per_header() {
    let text = "a,b,c\n1\n1,2\n1,2,3\n1,2,3,4,5\n";
    let table = delimited::parse(text);
    assert_eq!(table.rows.len(), 4);
    for row in &table.rows {
        assert_eq!(row.len(), 3);
    }
    assert_eq!(table.rows[0].values().collect::<Vec<_>>(), vec!["1", "", ""]);
    assert_eq!(table.rows[3].values().collect::<Vec<_>>(), vec!["1", "2", "3"]);
}

#[test]
fn written_tables_read_back_exactly() {
    let headers: Vec<String> = (0..3).map(|i| format!("col{i}")).collect();
    // Walk the tricky cells through every column position.
    let rows: Vec<Vec<String>> = (0..CELLS.len())
        .map(|start| {
            (0..headers.len())
                .map(|col| CELLS[(start + col) % CELLS.len()].to_string())
                .collect()
        })
        .collect();

    let text = delimited::write(&headers, &rows);
    let table = delimited::parse(&text);

    assert!(table.issues.is_empty());
    assert_eq!(table.headers, headers);
    assert_eq!(table.rows.len(), rows.len());
    for (record, expected) in table.rows.iter().zip(&rows) {
        let values: Vec<&str> = record.values().collect();
        assert_eq!(values, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

#[test]
fn single_column_with_empty_cell_survives() {
    let text = delimited::write(&["note"], [[""], ["x"]]);
    let table = delimited::parse(&text);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].get("note"), Some(""));
}

#[test]
fn parsing_is_idempotent() {
    let text = "koi,period,comment\nK00752.01,9.488,\"confirmed, \"\"Kepler-227 b\"\"\"\nK00753.01,19.899,\n";
    assert_eq!(delimited::parse(text), delimited::parse(text));
}

#[test]
fn empty_and_header_only() {
    let empty = delimited::parse("");
    assert!(empty.headers.is_empty());
    assert!(empty.rows.is_empty());

    let header_only = delimited::parse("kepid,koi_disposition\n");
    assert_eq!(header_only.headers, vec!["kepid", "koi_disposition"]);
    assert!(header_only.rows.is_empty());
}

#[test]
fn trailing_row_without_newline() {
    let table = delimited::parse("id\nK1\nK2");
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1].get("id"), Some("K2"));
}

#[test]
fn unbalanced_quote_degrades_to_one_cell() {
    let table = delimited::parse("id,note\nK1,\"never closed\nK2,ok\n");
    assert_eq!(table.issues, vec![ParseIssue::UnterminatedQuote { row: 1 }]);
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].get("note"), Some("never closed\nK2,ok\n"));
}

#[test]
fn serializes_rows_in_header_order() {
    let table = delimited::parse("zeta,alpha\n1,2\n");
    let json = serde_json::to_string(&table).unwrap();
    assert_eq!(json, r#"{"headers":["zeta","alpha"],"rows":[{"zeta":"1","alpha":"2"}]}"#);
}
