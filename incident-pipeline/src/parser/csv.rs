use std::collections::HashMap;

use super::{
    first_non_empty, ParsedRecord, RecordFields, CVE_FIELDS, DATE_FIELDS, DESCRIPTION_FIELDS,
    LINK_FIELDS, PRODUCT_FIELDS, REFERENCE_FIELDS, TITLE_FIELDS, VENDOR_FIELDS,
};

/// Records from a CSV table. The first line is the header; blank rows are skipped.
pub(crate) fn parse_records(body: &str) -> Result<Vec<ParsedRecord>, String> {
    let mut lines = body
        .trim_start_matches('\u{feff}')
        .lines()
        .map(|line| line.trim_end_matches('\r'));

    let header_line = lines.next().ok_or_else(|| "empty CSV payload".to_string())?;
    let header = split_line(header_line);
    if header.iter().all(|h| h.trim().is_empty()) {
        return Err("CSV header row is empty".to_string());
    }

    let columns: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(i, name)| (column_key(name), i))
        .collect();

    let records = lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let cells = split_line(line);
            let get = |candidates: &[&str]| -> Option<String> {
                first_non_empty(candidates.iter().map(|name| {
                    columns
                        .get(&column_key(name))
                        .and_then(|&i| cells.get(i))
                        .map(String::as_str)
                }))
            };

            let fields = RecordFields {
                title: get(TITLE_FIELDS),
                cve: get(CVE_FIELDS).filter(|id| id.to_uppercase().starts_with("CVE-")),
                description: get(DESCRIPTION_FIELDS),
                date: get(DATE_FIELDS),
                vendor: get(VENDOR_FIELDS),
                product: get(PRODUCT_FIELDS),
                references: get(REFERENCE_FIELDS),
                link: get(LINK_FIELDS).filter(|link| link.starts_with("http")),
            };

            fields.into_record(|| {
                header
                    .iter()
                    .zip(cells.iter())
                    .filter(|(_, value)| !value.trim().is_empty())
                    .map(|(name, value)| format!("{}: {}", name.trim(), value.trim()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        })
        .collect();

    Ok(records)
}

/// Split one CSV line on commas outside quotes. `""` inside a quoted field is a
/// literal quote.
pub fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);

    cells
}

// "Vendor Project", "vendor_project" and "vendorProject" all map to "vendorproject".
fn column_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
