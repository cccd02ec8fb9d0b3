//! Splitting one import line into trimmed fields.

use csv::{ReaderBuilder, StringRecord, Trim};

/// Split a CSV line into trimmed fields.
///
/// Double-quoted fields may contain commas. A line the CSV reader cannot
/// parse falls back to a plain comma split.
pub fn split_row(line: &str) -> Vec<String> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(str::to_string).collect(),
        Ok(false) => Vec::new(),
        Err(e) => {
            tracing::debug!(error = %e, "falling back to plain split");
            line.split(',').map(|f| f.trim().to_string()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_row() {
        assert_eq!(
            split_row(" Jane Doe , ID1,977123456,AreaA,paid "),
            vec!["Jane Doe", "ID1", "977123456", "AreaA", "paid"]
        );
    }

    #[test]
    fn test_quoted_comma() {
        assert_eq!(
            split_row(r#""Doe, Jane",ID1,977123456,AreaA,PAID"#),
            vec!["Doe, Jane", "ID1", "977123456", "AreaA", "PAID"]
        );
    }

    #[test]
    fn test_short_row() {
        assert_eq!(split_row("Jane,ID1"), vec!["Jane", "ID1"]);
        assert!(split_row("").is_empty());
    }
}
