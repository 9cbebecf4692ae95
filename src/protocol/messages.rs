use super::types::QueryType;

/// Split a NUL-terminated UTF-8 string off the front of `data`.
pub fn parse_cstring(data: &[u8]) -> Option<(&str, &[u8])> {
    let null_pos = data.iter().position(|&b| b == 0)?;
    let string = std::str::from_utf8(&data[..null_pos]).ok()?;
    Some((string, &data[null_pos + 1..]))
}

/// Classify a statement by its leading keyword.
pub fn detect_query_type(query: &str) -> QueryType {
    let first_word = query
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(';')
        .to_lowercase();

    match first_word.as_str() {
        "select" | "with" => QueryType::Select,
        "insert" => QueryType::Insert,
        "update" => QueryType::Update,
        "delete" => QueryType::Delete,
        "create" => QueryType::Create,
        "drop" => QueryType::Drop,
        "alter" => QueryType::Alter,
        "begin" | "start" | "commit" | "end" | "rollback" | "savepoint" | "release" => {
            QueryType::Transaction
        }
        _ => QueryType::Other(first_word),
    }
}
