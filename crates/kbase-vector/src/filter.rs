//! Renders a [`MetadataFilter`] as a LanceDB `only_if` predicate.

use kbase_core::types::{ChunkMetadata, MetadataFilter};

/// Column holding a metadata field. Offsets are renamed to avoid SQL keywords.
pub fn column_for(key: &str) -> Option<&'static str> {
    ChunkMetadata::FIELDS
        .iter()
        .find(|f| **f == key)
        .map(|f| match *f {
            "start" => "start_offset",
            "end" => "end_offset",
            other => other,
        })
}

fn is_numeric(key: &str) -> bool {
    matches!(key, "chunk_index" | "total_chunks" | "start" | "end")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Empty filter.
    All,
    /// Names an unknown field or compares a numeric field with non-numeric text.
    Never,
    Sql(String),
}

pub fn to_predicate(filter: &MetadataFilter) -> Predicate {
    if filter.is_empty() {
        return Predicate::All;
    }
    let mut clauses = Vec::new();
    for (key, value) in filter.iter() {
        let Some(column) = column_for(key) else {
            return Predicate::Never;
        };
        if is_numeric(key) {
            // Non-numeric text can never equal a numeric field.
            let Ok(n) = value.parse::<u64>() else {
                return Predicate::Never;
            };
            if n.to_string() != value {
                return Predicate::Never;
            }
            clauses.push(format!("{column} = {n}"));
        } else {
            clauses.push(format!("{column} = '{}'", value.replace('\'', "''")));
        }
    }
    Predicate::Sql(clauses.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_predicate() {
        assert_eq!(to_predicate(&MetadataFilter::new()), Predicate::All);
    }

    #[test]
    fn quotes_are_escaped() {
        let f = MetadataFilter::category("it's");
        assert_eq!(to_predicate(&f), Predicate::Sql("category = 'it''s'".to_string()));
    }

    #[test]
    fn clauses_are_joined_in_key_order() {
        let f = MetadataFilter::category("sql").with("chunk_index", "2");
        assert_eq!(
            to_predicate(&f),
            Predicate::Sql("category = 'sql' AND chunk_index = 2".to_string())
        );
    }

    #[test]
    fn unknown_or_malformed_keys_never_match() {
        assert_eq!(to_predicate(&MetadataFilter::new().with("author", "x")), Predicate::Never);
        assert_eq!(to_predicate(&MetadataFilter::new().with("chunk_index", "02")), Predicate::Never);
        assert_eq!(to_predicate(&MetadataFilter::new().with("end", "x")), Predicate::Never);
    }

    #[test]
    fn offsets_use_renamed_columns() {
        let f = MetadataFilter::new().with("start", "0");
        assert_eq!(to_predicate(&f), Predicate::Sql("start_offset = 0".to_string()));
    }
}
