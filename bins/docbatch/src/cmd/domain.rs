use docbatch_api::{Record, RecordId};

/// The batch written on every run. The first book has no id and gets a
/// generated one; "2" carries a misspelled author.
pub fn sample_books() -> Vec<Record> {
    vec![
        Record::new(RecordId::Generate, "The Bluest Eye", "Toni Morrison"),
        Record::new(RecordId::supplied("2"), "Sula", "Toni Morriso"),
        Record::new(RecordId::supplied("3"), "Song of Solomon", "Toni Morrison"),
    ]
}
