//! Vocabulary import from Excel and CSV files into the catalog
//!
//! Columns are detected from the header row (case-insensitive):
//! `word` (required), `meaning` (required), `part_of_speech`/`pos`,
//! `examples` (`|`-separated), `cloze` (`|`-separated), `tags`
//! (comma-separated), `category`, `frequency`/`rank`, `audio`, `image`.
//! Unknown columns are ignored.

use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use std::path::Path;

use crate::db::SqliteStore;
use crate::error::{CoreError, Result};
use crate::models::{Media, VocabularyItem, DEFAULT_CATEGORY};

/// Column index mapping
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColumnMapping {
    pub word: usize,
    pub meaning: usize,
    pub part_of_speech: Option<usize>,
    pub examples: Option<usize>,
    pub cloze: Option<usize>,
    pub tags: Option<usize>,
    pub category: Option<usize>,
    pub frequency: Option<usize>,
    pub audio: Option<usize>,
    pub image: Option<usize>,
}

/// Detect column indices from header names
pub fn detect_columns(headers: &[String]) -> Result<ColumnMapping> {
    let mut mapping = ColumnMapping::default();
    let mut word = None;
    let mut meaning = None;

    for (i, header) in headers.iter().enumerate() {
        match header.trim().to_lowercase().as_str() {
            "word" | "words" | "vocabulary" | "term" => word = Some(i),
            "meaning" | "meanings" | "definition" | "definitions" => meaning = Some(i),
            "part_of_speech" | "part of speech" | "pos" => mapping.part_of_speech = Some(i),
            "example" | "examples" | "sentence" | "sentences" => mapping.examples = Some(i),
            "cloze" | "cloze_sentences" => mapping.cloze = Some(i),
            "tag" | "tags" => mapping.tags = Some(i),
            "category" => mapping.category = Some(i),
            "frequency" | "frequency_rank" | "rank" => mapping.frequency = Some(i),
            "audio" => mapping.audio = Some(i),
            "image" | "picture" => mapping.image = Some(i),
            _ => {}
        }
    }

    mapping.word = word.ok_or_else(|| {
        CoreError::Import("Missing required 'Word' column in file header".to_string())
    })?;
    mapping.meaning = meaning.ok_or_else(|| {
        CoreError::Import("Missing required 'Meaning' column in file header".to_string())
    })?;
    Ok(mapping)
}

/// Parse an Excel or CSV file into catalog items (ids unassigned)
pub fn parse_file(path: impl AsRef<Path>, default_category: &str) -> Result<Vec<VocabularyItem>> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "xlsx" | "xls" | "xlsm" | "ods" => read_sheet(path)?,
        "csv" => read_csv(path)?,
        _ => {
            return Err(CoreError::Import(format!(
                "Unsupported file format: .{}",
                extension
            )))
        }
    };

    let mut rows = rows.into_iter();
    let headers = rows
        .next()
        .ok_or_else(|| CoreError::Import("Empty file - no header row".to_string()))?;
    let mapping = detect_columns(&headers)?;

    Ok(rows
        .filter_map(|row| build_item(&row, &mapping, default_category))
        .collect())
}

/// Parse a file and add its items to the catalog
pub fn import_file(store: &SqliteStore, path: impl AsRef<Path>, default_category: &str) -> Result<usize> {
    let items = parse_file(path.as_ref(), default_category)?;
    let ids = store.insert_items(&items)?;
    log::info!(
        "Imported {} items from {}",
        ids.len(),
        path.as_ref().display()
    );
    Ok(ids.len())
}

fn read_sheet(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CoreError::Import(format!("Failed to open Excel file: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CoreError::Import("No sheets found in Excel file".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| CoreError::Import(format!("Failed to read sheet: {}", e)))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_string).collect())
        .collect())
}

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CoreError::Import(format!("Failed to open CSV file: {}", e)))?;

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| CoreError::Import(format!("Failed to read CSV row: {}", e)))
        })
        .collect()
}

fn build_item(row: &[String], mapping: &ColumnMapping, default_category: &str) -> Option<VocabularyItem> {
    let field = |idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let list = |idx: Option<usize>, sep: char| -> Vec<String> {
        field(idx)
            .map(|s| {
                s.split(sep)
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let word = field(Some(mapping.word))?;
    let meaning = field(Some(mapping.meaning))?;
    let category = field(mapping.category)
        .or_else(|| Some(default_category.trim().to_string()).filter(|c| !c.is_empty()))
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    Some(VocabularyItem {
        id: 0,
        word,
        meaning,
        part_of_speech: field(mapping.part_of_speech),
        examples: list(mapping.examples, '|'),
        cloze_sentences: list(mapping.cloze, '|'),
        tags: list(mapping.tags, ','),
        category,
        frequency_rank: field(mapping.frequency)
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| f as i64),
        media: Media {
            audio: field(mapping.audio),
            image: field(mapping.image),
        },
    })
}

/// Helper to extract string from Excel cell
fn cell_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
        Data::Empty => String::new(),
    }
}
