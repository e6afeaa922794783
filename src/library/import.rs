use anyhow::{Context, Result};
use tracing::{info, warn};

use super::types::{ReferenceRecord, TopicRecord};
use super::{reference_id, topic_id, Library};

const TABLE_HEADER: &str = "| Category | Author(s) | Title |";
const BATCH_SIZE: usize = 50;

/// Parse the open-access bibliography markdown table into reference records.
///
/// Expected columns: Category | Author(s) | Title | Year | Language |
/// Source type | Format | Subject focus | URL. Rows with fewer than nine
/// non-empty cells are skipped.
pub fn parse_bibliography(markdown: &str) -> Vec<ReferenceRecord> {
    let now = chrono::Utc::now().timestamp();
    let mut references = Vec::new();
    let mut in_table = false;

    for line in markdown.lines() {
        if line.contains(TABLE_HEADER) {
            in_table = true;
            continue;
        }
        if !in_table || !line.starts_with('|') || line.contains("---") {
            continue;
        }

        let cells: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() < 9 {
            continue;
        }

        let author = non_placeholder(cells[1], &["Unknown"]);
        let title = cells[2].to_string();
        let year = non_placeholder(cells[3], &["n.d.", "n/a"]).and_then(|y| y.parse::<i32>().ok());

        references.push(ReferenceRecord {
            id: reference_id(&title, author.as_deref(), year),
            category: cells[0].to_string(),
            author,
            title,
            year,
            language: Some(cells[4].to_string()),
            source_type: Some(cells[5].to_string()),
            format: Some(cells[6].to_string()),
            subject_focus: Some(cells[7].to_string()),
            url: Some(cells[8].to_string()),
            created_at: now,
        });
    }

    references
}

fn non_placeholder(cell: &str, placeholders: &[&str]) -> Option<String> {
    if cell.is_empty() || placeholders.contains(&cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

/// The ten bilingual topics the library ships with.
pub fn default_topics() -> Vec<TopicRecord> {
    const SEED: &[(&str, &str, &str)] = &[
        ("الفن والعمارة", "Art and Architecture", "cultural"),
        ("الأدب والشعر", "Literature and Poetry", "literary"),
        ("العلوم الطبيعية", "Natural Sciences", "scientific"),
        ("الموسيقى والمسرح", "Music and Theater", "cultural"),
        ("الفلسفة والفكر", "Philosophy and Thought", "philosophical"),
        ("التاريخ والسياسة", "History and Politics", "historical"),
        ("الجغرافيا والمناظر الطبيعية", "Geography and Landscapes", "geographical"),
        ("المجتمع والثقافة الإيطالية", "Italian Society and Culture", "cultural"),
        ("السيرة الذاتية لجوته", "Goethe's Biography", "biographical"),
        ("تأثير الرحلة على أعمال جوته", "Journey's Impact on Goethe's Work", "literary"),
    ];

    let now = chrono::Utc::now().timestamp();
    SEED.iter()
        .map(|(name_ar, name_en, category)| TopicRecord {
            id: topic_id(name_en),
            name_ar: name_ar.to_string(),
            name_en: name_en.to_string(),
            category: Some(category.to_string()),
            description_ar: None,
            description_en: None,
            created_at: now,
        })
        .collect()
}

/// Store the default topics. Idempotent: topic IDs derive from the English name.
pub async fn seed_topics(library: &Library) -> Result<usize> {
    let topics = default_topics();
    library.put_topics(&topics).await?;
    info!(count = topics.len(), "Topics seeded");
    Ok(topics.len())
}

/// Fetch a bibliography markdown file and store its references in batches.
/// Returns the number of references stored.
pub async fn import_bibliography_url(library: &Library, url: &str) -> Result<usize> {
    let resp = reqwest::get(url)
        .await
        .context("Failed to fetch bibliography")?
        .error_for_status()
        .context("Bibliography URL returned an error status")?;
    let body = resp.text().await.context("Failed to read bibliography body")?;

    import_bibliography(library, &body).await
}

pub async fn import_bibliography(library: &Library, markdown: &str) -> Result<usize> {
    let references = parse_bibliography(markdown);
    if references.is_empty() {
        warn!("No bibliography rows found (missing '{}' header?)", TABLE_HEADER);
        return Ok(0);
    }
    info!(count = references.len(), "Parsed bibliography");

    let mut stored = 0;
    for (i, batch) in references.chunks(BATCH_SIZE).enumerate() {
        library.put_references(batch).await?;
        stored += batch.len();
        info!(batch = i + 1, size = batch.len(), "Imported reference batch");
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Goethe open-access bibliography

Some intro text | with a pipe.

| Category | Author(s) | Title | Year | Language | Source Type | Format | Subject Focus | URL |
|----------|-----------|-------|------|----------|-------------|--------|---------------|-----|
| Primary | Johann Wolfgang von Goethe | Italian Journey | 1816 | English | Book | HTML | Travel | https://www.gutenberg.org/ebooks/2404 |
| Secondary | Unknown | Letters from Rome | n.d. | German | Letters | PDF | Rome | https://example.org/letters.pdf |
| Secondary | A. Scholar | Too Short | 2001 |
| Criticism | B. Critic | Goethe and Sicily | circa 1900 | English | Article | PDF | Sicily | https://example.org/sicily |
";

    #[test]
    fn test_parse_bibliography_rows() {
        let refs = parse_bibliography(SAMPLE);
        assert_eq!(refs.len(), 3);

        assert_eq!(refs[0].title, "Italian Journey");
        assert_eq!(refs[0].author.as_deref(), Some("Johann Wolfgang von Goethe"));
        assert_eq!(refs[0].year, Some(1816));
        assert_eq!(refs[0].url.as_deref(), Some("https://www.gutenberg.org/ebooks/2404"));
        assert_eq!(refs[0].category, "Primary");

        assert_eq!(refs[1].author, None);
        assert_eq!(refs[1].year, None);

        // non-numeric year is dropped, row kept
        assert_eq!(refs[2].title, "Goethe and Sicily");
        assert_eq!(refs[2].year, None);
    }

    #[test]
    fn test_rows_before_header_ignored() {
        let md = "| Primary | X | Y | 1 | a | b | c | d | e |\n";
        assert!(parse_bibliography(md).is_empty());
    }

    #[test]
    fn test_default_topics_are_bilingual_and_unique() {
        let topics = default_topics();
        assert_eq!(topics.len(), 10);
        let mut ids: Vec<_> = topics.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert!(topics.iter().all(|t| !t.name_ar.is_empty() && !t.name_en.is_empty()));
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(dir.path()).await.unwrap();
        assert_eq!(import_bibliography(&library, SAMPLE).await.unwrap(), 3);
        assert_eq!(import_bibliography(&library, SAMPLE).await.unwrap(), 3);
        assert_eq!(library.list_references(100).await.unwrap().len(), 3);

        assert_eq!(seed_topics(&library).await.unwrap(), 10);
        assert_eq!(seed_topics(&library).await.unwrap(), 10);
        assert_eq!(library.list_topics().await.unwrap().len(), 10);
    }
}
