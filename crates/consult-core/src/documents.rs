//! Keyword matching for files a user asks to receive.
//!
//! A question is a document request only when it contains at least one
//! request word ("send", "pdf", ...). Each configured file then scores one
//! point per keyword found in the lowercased text; the highest score wins
//! and ties go to the file listed first. Matching is substring-based, so
//! keywords are usually word stems ("relocat", "residen").

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentEntry {
    /// File name relative to the documents directory.
    pub file: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub fn default_request_words() -> Vec<String> {
    [
        "send",
        "share",
        "pdf",
        "document",
        "brochure",
        "presentation",
        "file",
        "download",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentCatalog {
    entries: Vec<DocumentEntry>,
    request_words: Vec<String>,
}

impl DocumentCatalog {
    pub fn new(entries: Vec<DocumentEntry>, request_words: Vec<String>) -> Self {
        let lower = |words: Vec<String>| -> Vec<String> {
            words
                .into_iter()
                .map(|w| w.to_lowercase())
                .filter(|w| !w.trim().is_empty())
                .collect()
        };
        Self {
            entries: entries
                .into_iter()
                .map(|e| DocumentEntry {
                    file: e.file,
                    keywords: lower(e.keywords),
                })
                .collect(),
            request_words: lower(request_words),
        }
    }

    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the text asks for a file at all.
    pub fn is_request(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.request_words.iter().any(|w| text.contains(w.as_str()))
    }

    /// Best-matching entry among those `available` accepts.
    pub fn find_with<F>(&self, text: &str, available: F) -> Option<&DocumentEntry>
    where
        F: Fn(&DocumentEntry) -> bool,
    {
        if !self.is_request(text) {
            return None;
        }
        let text = text.to_lowercase();
        let mut best: Option<(&DocumentEntry, usize)> = None;
        for entry in self.entries.iter().filter(|e| available(e)) {
            let hits = entry
                .keywords
                .iter()
                .filter(|k| text.contains(k.as_str()))
                .count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((entry, hits));
            }
        }
        best.map(|(entry, _)| entry)
    }

    pub fn find(&self, text: &str) -> Option<&DocumentEntry> {
        self.find_with(text, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file: &str, keywords: &[&str]) -> DocumentEntry {
        DocumentEntry {
            file: file.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn catalog() -> DocumentCatalog {
        DocumentCatalog::new(
            vec![
                entry("cards.pdf", &["card", "visa", "bank"]),
                entry("relocation.pdf", &["relocat", "residen", "passport"]),
                entry("overseas_property.pdf", &["abroad", "dubai", "property"]),
            ],
            default_request_words(),
        )
    }

    #[test]
    fn test_needs_a_request_word() {
        let c = catalog();
        assert_eq!(c.find("Tell me about residence permits"), None);
        assert_eq!(
            c.find("Please send the residence permit PDF").map(|e| e.file.as_str()),
            Some("relocation.pdf")
        );
    }

    #[test]
    fn test_most_keyword_hits_wins() {
        let c = catalog();
        let found = c.find("Can you share something on Dubai property abroad and bank cards?");
        assert_eq!(found.map(|e| e.file.as_str()), Some("overseas_property.pdf"));
    }

    #[test]
    fn test_ties_go_to_first_listed() {
        let c = catalog();
        let found = c.find("Send me info on visa and relocation");
        assert_eq!(found.map(|e| e.file.as_str()), Some("cards.pdf"));
    }

    #[test]
    fn test_matching_is_case_insensitive_and_respects_availability() {
        let c = DocumentCatalog::new(
            vec![entry("NDA.pdf", &["NDA"])],
            vec!["SEND".to_string()],
        );
        assert!(c.find("send me the nda").is_some());
        assert!(c.find_with("send me the nda", |e| e.file != "NDA.pdf").is_none());
        assert!(c.find("send me a brochure").is_none());
    }
}
