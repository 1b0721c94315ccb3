use regex::Regex;

use crate::schema::EntitySpan;

/// Canonical label set reported to clients.
pub const LABELS: [&str; 18] = [
    "PERSON", "NORP", "FAC", "ORG", "GPE", "LOC", "PRODUCT", "EVENT", "WORK_OF_ART", "LAW",
    "LANGUAGE", "DATE", "TIME", "PERCENT", "MONEY", "QUANTITY", "ORDINAL", "CARDINAL",
];

/// Cleans model output into spans that actually occur in the source text.
pub struct SpanNormalizer {
    edge_punctuation: Regex,
    whitespace: Regex,
}

impl SpanNormalizer {
    pub fn new() -> Self {
        Self {
            edge_punctuation: Regex::new(r#"^[\s.,!?;:'"()\[\]]+|[\s.,!?;:'"()\[\]]+$"#).unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Map model-specific label names onto the canonical set. Unknown labels
    /// are uppercased and kept.
    pub fn canonical_label(&self, label: &str) -> String {
        let upper = self
            .whitespace
            .replace_all(label.trim(), "_")
            .to_uppercase();
        let upper = upper
            .strip_prefix("B-")
            .or_else(|| upper.strip_prefix("I-"))
            .unwrap_or(&upper);

        match upper {
            "PER" | "PERSON" | "PEOPLE" | "NAME" => "PERSON",
            "ORG" | "ORGANIZATION" | "ORGANISATION" | "COMPANY" => "ORG",
            "GPE" | "COUNTRY" | "CITY" | "STATE" => "GPE",
            "LOC" | "LOCATION" | "PLACE" => "LOC",
            "NATIONALITY" => "NORP",
            "FACILITY" | "BUILDING" => "FAC",
            "AMOUNT" | "CURRENCY" => "MONEY",
            "NUMBER" => "CARDINAL",
            other => other,
        }
        .to_string()
    }

    /// Trim edge punctuation and collapse whitespace in the surface text.
    pub fn clean_text(&self, text: &str) -> String {
        let trimmed = self.edge_punctuation.replace_all(text, "");
        self.whitespace.replace_all(&trimmed, " ").into_owned()
    }

    /// Normalize spans in order, dropping empty ones and ones whose text does
    /// not appear in `source` (compared with whitespace collapsed).
    pub fn clean(&self, source: &str, spans: impl IntoIterator<Item = EntitySpan>) -> Vec<EntitySpan> {
        let haystack = self.whitespace.replace_all(source, " ");

        spans
            .into_iter()
            .filter_map(|span| {
                let text = self.clean_text(&span.text);
                let label = self.canonical_label(&span.label);
                if text.is_empty() || label.is_empty() || !haystack.contains(text.as_str()) {
                    return None;
                }
                Some(EntitySpan { text, label })
            })
            .collect()
    }
}

impl Default for SpanNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
