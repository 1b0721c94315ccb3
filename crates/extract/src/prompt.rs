use crate::normalizer::LABELS;

/// Largest piece of text sent to a model in one call.
pub const MAX_SEGMENT_CHARS: usize = 4000;

pub fn build_ner_prompt(text: &str) -> String {
    format!(
        r#"Find the named entities in the following text.

INSTRUCTIONS:
1. List every mention of a named entity, in the order it appears
2. Repeat an entity each time it is mentioned
3. Copy the entity text exactly as written in the text
4. Output ONLY valid JSON, nothing else

SCHEMA:
{{
  "entities": [
    {{"text": "exact mention", "label": "PERSON"}}
  ]
}}

LABELS:
{}

RULES:
- GPE is a country, city or state; LOC is any other location
- NORP is a nationality, religious or political group
- If there are no entities, output {{"entities": []}}
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        LABELS.join(", "),
        text
    )
}

/// Split text into pieces of at most `max_chars` characters, preferring
/// paragraph and then line boundaries. Pieces are returned in text order
/// together with their byte offset.
pub fn segments(text: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        if rest.chars().count() <= max_chars {
            pieces.push((start, rest));
            break;
        }

        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind("\n\n")
            .map(|i| i + 2)
            .or_else(|| window.rfind('\n').map(|i| i + 1))
            .or_else(|| window.rfind(' ').map(|i| i + 1))
            .unwrap_or(limit);

        pieces.push((start, &rest[..cut]));
        start += cut;
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_text() {
        let prompt = build_ner_prompt("Ada Lovelace met Charles Babbage.");
        assert!(prompt.contains("Ada Lovelace met Charles Babbage."));
        assert!(prompt.contains(r#""entities""#));
    }

    #[test]
    fn test_short_text_is_one_segment() {
        assert_eq!(segments("hello", 10), vec![(0, "hello")]);
        assert!(segments("", 10).is_empty());
    }

    #[test]
    fn test_segments_cover_text_in_order() {
        let text = "first paragraph here\n\nsecond paragraph\nthird line with words";
        let pieces = segments(text, 25);

        assert!(pieces.len() > 1);
        assert_eq!(pieces.iter().map(|(_, s)| *s).collect::<String>(), text);
        for (offset, piece) in &pieces {
            assert!(piece.chars().count() <= 25);
            assert_eq!(&text[*offset..*offset + piece.len()], *piece);
        }
        assert_eq!(pieces[0].1, "first paragraph here\n\n");
    }

    #[test]
    fn test_unbroken_text_is_hard_split() {
        let text = "\u{e9}".repeat(10);
        let pieces = segments(&text, 4);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.iter().map(|(_, s)| *s).collect::<String>(), text);
    }
}
