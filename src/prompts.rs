//! Extraction instructions sent alongside every page image.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::instructions`]; the constant here is
//! used only when no override is provided. The field names it asks for are
//! the ones [`crate::pipeline::schema`] validates.

/// Default instructions for extracting crime statistics from one report page.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are reading one scanned page of a police crime review report. The page usually contains a table of crime heads with registered, detected and pending case counts, and sometimes a block of court conviction figures.

Return ONLY a JSON object with this exact shape:

{
  "crime_statistics": [
    {
      "crime_head": "Murder",
      "category": "Body offences",
      "registered": 25,
      "detected": 24,
      "pending_0_3": 1,
      "pending_3_6": 0,
      "pending_6_12": 0,
      "pending_1_year": 0
    }
  ],
  "conviction_stats": {"decided": 20, "convicted": 17, "acquitted": 3}
}

Rules:
1. One object per table row. Copy the crime head exactly as printed, including qualifiers such as "(attempt)" or "- dowry".
2. "category" is the section heading the row sits under, or omit it if there is none.
3. All counts are plain integers. Use 0 for blank, dash or illegible cells. Never invent numbers.
4. pending_0_3, pending_3_6, pending_6_12 and pending_1_year are cases pending for up to 3 months, 3 to 6 months, 6 to 12 months and more than one year.
5. Skip total and sub-total rows.
6. Omit "conviction_stats" when the page has no conviction figures.
7. If the page has no statistics table at all, return {"crime_statistics": []}.
8. Output JSON only. No Markdown fences, no commentary."#;

/// Instructions to use for a run: the override if given, else the default.
pub fn resolve_instructions(override_text: Option<&str>) -> &str {
    match override_text {
        Some(text) if !text.trim().is_empty() => text,
        _ => DEFAULT_EXTRACTION_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_names_every_schema_field() {
        for field in [
            "crime_head",
            "registered",
            "detected",
            "pending_0_3",
            "pending_3_6",
            "pending_6_12",
            "pending_1_year",
            "conviction_stats",
            "decided",
            "convicted",
            "acquitted",
        ] {
            assert!(DEFAULT_EXTRACTION_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn blank_override_falls_back_to_default() {
        assert_eq!(resolve_instructions(None), DEFAULT_EXTRACTION_PROMPT);
        assert_eq!(resolve_instructions(Some("  ")), DEFAULT_EXTRACTION_PROMPT);
        assert_eq!(resolve_instructions(Some("custom")), "custom");
    }
}
