use serde_json::{Value, json};

use super::state::{RetrievalResult, Source};
use crate::documents::Document;
use crate::llm::ChatMessage;

pub const CLASSIFY_SYSTEM: &str = r#"You are a document routing expert for J.P. Morgan investment analysis.

Determine which document sources to search.

Sources:
- forecast: J.P. Morgan Outlook 2025 - predictions, expectations for the year
- mid_year: J.P. Morgan Mid-Year Outlook 2025 - actual results, updated outlook

ROUTING RULES (STRICTLY FOLLOW IN ORDER):

RULE 1 - EXPLICIT DOCUMENT REFERENCE (HIGHEST PRIORITY):
If the query contains ANY of these phrases, return ONLY that source:
- "Outlook 2025", "the Outlook", "according to Outlook" -> forecast ONLY (never mid_year)
- "Mid-Year", "mid year", "midyear", "actual results" -> mid_year ONLY (never forecast)
DO NOT add the other source. Return exactly ONE classification.

RULE 2 - COMPARISON QUERIES:
Only if user explicitly asks to compare predictions vs actuals -> both sources

RULE 3 - IMPLICIT ROUTING (no document mentioned):
- Predictions/expectations/forecasts -> forecast
- Actual results/performance/what happened -> mid_year

SUB-QUESTION GENERATION:
For each source, generate a retrieval-optimized query:
- Remove meta-references like "According to Outlook 2025"
- Focus on specific entities: stock names, sectors, themes, metrics
- Use terms likely to appear in the document
- Keep it concise and keyword-rich

Example:
- User: "According to Outlook 2025, which AI stocks were recommended?"
- Route to: forecast ONLY (because "Outlook 2025" was mentioned)
- Sub-question: "AI stocks recommendations artificial intelligence equities""#;

pub const SYNTHESIS_SYSTEM: &str = r#"You are a financial analyst synthesizing information from J.P. Morgan documents.

CRITICAL CITATION RULES - STRICTLY ENFORCED:
1. EVERY sentence with a factual claim MUST end with an inline citation: [Document Name, Page X]
2. NEVER bundle multiple pages into one citation. Each claim cites ONE specific page.
3. NEVER save citations for the end. Citations must be inline, immediately after each claim.
4. If no excerpts were retrieved for a queried source, briefly acknowledge this once - don't elaborate or speculate.
5. Never invent or assume information not explicitly stated in the excerpts.
6. Quote key phrases directly when relevant.

CORRECT citation format:
- "AI investment is expected to grow significantly [Outlook 2025, Page 33]. Trade policy changes may impact markets [Outlook 2025, Page 21]."

INCORRECT - DO NOT DO THIS:
- "AI investment is expected to grow. Trade policy may change [Outlook 2025, Pages 21, 33]."

RESPONSE GUIDELINES:
1. ONLY discuss sources that are provided in the excerpts below - do not mention or reference any other documents.
2. Clearly distinguish between forecasted expectations and actual results when both are provided.
3. Be precise about stock names, percentages, and themes.
4. If asked for a table, format it properly in markdown with citations in each relevant cell.
5. If comparing, clearly note what was predicted vs. what happened.
6. Be concise but thorough.
"#;

pub const EXCERPT_SEPARATOR: &str = "\n\n---\n\n";

/// Strict JSON schema for the classifier's structured output.
pub fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "classifications": {
                "type": "array",
                "description": "Sources to query with retrieval-optimized sub-questions",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": {
                            "type": "string",
                            "enum": ["forecast", "mid_year"],
                            "description": "The document source to search"
                        },
                        "query": {
                            "type": "string",
                            "description": "Retrieval-optimized search query. MUST NOT contain document names like 'Outlook 2025' or 'Mid-Year'. Focus on keywords: stock names, sectors, themes, metrics. Example: 'AI stocks equities technology recommendations'"
                        }
                    },
                    "required": ["source", "query"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["classifications"],
        "additionalProperties": false
    })
}

pub fn classify_messages(query: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(CLASSIFY_SYSTEM),
        ChatMessage::user(query),
    ]
}

/// `[Page N]` excerpts separated by `---`.
pub fn format_documents<'a, I>(docs: I, source_name: &str) -> String
where
    I: IntoIterator<Item = &'a Document>,
{
    let formatted: Vec<String> = docs
        .into_iter()
        .map(|doc| format!("[Page {}]\n{}", doc.page_label(), doc.page_content.trim()))
        .collect();
    if formatted.is_empty() {
        return format!("No excerpts from {source_name}.");
    }
    formatted.join(EXCERPT_SEPARATOR)
}

/// Synthesis prompt with one section per queried source.
///
/// A source that was searched but returned nothing still gets its heading so
/// the model can say so.
pub fn build_synthesis_messages(query: &str, results: &[RetrievalResult]) -> Vec<ChatMessage> {
    let mut parts = vec![format!("Question: {query}\n")];

    for source in Source::ALL {
        if !results.iter().any(|result| result.source == source) {
            continue;
        }
        let docs = results
            .iter()
            .filter(|result| result.source == source)
            .flat_map(|result| result.documents.iter());
        parts.push(source.heading().to_string());
        parts.push(format_documents(docs, source.display_name()));
        parts.push(String::new());
    }

    vec![
        ChatMessage::system(SYNTHESIS_SYSTEM),
        ChatMessage::user(parts.join("\n")),
    ]
}
