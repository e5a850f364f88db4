//! Prompt builders for query generation, query repair and answer narration.
//!
//! Wording is tuned for the chat model but nothing downstream parses it:
//! every completion goes through the cleaner before use.

use crate::dialect::Dialect;
use crate::execution_loop::ErrorCategory;
use crate::knowledge::KnowledgeMatch;
use crate::schema::{SchemaContext, SchemaVocabulary};
use crate::semantic::{AnalyticalIntent, Complexity, QuestionAnalysis};
use serde::{Deserialize, Serialize};

const HISTORY_TURNS: usize = 3;
const REFERENCE_QUERIES: usize = 2;

/// Generation prompt variants, picked from the question analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    SqlBase,
    SqlWithRelationships,
    SqlAggregationFocused,
    DaxBase,
    DaxMeasureFocused,
    DaxRelationshipAware,
}

impl PromptTemplate {
    pub fn select(analysis: &QuestionAnalysis, dialect: Dialect) -> Self {
        match dialect {
            Dialect::Dax => {
                if analysis.requires_aggregation && analysis.aggregation_type.is_some() {
                    PromptTemplate::DaxMeasureFocused
                } else if analysis.requires_joins || analysis.complexity == Complexity::Complex {
                    PromptTemplate::DaxRelationshipAware
                } else {
                    PromptTemplate::DaxBase
                }
            }
            Dialect::Sql => {
                if analysis.requires_joins || analysis.grouping_requirements.len() > 1 {
                    PromptTemplate::SqlWithRelationships
                } else if analysis.requires_aggregation {
                    PromptTemplate::SqlAggregationFocused
                } else {
                    PromptTemplate::SqlBase
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PromptTemplate::SqlBase | PromptTemplate::DaxBase => "base",
            PromptTemplate::SqlWithRelationships => "with_relationships",
            PromptTemplate::SqlAggregationFocused => "aggregation_focused",
            PromptTemplate::DaxMeasureFocused => "measure_focused",
            PromptTemplate::DaxRelationshipAware => "relationship_aware",
        }
    }
}

/// Conversation, reference-query and business sections shared by every template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSections {
    pub conversation: String,
    pub similar_queries: String,
    pub business: String,
}

impl PromptSections {
    pub fn build(history: &[String], similar: &[KnowledgeMatch], analysis: &QuestionAnalysis) -> Self {
        let conversation = if history.is_empty() {
            String::new()
        } else {
            let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
            format!(
                "CONVERSATION HISTORY:\n{}\n\nThis appears to be a follow-up question. Consider the previous context when generating the query.",
                recent.join("\n")
            )
        };

        let similar_queries = if similar.is_empty() {
            String::new()
        } else {
            let mut section = "SIMILAR SUCCESSFUL QUERIES FOR REFERENCE:".to_string();
            for m in similar.iter().take(REFERENCE_QUERIES) {
                section.push_str(&format!(
                    "\n\nPrevious Q: {}\nQuery: {}\nSuccess Rate: {} times",
                    m.entry.question,
                    m.entry.query_text,
                    m.entry.success_count.max(1)
                ));
            }
            section
        };

        let mut business = Vec::new();
        match analysis.intent {
            AnalyticalIntent::TrendAnalysis => business
                .push("This is a trend analysis query. Focus on time-based patterns and changes.".to_string()),
            AnalyticalIntent::Comparison => {
                business.push("This is a comparison query. Ensure results can be easily compared.".to_string())
            }
            AnalyticalIntent::Ranking => {
                business.push("This is a ranking query. Use ORDER BY and TOP/TOPN appropriately.".to_string())
            }
            _ => {}
        }
        if analysis.requires_aggregation {
            business.push(format!(
                "Aggregation required: {}",
                analysis.aggregation_type.map(|a| a.as_str()).unwrap_or("Multiple types")
            ));
        }
        if let Some(time) = analysis.time_dimension {
            business.push(format!("Time dimension: {}", time.as_str()));
        }

        Self {
            conversation,
            similar_queries,
            business: if business.is_empty() {
                "General data retrieval query.".to_string()
            } else {
                business.join("\n")
            },
        }
    }
}

/// Join hints derived from table names and requested groupings
pub fn relationship_hints(vocabulary: &SchemaVocabulary, analysis: &QuestionAnalysis) -> String {
    let has_table = |needle: &str| vocabulary.tables.iter().any(|t| t.to_lowercase().contains(needle));
    let mut hints = Vec::new();

    if has_table("customer") && has_table("order") {
        hints.push("- Customer-Order relationship likely via CustomerID".to_string());
    }
    if has_table("product") && has_table("order") {
        hints.push("- Product-Order relationship likely via ProductID".to_string());
    }
    if has_table("sales") {
        hints.push("- Sales table likely central fact table with foreign keys".to_string());
    }
    for group in &analysis.grouping_requirements {
        hints.push(format!("- Consider grouping by {} - look for related dimension table", group));
    }

    if hints.is_empty() {
        "- Analyze schema for ID/Key columns to determine relationships".to_string()
    } else {
        hints.join("\n")
    }
}

fn optional_section(section: &str) -> String {
    if section.is_empty() {
        String::new()
    } else {
        format!("{}\n\n", section)
    }
}

/// Full generation prompt for the selected template
pub fn build_generation_prompt(
    template: PromptTemplate,
    question: &str,
    schema: &SchemaContext,
    sections: &PromptSections,
    analysis: &QuestionAnalysis,
) -> String {
    let similar = optional_section(&sections.similar_queries);
    let conversation = optional_section(&sections.conversation);

    match template {
        PromptTemplate::SqlBase => format!(
            r#"You are a Microsoft Fabric T-SQL expert with deep understanding of business data patterns.

CRITICAL REQUIREMENTS:
1. Use ONLY Microsoft Fabric T-SQL syntax
2. ALWAYS include TOP N (e.g., TOP 100) to limit results
3. Use [square brackets] for table/column names with spaces or special characters
4. NO CREATE, DROP, DELETE, INSERT, UPDATE statements
5. Handle NULL values with ISNULL() or COALESCE() where appropriate
6. Use proper JOINs based on table relationships and business logic
7. For calculations, use CAST() or CONVERT() for proper data types
8. Always specify table aliases

SCHEMA CONTEXT:
{schema}

{similar}{conversation}BUSINESS CONTEXT:
{business}

QUESTION: {question}

Generate ONLY the T-SQL query (no explanations, no markdown):"#,
            schema = schema.text,
            business = sections.business,
        ),
        PromptTemplate::SqlWithRelationships => format!(
            r#"You are a Microsoft Fabric T-SQL expert who understands data relationships and business logic.

TABLE RELATIONSHIPS DETECTED:
{hints}

SCHEMA WITH RELATIONSHIP CONTEXT:
{schema}

{similar}QUESTION: {question}

Generate a T-SQL query that leverages the table relationships above. Consider:
- Which tables need to be joined based on the question
- What keys/IDs should be used for joins
- Whether to use INNER, LEFT, or RIGHT joins based on business logic
- How to handle potential NULL values in relationships

Generate ONLY the T-SQL query:"#,
            hints = relationship_hints(&schema.vocabulary, analysis),
            schema = schema.text,
        ),
        PromptTemplate::SqlAggregationFocused => format!(
            r#"You are a T-SQL expert specializing in business aggregations and analytics.

AGGREGATION CONTEXT:
- Question type: {aggregation}
- Time dimension: {time}
- Grouping requirements: {grouping}

SCHEMA:
{schema}

{similar}QUESTION: {question}

Generate a T-SQL query optimized for aggregation that:
- Uses appropriate GROUP BY clauses
- Includes proper aggregation functions (SUM, COUNT, AVG, etc.)
- Handles time-based grouping correctly
- Includes ORDER BY for meaningful result ordering
- Uses TOP N to limit results appropriately

Generate ONLY the T-SQL query:"#,
            aggregation = analysis.aggregation_type.map(|a| a.as_str()).unwrap_or("None"),
            time = analysis.time_dimension.map(|t| t.as_str()).unwrap_or("None"),
            grouping = if analysis.grouping_requirements.is_empty() {
                "None".to_string()
            } else {
                analysis.grouping_requirements.join(", ")
            },
            schema = schema.text,
        ),
        PromptTemplate::DaxBase => format!(
            r#"You are a Power BI DAX expert with deep understanding of semantic model design.

CRITICAL REQUIREMENTS:
1. MUST start with EVALUATE
2. Use 'Table Name'[Column Name] format for all column references
3. Wrap table names containing spaces in single quotes (e.g., 'Sales Data')
4. Use proper DAX functions: SUMMARIZECOLUMNS, CALCULATETABLE, FILTER, TOPN, ADDCOLUMNS
5. NEVER use SQL syntax (SELECT, FROM, WHERE, JOIN)
6. Ensure the query returns a table result
7. NO HTML/XML tags or markdown in the output
8. Use RELATED() for accessing related table columns across relationships

POWER BI MODEL STRUCTURE:
{schema}

{similar}{conversation}MODEL RELATIONSHIPS:
Leverage model relationships for cross-table analysis

QUESTION: {question}

Generate ONLY the DAX query (no explanations, no markdown):"#,
            schema = schema.text,
        ),
        PromptTemplate::DaxMeasureFocused => format!(
            r#"You are a DAX expert specializing in calculated measures and advanced analytics.

AVAILABLE MEASURES:
{measures}

MODEL CONTEXT:
{schema}

{similar}QUESTION: {question}

Generate a DAX query that leverages existing measures where possible. Consider:
- Using existing measures instead of recalculating
- Creating calculated columns if needed with ADDCOLUMNS
- Proper context filtering with CALCULATE
- Time intelligence functions if time-based analysis is needed

Generate ONLY the DAX query:"#,
            measures = schema.measures_context(),
            schema = schema.text,
        ),
        PromptTemplate::DaxRelationshipAware => format!(
            r#"You are a DAX expert who understands Power BI model relationships and context propagation.

RELATIONSHIP CONTEXT:
Leverage model relationships for cross-table analysis

TABLE STRUCTURE:
{schema}

{similar}QUESTION: {question}

Generate a DAX query that properly navigates relationships:
- Use RELATED() for one-to-many relationships
- Use RELATEDTABLE() for many-to-one relationships
- Consider filter context propagation

Generate ONLY the DAX query:"#,
            schema = schema.text,
        ),
    }
}

/// Plain prompt used when the templated attempt produced nothing usable
pub fn build_simple_prompt(question: &str, schema: &SchemaContext) -> String {
    let language = schema.dialect.language();
    format!(
        "Write a single {language} query that answers the question below.\n\nSCHEMA:\n{}\n\nQUESTION: {question}\n\nReturn only the {language} query.",
        schema.text
    )
}

pub fn syntax_rules(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sql => {
            "- Use TOP instead of LIMIT for row limiting
- Use [square brackets] for names with spaces/special characters
- Proper JOIN syntax: INNER/LEFT/RIGHT JOIN table ON condition
- Use ISNULL() or COALESCE() for NULL handling
- CAST() or CONVERT() for data type conversions
- Single quotes for strings, brackets for identifiers"
        }
        Dialect::Dax => {
            "- Must start with EVALUATE
- Table references: 'Table Name' or TableName
- Column references: 'Table Name'[Column Name]
- Use DAX functions: FILTER, SUMMARIZE, CALCULATE, TOPN
- NO SQL syntax: no SELECT, FROM, WHERE, JOIN
- Use RELATED() for cross-table column access"
        }
    }
}

/// Repair prompt for a query referencing unknown tables or columns
pub fn build_schema_fix_prompt(failed_query: &str, error: &str, analysis: &str, schema: &SchemaContext) -> String {
    let language = schema.dialect.language();
    format!(
        r#"You are a {language} debugging expert. Fix the schema-related errors in this query.

AVAILABLE SCHEMA:
{schema}

FAILED QUERY:
{failed_query}

DATABASE ERROR:
{error}

SCHEMA ERROR ANALYSIS:
{analysis}

Replace every incorrect table or column reference with a valid name from the schema.

Generate ONLY the corrected {language} query:"#,
        schema = schema.text,
    )
}

/// Repair prompt for grammar and dialect errors
pub fn build_syntax_fix_prompt(failed_query: &str, error: &str, analysis: &str, dialect: Dialect) -> String {
    let language = dialect.language();
    format!(
        r#"You are a {language} syntax expert. Fix the syntax errors in this query.

FAILED QUERY:
{failed_query}

SYNTAX ERROR:
{error}

ERROR ANALYSIS:
{analysis}

SYNTAX RULES FOR {language}:
{rules}

Fix the error by correcting function usage, punctuation, keyword order and brackets.

Generate ONLY the corrected {language} query:"#,
        rules = syntax_rules(dialect),
    )
}

/// Repair prompt for the remaining error categories
pub fn build_general_fix_prompt(
    failed_query: &str,
    error: &str,
    category: ErrorCategory,
    analysis: &str,
    schema: &SchemaContext,
) -> String {
    let language = schema.dialect.language();
    format!(
        r#"You are a {language} expert. The query below failed with a {category}.

SCHEMA:
{schema}

FAILED QUERY:
{failed_query}

ERROR:
{error}

ERROR ANALYSIS:
{analysis}

Rewrite the query so that it answers the same question without this error.

Generate ONLY the corrected {language} query:"#,
        schema = schema.text,
    )
}

/// Narration prompt for a successful result
pub fn build_answer_prompt(
    question: &str,
    query: &str,
    row_count: usize,
    columns: &[String],
    sample: &serde_json::Value,
) -> String {
    format!(
        r#"Convert this database query result into a clear, business-focused answer.

USER QUESTION: {question}

QUERY EXECUTED: {query}

RESULTS SUMMARY:
- Found {row_count} rows
- Columns: {columns}

SAMPLE DATA:
{sample}

Answer the question directly, mention specific numbers, and use business language rather than technical jargon. If the result is empty, explain what this means."#,
        columns = columns.join(", "),
        sample = serde_json::to_string_pretty(sample).unwrap_or_default(),
    )
}
