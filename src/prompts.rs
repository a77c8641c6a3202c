//! Prompts for the page describer.
//!
//! The request has two text parts: a short fixed system message, and a user
//! instruction built per page by [`page_instruction`] that inlines the
//! extracted text and table Markdown. The page image is attached to the same
//! user message.
//!
//! [`crate::config::ConversionConfig::system_prompt`] replaces [`SYSTEM_PROMPT`];
//! the per-page instruction is always generated here.

/// Default system message.
pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant in document page image to text processing.";

/// Fixed head of the user instruction: target structure and a worked example.
const INSTRUCTION_HEAD: &str = r#"Rewrite this PDF page as well-structured Markdown.

You get three views of the same page: the raw text pulled from the PDF text layer, any tables a table detector found (already in Markdown), and a high-resolution image of the page. The text layer can be incomplete or out of order and the detector can miss or split tables; use the image to settle disagreements.

Requirements:
- Use Markdown structure where the page has it: headings, bulleted and numbered lists, tables, **bold** and *italic* emphasis, links.
- Where the page shows or refers to a figure, chart or diagram, insert a thorough description of it at that point, detailed enough that a reader who never sees the figure understands what it shows.
- Start the answer with an HTML comment that plans how to represent the visual elements of the page. For each table give its column count and its header and data row counts (count columns from the data rows). For each figure state what information it conveys.

Example of the expected shape:

```markdown
<!--
- One table: 3 columns, 1 header row, 2 data rows. Unit sales per quarter for two products.
- One bar chart: yearly revenue 2015 to 2020, rising every year.
-->

# Quarterly Sales Report

- Sales trends for the quarter
- Product performance

**Summary:**

Both products sold more units than in any previous quarter. The table breaks the figures down:

**Table: Unit Sales per Quarter**

| Quarter | Product A (Units) | Product B (Units) |
|---------|-------------------|-------------------|
| Q1 2021 | 1,500             | 1,200             |
| Q2 2021 | 1,800             | 1,400             |

**Figure 1: Annual Revenue, 2015 to 2020**

A bar chart with one bar per year:
- The x-axis lists the years 2015 through 2020.
- The y-axis shows revenue in millions of dollars, from $10 million in 2015 up to $25 million in 2020.
- Every bar is taller than the one before it; the largest step is between 2017 and 2018.
```"#;

/// Build the user instruction for one page.
///
/// Both sections are always present, empty or not, so the model can tell
/// "nothing was extracted" apart from a truncated prompt.
pub fn page_instruction(page_text: &str, tables_markdown: &str) -> String {
    format!(
        "{INSTRUCTION_HEAD}\n\n\
Text extracted from the page's text layer (the page image follows):\n\
```\n{page_text}\n```\n\n\
Tables detected on the page, as Markdown:\n\
```\n{tables_markdown}\n```"
    )
}
