//! 检索结果的三种文本形式
//!
//! - 摘要块：供模型挑选文档（id / 标题 / 更新时间 / 分类 / 500 字摘要 / url）
//! - 展示负载：`<Payload total=N>[...]</Payload>`，通过 fetch_source 分块发给客户端
//! - 引用块：`<REFERENCES>`，作为最终回答的上下文

use serde::Serialize;

use crate::memory::truncate_chars;
use crate::retrieval::Document;

/// 摘要块中单篇摘要的最大字符数
pub const SUMMARY_LIMIT: usize = 500;

#[derive(Serialize)]
struct DocBrief<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl<'a> DocBrief<'a> {
    fn from_doc(d: &'a Document) -> Self {
        let summary = if d.summary.is_empty() { &d.content } else { &d.summary };
        Self {
            id: &d.id,
            title: &d.title,
            updated: d.updated.as_deref(),
            category: d.category.as_deref(),
            summary: truncate_chars(summary, SUMMARY_LIMIT),
            url: d.url.as_deref(),
        }
    }
}

pub fn summary_block(docs: &[Document]) -> String {
    let briefs: Vec<DocBrief<'_>> = docs.iter().map(DocBrief::from_doc).collect();
    serde_json::to_string(&briefs).unwrap_or_else(|_| "[]".to_string())
}

pub fn display_payload(docs: &[Document]) -> String {
    let briefs: Vec<DocBrief<'_>> = docs.iter().map(DocBrief::from_doc).collect();
    format!(
        "<Payload total={}>{}</Payload>",
        docs.len(),
        serde_json::to_string(&briefs).unwrap_or_else(|_| "[]".to_string())
    )
}

pub fn references_block(docs: &[Document]) -> String {
    let mut out = String::from("<REFERENCES>\n");
    for (i, d) in docs.iter().enumerate() {
        out.push_str(&format!("<Doc>\nID #{} - {}\n", i + 1, d.id));
        out.push_str(&format!("Title: {}\n", d.title));
        if let Some(source) = &d.source {
            out.push_str(&format!("Source: {}\n", source));
        }
        if let Some(updated) = &d.updated {
            out.push_str(&format!("Updated: {}\n", updated));
        }
        if let Some(category) = &d.category {
            out.push_str(&format!("Category: {}\n", category));
        }
        let content = if d.content.is_empty() { &d.summary } else { &d.content };
        out.push_str(&format!("Content: {}\n</Doc>\n", content));
    }
    out.push_str("</REFERENCES>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        let mut d = Document::new("a1", "Guide", "body text");
        d.category = Some("wiki".into());
        vec![d, Document::new("b2", "Notes", "x".repeat(SUMMARY_LIMIT + 20))]
    }

    #[test]
    fn test_display_payload() {
        let payload = display_payload(&docs());
        assert!(payload.starts_with("<Payload total=2>["));
        assert!(payload.ends_with("]</Payload>"));
    }

    #[test]
    fn test_summary_block_truncates() {
        let block = summary_block(&docs());
        let v: serde_json::Value = serde_json::from_str(&block).unwrap();
        assert_eq!(v[0]["category"], "wiki");
        assert_eq!(v[1]["summary"].as_str().unwrap().chars().count(), SUMMARY_LIMIT + 3);
    }

    #[test]
    fn test_references_block() {
        let refs = references_block(&docs());
        assert!(refs.starts_with("<REFERENCES>\n<Doc>\nID #1 - a1\nTitle: Guide\n"));
        assert!(refs.contains("ID #2 - b2"));
        assert!(refs.contains("Category: wiki"));
        assert!(refs.ends_with("</REFERENCES>"));
    }
}
