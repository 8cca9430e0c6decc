//! 内部文档搜索工具
//!
//! 以工具形式暴露 DocumentIndex，供研究员在工具循环中检索企业内部资料。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::truncate_chars;
use crate::retrieval::{DocumentIndex, DocumentQuery};
use crate::tools::schema::{parameters_schema, SearchArgs};
use crate::tools::Tool;

pub const ENTERPRISE_SEARCH: &str = "enterprise_search";

/// 单条结果正文的最大字符数
const RESULT_CONTENT_LIMIT: usize = 1000;

pub struct EnterpriseSearchTool {
    index: Arc<dyn DocumentIndex>,
    max_results: usize,
    datasources: Vec<String>,
}

impl EnterpriseSearchTool {
    pub fn new(index: Arc<dyn DocumentIndex>) -> Self {
        Self {
            index,
            max_results: 5,
            datasources: Vec::new(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn in_datasources(mut self, datasources: Vec<String>) -> Self {
        self.datasources = datasources;
        self
    }
}

#[async_trait]
impl Tool for EnterpriseSearchTool {
    fn name(&self) -> &str {
        ENTERPRISE_SEARCH
    }

    fn description(&self) -> &str {
        "在企业内部资料中搜索信息。输入为搜索查询字符串。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchArgs = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))?;
        let query = DocumentQuery::search(args.query.clone(), self.max_results)
            .in_datasources(self.datasources.clone());
        let docs = self.index.query(&query).await?;
        if docs.is_empty() {
            return Ok(format!("No results found for '{}'", args.query));
        }

        let mut out = format!("Search results for '{}':\n", args.query);
        for (i, doc) in docs.iter().enumerate() {
            out.push_str(&format!("\n--- [{}] {} ---\n", i + 1, doc.title));
            if let Some(url) = &doc.url {
                out.push_str(&format!("URL: {}\n", url));
            }
            let body = if doc.content.is_empty() { &doc.summary } else { &doc.content };
            out.push_str(&truncate_chars(body, RESULT_CONTENT_LIMIT));
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Document, InMemoryIndex};

    fn tool() -> EnterpriseSearchTool {
        EnterpriseSearchTool::new(Arc::new(InMemoryIndex::new(vec![
            Document::new("1", "Quarterly plan", "roadmap for the storage team"),
            Document::new("2", "Holiday policy", "vacation rules"),
        ])))
    }

    #[tokio::test]
    async fn test_search_formats_results() {
        let out = tool().execute(serde_json::json!({"query": "storage roadmap"})).await.unwrap();
        assert!(out.starts_with("Search results for 'storage roadmap':"));
        assert!(out.contains("--- [1] Quarterly plan ---"));
        assert!(!out.contains("Holiday"));
    }

    #[tokio::test]
    async fn test_no_results_and_bad_args() {
        let out = tool().execute(serde_json::json!({"query": "kubernetes"})).await.unwrap();
        assert_eq!(out, "No results found for 'kubernetes'");
        assert!(tool().execute(serde_json::json!({})).await.is_err());
    }
}
