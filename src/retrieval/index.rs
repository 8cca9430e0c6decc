//! 文档索引抽象
//!
//! 编排层只通过 query(条件) → 文档列表 使用索引：初始宽检索（按查询文本）与按 id 列表的深度读取。
//! InMemoryIndex 为基于词项匹配的简单实现，供本地运行与测试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 索引中的文档
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// 所属数据源 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

/// 检索条件
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentQuery {
    pub query: Option<String>,
    pub keywords: Vec<String>,
    /// 非空时按 id 精确获取
    pub ids: Vec<String>,
    /// 非空时只在这些数据源内检索
    pub datasources: Vec<String>,
    pub size: usize,
}

impl DocumentQuery {
    pub fn search(query: impl Into<String>, size: usize) -> Self {
        Self {
            query: Some(query.into()),
            size,
            ..Default::default()
        }
    }

    pub fn by_ids(ids: Vec<String>) -> Self {
        let size = ids.len();
        Self {
            ids,
            size,
            ..Default::default()
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn in_datasources(mut self, datasources: Vec<String>) -> Self {
        self.datasources = datasources;
        self
    }
}

/// 文档索引
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>, String>;
}

/// 内存索引：按查询词在标题 / 摘要 / 正文中的命中数排序
#[derive(Default)]
pub struct InMemoryIndex {
    docs: Vec<Document>,
}

impl InMemoryIndex {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    fn score(doc: &Document, terms: &[String]) -> usize {
        let haystack = format!("{} {} {}", doc.title, doc.summary, doc.content).to_lowercase();
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

#[async_trait]
impl DocumentIndex for InMemoryIndex {
    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>, String> {
        let in_scope = |d: &&Document| {
            query.datasources.is_empty()
                || d.source
                    .as_ref()
                    .map(|s| query.datasources.contains(s))
                    .unwrap_or(false)
        };

        if !query.ids.is_empty() {
            return Ok(query
                .ids
                .iter()
                .filter_map(|id| self.docs.iter().find(|d| &d.id == id))
                .filter(in_scope)
                .cloned()
                .collect());
        }

        let mut terms: Vec<String> = query
            .query
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        terms.extend(query.keywords.iter().map(|k| k.to_lowercase()));

        let size = if query.size == 0 { usize::MAX } else { query.size };
        if terms.is_empty() {
            return Ok(self.docs.iter().filter(in_scope).take(size).cloned().collect());
        }

        let mut scored: Vec<(usize, &Document)> = self
            .docs
            .iter()
            .filter(in_scope)
            .map(|d| (Self::score(d, &terms), d))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(size).map(|(_, d)| d.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> InMemoryIndex {
        let mut tagged = Document::new("d3", "Tokio guide", "async runtime tasks");
        tagged.source = Some("wiki".into());
        InMemoryIndex::new(vec![
            Document::new("d1", "Rust ownership", "borrowing and lifetimes"),
            Document::new("d2", "Cooking", "pasta recipes"),
            tagged,
        ])
    }

    #[tokio::test]
    async fn test_search_ranks_matches() {
        let docs = index().query(&DocumentQuery::search("rust async runtime", 10)).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d1"]);
    }

    #[tokio::test]
    async fn test_fetch_by_ids_keeps_order() {
        let docs = index()
            .query(&DocumentQuery::by_ids(vec!["d2".into(), "missing".into(), "d1".into()]))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d1"]);
    }

    #[tokio::test]
    async fn test_datasource_filter() {
        let docs = index()
            .query(&DocumentQuery::search("", 10).in_datasources(vec!["wiki".into()]))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d3");
    }
}
