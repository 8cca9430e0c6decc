//! 检索流水线
//!
//! 宽检索（simple 10 篇，deep_think 50 篇）→ 结果多于 10 篇时由模型挑选 → 按 id 深度读取被选中的文档。
//! 每一步的输出既以分块流出，也记录为固定 order 的步骤详情；产出的引用块作为最终回答的上下文。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ReplyError;
use crate::llm::{ChatModel, GenerateOptions, Message};
use crate::memory::{ChatMessage, ProcessingDetail};
use crate::orchestrator::{extract_json, recover_step, AssistantConfig, QueryIntent};
use crate::retrieval::{display_payload, references_block, summary_block, Document, DocumentIndex, DocumentQuery};
use crate::stream::{ChunkType, ReplyStream};

pub const SIMPLE_FETCH_SIZE: usize = 10;
pub const DEEP_FETCH_SIZE: usize = 50;
/// 宽检索结果超过此数量才进入挑选阶段
pub const PICK_THRESHOLD: usize = 10;

/// 模型挑选出的文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickedDocument {
    pub id: String,
    pub title: String,
    pub explain: String,
}

async fn query_index(
    stream: &ReplyStream,
    index: &dyn DocumentIndex,
    query: &DocumentQuery,
) -> Result<Result<Vec<Document>, String>, ReplyError> {
    stream.check_cancelled()?;
    tokio::select! {
        _ = stream.token().cancelled() => Err(ReplyError::Cancelled),
        result = index.query(query) => Ok(result),
    }
}

/// 宽检索；索引出错时记录日志并返回空列表
pub async fn fetch_documents(
    stream: &ReplyStream,
    index: &dyn DocumentIndex,
    config: &AssistantConfig,
    query: &str,
    intent: Option<&QueryIntent>,
    size: usize,
    reply: &mut ChatMessage,
) -> Result<Vec<Document>, ReplyError> {
    let mut request = DocumentQuery::search(query, size).in_datasources(config.datasource.ids.clone());
    if let Some(intent) = intent {
        request = request.with_keywords(intent.search_terms());
    }

    let docs = match query_index(stream, index, &request).await? {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(error = %e, "document search failed");
            return Ok(Vec::new());
        }
    };
    tracing::debug!(fetched = docs.len(), size, "documents fetched");

    stream.send_payload(ChunkType::FetchSource, &display_payload(&docs)).await?;
    let summary: Value = serde_json::from_str(&summary_block(&docs)).unwrap_or_default();
    reply.push_detail(ProcessingDetail::with_payload(
        ProcessingDetail::FETCH,
        ChunkType::FetchSource,
        summary,
    ));
    Ok(docs)
}

fn pick_prompt(query: &str, intent: Option<&QueryIntent>, docs: &[Document]) -> String {
    let intent = intent
        .and_then(|i| serde_json::to_string(i).ok())
        .unwrap_or_else(|| "{}".to_string());
    format!(
        r#"你是资料筛选助手。根据用户问题与意图，从候选文档中挑出真正有助于回答的文档（通常不超过 5 篇）。

用户问题：{query}
意图：{intent}

候选文档：
<Payload total={total}>
{summary}
</Payload>

以 JSON 数组输出结果，放在 <JSON></JSON> 标签内，每项包含 id、title、explain（入选理由）。"#,
        query = query,
        intent = intent,
        total = docs.len(),
        summary = summary_block(docs),
    )
}

/// 解析挑选结果；只保留确实存在于候选集中的 id，顺序按模型给出的顺序
pub fn parse_picked(text: &str, candidates: &[Document]) -> Vec<PickedDocument> {
    let json = extract_json(text).unwrap_or_else(|| text.trim());
    let picked: Vec<PickedDocument> = match serde_json::from_str(json) {
        Ok(picked) => picked,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse picked documents");
            return Vec::new();
        }
    };
    picked
        .into_iter()
        .filter(|p| {
            let known = candidates.iter().any(|d| d.id == p.id);
            if !known {
                tracing::warn!(id = %p.id, "picked document id not in candidates");
            }
            known
        })
        .collect()
}

/// 由模型挑选文档（pick_source 分块，Order 30）
pub async fn pick_documents(
    stream: &ReplyStream,
    model: &dyn ChatModel,
    config: &AssistantConfig,
    query: &str,
    intent: Option<&QueryIntent>,
    docs: &[Document],
    reply: &mut ChatMessage,
) -> Result<Vec<PickedDocument>, ReplyError> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    stream.send(ChunkType::PickSource, "").await?;

    let options = GenerateOptions::default().with_temperature(config.model.temperature);
    let response = stream
        .relay(
            model,
            &[Message::system(pick_prompt(query, intent, docs))],
            &options,
            ChunkType::PickSource,
            None,
        )
        .await?;

    let picked = parse_picked(&response.text, docs);
    tracing::debug!(candidates = docs.len(), picked = picked.len(), "documents picked");
    let payload = serde_json::to_value(&picked).unwrap_or_default();
    reply.push_detail(ProcessingDetail::with_payload(
        ProcessingDetail::PICK,
        ChunkType::PickSource,
        payload,
    ));
    Ok(picked)
}

/// 按 id 取回被选中文档的全文（deep_read 分块，Order 40）
///
/// 深度读取失败时退回宽检索里已有的同 id 文档。
pub async fn deep_read(
    stream: &ReplyStream,
    index: &dyn DocumentIndex,
    picked: &[PickedDocument],
    candidates: &[Document],
    reply: &mut ChatMessage,
) -> Result<Vec<Document>, ReplyError> {
    let ids: Vec<String> = picked.iter().map(|p| p.id.clone()).collect();
    let docs = match query_index(stream, index, &DocumentQuery::by_ids(ids.clone())).await? {
        Ok(docs) if !docs.is_empty() => docs,
        Ok(_) => fallback(&ids, candidates),
        Err(e) => {
            tracing::warn!(error = %e, "deep read failed, using fetched summaries");
            fallback(&ids, candidates)
        }
    };

    let mut description = String::new();
    for doc in &docs {
        let line = format!("Obtaining and analyzing documents in depth: {}\n", doc.title);
        stream.send(ChunkType::DeepRead, line.as_str()).await?;
        description.push_str(&line);
    }
    reply.push_detail(ProcessingDetail::described(
        ProcessingDetail::DEEP_READ,
        ChunkType::DeepRead,
        description,
    ));
    Ok(docs)
}

fn fallback(ids: &[String], candidates: &[Document]) -> Vec<Document> {
    ids.iter()
        .filter_map(|id| candidates.iter().find(|d| &d.id == id).cloned())
        .collect()
}

/// 完整检索流水线，返回引用块（无结果时为空串）
#[allow(clippy::too_many_arguments)]
pub async fn run_retrieval(
    stream: &ReplyStream,
    model: &dyn ChatModel,
    index: &dyn DocumentIndex,
    config: &AssistantConfig,
    query: &str,
    intent: Option<&QueryIntent>,
    deep: bool,
    reply: &mut ChatMessage,
) -> Result<String, ReplyError> {
    let size = if deep { DEEP_FETCH_SIZE } else { SIMPLE_FETCH_SIZE };
    let docs = fetch_documents(stream, index, config, query, intent, size, reply).await?;
    if docs.is_empty() {
        return Ok(String::new());
    }

    if deep && docs.len() > PICK_THRESHOLD {
        let picked = pick_documents(stream, model, config, query, intent, &docs, reply).await;
        if let Some(picked) = recover_step("pick_documents", picked)? {
            if !picked.is_empty() {
                let full = deep_read(stream, index, &picked, &docs, reply).await?;
                if !full.is_empty() {
                    return Ok(references_block(&full));
                }
            }
        }
    }
    Ok(references_block(&docs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::llm::ScriptedModel;
    use crate::retrieval::InMemoryIndex;
    use crate::stream::RecordingChunkSender;

    fn corpus(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(format!("d{}", i), format!("raft note {}", i), format!("raft detail {}", i)))
            .collect()
    }

    fn setup() -> (ReplyStream, Arc<RecordingChunkSender>, ChatMessage) {
        let sender = Arc::new(RecordingChunkSender::new());
        let request = ChatMessage::user("s1", "raft");
        let reply = ChatMessage::reply_to(&request, None);
        let stream = ReplyStream::new(sender.clone(), &reply, CancellationToken::new());
        (stream, sender, reply)
    }

    #[test]
    fn test_parse_picked_filters_unknown_ids() {
        let docs = corpus(3);
        let text = r#"<JSON>[{"id":"d2","title":"x","explain":"best"},{"id":"zz"},{"id":"d0"}]</JSON>"#;
        let picked = parse_picked(text, &docs);
        let ids: Vec<&str> = picked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d0"]);
        assert!(parse_picked("not json", &docs).is_empty());
    }

    #[tokio::test]
    async fn test_simple_retrieval_skips_pick() {
        let (stream, sender, mut reply) = setup();
        let index = InMemoryIndex::new(corpus(20));
        let model = ScriptedModel::new();

        let refs = run_retrieval(&stream, &model, &index, &AssistantConfig::default(), "raft", None, false, &mut reply)
            .await
            .unwrap();
        assert!(refs.starts_with("<REFERENCES>"));
        assert_eq!(refs.matches("<Doc>").count(), SIMPLE_FETCH_SIZE);
        assert_eq!(model.call_count(), 0);
        assert!(sender.text_of(ChunkType::FetchSource).starts_with("<Payload total=10>"));
        assert_eq!(reply.details.len(), 1);
        assert_eq!(reply.details[0].order, ProcessingDetail::FETCH);
    }

    #[tokio::test]
    async fn test_deep_retrieval_picks_and_reads() {
        let (stream, sender, mut reply) = setup();
        let index = InMemoryIndex::new(corpus(20));
        let model = ScriptedModel::new().then_text(r#"<JSON>[{"id":"d3","title":"raft note 3","explain":"x"}]</JSON>"#);

        let refs = run_retrieval(&stream, &model, &index, &AssistantConfig::default(), "raft", None, true, &mut reply)
            .await
            .unwrap();
        assert_eq!(refs.matches("<Doc>").count(), 1);
        assert!(refs.contains("ID #1 - d3"));
        assert_eq!(sender.count(ChunkType::DeepRead), 1);
        assert!(sender.text_of(ChunkType::DeepRead).contains("raft note 3"));
        let orders: Vec<u32> = reply.details.iter().map(|d| d.order).collect();
        assert_eq!(orders, vec![ProcessingDetail::FETCH, ProcessingDetail::PICK, ProcessingDetail::DEEP_READ]);
        // 挑选阶段先发空的 pick_source 开场分块
        let first_pick = sender.chunks().into_iter().find(|c| c.chunk_type == ChunkType::PickSource).unwrap();
        assert!(first_pick.message_chunk.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_pick_keeps_broad_references() {
        let (stream, _, mut reply) = setup();
        let index = InMemoryIndex::new(corpus(15));
        let model = ScriptedModel::new().then_text("I cannot decide");

        let refs = run_retrieval(&stream, &model, &index, &AssistantConfig::default(), "raft", None, true, &mut reply)
            .await
            .unwrap();
        assert_eq!(refs.matches("<Doc>").count(), 15);
    }
}
