//! 回复编排入口
//!
//! submit：首条消息时创建会话，同步持久化用户消息，注册并启动后台回复任务。
//! 后台任务：读取历史 → 按模式运行流水线（panic 在此边界捕获）→ 收尾（持久化、reply_end、移除注册）。
//! ask：以内存发送端跑完整条回复，直接返回拼接后的回答文本。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{panic_message, ReplyError, ShutdownManager, TaskGuard, TaskKey, TaskRegistry, TaskScheduler};
use crate::llm::ChatModel;
use crate::memory::{render_history, ChatMessage, MessageStore, Session};
use crate::orchestrator::modes::Pipeline;
use crate::orchestrator::{AssistantConfig, Outcome, ReplyFinalizer};
use crate::retrieval::DocumentIndex;
use crate::stream::{ChunkSender, MemoryChunkSender, ReplyStream};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 回复任务共享的协作方；每个任务持有一份克隆
#[derive(Clone)]
pub(crate) struct Services {
    pub model: Arc<dyn ChatModel>,
    pub store: Arc<dyn MessageStore>,
    pub index: Option<Arc<dyn DocumentIndex>>,
    pub tools: ToolExecutor,
    pub scheduler: TaskScheduler,
}

/// 一条待回复的用户输入
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub session_id: String,
    pub message: String,
    /// 为空时使用默认助手
    pub assistant_id: Option<String>,
    /// 发起请求的传输连接，断开时据此取消
    pub connection_id: Option<String>,
}

impl ReplyRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            assistant_id: None,
            connection_id: None,
        }
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn on_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }
}

/// 已启动的回复任务
pub struct ReplyHandle {
    pub session_id: String,
    /// 被回复的用户消息 id（注册表键与取消请求都用它）
    pub request_id: String,
    pub reply_id: String,
    join: JoinHandle<ChatMessage>,
}

impl ReplyHandle {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.session_id.clone(), self.request_id.clone())
    }

    /// 丢弃任务；收尾工作仍会执行
    pub fn abort(&self) {
        self.join.abort();
    }

    /// 等待任务结束，返回持久化的回复
    pub async fn wait(self) -> Result<ChatMessage, ReplyError> {
        self.join.await.map_err(|e| {
            if e.is_cancelled() {
                ReplyError::Cancelled
            } else {
                ReplyError::Model(format!("reply task failed: {}", e))
            }
        })
    }
}

/// 回复编排器
pub struct ReplyOrchestrator {
    services: Services,
    assistants: HashMap<String, AssistantConfig>,
    default_assistant: String,
    registry: Arc<TaskRegistry>,
    shutdown: Arc<ShutdownManager>,
}

impl ReplyOrchestrator {
    pub fn new(model: Arc<dyn ChatModel>, store: Arc<dyn MessageStore>, assistant: AssistantConfig) -> Self {
        let scheduler = TaskScheduler::new(assistant.deep_research.max_concurrent_research_units);
        let default_assistant = assistant.id.clone();
        let mut assistants = HashMap::new();
        assistants.insert(assistant.id.clone(), assistant);
        Self {
            services: Services {
                model,
                store,
                index: None,
                tools: ToolExecutor::new(ToolRegistry::new(), 30),
                scheduler,
            },
            assistants,
            default_assistant,
            registry: Arc::new(TaskRegistry::new()),
            shutdown: Arc::new(ShutdownManager::new()),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn DocumentIndex>) -> Self {
        self.services.index = Some(index);
        self
    }

    pub fn with_tools(mut self, tools: ToolExecutor) -> Self {
        self.services.tools = tools;
        self
    }

    /// 进程级研究并发上限（所有回复共享）
    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.services.scheduler = scheduler;
        self
    }

    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownManager>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 追加一个可按 id 选择的助手
    pub fn with_assistant(mut self, assistant: AssistantConfig) -> Self {
        self.assistants.insert(assistant.id.clone(), assistant);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownManager> {
        &self.shutdown
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.services.store
    }

    fn assistant(&self, id: Option<&str>) -> Result<&AssistantConfig, ReplyError> {
        let id = id.unwrap_or(&self.default_assistant);
        self.assistants
            .get(id)
            .ok_or_else(|| ReplyError::Config(format!("assistant [{}] not found", id)))
    }

    /// 持久化用户消息并启动后台回复
    pub async fn submit(
        &self,
        request: ReplyRequest,
        sender: Arc<dyn ChunkSender>,
    ) -> Result<(ChatMessage, ReplyHandle), ReplyError> {
        if self.shutdown.is_shutdown() {
            return Err(ReplyError::Cancelled);
        }
        let assistant = self.assistant(request.assistant_id.as_deref())?.clone();
        let store = &self.services.store;

        if store.get_session(&request.session_id).await?.is_none() {
            store.save_session(&Session::new(request.session_id.clone())).await?;
            tracing::info!(session_id = %request.session_id, "session created");
        }

        let mut user = ChatMessage::user(&request.session_id, request.message);
        user.assistant_id = Some(assistant.id.clone());
        store.save_message(&user).await?;

        let handle = self.spawn_reply(user.clone(), assistant, sender, request.connection_id);
        Ok((user, handle))
    }

    /// 为已持久化的用户消息启动回复任务
    pub fn spawn_reply(
        &self,
        request: ChatMessage,
        assistant: AssistantConfig,
        sender: Arc<dyn ChunkSender>,
        connection_id: Option<String>,
    ) -> ReplyHandle {
        let token = self.shutdown.reply_token();
        let key = TaskKey::new(request.session_id.clone(), request.id.clone());
        let registration = self.registry.register(key, token.clone(), connection_id);
        let guard = TaskGuard::new(Arc::clone(&self.registry), registration);
        let reply = ChatMessage::reply_to(&request, Some(assistant.id.clone()));

        let session_id = request.session_id.clone();
        let request_id = request.id.clone();
        let reply_id = reply.id.clone();
        tracing::info!(session_id = %session_id, message_id = %request_id, mode = ?assistant.mode, "reply task started");

        let services = self.services.clone();
        let join = tokio::spawn(process(services, assistant, request, reply, sender, token, guard));
        ReplyHandle {
            session_id,
            request_id,
            reply_id,
            join,
        }
    }

    /// 同步调用：跑完整条回复，返回拼接后的 response 文本
    pub async fn ask(&self, request: ReplyRequest) -> Result<String, ReplyError> {
        let sender = Arc::new(MemoryChunkSender::new());
        let (_, handle) = self.submit(request, sender.clone()).await?;
        handle.wait().await?;
        Ok(sender.final_response())
    }

    /// 取消一条在途回复；条目由任务退出时移除
    pub fn cancel(&self, session_id: &str, request_id: &str) -> bool {
        self.registry.cancel(&TaskKey::new(session_id, request_id))
    }

    /// 传输连接关闭：取消其拥有的全部回复
    pub fn cancel_connection(&self, connection_id: &str) -> usize {
        self.registry.cancel_connection(connection_id)
    }

    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }
}

async fn load_history(services: &Services, config: &AssistantConfig, request: &ChatMessage) -> String {
    if config.history.number == 0 {
        return String::new();
    }
    match services.store.load_messages(&request.session_id, config.history.number).await {
        Ok(messages) => render_history(&messages, config.history.compression_threshold),
        Err(e) => {
            tracing::warn!(session_id = %request.session_id, error = %e, "failed to load history");
            String::new()
        }
    }
}

async fn run_pipeline(
    services: &Services,
    config: &AssistantConfig,
    request: &ChatMessage,
    stream: &Arc<ReplyStream>,
    reply: &mut ChatMessage,
) -> Result<(), ReplyError> {
    stream.check_cancelled()?;
    let history = load_history(services, config, request).await;
    let pipeline = Pipeline {
        services,
        config,
        stream,
        query: &request.message,
        history,
    };
    pipeline.run(reply).await
}

async fn process(
    services: Services,
    config: AssistantConfig,
    request: ChatMessage,
    reply: ChatMessage,
    sender: Arc<dyn ChunkSender>,
    token: CancellationToken,
    guard: TaskGuard,
) -> ChatMessage {
    let stream = Arc::new(ReplyStream::new(sender, &reply, token));
    let mut finalizer = ReplyFinalizer::new(reply, Arc::clone(&services.store), Arc::clone(&stream), guard);

    let result = AssertUnwindSafe(run_pipeline(&services, &config, &request, &stream, finalizer.reply_mut()))
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
    };
    finalizer.finish(outcome).await
}
