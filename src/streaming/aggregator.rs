//! 流式聚合器
//!
//! 驱动一次请求的完整读循环：发请求、armed 超时、逐块读取、
//! 经解码器产出事件、折叠进累积状态，并以约定的时序调用
//! 外部回调。取消有两条独立路径，都在下一个挂起点生效：
//!
//! - 中止信号（超时或用户主动中止），直接打断底层传输；
//! - 协作式 `should_stop` 轮询，每次读之前检查，不等传输层
//!   察觉就能优雅退出。
//!
//! 每条路径（完成 / 取消 / 失败）都恰好触发一次终态回调
//! （`complete == true`）；这一层不做任何自动重试。

use crate::models::Usage;
use crate::streaming::decoder::ProtocolDecoder;
use crate::streaming::error::StreamError;
use crate::streaming::event::{StreamEvent, StreamFormat};
use crate::streaming::utf8::Utf8StreamDecoder;
use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 统一的响应字节流类型
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// 将 reqwest 响应转换为统一的字节流
pub fn response_byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|result| result.map_err(StreamError::from)),
    )
}

/// 运行状态
///
/// 终态互斥且不可逆，一次请求只会落在其中一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// 尚未开始
    Idle,
    /// 读循环进行中
    Streaming,
    /// 正常完成
    Completed,
    /// 被取消（协作式停止或中止信号）
    Cancelled,
    /// 以错误结束
    Failed,
}

/// 一次回调携带的状态快照
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    /// 到目前为止的完整正文
    pub text: String,
    /// 是否为终态回调（每次请求恰好一次）
    pub complete: bool,
    /// 终态是否由停止/取消引起（供 UI 区分"已停止"与"出错"）
    pub need_stop: bool,
    /// 本次回调携带的用量快照
    pub usage: Option<Usage>,
    /// 到目前为止的完整思考内容
    pub reasoning: Option<String>,
}

/// 文本增量回调的合并阈值
///
/// 超过该次数后每两条增量只触发一次回调，限制病态啰嗦的流
/// 对 UI 的刷新压力。文本仍然全部累积，不丢任何数据。
pub const COALESCE_THRESHOLD: u32 = 5000;

/// 流式上下文
///
/// 一次请求的解码与回调参数。
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// 当前模型的显示名称（usage 事件转发前补上）
    pub model_name: String,
    /// 协议格式
    pub format: StreamFormat,
    /// 文本增量回调合并阈值
    pub coalesce_threshold: u32,
}

impl StreamContext {
    /// 创建上下文
    ///
    /// OpenAI SSE 路径逐块合并回调，本身频率可控，不做合并。
    pub fn new(model_name: &str, format: StreamFormat) -> Self {
        let coalesce_threshold = match format {
            StreamFormat::OpenAiSse => u32::MAX,
            _ => COALESCE_THRESHOLD,
        };
        Self {
            model_name: model_name.to_string(),
            format,
            coalesce_threshold,
        }
    }

    /// 覆盖合并阈值
    pub fn with_coalesce_threshold(mut self, threshold: u32) -> Self {
        self.coalesce_threshold = threshold;
        self
    }
}

/// 把字节流接上解码器，产出按读块分组的事件流
///
/// 每个 yield 对应一次物理读；EOF 时自动冲刷解码器残留。
/// 解码器的硬错误会作为流的最后一项产出。
pub fn decode_stream<S>(
    mut source: S,
    mut decoder: ProtocolDecoder,
) -> impl Stream<Item = Result<Vec<StreamEvent>, StreamError>> + Send
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + Unpin,
{
    stream! {
        let mut utf8 = Utf8StreamDecoder::new();
        while let Some(item) = source.next().await {
            match item {
                Ok(bytes) => {
                    let chunk = utf8.decode(&bytes);
                    if chunk.is_empty() {
                        continue;
                    }
                    yield decoder.feed(&chunk);
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        let tail_chunk = utf8.finish();
        if !tail_chunk.is_empty() {
            match decoder.feed(&tail_chunk) {
                Ok(events) if !events.is_empty() => yield Ok(events),
                Ok(_) => {}
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        let tail_events = decoder.finish();
        if !tail_events.is_empty() {
            yield Ok(tail_events);
        }
    }
}

/// 流式聚合器
///
/// 独占持有一次请求的累积状态，请求结束后即丢弃，不跨请求
/// 复用。宿主若在流中途切换了模型，由调用方用请求代号忽略
/// 被取代请求的回调，这里不做判断。
#[derive(Debug)]
pub struct StreamAggregator {
    context: StreamContext,
    state: RunState,
    /// 全部文本增量按到达顺序的拼接，只增不减
    complete_message: String,
    /// 全部思考增量的拼接
    complete_reasoning: String,
    /// 最近一次 usage 快照（覆盖而非合并）
    last_usage: Option<Usage>,
    /// 已折叠的文本增量条数（回调合并用）
    append_times: u32,
}

impl StreamAggregator {
    /// 创建聚合器
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            state: RunState::Idle,
            complete_message: String::new(),
            complete_reasoning: String::new(),
            last_usage: None,
            append_times: 0,
        }
    }

    /// 当前运行状态
    pub fn state(&self) -> RunState {
        self.state
    }

    /// 当前累积的正文
    pub fn message(&self) -> &str {
        &self.complete_message
    }

    /// 当前累积的思考内容
    pub fn reasoning(&self) -> &str {
        &self.complete_reasoning
    }

    /// 最近一次 usage 快照
    pub fn last_usage(&self) -> Option<&Usage> {
        self.last_usage.as_ref()
    }

    /// 驱动读循环直到终态
    ///
    /// # 参数
    ///
    /// * `source` - 响应字节流
    /// * `should_stop` - 协作式停止判断，每次读之前轮询
    /// * `cancel` - 中止信号（超时或用户主动中止时触发）
    /// * `on_update` - 外部回调，终态回调恰好一次
    pub async fn run<S, F>(
        &mut self,
        source: S,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> RunState
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + Unpin,
        F: FnMut(StreamUpdate),
    {
        self.state = RunState::Streaming;
        let decoder = ProtocolDecoder::for_format(self.context.format);
        let events = decode_stream(source, decoder);
        tokio::pin!(events);

        loop {
            if should_stop() {
                self.finish_cancelled(on_update);
                return self.state;
            }

            let item = tokio::select! {
                _ = cancel.cancelled() => Some(Err(StreamError::Aborted)),
                item = events.next() => item,
            };

            match item {
                None => {
                    self.finish_completed(on_update);
                    return self.state;
                }
                Some(Ok(batch)) => {
                    if self.fold_events(batch, on_update) {
                        return self.state;
                    }
                }
                Some(Err(err)) => {
                    self.finish_failed(err, should_stop, on_update);
                    return self.state;
                }
            }
        }
    }

    /// 折叠一批事件并触发回调
    ///
    /// 返回 true 表示已进入终态（数据通道内的硬错误）。
    fn fold_events<F>(&mut self, events: Vec<StreamEvent>, on_update: &mut F) -> bool
    where
        F: FnMut(StreamUpdate),
    {
        for event in events {
            match event {
                StreamEvent::TextDelta(text) => {
                    self.complete_message.push_str(&text);
                    self.append_times += 1;
                    if self.append_times > self.context.coalesce_threshold
                        && self.append_times % 2 == 0
                    {
                        // 合并：跳过回调，文本已经累积
                        continue;
                    }
                    self.emit(on_update, false, false, None);
                }
                StreamEvent::ReasoningDelta(text) => {
                    self.complete_reasoning.push_str(&text);
                    self.emit(on_update, false, false, None);
                }
                StreamEvent::Usage(mut usage) => {
                    // 线上负载不带显示名，转发前打上当前模型名
                    usage.model_name = self.context.model_name.clone();
                    self.last_usage = Some(usage.clone());
                    self.emit(on_update, false, false, Some(usage));
                }
                StreamEvent::Done => {
                    // 哨兵吞掉即可，完成由读端 EOF 驱动
                }
                StreamEvent::Error(message) => {
                    self.append_paragraph(&message);
                    self.emit(on_update, true, true, None);
                    self.state = RunState::Failed;
                    return true;
                }
            }
        }
        false
    }

    /// 协作式取消或中止取消的终态
    fn finish_cancelled<F>(&mut self, on_update: &mut F)
    where
        F: FnMut(StreamUpdate),
    {
        if self.complete_message.is_empty() {
            // 保证最终气泡不为空
            self.complete_message = "...".to_string();
        }
        self.emit(on_update, true, true, None);
        self.state = RunState::Cancelled;
    }

    /// 正常完成的终态
    fn finish_completed<F>(&mut self, on_update: &mut F)
    where
        F: FnMut(StreamUpdate),
    {
        self.emit(on_update, true, false, None);
        self.state = RunState::Completed;
    }

    /// 读取 / 解码错误的终态
    ///
    /// 用户已请求停止时按取消处理；否则把归一化后的错误文案
    /// 追加到已有文本之后一并交给回调。
    pub(crate) fn finish_failed<F>(
        &mut self,
        err: StreamError,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
        on_update: &mut F,
    ) where
        F: FnMut(StreamUpdate),
    {
        if should_stop() {
            self.finish_cancelled(on_update);
            return;
        }
        tracing::warn!("[STREAM] 请求失败: {}", err);
        self.append_paragraph(&format!("Request error: {}", err.user_text()));
        self.emit(on_update, true, true, None);
        self.state = RunState::Failed;
    }

    fn append_paragraph(&mut self, text: &str) {
        if !self.complete_message.is_empty() {
            self.complete_message.push_str("\n\n");
        }
        self.complete_message.push_str(text);
    }

    fn emit<F>(&self, on_update: &mut F, complete: bool, need_stop: bool, usage: Option<Usage>)
    where
        F: FnMut(StreamUpdate),
    {
        on_update(StreamUpdate {
            text: self.complete_message.clone(),
            complete,
            need_stop,
            usage,
            reasoning: if self.complete_reasoning.is_empty() {
                None
            } else {
                Some(self.complete_reasoning.clone())
            },
        });
    }
}

// ============================================================================
// HTTP 请求入口
// ============================================================================

/// 一次流式请求
pub struct StreamRequest {
    /// 已装配好的出站请求
    pub builder: reqwest::RequestBuilder,
    /// 响应头超时：请求发出时 armed，响应头到达即解除；
    /// 之后不设逐块空闲超时，慢而不死的流不会被掐掉
    pub connect_timeout: Duration,
    /// 流式上下文
    pub context: StreamContext,
}

/// 发出请求并驱动读循环直到终态
///
/// 完成只能通过回调观察（发后不理）。超时触发时同时取消
/// 中止信号，确保底层连接被放弃。
pub async fn run_stream<F>(
    request: StreamRequest,
    should_stop: &(dyn Fn() -> bool + Send + Sync),
    cancel: &CancellationToken,
    on_update: &mut F,
) -> RunState
where
    F: FnMut(StreamUpdate),
{
    let mut aggregator = StreamAggregator::new(request.context);

    let response = tokio::select! {
        _ = cancel.cancelled() => Err(StreamError::Aborted),
        result = tokio::time::timeout(request.connect_timeout, request.builder.send()) => {
            match result {
                Err(_) => {
                    cancel.cancel();
                    Err(StreamError::Timeout)
                }
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(StreamError::from(err)),
            }
        }
    };

    match response {
        Ok(response) => {
            let source = response_byte_stream(response);
            aggregator.run(source, should_stop, cancel, on_update).await
        }
        Err(err) => {
            aggregator.finish_failed(err, should_stop, on_update);
            aggregator.state()
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ok_chunks(chunks: &[&str]) -> Vec<Result<Bytes, StreamError>> {
        chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect()
    }

    fn never_stop() -> impl Fn() -> bool + Send + Sync {
        || false
    }

    async fn run_with(
        context: StreamContext,
        items: Vec<Result<Bytes, StreamError>>,
        should_stop: &(dyn Fn() -> bool + Send + Sync),
    ) -> (RunState, Vec<StreamUpdate>) {
        let mut updates = Vec::new();
        let mut aggregator = StreamAggregator::new(context);
        let cancel = CancellationToken::new();
        let state = aggregator
            .run(
                stream::iter(items),
                should_stop,
                &cancel,
                &mut |update| updates.push(update),
            )
            .await;
        (state, updates)
    }

    #[tokio::test]
    async fn test_converse_stream_accumulates_in_order() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ConverseStream);
        let chunks = ok_chunks(&[
            "{\"delta\":{\"text\":\"Hello\"}}\n\n",
            "{\"delta\":{\"text\":\", world\"}}\n\n{\"delta\":{\"text\":\"!\"}}\n\n",
        ]);
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Completed);
        let terminal = updates.last().unwrap();
        assert!(terminal.complete);
        assert!(!terminal.need_stop);
        assert_eq!(terminal.text, "Hello, world!");

        // 正文只增不减
        let mut previous_len = 0;
        for update in &updates {
            assert!(update.text.len() >= previous_len, "正文长度不应回退");
            previous_len = update.text.len();
        }
        // 终态回调恰好一次
        assert_eq!(updates.iter().filter(|u| u.complete).count(), 1);
    }

    #[tokio::test]
    async fn test_usage_tagged_with_model_name() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ConverseStream);
        let chunks = ok_chunks(&[
            "{\"usage\":{\"inputTokens\":7,\"outputTokens\":9,\"totalTokens\":16}}\n\n",
        ]);
        let (_, updates) = run_with(context, chunks, &never_stop()).await;

        let usage_update = updates
            .iter()
            .find(|u| u.usage.is_some())
            .expect("应该有携带 usage 的回调");
        let usage = usage_update.usage.as_ref().unwrap();
        assert_eq!(usage.model_name, "Nova Pro");
        assert_eq!(usage.input_tokens, 7);
    }

    #[tokio::test]
    async fn test_cooperative_cancel_before_first_read() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ConverseStream);
        let chunks = ok_chunks(&["{\"delta\":{\"text\":\"never read\"}}\n\n"]);
        let (state, updates) = run_with(context, chunks, &(|| true)).await;

        assert_eq!(state, RunState::Cancelled);
        assert_eq!(updates.len(), 1);
        let terminal = &updates[0];
        assert_eq!(terminal.text, "...");
        assert!(terminal.complete);
        assert!(terminal.need_stop);
    }

    #[tokio::test]
    async fn test_read_error_appends_suffix() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ConverseStream);
        let mut chunks = ok_chunks(&["{\"delta\":{\"text\":\"partial\"}}\n\n"]);
        chunks.push(Err(StreamError::Timeout));
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Failed);
        let terminal = updates.last().unwrap();
        assert!(terminal.complete);
        assert!(terminal.need_stop);
        assert_eq!(terminal.text, "partial\n\nRequest error: Timed out");
    }

    #[tokio::test]
    async fn test_abort_signal_without_stop_reports_timeout() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ConverseStream);
        let mut updates = Vec::new();
        let mut aggregator = StreamAggregator::new(context);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // pending 流保证 select 永远只会命中中止分支
        let state = aggregator
            .run(
                stream::pending::<Result<Bytes, StreamError>>(),
                &never_stop(),
                &cancel,
                &mut |update| updates.push(update),
            )
            .await;

        assert_eq!(state, RunState::Failed);
        assert_eq!(updates.last().unwrap().text, "Request error: Timed out");
    }

    #[tokio::test]
    async fn test_provider_error_event_is_terminal() {
        let context = StreamContext::new("DeepSeek-V3", StreamFormat::OpenAiSse);
        let chunks = ok_chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok so far\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"quota exceeded\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n\n",
        ]);
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Failed);
        let terminal = updates.last().unwrap();
        assert!(terminal.complete);
        assert!(terminal.need_stop);
        assert_eq!(terminal.text, "ok so far\n\n**Error:** quota exceeded");
        assert_eq!(updates.iter().filter(|u| u.complete).count(), 1);
    }

    #[tokio::test]
    async fn test_reasoning_triggers_callback_without_text() {
        let context = StreamContext::new("DeepSeek-R1", StreamFormat::OpenAiSse);
        let chunks = ok_chunks(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"step 1\"}}]}\n\n",
        ]);
        let (_, updates) = run_with(context, chunks, &never_stop()).await;

        // 思考增量即使没有正文也要触发回调
        assert!(updates.len() >= 2);
        assert_eq!(updates[0].reasoning.as_deref(), Some("step 1"));
        assert_eq!(updates[0].text, "");
    }

    #[tokio::test]
    async fn test_done_sentinel_not_surfaced() {
        let context = StreamContext::new("GPT-4o", StreamFormat::OpenAiSse);
        let chunks = ok_chunks(&["data: [DONE]\n\n"]);
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Completed);
        assert_eq!(updates.len(), 1, "只应有终态回调");
        assert_eq!(updates[0].text, "");
        assert!(!updates[0].need_stop);
    }

    #[tokio::test]
    async fn test_coalescing_bounds_callbacks_without_losing_text() {
        let context =
            StreamContext::new("Nova Pro", StreamFormat::ConverseStream).with_coalesce_threshold(4);
        let frames: Vec<String> = (0..10)
            .map(|i| format!("{{\"delta\":{{\"text\":\"{}\"}}}}\n\n", i))
            .collect();
        let chunks = ok_chunks(&frames.iter().map(String::as_str).collect::<Vec<_>>());
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Completed);
        // 文本一条不丢
        assert_eq!(updates.last().unwrap().text, "0123456789");
        // 超过阈值后每两条增量合并掉一次回调
        let delta_callbacks = updates.iter().filter(|u| !u.complete).count();
        assert!(delta_callbacks < 10, "合并应减少回调次数");
    }

    #[tokio::test]
    async fn test_proxy_stream_with_usage_suffix() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ProxyText);
        let chunks = ok_chunks(&[
            "Hello ",
            "world",
            "\n{\"inputTokens\":5,\"outputTokens\":3,\"totalTokens\":8}",
        ]);
        let (state, updates) = run_with(context, chunks, &never_stop()).await;

        assert_eq!(state, RunState::Completed);
        let usage_update = updates.iter().find(|u| u.usage.is_some()).unwrap();
        let usage = usage_update.usage.as_ref().unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.model_name, "Nova Pro");
        assert_eq!(updates.last().unwrap().text, "Hello world");
    }

    #[tokio::test]
    async fn test_multibyte_chunk_boundary() {
        let context = StreamContext::new("Nova Pro", StreamFormat::ProxyText);
        let text = "你好，世界";
        let bytes = text.as_bytes();
        // 在多字节字符中间切块
        let items = vec![
            Ok(Bytes::copy_from_slice(&bytes[..4])),
            Ok(Bytes::copy_from_slice(&bytes[4..])),
        ];
        let (_, updates) = run_with(context, items, &never_stop()).await;
        assert_eq!(updates.last().unwrap().text, text);
    }
}
