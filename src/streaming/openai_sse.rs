//! OpenAI 兼容 SSE 解码器
//!
//! 解码 OpenAI / DeepSeek / OpenAI 兼容 API 的 `data: {...}` 流。
//! 网络批量可能把多条记录合并进一个物理块，也可能把一条记录
//! 切成两半：解码器自己维护一个"最后未完成记录"的续传缓存，
//! 下一个块到达时前置拼接后重试。续传仍无法解析时才作为硬
//! 错误上抛。
//!
//! DeepSeek 的 `prompt_cache_hit_tokens` 不计入计费输入量，
//! 产出的 usage 里 inputTokens 已扣除缓存命中部分。

use crate::models::Usage;
use crate::streaming::error::StreamError;
use crate::streaming::event::StreamEvent;
use serde::Deserialize;
use std::mem;

/// OpenRouter 的保活注释记录，直接跳过
pub const OPENROUTER_TAG: &str = ": OPENROUTER PROCESSING";

/// 服务端版本不匹配时引导用户升级的文档链接
const UPGRADE_DOC_LINK: &str = "https://github.com/aichatcast/chatcast";

/// 一条 SSE 记录的 JSON 负载
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
    /// 服务端版本不匹配信号
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    /// 部分网关用 `reasoning` 而非 `reasoning_content`
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    /// 命中提示词缓存的 token 数（不计费）
    prompt_cache_hit_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: Option<String>,
    metadata: Option<WireErrorMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireErrorMetadata {
    raw: Option<String>,
}

/// OpenAI 兼容 SSE 解码器
///
/// 每个请求独享一个实例；`carry` 是跨物理块的续传缓存。
#[derive(Debug, Default)]
pub struct OpenAiSseDecoder {
    /// 上一个块末尾未解析完的记录
    carry: String,
}

impl OpenAiSseDecoder {
    /// 创建新的解码器
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前是否持有未完成的续传记录
    pub fn has_carry(&self) -> bool {
        !self.carry.is_empty()
    }

    /// 重置解码器状态
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// 解码一个原始网络块
    ///
    /// 返回解码出的事件列表。只有"续传记录拼接后仍无法解析"
    /// 这一种情况返回 `Err`，其余解析问题都降级处理。
    pub fn decode_chunk(&mut self, chunk: &str) -> Result<Vec<StreamEvent>, StreamError> {
        let had_carry = !self.carry.is_empty();
        let buf = mem::take(&mut self.carry) + chunk;
        let records: Vec<&str> = buf.split("\n\n").collect();
        let last_index = records.len() - 1;

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut usage: Option<Usage> = None;
        let mut done = false;

        for (i, raw_record) in records.iter().enumerate() {
            if raw_record.trim().is_empty() {
                continue;
            }
            let record = raw_record.strip_prefix('\n').unwrap_or(raw_record);
            let cleaned = record.strip_prefix("data: ").unwrap_or(record);

            if cleaned.trim() == "[DONE]" {
                // 结束哨兵只做标记，不产出文本
                done = true;
                continue;
            }
            if cleaned.trim() == OPENROUTER_TAG {
                continue;
            }

            match serde_json::from_str::<ChatChunk>(cleaned) {
                Ok(parsed) => {
                    if let Some(error) = parsed.error {
                        let mut message =
                            format!("**Error:** {}", error.message.unwrap_or_default());
                        if let Some(raw) = error.metadata.and_then(|m| m.raw) {
                            message.push_str(":\n");
                            message.push_str(&raw);
                        }
                        return Ok(vec![StreamEvent::Error(message)]);
                    }
                    if let Some(detail) = parsed.detail {
                        return Ok(vec![StreamEvent::Error(format!(
                            "Error: Please upgrade your [server API]({}?tab=readme-ov-file#upgrade-api), API {}",
                            UPGRADE_DOC_LINK, detail
                        ))]);
                    }
                    if let Some(choice) = parsed.choices.first() {
                        if let Some(text) = &choice.delta.content {
                            content.push_str(text);
                        }
                        if let Some(text) = &choice.delta.reasoning_content {
                            reasoning.push_str(text);
                        }
                        if let Some(text) = &choice.delta.reasoning {
                            reasoning.push_str(text);
                        }
                    }
                    if let Some(wire) = parsed.usage {
                        usage = Some(Usage {
                            model_name: String::new(),
                            input_tokens: wire
                                .prompt_tokens
                                .saturating_sub(wire.prompt_cache_hit_tokens.unwrap_or(0)),
                            output_tokens: wire.completion_tokens,
                            total_tokens: wire.total_tokens,
                            ..Default::default()
                        });
                    }
                }
                Err(err) => {
                    if had_carry && i == 0 {
                        // 续传记录拼上新块后仍然解析失败，上抛硬错误
                        return Err(StreamError::parse(format!(
                            "continuation record could not be completed: {}",
                            err
                        )));
                    }
                    if !content.is_empty() || !reasoning.is_empty() {
                        // 本块里已有有效记录：先交出部分结果，剩余记录续传
                        self.carry = records[i..].join("\n\n");
                        break;
                    }
                    if record == "data: " {
                        // 恰好切在前缀之后，整条记录续传
                        self.carry = record.to_string();
                        break;
                    }
                    if i == last_index {
                        // 末尾记录可能只是还没传完，续传等下一个块
                        self.carry = record.to_string();
                        break;
                    }
                    // 块中间的完整记录无法解析：按 Provider 错误透出
                    tracing::warn!("[OPENAI_SSE] 记录解析失败: {} record={}", err, cleaned);
                    return Ok(vec![StreamEvent::Error(chunk.to_string())]);
                }
            }
        }

        let mut events = Vec::new();
        if !reasoning.is_empty() {
            events.push(StreamEvent::ReasoningDelta(reasoning));
        }
        if !content.is_empty() {
            events.push(StreamEvent::TextDelta(content));
        }
        if let Some(usage) = usage {
            // 只有携带有效输入量的快照才值得转发
            if usage.input_tokens > 0 {
                events.push(StreamEvent::Usage(usage));
            }
        }
        if done {
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(decoder: &mut OpenAiSseDecoder, chunk: &str) -> Vec<StreamEvent> {
        decoder.decode_chunk(chunk).expect("解码不应失败")
    }

    #[test]
    fn test_single_content_record() {
        let mut decoder = OpenAiSseDecoder::new();
        let events = decode(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::TextDelta("Hello".to_string())]);
    }

    #[test]
    fn test_batched_records_combined() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events, vec![StreamEvent::TextDelta("Hello".to_string())]);
    }

    #[test]
    fn test_done_sentinel_swallowed() {
        let mut decoder = OpenAiSseDecoder::new();
        let events = decode(&mut decoder, "data: [DONE]\n\n");
        assert_eq!(events, vec![StreamEvent::Done]);

        // 后续帧不受影响
        let events = decode(
            &mut decoder,
            "data: {\"choices\":[{\"delta\":{\"content\":\"after\"}}]}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::TextDelta("after".to_string())]);
    }

    #[test]
    fn test_reasoning_content_accumulated() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think\"}}]}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(
            events,
            vec![StreamEvent::ReasoningDelta("think".to_string())]
        );

        // `reasoning` 字段同样计入思考内容
        let chunk = "data: {\"choices\":[{\"delta\":{\"reasoning\":\"more\"}}]}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events, vec![StreamEvent::ReasoningDelta("more".to_string())]);
    }

    #[test]
    fn test_usage_cache_hit_excluded() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":100,\"completion_tokens\":20,\"total_tokens\":120,\"prompt_cache_hit_tokens\":30}}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Usage(usage) => {
                assert_eq!(usage.input_tokens, 70, "缓存命中不计入输入量");
                assert_eq!(usage.output_tokens, 20);
                assert_eq!(usage.total_tokens, 120);
            }
            other => panic!("应该是 Usage 事件，实际是 {:?}", other),
        }
    }

    #[test]
    fn test_usage_without_input_not_forwarded() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":0,\"completion_tokens\":0,\"total_tokens\":0}}\n\n";
        let events = decode(&mut decoder, chunk);
        assert!(events.is_empty());
    }

    #[test]
    fn test_split_record_recovered_across_chunks() {
        let mut decoder = OpenAiSseDecoder::new();

        // 一条记录被切成两半
        let events = decode(&mut decoder, "data: {\"choices\":[{\"delta\":{\"conte");
        assert!(events.is_empty(), "不完整的记录不应产出事件");
        assert!(decoder.has_carry());

        let events = decode(&mut decoder, "nt\":\"Hello\"}}]}\n\n");
        assert_eq!(events, vec![StreamEvent::TextDelta("Hello".to_string())]);
        assert!(!decoder.has_carry());
    }

    #[test]
    fn test_split_after_prefix_recovered() {
        let mut decoder = OpenAiSseDecoder::new();
        // 恰好切在 "data: " 之后
        let events = decode(&mut decoder, "data: ");
        assert!(events.is_empty());
        assert!(decoder.has_carry());

        let events = decode(&mut decoder, "{\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n");
        assert_eq!(events, vec![StreamEvent::TextDelta("ok".to_string())]);
    }

    #[test]
    fn test_failed_continuation_is_hard_error() {
        let mut decoder = OpenAiSseDecoder::new();
        decode(&mut decoder, "data: {\"choices\":[{\"delta");
        assert!(decoder.has_carry());

        // 续传拼接后仍不是合法 JSON
        let result = decoder.decode_chunk("garbage that closes nothing\n\n");
        assert!(matches!(result, Err(StreamError::ParseError(_))));
    }

    #[test]
    fn test_error_envelope() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"error\":{\"message\":\"Invalid API key\"}}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(
            events,
            vec![StreamEvent::Error(
                "**Error:** Invalid API key".to_string()
            )]
        );
    }

    #[test]
    fn test_error_envelope_with_metadata_raw() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk =
            "data: {\"error\":{\"message\":\"upstream\",\"metadata\":{\"raw\":\"502 bad gateway\"}}}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(
            events,
            vec![StreamEvent::Error(
                "**Error:** upstream:\n502 bad gateway".to_string()
            )]
        );
    }

    #[test]
    fn test_detail_triggers_upgrade_message() {
        let mut decoder = OpenAiSseDecoder::new();
        let chunk = "data: {\"detail\":\"version 1 is required\"}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error(message) => {
                assert!(message.starts_with("Error: Please upgrade your [server API]("));
                assert!(message.ends_with("API version 1 is required"));
            }
            other => panic!("应该是 Error 事件，实际是 {:?}", other),
        }
    }

    #[test]
    fn test_openrouter_keepalive_skipped() {
        let mut decoder = OpenAiSseDecoder::new();
        let events = decode(&mut decoder, ": OPENROUTER PROCESSING\n\n");
        assert!(events.is_empty());
        assert!(!decoder.has_carry());
    }

    #[test]
    fn test_partial_result_with_carry() {
        let mut decoder = OpenAiSseDecoder::new();
        // 前一条有效、后一条被切断：交出部分结果并续传
        let chunk =
            "data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n\ndata: {\"choices\":[{\"de";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events, vec![StreamEvent::TextDelta("part".to_string())]);
        assert!(decoder.has_carry());

        let events = decode(&mut decoder, "lta\":{\"content\":\"ial\"}}]}\n\n");
        assert_eq!(events, vec![StreamEvent::TextDelta("ial".to_string())]);
    }

    #[test]
    fn test_malformed_mid_buffer_record_is_error() {
        let mut decoder = OpenAiSseDecoder::new();
        // 块中间一条完整但非法的记录，且此前没有任何有效内容
        let chunk = "data: {broken}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n";
        let events = decode(&mut decoder, chunk);
        assert_eq!(events, vec![StreamEvent::Error(chunk.to_string())]);
    }
}
