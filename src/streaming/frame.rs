//! 帧缓冲区
//!
//! 把网络层任意切分的文本块重组为以空行分隔的完整帧。
//! 不完整的尾段保留到下一次 push 前再拼接，保证解码器永远
//! 只看到完整帧。每个请求独享一个实例，不跨请求复用。

use std::mem;

/// SSE / Converse-stream 的事件分隔符
const FRAME_DELIMITER: &str = "\n\n";

/// 帧缓冲区
///
/// # 示例
///
/// ```
/// use chatcast::streaming::FrameBuffer;
///
/// let mut buffer = FrameBuffer::new();
/// assert!(buffer.push("{\"a\":1}\n\n{\"b\"").len() == 1);
/// assert!(buffer.push(":2}\n\n").len() == 1);
/// assert!(buffer.finish().is_none());
/// ```
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// 未消费的尾段，下一次 push 时前置拼接
    tail: String,
}

impl FrameBuffer {
    /// 创建新的帧缓冲区
    pub fn new() -> Self {
        Self::default()
    }

    /// 推入一个原始文本块，返回其中所有完整帧
    ///
    /// 末尾没有分隔符的最后一段不会被返回，而是作为新的尾段
    /// 保留。空白段（trim 后为空）被丢弃，不会传给解码器。
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() && self.tail.is_empty() {
            return Vec::new();
        }

        let data = mem::take(&mut self.tail) + chunk;
        let mut frames = Vec::new();
        let mut rest = data.as_str();

        while let Some(pos) = rest.find(FRAME_DELIMITER) {
            let segment = &rest[..pos];
            rest = &rest[pos + FRAME_DELIMITER.len()..];
            if !segment.trim().is_empty() {
                frames.push(segment.to_string());
            }
        }

        self.tail = rest.to_string();
        frames
    }

    /// 流结束时冲刷尾段
    ///
    /// 返回最后一个未分隔的段（若非空白）。调用后尾段为空，
    /// 正常完成的请求在这里之后不应再持有任何未消费数据。
    pub fn finish(&mut self) -> Option<String> {
        let tail = mem::take(&mut self.tail);
        if tail.trim().is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// 重置缓冲区
    pub fn reset(&mut self) {
        self.tail.clear();
    }

    /// 当前尾段长度
    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }
}

// ============================================================================
// 测试模块
// ============================================================================


// ============================================================================
// 属性测试（Property-Based Testing）
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    /// 生成由若干帧组成的完整流
    fn arb_stream() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-zA-Z0-9{}:\",]{1,40}", 1..8)
            .prop_map(|frames| frames.join("\n\n") + "\n\n")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// 任意切分方式下，产出的帧序列与整块喂入完全一致
        #[test]
        fn prop_chunk_boundary_independence(stream in arb_stream(), chunk_size in 1usize..16usize) {
            // 整块喂入
            let mut whole = FrameBuffer::new();
            let mut expected = whole.push(&stream);
            expected.extend(whole.finish());

            // 按字符边界切块喂入（不能在 UTF-8 字符中间切断）
            let mut split = FrameBuffer::new();
            let mut actual = Vec::new();
            let chars: Vec<char> = stream.chars().collect();
            for piece in chars.chunks(chunk_size) {
                let piece: String = piece.iter().collect();
                actual.extend(split.push(&piece));
            }
            actual.extend(split.finish());

            prop_assert_eq!(expected, actual, "切块方式不应影响帧序列");
        }

        /// 干净结束后尾段必为空
        #[test]
        fn prop_tail_empty_after_clean_stream(stream in arb_stream()) {
            let mut buffer = FrameBuffer::new();
            buffer.push(&stream);
            prop_assert_eq!(buffer.tail_len(), 0, "以分隔符结尾的流不应留下尾段");
        }
    }
}
