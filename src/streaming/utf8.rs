//! 增量 UTF-8 解码
//!
//! 网络层按字节切块，切点可能落在多字节字符中间。这里把
//! 末尾不完整的字节序列留到下一个块再拼，真正非法的字节才
//! 做替换。

use std::mem;

/// 增量 UTF-8 解码器
///
/// 每个请求独享一个实例。
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    /// 上一个块末尾的不完整字节序列（最多 3 字节）
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一个字节块
    ///
    /// 末尾不完整的字符留待下一次调用；块中间的非法字节按
    /// 替换字符处理。
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        match String::from_utf8(data) {
            Ok(text) => text,
            Err(err) => {
                let valid_up_to = err.utf8_error().valid_up_to();
                let incomplete = err.utf8_error().error_len().is_none();
                let data = err.into_bytes();
                if incomplete {
                    // 末尾字符被切断，留到下一个块
                    self.pending = data[valid_up_to..].to_vec();
                    String::from_utf8_lossy(&data[..valid_up_to]).into_owned()
                } else {
                    String::from_utf8_lossy(&data).into_owned()
                }
            }
        }
    }

    /// 流结束时冲刷残留字节（必然不完整，做替换处理）
    pub fn finish(&mut self) -> String {
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(&pending).into_owned()
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
