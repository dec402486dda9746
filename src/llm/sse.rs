//! SSE 分帧
//!
//! streamGenerateContent?alt=sse 以 `data: {json}` + 空行分隔事件；网络分块可能切在任意位置，
//! 这里缓冲未完成的部分，只吐出完整事件的 data 字段。

/// 增量 SSE 解析器
///
/// 缓冲原始字节，只在凑齐整个事件块后才做 UTF-8 解码；分块切在多字节字符中间时不会产生替换字符。
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一段原始字节，返回本次凑齐的所有事件 data（多行 data 以 \n 拼接）
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        normalize_crlf(&mut self.buffer);

        let mut events = Vec::new();
        while let Some(boundary) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
            if let Some(data) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(data);
            }
        }
        events
    }

    /// 流结束时处理末尾没有空行收尾的事件
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

/// \r\n 折叠为 \n；末尾孤立的 \r 留到下一块再判断
fn normalize_crlf(buf: &mut Vec<u8>) {
    if !buf.contains(&b'\r') {
        return;
    }
    let mut out = Vec::with_capacity(buf.len());
    let mut iter = buf.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buf = out;
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<String> {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|v| v.strip_prefix(' ').unwrap_or(v))
        .collect();
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}
