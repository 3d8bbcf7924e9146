use bytes::Bytes;

use crate::Frame;

/// 列出匹配模式的所有 key。
///
/// 格式：KEYS <pattern>
///
/// 回复是由大型字符串组成的数组，key 很多时会分成很多个字节块到达。
#[derive(Debug)]
pub struct Keys {
    pattern: String,
}

impl Keys {
    /// 创建一个`Keys`命令。
    pub fn new(pattern: impl ToString) -> Keys {
        Keys {
            pattern: pattern.to_string(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 将命令转化为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"KEYS"));
        frame.push_bulk(Bytes::from(self.pattern.into_bytes()));
        frame
    }
}

impl Default for Keys {
    /// 匹配所有 key。
    fn default() -> Keys {
        Keys::new("*")
    }
}
