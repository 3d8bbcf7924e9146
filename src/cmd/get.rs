use bytes::Bytes;

use crate::Frame;

/// 根据 key 获取 value。
///
/// 格式：GET <key>
///
/// 回复是一个大型字符串，如果不存在这样的 key 则为空值。
#[derive(Debug)]
pub struct Get {
    key: String,
}

impl Get {
    /// 创建一个`Get`命令。
    pub fn new(key: impl ToString) -> Get {
        Get {
            key: key.to_string(),
        }
    }

    /// 获取 key 值。
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 将命令转化为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"GET"));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame
    }
}
