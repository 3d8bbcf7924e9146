use bytes::Bytes;

use crate::Frame;

/// 删除 key。
///
/// 格式：DEL <key>
///
/// 回复是被删除的 key 的个数。
#[derive(Debug)]
pub struct Del {
    key: String,
}

impl Del {
    /// 创建一个`Del`命令。
    pub fn new(key: impl ToString) -> Del {
        Del {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 将命令转化为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"DEL"));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame
    }
}
