use bytes::Bytes;

use crate::Frame;

/// 获取 key 对应的 value 并删除这个 key。
///
/// 格式：GETDEL <key>
#[derive(Debug)]
pub struct GetDel {
    key: String,
}

impl GetDel {
    /// 创建一个`GetDel`命令。
    pub fn new(key: impl ToString) -> GetDel {
        GetDel {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 将命令转化为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"GETDEL"));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame
    }
}
