use bytes::Bytes;

use crate::Frame;

/// 测试连接。
///
/// 格式：PING [message]
///
/// 如果没有设置发送到信息，返回`PONG`，否则返回相同的信息。
#[derive(Debug)]
pub struct Ping {
    msg: Option<Bytes>,
}

impl Ping {
    /// 创建一个`Ping`命令。
    pub fn new(msg: Option<Bytes>) -> Ping {
        Ping { msg }
    }

    /// 将命令转化为等价的`Frame`。
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"PING"));
        if let Some(msg) = self.msg {
            frame.push_bulk(msg);
        }
        frame
    }
}
