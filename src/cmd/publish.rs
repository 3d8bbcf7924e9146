use bytes::Bytes;

use crate::Frame;

/// 向给定的广播信道发送信息。
///
/// 格式：PUBLISH <channel> <message>
///
/// 回复是收到信息的订阅者个数。
#[derive(Debug)]
pub struct Publish {
    channel: String,
    message: Bytes,
}

impl Publish {
    /// 创建一个`Publish`命令。
    pub fn new(channel: impl ToString, message: Bytes) -> Publish {
        Publish {
            channel: channel.to_string(),
            message,
        }
    }

    /// 将命令转换为等价的`Frame`
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"PUBLISH"));
        frame.push_bulk(Bytes::from(self.channel.into_bytes()));
        frame.push_bulk(self.message);
        frame
    }
}
