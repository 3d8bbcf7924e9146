//! 客户端的错误类型。

use std::io;

use bytes::Bytes;
use thiserror::Error;

/// 客户端可能出现的所有错误。
///
/// `Protocol`和`Server`只影响当前的请求，请求队列会继续处理后面的请求；
/// `Connection`表示连接层面的故障，所有未完成的请求都会收到这个错误。
#[derive(Debug, Error)]
pub enum Error {
    /// 回复的数据帧格式不合法。
    #[error("协议错误：{0}")]
    Protocol(String),

    /// 服务器返回了`-`开头的错误回复。
    #[error("服务器错误：{}", String::from_utf8_lossy(.0))]
    Server(Bytes),

    /// 连接中断，回复无法完整送达。
    #[error("连接错误：{0}")]
    Connection(String),

    /// 握手命令的回复是一个错误。
    #[error("握手失败：{}", String::from_utf8_lossy(.0))]
    Handshake(Bytes),

    /// 值超过了单帧的大小上限，命令不会被发送。
    #[error("值过大：{len} 字节，上限为 {max} 字节")]
    ValueTooLarge { len: usize, max: usize },

    /// 数据流在得到任何帧之前就结束了。
    #[error("数据流意外结束")]
    UnexpectedEndOfStream,

    /// 回复的类型与命令不符。
    #[error("预料之外的回复：{0}")]
    UnexpectedReply(String),

    /// 客户端已经关闭。
    #[error("客户端已关闭")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 自定义的 Result。
pub type Result<T> = std::result::Result<T, Error>;
