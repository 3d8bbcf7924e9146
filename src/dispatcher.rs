//! 请求与回复的配对。
//!
//! 命令按写入 socket 的顺序排队，收到的字节块按到达顺序排队。`drive()`总是用最早的
//! 字节块去解码第一个还没解码完的请求，回复完整或出错后剩下的字节留给下一个请求。
//!
//! 投递从不等待。调用者没来得及读取的片段暂存在各自的请求上，调用者取走片段后由
//! 连接任务再次调用`drive()`补发；全部送达的请求才会出队。正在解码的请求暂存的数据
//! 超过上限时才停止读取 socket，已经解码完但还没读完的回复不会挡住后面的回复。
//!
//! `Dispatcher`只被连接任务持有，`drive()`需要`&mut self`，因此不可能有两次驱动交错执行。

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use tokio::sync::{mpsc::error::TrySendError, Notify};
use tracing::{debug, warn};

use crate::{
    codec::{Decoded, Decoder, Fragment, Status},
    stream::ReplySender,
    Error,
};

/// 计算暂存量时每个片段额外计入的字节数，数组头和空值也会占用暂存量。
const PARKED_OVERHEAD: usize = 16;

/// 一个已经写出、还在等待回复或者等待投递的请求。
#[derive(Debug)]
struct Pending {
    // 请求编号，只用于日志。
    id: u64,

    reply: ReplySender,

    // 这个回复的部分解码状态。
    decoder: Decoder,

    // 已经解码、还没能放进信道的内容。结束回复的错误也排在这里。
    parked: VecDeque<crate::Result<Fragment>>,
    parked_bytes: usize,

    // 回复已经解码完，暂存的内容送达后即可出队。
    decoded: bool,

    // 调用者丢弃了数据流。回复仍需解码以保持帧边界，但片段被丢弃。
    abandoned: bool,
}

impl Pending {
    fn park(&mut self, item: crate::Result<Fragment>) {
        self.parked_bytes += parked_size(&item);
        self.parked.push_back(item);
    }

    /// 把暂存的内容按顺序放进信道，直到信道已满。
    fn flush(&mut self) {
        while let Some(item) = self.parked.pop_front() {
            if self.abandoned {
                self.parked.clear();
                break;
            }
            let size = parked_size(&item);
            match self.reply.try_send(item) {
                Ok(()) => self.parked_bytes -= size,
                Err(TrySendError::Full(item)) => {
                    self.parked.push_front(item);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(id = self.id, "数据流已被丢弃，忽略剩余回复");
                    self.abandoned = true;
                    self.parked.clear();
                }
            }
        }
        self.parked_bytes = 0;
    }

    fn has_parked(&self) -> bool {
        !self.parked.is_empty()
    }

    fn is_done(&self) -> bool {
        self.decoded && self.parked.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    pending: VecDeque<Pending>,
    chunks: VecDeque<Bytes>,
    next_id: u64,

    // 调用者取走片段或者丢弃数据流时被通知。
    progress: Arc<Notify>,

    // 正在解码的请求最多暂存多少字节。
    max_parked: usize,
}

impl Dispatcher {
    pub(crate) fn new(progress: Arc<Notify>, max_parked: usize) -> Dispatcher {
        Dispatcher {
            pending: VecDeque::new(),
            chunks: VecDeque::new(),
            next_id: 0,
            progress,
            max_parked: max_parked.max(1),
        }
    }

    /// 登记一个刚刚写出的请求，返回它的编号。
    pub(crate) fn register(&mut self, reply: ReplySender) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(Pending {
            id,
            reply,
            decoder: Decoder::new(),
            parked: VecDeque::new(),
            parked_bytes: 0,
            decoded: false,
            abandoned: false,
        });
        id
    }

    /// 放入一个从 socket 读到的字节块。
    pub(crate) fn push_chunk(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 正在解码的回复暂存的数据达到上限，此时不应再读取 socket。
    pub(crate) fn is_stalled(&self) -> bool {
        self.decoding()
            .is_some_and(|at| self.pending[at].parked_bytes >= self.max_parked)
    }

    /// 有片段在等待调用者腾出信道的空间。
    pub(crate) fn has_parked(&self) -> bool {
        self.pending.iter().any(Pending::has_parked)
    }

    /// 等待任意一个调用者取走片段或者丢弃数据流。
    pub(crate) async fn progressed(&self) {
        self.progress.notified().await;
    }

    /// 补发暂存的片段，然后只要正在解码的请求暂存量没有达到上限、还有字节块，就继续解码。
    ///
    /// 一个请求的协议错误或错误回复只会结束这个请求，之后的请求不受影响。
    pub(crate) fn drive(&mut self) {
        loop {
            self.flush();

            if self.is_stalled() {
                break;
            }
            let Some(at) = self.decoding() else {
                break;
            };
            let Some(chunk) = self.chunks.pop_front() else {
                break;
            };

            let head = &mut self.pending[at];
            let Decoded { fragments, status } = match head.decoder.decode(chunk) {
                Ok(decoded) => decoded,
                Err(err) => {
                    // 这个字节块剩下的部分已经无法解读，只能丢弃。
                    warn!(id = head.id, %err, "回复无法解析");
                    head.park(Err(err));
                    head.decoded = true;
                    continue;
                }
            };

            for fragment in fragments {
                head.park(Ok(fragment));
            }
            let rest = match status {
                Status::Incomplete => continue,
                Status::Complete { rest } => rest,
                Status::ServerError { message, rest } => {
                    head.park(Err(Error::Server(message)));
                    rest
                }
            };
            head.decoded = true;
            if !rest.is_empty() {
                self.chunks.push_front(rest);
            }
        }
    }

    /// 连接中断时丢弃所有请求、暂存的片段和字节块。
    ///
    /// 请求的写入端被直接丢弃，调用者会收到`Error::Connection`。
    /// 返回被丢弃的请求个数。
    pub(crate) fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        for pending in self.pending.drain(..) {
            if !pending.decoder.is_fresh() || !pending.parked.is_empty() {
                debug!(id = pending.id, "回复在传输途中中断");
            }
        }
        self.chunks.clear();
        dropped
    }

    /// 第一个还没解码完的请求。
    fn decoding(&self) -> Option<usize> {
        self.pending.iter().position(|pending| !pending.decoded)
    }

    /// 补发所有请求暂存的片段，送达完毕的请求出队。
    fn flush(&mut self) {
        let mut at = 0;
        while at < self.pending.len() {
            self.pending[at].flush();
            if !self.pending[at].is_done() {
                at += 1;
                continue;
            }
            if let Some(pending) = self.pending.remove(at) {
                debug!(id = pending.id, "请求完成");
                pending.reply.finish();
            }
        }
    }
}

fn parked_size(item: &crate::Result<Fragment>) -> usize {
    let payload = match item {
        Ok(fragment) => fragment.payload().map_or(0, Bytes::len),
        Err(_) => 0,
    };
    payload + PARKED_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{channel, ReplyStream};
    use crate::Frame;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Notify::new()), 1024 * 1024)
    }

    fn register_with(dispatcher: &mut Dispatcher, capacity: usize) -> ReplyStream {
        let (tx, rx) = channel(capacity, dispatcher.progress.clone());
        dispatcher.register(tx);
        rx
    }

    fn register(dispatcher: &mut Dispatcher) -> ReplyStream {
        register_with(dispatcher, 64)
    }

    async fn frames(stream: ReplyStream) -> crate::Result<Vec<Frame>> {
        Frame::assemble(stream.drain_and_close().await?)
    }

    #[tokio::test]
    async fn replies_follow_request_order_across_tiny_chunks() {
        let mut dispatcher = dispatcher();
        let first = register(&mut dispatcher);
        let second = register(&mut dispatcher);
        let third = register(&mut dispatcher);

        let wire = b"+OK\r\n:5\r\n*2\r\n$3\r\nabc\r\n$-1\r\n";
        for byte in wire.chunks(1) {
            dispatcher.push_chunk(Bytes::copy_from_slice(byte));
            dispatcher.drive();
        }
        assert_eq!(dispatcher.pending_len(), 0);

        assert_eq!(frames(first).await.unwrap(), vec![Frame::Simple("OK".into())]);
        assert_eq!(frames(second).await.unwrap(), vec![Frame::Integer("5".into())]);
        assert_eq!(
            frames(third).await.unwrap(),
            vec![Frame::Array(vec![Frame::Bulk("abc".into()), Frame::Null])]
        );
    }

    #[tokio::test]
    async fn error_reply_does_not_block_next_request() {
        let mut dispatcher = dispatcher();
        let failing = register(&mut dispatcher);
        let next = register(&mut dispatcher);

        dispatcher.push_chunk(Bytes::from_static(b"-ERR no such key\r\n:1\r\n"));
        dispatcher.drive();

        assert!(matches!(
            failing.drain_and_close().await,
            Err(Error::Server(msg)) if &msg[..] == b"ERR no such key"
        ));
        assert_eq!(frames(next).await.unwrap(), vec![Frame::Integer("1".into())]);
    }

    #[tokio::test]
    async fn protocol_error_only_fails_current_request() {
        let mut dispatcher = dispatcher();
        let broken = register(&mut dispatcher);
        let next = register(&mut dispatcher);

        dispatcher.push_chunk(Bytes::from_static(b"?garbage\r\n"));
        dispatcher.push_chunk(Bytes::from_static(b"+PONG\r\n"));
        dispatcher.drive();

        assert!(matches!(broken.drain_and_close().await, Err(Error::Protocol(_))));
        assert_eq!(frames(next).await.unwrap(), vec![Frame::Simple("PONG".into())]);
    }

    #[tokio::test]
    async fn chunks_wait_for_a_request() {
        let mut dispatcher = dispatcher();
        dispatcher.push_chunk(Bytes::from_static(b":3\r\n"));
        dispatcher.drive();

        let stream = register(&mut dispatcher);
        dispatcher.drive();
        assert_eq!(frames(stream).await.unwrap(), vec![Frame::Integer("3".into())]);
    }

    #[tokio::test]
    async fn abandoned_reply_is_skipped() {
        let mut dispatcher = dispatcher();
        let dropped = register(&mut dispatcher);
        let kept = register(&mut dispatcher);
        drop(dropped);

        dispatcher.push_chunk(Bytes::from_static(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n+OK\r\n"));
        dispatcher.drive();

        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(frames(kept).await.unwrap(), vec![Frame::Simple("OK".into())]);
    }

    #[tokio::test]
    async fn full_channel_parks_fragments_until_read() {
        // 暂存任何东西都会堵住正在解码的请求。
        let mut dispatcher = Dispatcher::new(Arc::new(Notify::new()), 1);
        let mut stream = register_with(&mut dispatcher, 1);

        dispatcher.push_chunk(Bytes::from_static(b"*3\r\n:1\r\n"));
        dispatcher.drive();
        // 数组头放进了信道，`:1`只能暂存，正在解码的请求被堵住，下一个块不会被解码。
        assert!(dispatcher.is_stalled());
        assert!(dispatcher.has_parked());

        dispatcher.push_chunk(Bytes::from_static(b":2\r\n:3\r\n"));
        dispatcher.drive();
        assert!(dispatcher.is_stalled());

        let mut got = Vec::new();
        while got.len() < 4 {
            got.push(stream.next().await.unwrap().unwrap());
            dispatcher.progressed().await;
            dispatcher.drive();
        }
        assert!(!dispatcher.has_parked());
        assert_eq!(dispatcher.pending_len(), 0);
        assert!(stream.next().await.is_none());
        assert_eq!(
            Frame::assemble(got).unwrap(),
            vec![Frame::Array(vec![
                Frame::Integer("1".into()),
                Frame::Integer("2".into()),
                Frame::Integer("3".into()),
            ])]
        );
    }

    #[tokio::test]
    async fn unread_reply_does_not_hold_back_later_replies() {
        let mut dispatcher = dispatcher();
        let mut unread = register_with(&mut dispatcher, 1);
        let later = register(&mut dispatcher);

        dispatcher.push_chunk(Bytes::from_static(b"*2\r\n+a\r\n+b\r\n:7\r\n"));
        dispatcher.drive();

        // 第一个回复已经解码完，只是没读完，不算堵住。
        assert!(!dispatcher.is_stalled());
        assert!(dispatcher.has_parked());
        assert_eq!(frames(later).await.unwrap(), vec![Frame::Integer("7".into())]);

        assert_eq!(unread.next().await.unwrap().unwrap(), Fragment::Array(2));
        dispatcher.drive();
        assert_eq!(dispatcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn reset_fails_pending_requests() {
        let mut dispatcher = dispatcher();
        let mut stream = register(&mut dispatcher);
        dispatcher.push_chunk(Bytes::from_static(b"$10\r\nabc"));
        dispatcher.drive();

        assert_eq!(dispatcher.reset(), 1);
        assert!(matches!(stream.next().await, Some(Ok(Fragment::Bulk { last: false, .. }))));
        assert!(matches!(stream.next().await, Some(Err(Error::Connection(_)))));
    }
}
