//! 把一个回复的片段逐个交给调用者的拉取式数据流。
//!
//! 分派器是唯一的生产者，持有`ReplySender`；调用者持有`ReplyStream`。
//! 信道是有界的，发送从不等待：信道满时分派器把片段暂存在请求上，正在解码的回复
//! 有暂存片段时停止读取 socket，压力最终通过 TCP 传回服务器。调用者每取走一个片段
//! 或者丢弃数据流，都会通过共享的`Notify`唤醒连接任务继续投递。

use std::{
    fmt,
    future::poll_fn,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
};

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, mpsc::error::TrySendError, Notify};
use tokio_stream::Stream;

use crate::{codec::Fragment, Error};

/// 创建一对相连的发送端和数据流。
///
/// `progress`在调用者取走片段或丢弃数据流时被通知。
pub(crate) fn channel(capacity: usize, progress: Arc<Notify>) -> (ReplySender, ReplyStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let completed = Arc::new(AtomicBool::new(false));
    let sender = ReplySender {
        tx,
        completed: completed.clone(),
    };
    let stream = ReplyStream {
        rx,
        completed,
        done: false,
        on_return: None,
        progress,
    };
    (sender, stream)
}

/// 数据流的写入端。
#[derive(Debug)]
pub(crate) struct ReplySender {
    tx: mpsc::Sender<crate::Result<Fragment>>,

    // 只有回复正常结束时才会被设置。写入端被丢弃而这个值仍为`false`，
    // 说明回复因为连接中断而没有送达。
    completed: Arc<AtomicBool>,
}

impl ReplySender {
    /// 尝试投递一个片段或者结束回复的错误，不会等待。
    ///
    /// # Errors
    /// 信道已满或者调用者已经丢弃了数据流时，连同没有送出的内容一起返回。
    pub(crate) fn try_send(
        &self,
        item: crate::Result<Fragment>,
    ) -> Result<(), TrySendError<crate::Result<Fragment>>> {
        self.tx.try_send(item)
    }

    /// 正常结束这个回复。
    pub(crate) fn finish(self) {
        self.completed.store(true, Ordering::Release);
    }
}

/// 一个回复的片段流。
///
/// 回复结束后再调用`next()`会一直返回`None`。
pub struct ReplyStream {
    rx: mpsc::Receiver<crate::Result<Fragment>>,
    completed: Arc<AtomicBool>,
    done: bool,
    on_return: Option<Box<dyn FnOnce() + Send>>,
    progress: Arc<Notify>,
}

impl ReplyStream {
    /// 等待下一个片段。
    ///
    /// # Output
    /// `Some(Ok(fragment))`是下一个片段，`Some(Err(err))`表示回复以错误结束，
    /// `None`表示回复已经结束。
    pub async fn next(&mut self) -> Option<crate::Result<Fragment>> {
        poll_fn(|cx| self.poll_fragment(cx)).await
    }

    /// 设置`drain_and_close()`结束时调用的清理函数。
    pub fn on_return(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_return = Some(Box::new(f));
    }

    /// 读完剩下的所有片段，调用清理函数，然后返回读到的片段。
    ///
    /// 这不会通知服务器取消任何东西，只是在本地把回复读完。
    ///
    /// # Errors
    /// 如果回复以错误结束，返回这个错误。清理函数仍然会被调用。
    pub async fn drain_and_close(mut self) -> crate::Result<Vec<Fragment>> {
        let mut store = Vec::new();
        let mut result = Ok(());
        while let Some(fragment) = self.next().await {
            match fragment {
                Ok(fragment) => store.push(fragment),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if let Some(on_return) = self.on_return.take() {
            on_return();
        }
        result.map(|_| store)
    }

    /// 转换为完整值的数据流。
    ///
    /// 被拆开的大型字符串会被拼接，数组头和空值被跳过。
    pub fn values(self) -> impl Stream<Item = crate::Result<Bytes>> {
        let mut stream = self;
        try_stream! {
            let mut pending = BytesMut::new();
            while let Some(fragment) = stream.next().await {
                match fragment? {
                    Fragment::Bulk { data, last: false } => pending.extend_from_slice(&data),
                    Fragment::Bulk { data, last: true } => {
                        if pending.is_empty() {
                            yield data;
                        } else {
                            pending.extend_from_slice(&data);
                            yield pending.split().freeze();
                        }
                    }
                    Fragment::Simple(data) | Fragment::Integer(data) => yield data,
                    Fragment::Error(data) => Err::<(), _>(Error::Server(data))?,
                    Fragment::Null | Fragment::Array(_) | Fragment::Push(_) => {}
                }
            }
        }
    }

    fn poll_fragment(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Fragment>>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = ready!(self.rx.poll_recv(cx));
        self.progress.notify_one();
        match item {
            Some(Ok(fragment)) => Poll::Ready(Some(Ok(fragment))),
            Some(Err(err)) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.done = true;
                if self.completed.load(Ordering::Acquire) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(Error::Connection("连接中断，回复不完整".into()))))
                }
            }
        }
    }
}

impl Stream for ReplyStream {
    type Item = crate::Result<Fragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_fragment(cx)
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.rx.close();
        self.progress.notify_one();
    }
}

impl fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyStream")
            .field("done", &self.done)
            .field("on_return", &self.on_return.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::StreamExt;

    fn pair(capacity: usize) -> (ReplySender, ReplyStream) {
        channel(capacity, Arc::new(Notify::new()))
    }

    fn ok(fragment: Fragment) -> crate::Result<Fragment> {
        Ok(fragment)
    }

    #[tokio::test]
    async fn yields_fragments_then_end_forever() {
        let (tx, mut stream) = pair(4);
        tx.try_send(ok(Fragment::Simple(Bytes::from_static(b"OK"))))
            .unwrap();
        tx.finish();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Fragment::Simple(Bytes::from_static(b"OK"))
        );
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_sender_without_finish_is_connection_error() {
        let (tx, mut stream) = pair(4);
        drop(tx);
        assert!(matches!(stream.next().await, Some(Err(Error::Connection(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn error_ends_the_stream() {
        let (tx, mut stream) = pair(4);
        tx.try_send(Err(Error::Server(Bytes::from_static(b"ERR"))))
            .unwrap();
        assert!(matches!(stream.next().await, Some(Err(Error::Server(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn full_channel_hands_the_fragment_back() {
        let progress = Arc::new(Notify::new());
        let (tx, mut stream) = channel(1, progress.clone());
        tx.try_send(ok(Fragment::Integer(Bytes::from_static(b"1"))))
            .unwrap();

        let back = match tx.try_send(ok(Fragment::Integer(Bytes::from_static(b"2")))) {
            Err(TrySendError::Full(item)) => item,
            other => panic!("unexpected: {:?}", other),
        };

        // 取走一个片段会留下通知，之后的等待立即返回。
        stream.next().await.unwrap().unwrap();
        progress.notified().await;
        tx.try_send(back).unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Fragment::Integer(Bytes::from_static(b"2"))
        );
    }

    #[tokio::test]
    async fn drain_collects_and_runs_cleanup() {
        let (tx, mut stream) = pair(32);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        stream.on_return(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..20u8 {
            tx.try_send(ok(Fragment::Integer(Bytes::from(vec![b'0' + i % 10]))))
                .unwrap();
        }
        tx.finish();

        let all = stream.drain_and_close().await.unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_and_notifies() {
        let progress = Arc::new(Notify::new());
        let (tx, stream) = channel(1, progress.clone());
        drop(stream);
        assert!(matches!(
            tx.try_send(ok(Fragment::Null)),
            Err(TrySendError::Closed(_))
        ));
        progress.notified().await;
    }

    #[tokio::test]
    async fn values_join_split_bulk_strings() {
        let (tx, stream) = pair(8);
        let items = [
            Fragment::Array(2),
            Fragment::Bulk {
                data: Bytes::from_static(b"ke"),
                last: false,
            },
            Fragment::Bulk {
                data: Bytes::from_static(b"y1"),
                last: true,
            },
            Fragment::Bulk {
                data: Bytes::from_static(b"key2"),
                last: true,
            },
        ];
        for item in items {
            tx.try_send(ok(item)).unwrap();
        }
        tx.finish();

        let values: Vec<Bytes> = stream.values().collect::<crate::Result<_>>().await.unwrap();
        assert_eq!(values, vec![Bytes::from_static(b"key1"), Bytes::from_static(b"key2")]);
    }
}
