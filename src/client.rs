use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    cmd::{Command, Del, Get, GetDel, Keys, Ping, Publish, Set},
    codec::Fragment,
    config::ClientConfig,
    connection::{self, Connection, Request, State},
    stream::{self, ReplyStream},
    Error, Frame, Shutdown,
};

/// 负责与服务器通信的客户端。
///
/// 所有命令都在同一个连接上流水线式地发出，回复按命令发出的顺序到达。
/// `Client`可以被廉价地克隆，克隆出的句柄共用同一个连接。
#[derive(Debug, Clone)]
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,

    state: watch::Receiver<State>,

    // 发送关闭信号。所有`Client`都被丢弃后连接任务也会结束。
    notify_shutdown: broadcast::Sender<()>,

    stream_capacity: usize,

    // 所有数据流共用，调用者取走片段时唤醒连接任务。
    progress: Arc<Notify>,

    // 这个客户端独有的标记，`block()`用它占有 key。
    token: Bytes,
}

impl Client {
    /// 使用默认配置连接服务器。
    pub async fn connect(addr: impl Into<String>) -> crate::Result<Client> {
        Client::with_config(ClientConfig::new(addr)).await
    }

    /// 与服务器建立连接并完成握手，创建`Client`。
    ///
    /// 首次连接失败直接返回错误；连接就绪之后的故障才会触发延时重连。
    pub async fn with_config(config: ClientConfig) -> crate::Result<Client> {
        let (state_tx, state_rx) = watch::channel(State::Disconnected);
        let socket = match connection::connect(&config, &state_tx).await {
            Ok(socket) => socket,
            Err(err) => {
                state_tx.send_replace(State::Disconnected);
                return Err(err);
            }
        };

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (notify_shutdown, _) = broadcast::channel(1);
        let stream_capacity = config.stream_capacity;
        let progress = Arc::new(Notify::new());
        let connection = Connection::new(
            config,
            requests_rx,
            state_tx,
            Shutdown::new(notify_shutdown.subscribe()),
            progress.clone(),
        );
        tokio::spawn(connection.run(socket));

        Ok(Client {
            requests: requests_tx,
            state: state_rx,
            notify_shutdown,
            stream_capacity,
            progress,
            token: Bytes::from(Uuid::new_v4().to_string()),
        })
    }

    /// 当前的连接状态。
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// 这个客户端用于`block()`的标记。
    pub fn token(&self) -> &Bytes {
        &self.token
    }

    /// 等待连接就绪。
    ///
    /// # Errors
    /// 如果客户端已经关闭，返回`Error::Closed`。
    pub async fn ready(&self) -> crate::Result<()> {
        let mut state = self.state.clone();
        let current = state
            .wait_for(|s| matches!(s, State::Ready | State::Disconnected))
            .await
            .map_err(|_| Error::Closed)?;
        match *current {
            State::Ready => Ok(()),
            _ => Err(Error::Closed),
        }
    }

    /// 发送任意命令，返回它的回复的数据流。
    ///
    /// 会先等待连接就绪。读完一个回复之前可以继续发送命令，
    /// 没读完的部分暂存在客户端，暂存量受`ClientConfig::max_parked_bytes`限制。
    ///
    /// # Errors
    /// 如果客户端已经关闭，返回`Error::Closed`。
    pub async fn send(&self, frame: Frame) -> crate::Result<ReplyStream> {
        self.ready().await?;

        let mut bytes = BytesMut::new();
        frame.encode(&mut bytes);
        let (reply, stream) = stream::channel(self.stream_capacity, self.progress.clone());
        self.requests
            .send(Request {
                bytes: bytes.freeze(),
                reply,
            })
            .map_err(|_| Error::Closed)?;
        Ok(stream)
    }

    async fn execute(&self, cmd: Command) -> crate::Result<ReplyStream> {
        debug!(cmd = cmd.get_name(), key = cmd.key(), "发送命令");
        self.send(cmd.into_frame()).await
    }

    /// 获取 key 对应的 value。对应`GET`命令。
    ///
    /// 很大的 value 会分成多个`Fragment::Bulk`片段到达；key 不存在时得到`Fragment::Null`。
    pub async fn get(&self, key: &str) -> crate::Result<ReplyStream> {
        self.execute(Command::Get(Get::new(key))).await
    }

    /// 列出匹配`pattern`的 key，`"*"`匹配所有 key。对应`KEYS`命令。
    pub async fn keys(&self, pattern: &str) -> crate::Result<ReplyStream> {
        self.execute(Command::Keys(Keys::new(pattern))).await
    }

    /// 设置 key-value。对应`SET`命令。
    ///
    /// # Output
    /// 服务器回复`OK`时返回`true`。
    ///
    /// # Errors
    /// value 过大时返回`Error::ValueTooLarge`，此时命令不会被发送。
    pub async fn set(&self, key: &str, value: Bytes) -> crate::Result<bool> {
        let cmd = Set::new(key, value);
        cmd.check()?;
        let mut stream = self.execute(Command::Set(cmd)).await?;
        match first(&mut stream).await? {
            Fragment::Simple(reply) => Ok(reply == "OK"),
            _ => Ok(false),
        }
    }

    /// 删除 key，返回被删除的 key 的个数。对应`DEL`命令。
    pub async fn del(&self, key: &str) -> crate::Result<i64> {
        let mut stream = self.execute(Command::Del(Del::new(key))).await?;
        first(&mut stream).await?.to_integer()
    }

    /// 尝试占有 key。
    ///
    /// 只有 key 不存在时才会把它设置为这个客户端的标记。
    ///
    /// # Output
    /// 原先不存在这个 key（现在被占有了）时返回`true`。
    pub async fn block(&self, key: &str) -> crate::Result<bool> {
        let cmd = Set::new(key, self.token.clone()).if_absent_get();
        let mut stream = self.execute(Command::Set(cmd)).await?;
        Ok(first(&mut stream).await?.is_null())
    }

    /// 释放 key。
    ///
    /// 取出并删除 key，如果原有的值不是这个客户端的标记，
    /// 向`<namespace>:unblock`信道发布这个 key。总是返回`true`。
    pub async fn unblock(&self, key: &str, namespace: &str) -> crate::Result<bool> {
        let stream = self.execute(Command::GetDel(GetDel::new(key))).await?;
        let mut values = Box::pin(stream.values());
        let previous = values.next().await.transpose()?;
        drop(values);

        if previous.as_ref() != Some(&self.token) {
            let channel = format!("{}:unblock", namespace);
            let publish = Publish::new(&channel, Bytes::from(key.to_string()));
            let stream = self.execute(Command::Publish(publish)).await?;
            if let Err(err) = stream.drain_and_close().await {
                warn!(%err, %channel, "发布释放通知失败");
            }
        }
        Ok(true)
    }

    /// 向信道发布信息，返回收到信息的订阅者个数。对应`PUBLISH`命令。
    pub async fn publish(&self, channel: &str, message: Bytes) -> crate::Result<i64> {
        let mut stream = self
            .execute(Command::Publish(Publish::new(channel, message)))
            .await?;
        first(&mut stream).await?.to_integer()
    }

    /// 测试连接。对应`PING`命令。
    ///
    /// # Output
    /// 没有`msg`时返回`PONG`，否则返回相同的信息。
    pub async fn ping(&self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        let stream = self.execute(Command::Ping(Ping::new(msg))).await?;
        let mut values = Box::pin(stream.values());
        values
            .next()
            .await
            .unwrap_or(Err(Error::UnexpectedEndOfStream))
    }

    /// 关闭连接，不会再重连。等待连接任务结束后返回。
    pub async fn close(&self) {
        let _ = self.notify_shutdown.send(());
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == State::Disconnected).await;
    }
}

/// 读取回复的第一个片段。
///
/// # Errors
/// 回复以错误结束时返回这个错误，没有任何片段时返回`Error::UnexpectedEndOfStream`。
async fn first(stream: &mut ReplyStream) -> crate::Result<Fragment> {
    match stream.next().await {
        Some(fragment) => fragment,
        None => Err(Error::UnexpectedEndOfStream),
    }
}
