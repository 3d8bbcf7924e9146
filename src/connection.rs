//! 连接管理。
//!
//! 每个客户端对应一个在后台运行的连接任务，它独占 socket 和`Dispatcher`，
//! 负责建立连接、握手、读写、发现故障以及延时重连。状态的每一次变化都在这个任务里发生，
//! 并通过`watch`信道发布给所有`Client`。

use std::{io, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{mpsc, watch, Notify},
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    codec::encode_command, config::ClientConfig, dispatcher::Dispatcher, stream::ReplySender,
    Error, Shutdown,
};

/// 读缓存的初始容量，不够时会按需增长。
const READ_BUFFER: usize = 16 * 1024;

/// 未开启空闲超时时使用的占位时长。
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

/// 连接的状态。
///
/// `Disconnected → Connecting → Handshaking → Ready`，之后要么因为故障进入
/// `ErrorBackoff`并重新`Connecting`，要么因为主动关闭进入`Closing`，最终`Disconnected`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    ErrorBackoff,
    Closing,
}

/// 一条等待写出的命令，以及接收它的回复的写入端。
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) bytes: Bytes,
    pub(crate) reply: ReplySender,
}

/// `serve()`结束的原因。
enum Exit {
    // 主动关闭，或者所有`Client`都已被丢弃。
    Closed,
    // 连接故障，需要重连。
    Fault(Error),
}

/// 连接任务。
#[derive(Debug)]
pub(crate) struct Connection {
    config: ClientConfig,

    // 所有`Client`共用的命令队列。
    requests: mpsc::UnboundedReceiver<Request>,

    state: watch::Sender<State>,

    shutdown: Shutdown,

    dispatcher: Dispatcher,
}

impl Connection {
    pub(crate) fn new(
        config: ClientConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        state: watch::Sender<State>,
        shutdown: Shutdown,
        progress: Arc<Notify>,
    ) -> Connection {
        let max_parked = config.max_parked_bytes;
        Connection {
            config,
            requests,
            state,
            shutdown,
            dispatcher: Dispatcher::new(progress, max_parked),
        }
    }

    /// 使用一个已经完成握手的 socket 开始工作，直到客户端被关闭。
    pub(crate) async fn run(mut self, mut socket: TcpStream) {
        loop {
            match self.serve(socket).await {
                Exit::Closed => break,
                Exit::Fault(err) => {
                    let dropped = self.dispatcher.reset();
                    warn!(%err, dropped, "连接故障");
                }
            }

            socket = match self.reconnect().await {
                Some(socket) => socket,
                None => break,
            };
        }

        self.dispatcher.reset();
        self.state.send_replace(State::Disconnected);
        info!(addr = %self.config.addr, "连接已关闭");
    }

    /// 等待一段时间后重新连接，失败则继续等待。
    ///
    /// # Output
    /// 如果在等待或连接的过程中客户端被关闭，返回`None`。
    async fn reconnect(&mut self) -> Option<TcpStream> {
        let delay = self.config.reconnect_delay;
        loop {
            if self.shutdown.is_shutdown() {
                return None;
            }

            self.state.send_replace(State::ErrorBackoff);
            info!(?delay, "稍后重新连接");

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = self.shutdown.recv() => return None,
            }

            tokio::select! {
                res = connect(&self.config, &self.state) => match res {
                    Ok(socket) => return Some(socket),
                    Err(err) => warn!(%err, "重新连接失败"),
                },
                _ = self.shutdown.recv() => return None,
            }
        }
    }

    /// 在一个就绪的连接上收发数据，直到连接故障或者被关闭。
    async fn serve(&mut self, socket: TcpStream) -> Exit {
        info!(addr = %self.config.addr, "连接就绪");

        let (mut reader, writer) = socket.into_split();
        // 写入交给单独的任务完成，写出很大的命令时也不会耽误读取回复。
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let mut writer_task = tokio::spawn(write_loop(writer, write_rx));

        let mut buffer = BytesMut::with_capacity(READ_BUFFER);
        let idle_timeout = self.config.idle_timeout;
        let idle = time::sleep(idle_timeout.unwrap_or(FAR_FUTURE));
        tokio::pin!(idle);

        let exit = loop {
            if buffer.capacity() < READ_BUFFER / 4 {
                buffer.reserve(READ_BUFFER);
            }

            tokio::select! {
                _ = self.shutdown.recv() => break Exit::Closed,

                request = self.requests.recv() => {
                    let Some(Request { bytes, reply }) = request else {
                        break Exit::Closed;
                    };
                    // 先登记再写出，保证请求队列的顺序就是写入 socket 的顺序。
                    let id = self.dispatcher.register(reply);
                    debug!(
                        id,
                        len = bytes.len(),
                        pending = self.dispatcher.pending_len(),
                        "写出命令"
                    );
                    if write_tx.send(bytes).is_err() {
                        continue;
                    }
                    touch(idle.as_mut(), idle_timeout);
                    self.dispatcher.drive();
                }

                // 正在接收的回复暂存过多时不再读取，压力通过 TCP 传回服务器。
                res = reader.read_buf(&mut buffer), if !self.dispatcher.is_stalled() => match res {
                    Ok(0) => break Exit::Fault(Error::Connection("服务器关闭了连接".into())),
                    Ok(_) => {
                        self.dispatcher.push_chunk(buffer.split().freeze());
                        touch(idle.as_mut(), idle_timeout);
                        self.dispatcher.drive();
                    }
                    Err(err) => break Exit::Fault(err.into()),
                },

                _ = self.dispatcher.progressed(), if self.dispatcher.has_parked() => {
                    touch(idle.as_mut(), idle_timeout);
                    self.dispatcher.drive();
                }

                res = &mut writer_task => {
                    let err = match res {
                        Ok(Ok(())) => Error::Connection("写入端意外结束".into()),
                        Ok(Err(err)) => err.into(),
                        Err(err) => Error::Connection(err.to_string()),
                    };
                    return Exit::Fault(err);
                }

                _ = &mut idle, if idle_timeout.is_some() => {
                    break Exit::Fault(Error::Connection("连接空闲超时".into()));
                }
            }
        };

        match exit {
            Exit::Closed => {
                self.state.send_replace(State::Closing);
                // 写入端在写完队列中的命令后关闭 socket 的写方向。
                drop(write_tx);
                if let Ok(Err(err)) = writer_task.await {
                    debug!(%err, "关闭连接时写入失败");
                }
            }
            Exit::Fault(_) => writer_task.abort(),
        }
        exit
    }
}

/// 建立连接并完成握手，成功后状态变为`Ready`。
///
/// 握手命令的回复是连接上收到的第一个字节块，它不会交给`Dispatcher`。
///
/// # Errors
/// 连接失败、超时、握手回复为错误时返回`Err`。
pub(crate) async fn connect(
    config: &ClientConfig,
    state: &watch::Sender<State>,
) -> crate::Result<TcpStream> {
    state.send_replace(State::Connecting);
    debug!(addr = %config.addr, "正在连接");

    let establish = async {
        let mut socket = TcpStream::connect(&config.addr).await?;
        state.send_replace(State::Handshaking);

        if let Some(handshake) = &config.handshake {
            socket.write_all(&encode_command(handshake.as_slice())).await?;

            let mut reply = BytesMut::with_capacity(1024);
            if socket.read_buf(&mut reply).await? == 0 {
                return Err(Error::Connection("握手时连接被关闭".into()));
            }
            if reply[0] == b'-' {
                let end = reply
                    .windows(2)
                    .position(|w| w == b"\r\n")
                    .unwrap_or(reply.len());
                return Err(Error::Handshake(reply.split_to(end).freeze().slice(1..)));
            }
            debug!(len = reply.len(), "握手完成");
        }
        Ok::<_, Error>(socket)
    };

    let socket = match time::timeout(config.connect_timeout, establish).await {
        Ok(res) => res?,
        Err(_) => return Err(Error::Connection("连接超时".into())),
    };
    state.send_replace(State::Ready);
    Ok(socket)
}

/// 依次写出队列中的命令。队列暂时为空时才刷新缓存，连续的命令合并为一次系统调用。
async fn write_loop(
    writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Bytes>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);
    while let Some(bytes) = commands.recv().await {
        writer.write_all(&bytes).await?;
        while let Ok(bytes) = commands.try_recv() {
            writer.write_all(&bytes).await?;
        }
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// 有读写活动，推迟空闲超时。
fn touch(idle: std::pin::Pin<&mut time::Sleep>, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        idle.reset(Instant::now() + timeout);
    }
}
