use tokio::sync::broadcast;

/// 侦听关闭信号。
///
/// `Shutdown`封装了一个`broadcast::Receiver`。调用`Client::close()`会发送关闭信号；
/// 所有`Client`都被丢弃后，广播的发送端也随之被丢弃，接收端同样会结束等待。
#[derive(Debug)]
pub(crate) struct Shutdown {
    // 接收关闭信息。
    notify: broadcast::Receiver<()>,

    // 如果接收到了关闭信号，这个值就为`true`。
    // 连接任务在多个地方等待关闭信号，收到一次之后再等待应当立即返回。
    is_shutdown: bool,
}

impl Shutdown {
    /// 封装广播接收端，返回创建的`Shutdown`。
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            notify,
            is_shutdown: false,
        }
    }

    /// 如果接收到了关闭信号，返回`true`。
    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// 等待接收关闭信号。
    /// 如果接收到关闭信号，设置`is_shutdown`字段为`true`。
    pub(crate) async fn recv(&mut self) {
        // 如果已经接受过关闭信号，直接返回
        if self.is_shutdown {
            return;
        }

        // 收到信号或者发送端全部被丢弃，这个 async 函数都会执行结束。
        let _ = self.notify.recv().await;

        self.is_shutdown = true;
    }
}
