use std::{convert::Infallible, str, time::Duration};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use resp_pipe::{Client, ClientConfig, Frame, DEFAULT_PORT};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "resp-pipe-cli",
    version,
    author,
    about = "一个流水线式的 RESP 客户端"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
    #[arg(name = "hostname", long, default_value = "127.0.0.1")]
    // default_value 接受一个参数 default，类型为 &str
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    // default_value_t 类似，参数类型为 &str，但是他会尝试转换为指定类型
    port: u16,
    /// 连接故障后等待多少秒重连。
    #[arg(long, default_value_t = 30)]
    reconnect_delay: u64,
    /// 不发送握手命令。
    #[arg(long)]
    no_handshake: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    Get {
        key: String,
    },
    Set {
        key: String,
        // clap 从命令行自动获取的`&str`无法自动转换为`Bytes`，
        // 所以我们要提供一个解析器。
        #[arg(value_parser = bytes_from_str)]
        value: Bytes,
    },
    Del {
        key: String,
    },
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },
    Ping {
        #[arg(value_parser = bytes_from_str)]
        msg: Option<Bytes>,
    },
    Publish {
        channel: String,
        #[arg(value_parser = bytes_from_str)]
        message: Bytes,
    },
    Block {
        key: String,
    },
    Unblock {
        key: String,
        #[arg(default_value = "")]
        namespace: String,
    },
}

// `Infallible`表示永远不会错误
fn bytes_from_str(src: &str) -> Result<Bytes, Infallible> {
    Ok(Bytes::from(src.to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> resp_pipe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // 获取命令行参数。
    let args = Args::parse();
    let mut config = ClientConfig::new(format!("{}:{}", args.host, args.port));
    config.reconnect_delay = Duration::from_secs(args.reconnect_delay);
    if args.no_handshake {
        config.handshake = None;
    }

    // 连接服务端。
    let client = Client::with_config(config).await?;
    // 执行命令，解析响应。
    match args.command {
        Command::Get { key } => {
            let fragments = client.get(&key).await?.drain_and_close().await?;
            for frame in Frame::assemble(fragments)? {
                print_frame(&frame);
            }
        }
        Command::Set { key, value } => {
            if client.set(&key, value).await? {
                println!("OK");
            } else {
                println!("(not set)");
            }
        }
        Command::Del { key } => {
            println!("(integer) {}", client.del(&key).await?);
        }
        Command::Keys { pattern } => {
            let mut keys = Box::pin(client.keys(&pattern).await?.values());
            let mut count = 0;
            while let Some(key) = keys.next().await {
                count += 1;
                println!("{}) {}", count, quote(&key?));
            }
            if count == 0 {
                println!("(empty array)");
            }
        }
        Command::Ping { msg } => {
            let msg = client.ping(msg).await?;
            println!("{}", quote(&msg));
        }
        Command::Publish { channel, message } => {
            let receivers = client.publish(&channel, message).await?;
            println!("(integer) {}", receivers);
        }
        Command::Block { key } => {
            println!("{}", client.block(&key).await?);
        }
        Command::Unblock { key, namespace } => {
            println!("{}", client.unblock(&key, &namespace).await?);
        }
    }

    client.close().await;
    Ok(())
}

fn print_frame(frame: &Frame) {
    match frame {
        Frame::Bulk(value) | Frame::Simple(value) => println!("{}", quote(value)),
        Frame::Null => println!("(nil)"),
        other => println!("{}", other),
    }
}

fn quote(value: &Bytes) -> String {
    match str::from_utf8(value) {
        Ok(string) => format!("\"{}\"", string),
        Err(_) => format!("{:?}", value),
    }
}
