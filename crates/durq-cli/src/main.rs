use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::info;
use tracing_subscriber::EnvFilter;

use durq_core::config::{QueueOptions, Timeouts};
use durq_core::domain::QueueEvent;
use durq_core::impls::{ChannelSink, InMemoryBackend, TokioClock};
use durq_core::ports::{Clock, StorageBackend};
use durq_core::queue::{Done, Queue};

/// Runs two instances of one queue against a shared store. The first one
/// hangs and is abandoned; the second reclaims and finishes its work.
#[derive(Parser)]
#[command(name = "durq", about = "Durable queue reclaim demo")]
struct Cli {
    /// Queue name shared by both instances
    #[arg(long, default_value = "demo")]
    queue: String,
    /// Number of items to enqueue on the abandoned instance
    #[arg(long, default_value_t = 5)]
    items: usize,
    /// TOML file with queue options (defaults to short demo timings)
    #[arg(long)]
    config: Option<PathBuf>,
    /// How many times each item fails before succeeding
    #[arg(long, default_value_t = 1)]
    fail_first: u32,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

/// Timings short enough to watch a reclaim happen within a few seconds.
fn demo_options() -> QueueOptions {
    QueueOptions {
        base_delay: Duration::from_millis(200),
        timeouts: Timeouts {
            ack_timer: Duration::from_millis(200),
            reclaim_timer: Duration::from_millis(500),
            reclaim_timeout: Duration::from_millis(2_000),
            reclaim_wait: Duration::from_millis(100),
            max_queue_delay: Duration::from_millis(5_000),
        },
        ..QueueOptions::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).compact().init();

    let cli = Cli::parse();
    let options = match &cli.config {
        Some(path) => QueueOptions::load(path)
            .with_context(|| format!("failed to load queue options from {}", path.display()))?,
        None => demo_options(),
    };

    // (A) 共有ストアと時計を用意
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::try_current()?);

    // (B) インスタンス A：取り出したアイテムを完了しないまま止まる
    let abandoned = Queue::builder(&cli.queue, |item: Greeting, _done: Done<Greeting>| {
        info!(name = %item.name, "instance A picked up an item and hung");
    })
    .backend(Arc::clone(&backend))
    .clock(Arc::clone(&clock))
    .options(options.clone())
    .build()
    .context("failed to build instance A")?;

    abandoned.start();
    for n in 0..cli.items {
        abandoned.add_item_with_id(
            Greeting {
                name: format!("durq-{n}"),
            },
            format!("greeting-{n}"),
        );
    }
    info!(instance = %abandoned.id(), counts = ?abandoned.counts(), "instance A crashed");
    drop(abandoned);

    // (C) インスタンス B：非同期に処理し、最初の数回はわざと失敗する
    let fail_first = cli.fail_first;
    let (sink, mut events) = ChannelSink::channel();
    let survivor = Queue::builder(&cli.queue, move |item: Greeting, done: Done<Greeting>| {
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let attempt = done.attempt_number();
            if attempt < fail_first {
                done.fail(format!("intentional failure (attempt={attempt})"));
            } else {
                println!("Hello, {}!", item.name);
                done.success();
            }
        });
    })
    .backend(Arc::clone(&backend))
    .clock(Arc::clone(&clock))
    .options(options)
    .subscribe(sink)
    .build()
    .context("failed to build instance B")?;

    survivor.start();
    for (peer, liveness) in survivor.peers() {
        info!(%peer, ?liveness, "peer");
    }

    // (D) 全アイテムが片付くまでイベントを待つ
    let deadline = Instant::now() + Duration::from_secs(cli.deadline_secs);
    let mut finished = 0;
    while finished < cli.items {
        let event = match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => bail!(
                "deadline passed with {finished}/{} items finished (counts: {:?})",
                cli.items,
                survivor.counts()
            ),
        };
        match event {
            QueueEvent::Processed {
                error: Some(error),
                item,
                ..
            } => println!("failed: {} ({error})", item.name),
            QueueEvent::Processed { item, .. } => {
                finished += 1;
                println!("processed: {}", item.name);
            }
            QueueEvent::Discard {
                item,
                attempt_number,
            } => {
                finished += 1;
                println!("discarded: {} after {attempt_number} attempts", item.name);
            }
            QueueEvent::Overflow { item, .. } => {
                finished += 1;
                println!("overflowed: {}", item.name);
            }
        }
    }

    // (E) 後片付け
    println!("counts: {:?}", survivor.counts());
    survivor.stop();
    Ok(())
}
