use std::{num::NonZeroU64, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    clap::Args,
    inlet_config::{BrokerKind, InletConfig},
    inlet_receiver::{
        Envelope, MessageHandler, PipelineRunner, PipelineStatsSnapshot,
        memory::{MemoryBroker, MemoryLink},
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

/// Handler used by `inlet run`: logs each message and accepts it.
struct LogHandler;

#[async_trait]
impl MessageHandler<MemoryLink> for LogHandler {
    async fn handle(&self, envelope: &Envelope<MemoryLink>) -> Result<()> {
        let message = envelope.message();
        info!(
            id = message.id,
            bytes = message.body.len(),
            delivery_count = message.delivery_count,
            "message received"
        );
        envelope.accept().await?;
        Ok(())
    }
}

#[cfg(feature = "rabbitmq")]
#[async_trait]
impl MessageHandler<inlet_receiver::rabbitmq::RabbitMqLink> for LogHandler {
    async fn handle(
        &self,
        envelope: &Envelope<inlet_receiver::rabbitmq::RabbitMqLink>,
    ) -> Result<()> {
        let message = envelope.message();
        info!(
            delivery_tag = message.delivery_tag,
            routing_key = %message.routing_key,
            bytes = message.body.len(),
            redelivered = message.redelivered,
            "message received"
        );
        envelope.accept().await?;
        Ok(())
    }
}

pub async fn run(config: InletConfig, cancel: CancellationToken) -> Result<()> {
    let snapshot = match config.broker.kind {
        BrokerKind::Memory => {
            warn!("memory broker has no producers outside this process; try `inlet simulate`");
            let runner = PipelineRunner::new(Arc::new(MemoryBroker::new()), config.receiver);
            runner.run(LogHandler, cancel).await?
        },
        BrokerKind::Rabbitmq => run_rabbitmq(config, cancel).await?,
    };
    print_summary(&snapshot);
    Ok(())
}

#[cfg(feature = "rabbitmq")]
async fn run_rabbitmq(config: InletConfig, cancel: CancellationToken) -> Result<PipelineStatsSnapshot> {
    use inlet_receiver::rabbitmq::RabbitMqClient;

    // Fail on bad receiver settings before dialing the broker.
    config.receiver.check()?;
    let uri = config
        .broker
        .uri
        .as_ref()
        .context("broker.uri is required for the rabbitmq broker (or set INLET_BROKER_URI)")?;
    let prefetch = config
        .broker
        .effective_prefetch(config.receiver.max_concurrency);
    let client = RabbitMqClient::connect(uri, prefetch).await?;
    let runner = PipelineRunner::new(Arc::new(client), config.receiver);
    Ok(runner.run(LogHandler, cancel).await?)
}

#[cfg(not(feature = "rabbitmq"))]
async fn run_rabbitmq(
    _config: InletConfig,
    _cancel: CancellationToken,
) -> Result<PipelineStatsSnapshot> {
    anyhow::bail!("this build has no RabbitMQ support; rebuild with `--features rabbitmq`")
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of messages to publish before starting.
    #[arg(long, default_value_t = 20)]
    pub messages: u64,
    /// Fail the first delivery of every Nth message; it is redelivered and
    /// succeeds on the next attempt.
    #[arg(long)]
    pub fail_every: Option<NonZeroU64>,
    /// Receive failures to inject, exercising reconnect backoff.
    #[arg(long, default_value_t = 0)]
    pub link_failures: u32,
    /// Simulated processing time per message.
    #[arg(long, default_value_t = 50)]
    pub handler_delay_ms: u64,
}

/// Handler used by `inlet simulate`.
struct SimulatedHandler {
    fail_every: Option<NonZeroU64>,
    delay: Duration,
}

#[async_trait]
impl MessageHandler<MemoryLink> for SimulatedHandler {
    async fn handle(&self, envelope: &Envelope<MemoryLink>) -> Result<()> {
        let message = envelope.message();
        tokio::time::sleep(self.delay).await;

        let fail = self
            .fail_every
            .is_some_and(|every| message.id % every.get() == 0 && message.delivery_count == 1);
        if fail {
            envelope.redeliver().await?;
            anyhow::bail!("simulated failure for message {}", message.id);
        }

        envelope.accept().await?;
        info!(id = message.id, delivery_count = message.delivery_count, "message processed");
        Ok(())
    }
}

/// Run the pipeline against an in-process broker until every published
/// message has been accepted, or until interrupted.
pub async fn simulate(config: InletConfig, args: SimulateArgs, cancel: CancellationToken) -> Result<()> {
    let mut receiver = config.receiver;
    if receiver.name.trim().is_empty() {
        receiver.name = "inlet-simulator".into();
    }
    if receiver.address.trim().is_empty() {
        receiver.address = "simulated".into();
    }

    let broker = MemoryBroker::new();
    for i in 0..args.messages {
        broker.publish(&receiver.address, format!("simulated message {i}"));
    }
    broker.fail_next_receives(args.link_failures);
    info!(
        messages = args.messages,
        address = %receiver.address,
        max_concurrency = receiver.max_concurrency,
        "published simulated messages"
    );

    let watcher = tokio::spawn(cancel_when_drained(
        broker.clone(),
        args.messages,
        cancel.clone(),
    ));

    let runner = PipelineRunner::new(Arc::new(broker.clone()), receiver);
    let handler = SimulatedHandler {
        fail_every: args.fail_every,
        delay: Duration::from_millis(args.handler_delay_ms),
    };
    let result = runner.run(handler, cancel.clone()).await;
    cancel.cancel();
    watcher.await.context("simulation watcher task failed")?;
    let snapshot = result?;

    print_summary(&snapshot);
    println!("  accepted:         {}", broker.accepted().len());
    println!("  redelivered:      {}", broker.redelivered().len());
    Ok(())
}

async fn cancel_when_drained(broker: MemoryBroker, expected: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = interval.tick() => {
                if broker.accepted().len() as u64 >= expected {
                    info!("all simulated messages accepted, shutting down");
                    cancel.cancel();
                    return;
                }
            },
        }
    }
}

fn print_summary(snapshot: &PipelineStatsSnapshot) {
    println!("Pipeline summary");
    println!("  received:         {}", snapshot.received);
    println!("  handled:          {}", snapshot.handled);
    println!("  handler failures: {}", snapshot.handler_failures);
    println!("  links opened:     {}", snapshot.links_opened);
    println!("  connect failures: {}", snapshot.connect_failures);
    println!("  link failures:    {}", snapshot.link_failures);
    println!("  peak relay depth: {}", snapshot.peak_relay_depth);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn simulation_accepts_every_message() {
        let mut config = InletConfig::default();
        config.receiver.max_concurrency = 3;
        let args = SimulateArgs {
            messages: 12,
            fail_every: NonZeroU64::new(4),
            link_failures: 1,
            handler_delay_ms: 5,
        };
        simulate(config, args, CancellationToken::new())
            .await
            .unwrap();
    }
}
