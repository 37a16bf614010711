//! Poll driver: the task that turns upstream polling into feed fan-out.
//!
//! One periodic task refreshes head state, detects height changes, and
//! broadcasts to subscribed feeds. Derived artifacts (header, block,
//! operations) are fetched only when their feed has at least one
//! subscriber. An independent probe task keeps the pool honest with a
//! cheap uncached head call.

use crate::client::ClientRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{Feed, ServerMessage};
use crate::reader::{head_block_number, ChainReader};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct PollDriver {
    reader: Arc<ChainReader>,
    registry: Arc<ClientRegistry>,
    poll_interval: Duration,
    probe_interval: Duration,
    client_idle_timeout: Duration,
}

impl PollDriver {
    pub fn new(reader: Arc<ChainReader>, registry: Arc<ClientRegistry>, config: &Config) -> Self {
        Self {
            reader,
            registry,
            poll_interval: config.poll_interval,
            probe_interval: config.probe_interval,
            client_idle_timeout: config.client_idle_timeout,
        }
    }

    /// Fixed-period head refresh and fan-out. Runs until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_head: Option<u64> = None;
        let mut last_witnesses: Option<Value> = None;

        info!("poll driver running");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("poll driver stopping");
                    break;
                }

                _ = tick.tick() => {
                    if let Err(err) = self.poll_once(&mut last_head, &mut last_witnesses).await {
                        warn!(error = %err, "head refresh failed, rotating endpoint");
                        self.reader.pool().failover();
                    }
                }
            }
        }
    }

    async fn poll_once(
        &self,
        last_head: &mut Option<u64>,
        last_witnesses: &mut Option<Value>,
    ) -> Result<()> {
        let props = self.reader.dynamic_global_properties().await?;

        let Some(height) = head_block_number(&props) else {
            warn!("head state payload missing head_block_number");
            return Ok(());
        };

        if last_head.map_or(true, |h| height != h) {
            *last_head = Some(height);
            counter!("gateway_head_advances_total").increment(1);
            debug!(height, "head advanced");
            self.fan_out_head(&props, height).await;
        }

        self.check_witnesses(last_witnesses).await;
        Ok(())
    }

    /// Broadcast one head change. Subscribers of each feed get a
    /// subscription update; everyone else gets the legacy frame, so a
    /// session sees exactly one message per change.
    async fn fan_out_head(&self, props: &Value, height: u64) {
        self.registry.broadcast_to(
            Feed::GlobalProperties,
            &ServerMessage::subscription_update(Feed::GlobalProperties, props.clone()),
        );

        if self.registry.has_subscribers(Feed::BlockHeaders) {
            match self.reader.block_header(height).await {
                Ok(header) => {
                    self.registry.broadcast_to(
                        Feed::BlockHeaders,
                        &ServerMessage::subscription_update(Feed::BlockHeaders, header),
                    );
                }
                Err(err) => warn!(height, error = %err, "block header fetch failed"),
            }
        }

        if self.registry.has_subscribers(Feed::Blocks) {
            match self.reader.block(height).await {
                Ok(block) => {
                    self.registry.broadcast_to(
                        Feed::Blocks,
                        &ServerMessage::subscription_update(Feed::Blocks, block),
                    );
                }
                Err(err) => warn!(height, error = %err, "block fetch failed"),
            }
        }

        if self.registry.has_subscribers(Feed::Operations) {
            match self.reader.ops_in_block(height, false).await {
                Ok(ops) => {
                    self.registry.broadcast_to(
                        Feed::Operations,
                        &ServerMessage::subscription_update(Feed::Operations, ops),
                    );
                }
                Err(err) => warn!(height, error = %err, "operations fetch failed"),
            }
        }

        self.registry.broadcast_to_unsubscribed(
            Feed::GlobalProperties,
            &ServerMessage::legacy_broadcast(props.clone()),
        );
    }

    /// Witness changes are detected by value comparison against the
    /// last broadcast list; the TTL on the witness slot bounds how often
    /// this actually reaches upstream.
    async fn check_witnesses(&self, last: &mut Option<Value>) {
        if !self.registry.has_subscribers(Feed::Witnesses) {
            return;
        }

        match self.reader.active_witnesses().await {
            Ok(list) => {
                if last.as_ref() != Some(&list) {
                    *last = Some(list.clone());
                    counter!("gateway_witness_changes_total").increment(1);
                    self.registry.broadcast_to(
                        Feed::Witnesses,
                        &ServerMessage::subscription_update(Feed::Witnesses, list),
                    );
                }
            }
            Err(err) => debug!(error = %err, "witness refresh failed"),
        }
    }

    /// Independent health probe. One cheap head call per period; a
    /// failure forces a failover so the next real request starts on a
    /// different endpoint. The stale-session sweep shares this cadence.
    pub async fn run_probe(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.probe_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let max_idle_ms = self.client_idle_timeout.as_millis() as i64;

        info!("health probe running");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("health probe stopping");
                    break;
                }

                _ = tick.tick() => {
                    if let Err(err) = self.reader.probe_head().await {
                        warn!(error = %err, "health probe failed, forcing failover");
                        self.reader.pool().failover();
                    }
                    let swept = self.registry.sweep_stale(max_idle_ms);
                    if swept > 0 {
                        info!(swept, "swept idle sessions");
                    }
                }
            }
        }
    }
}
