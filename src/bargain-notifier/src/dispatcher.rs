//! Dispatch coordination: ordering, eligibility, dedup and rate-limited
//! delivery of bargain candidates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::images::ImageLookup;
use crate::message::MessageComposer;
use crate::models::BargainCandidate;
use crate::rotation::{RotationState, StateStore};
use crate::transport::{MessageContent, MessageHandle, Notifier};

/// Delivery pacing and retry settings.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Wait between two successful posts
    pub message_interval: Duration,
    pub post_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

/// Outcome counters of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub eligible: usize,
    pub already_sent: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct DispatchCoordinator {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn StateStore>,
    composer: MessageComposer,
    images: Option<Arc<dyn ImageLookup>>,
    /// Family priority, highest first
    family_order: Vec<String>,
    /// Branch priority, highest first
    branch_order: Vec<String>,
    settings: DispatchSettings,
}

impl DispatchCoordinator {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn StateStore>,
        composer: MessageComposer,
        family_order: Vec<String>,
        branch_order: Vec<String>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            notifier,
            store,
            composer,
            images: None,
            family_order,
            branch_order,
            settings,
        }
    }

    /// Attach product images to outgoing messages.
    pub fn with_images(mut self, images: Arc<dyn ImageLookup>) -> Self {
        self.images = Some(images);
        self
    }

    /// Sort by (family priority, branch priority, price). Unknown
    /// families and branches sort last; the sort is stable.
    pub fn order_candidates(&self, candidates: &mut [BargainCandidate]) {
        candidates.sort_by_key(|c| {
            (
                priority(&self.family_order, c.listing.family.as_deref()),
                priority(&self.branch_order, Some(c.branch())),
                c.price(),
            )
        });
    }

    /// Deliver today's pending candidates.
    ///
    /// `state` is persisted after every successful post and once more
    /// when the pass completes. A failed post leaves the SKU unmarked.
    /// A failed save aborts the pass. The message interval separates a
    /// successful post from the next attempt.
    pub async fn dispatch(
        &self,
        mut candidates: Vec<BargainCandidate>,
        eligible: &[String],
        state: &mut RotationState,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if state.cycle_complete_today {
            info!("[DISPATCH] Cycle already complete today; skipping");
            return Ok(report);
        }

        let eligible: HashSet<&str> = eligible.iter().map(String::as_str).collect();
        candidates.retain(|c| eligible.contains(c.branch()));
        report.eligible = candidates.len();
        self.order_candidates(&mut candidates);

        let mut pause_before_next = false;
        for candidate in &candidates {
            if state.is_sent(candidate.sku()) {
                report.already_sent += 1;
                continue;
            }

            if pause_before_next && !self.settings.message_interval.is_zero() {
                sleep(self.settings.message_interval).await;
            }

            match self.send(candidate).await {
                Ok(handle) => {
                    state.mark_sent(candidate.sku());
                    self.store.save(state)?;
                    report.sent += 1;
                    pause_before_next = true;
                    info!(
                        "[DISPATCH] Sent {} {} ({}) at {} for ${} | ts={}",
                        candidate.listing.brand,
                        candidate.listing.model,
                        candidate.sku(),
                        candidate.branch(),
                        candidate.price(),
                        handle.ts
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    pause_before_next = false;
                    error!("[DISPATCH] Giving up on {}: {}", candidate.sku(), e);
                }
            }
        }

        state.complete_cycle();
        self.store.save(state)?;

        Ok(report)
    }

    /// Remove a previously posted message.
    pub async fn retract(&self, handle: &MessageHandle) -> Result<()> {
        self.notifier.delete(handle).await?;
        info!(
            "[DISPATCH] Retracted message {} from {}",
            handle.ts, handle.channel
        );
        Ok(())
    }

    /// Post, then rewrite the message with its own handle embedded in the
    /// action buttons.
    async fn send(&self, candidate: &BargainCandidate) -> Result<MessageHandle> {
        let image = match &self.images {
            Some(images) => images.first_image(candidate.sku()).await,
            None => None,
        };

        let draft = self.composer.compose(candidate, None, image.as_deref());
        let handle = self.post_with_retry(&draft).await?;

        let content = self
            .composer
            .compose(candidate, Some(&handle), image.as_deref());
        if let Err(e) = self.notifier.update(&handle, &content).await {
            warn!(
                "[DISPATCH] Posted {} but could not update buttons: {}",
                candidate.sku(),
                e
            );
        }

        Ok(handle)
    }

    async fn post_with_retry(&self, content: &MessageContent) -> Result<MessageHandle> {
        let mut delay = self.settings.retry_initial_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.notifier.post(content).await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    if attempts >= self.settings.post_attempts {
                        return Err(e);
                    }

                    warn!(
                        "[DISPATCH] Post attempt {} failed: {}. Retrying in {:?}",
                        attempts, e, delay
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }

                    // Exponential backoff with cap
                    delay = std::cmp::min(delay * 2, self.settings.retry_max_delay);
                }
            }
        }
    }
}

fn priority(order: &[String], value: Option<&str>) -> usize {
    value
        .and_then(|v| {
            order
                .iter()
                .position(|o| o.trim().eq_ignore_ascii_case(v.trim()))
        })
        .unwrap_or(usize::MAX)
}
