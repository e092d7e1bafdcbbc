//! Poll loop: list unread inbox messages, reply to the unreplied ones, archive them
//!
//! One cycle runs to completion before the next is scheduled. Messages within
//! a cycle are handled strictly one after another, and each reply is sent
//! before its message is relabeled. Relabeling (target label added, INBOX
//! removed) is what keeps a message out of later list results, so no local
//! record of processed ids is kept.

use lettre::message::Mailbox;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::GmailClient;
use crate::composer::compose_reply;
use crate::config::{Config, PollConfig};
use crate::detector::has_replied;
use crate::error::{GmailError, Result};
use crate::label_manager::LabelManager;
use crate::models::{CycleReport, MessageOutcome, ProcessingStage, INBOX_LABEL};

/// Random delay between cycles, in whole seconds within `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    min_secs: u64,
    max_secs: u64,
}

impl PollSchedule {
    /// Bounds are inclusive; they are swapped if given in the wrong order
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs: min_secs.min(max_secs),
            max_secs: min_secs.max(max_secs),
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(config.min_interval_secs, config.max_interval_secs)
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.min_secs),
            Duration::from_secs(self.max_secs),
        )
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(self.min_secs..=self.max_secs))
    }

    pub fn next_delay(&self) -> Duration {
        self.sample(&mut rand::thread_rng())
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Listing,
    Processing,
    Sleeping,
}

/// A per-message step that failed
#[derive(Debug)]
struct StageFailure {
    stage: ProcessingStage,
    error: GmailError,
}

impl StageFailure {
    fn at(stage: ProcessingStage) -> impl FnOnce(GmailError) -> Self {
        move |error| Self { stage, error }
    }
}

/// Bound a Gmail call; a timeout becomes a transient `NetworkError`
pub(crate) async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Gmail API {} call timed out after {:?}", operation, limit);
            Err(GmailError::NetworkError(format!(
                "{} timed out after {:?}",
                operation, limit
            )))
        }
    }
}

/// Delay before the next cycle: the sampled delay, stretched to honor a rate limit
pub fn delay_after(report: &CycleReport, sampled: Duration) -> Duration {
    match report.rate_limited_for {
        Some(secs) => sampled.max(Duration::from_secs(secs)),
        None => sampled,
    }
}

/// Single worker driving the auto-reply cycles for one account
pub struct Poller {
    client: Arc<dyn GmailClient>,
    label_id: String,
    sender: Mailbox,
    schedule: PollSchedule,
    call_timeout: Duration,
    state: PollState,
}

impl Poller {
    pub fn new(
        client: Arc<dyn GmailClient>,
        label_id: String,
        sender: Mailbox,
        schedule: PollSchedule,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            label_id,
            sender,
            schedule,
            call_timeout,
            state: PollState::Idle,
        }
    }

    /// Resolve the target label and the account address, then build a poller
    /// from configuration.
    ///
    /// Either failure is fatal for startup and is returned as is. Both lookups
    /// are bounded by the configured call timeout.
    pub async fn initialize(client: Arc<dyn GmailClient>, config: &Config) -> Result<Self> {
        let call_timeout = config.poll.call_timeout();

        let mut labels = LabelManager::new(Arc::clone(&client)).with_call_timeout(call_timeout);
        let label_id = labels.ensure_label(&config.label.name).await?;
        info!("Label {} resolved to {}", config.label.name, label_id);

        let address =
            with_timeout(call_timeout, "get profile", client.get_profile_address()).await?;
        let sender = address.parse::<Mailbox>().map_err(|e| {
            GmailError::AuthError(format!("Account address {:?} is not usable: {}", address, e))
        })?;
        info!("Replying as {}", address);

        Ok(Self::new(
            client,
            label_id,
            sender,
            PollSchedule::from_config(&config.poll),
            call_timeout,
        ))
    }

    pub fn label_id(&self) -> &str {
        &self.label_id
    }

    pub fn sender(&self) -> &Mailbox {
        &self.sender
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Run cycles forever, sleeping a fresh random delay after each one
    pub async fn run(mut self) {
        let (min, max) = self.schedule.bounds();
        info!(
            "Auto-reply loop started, polling every {:?}-{:?} into label {}",
            min, max, self.label_id
        );

        loop {
            let report = self.run_cycle().await;
            let delay = delay_after(&report, self.schedule.next_delay());

            self.state = PollState::Sleeping;
            debug!("Next cycle in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// One cycle: list, then fetch/detect/reply/relabel each message in order.
    ///
    /// Never fails; problems are logged and counted in the report.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new();
        let span = info_span!("cycle", cycle_id = %report.cycle_id);

        self.cycle(&mut report).instrument(span).await;
        self.state = PollState::Idle;

        info!(
            listed = report.listed,
            replied = report.replied,
            already_replied = report.already_replied,
            failed = report.failed,
            "Cycle complete"
        );
        report
    }

    async fn cycle(&mut self, report: &mut CycleReport) {
        self.state = PollState::Listing;
        let ids = match with_timeout(
            self.call_timeout,
            "list",
            self.client.list_unread_inbox_ids(),
        )
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to list unread messages: {}", e);
                report.rate_limited_for = e.retry_after();
                return;
            }
        };

        report.listed = ids.len();
        info!("Found {} unread inbox messages", ids.len());

        self.state = PollState::Processing;
        for id in &ids {
            let outcome = match self.process_message(id).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    warn!(
                        message_id = %id,
                        stage = ?failure.stage,
                        "Skipping message: {}",
                        failure.error
                    );
                    let retry_after = failure.error.retry_after();
                    report.record(&MessageOutcome::Failed {
                        stage: failure.stage,
                        error: failure.error.to_string(),
                    });

                    if let Some(secs) = retry_after {
                        warn!("Rate limited, abandoning the rest of this cycle for {}s", secs);
                        report.rate_limited_for = Some(secs);
                        break;
                    }
                    continue;
                }
            };
            report.record(&outcome);
        }
    }

    async fn process_message(&self, id: &str) -> std::result::Result<MessageOutcome, StageFailure> {
        let message = with_timeout(self.call_timeout, "get", self.client.get_message(id))
            .await
            .map_err(StageFailure::at(ProcessingStage::Fetch))?;

        if has_replied(&message) {
            debug!(message_id = %id, "Already part of a reply thread, leaving it alone");
            return Ok(MessageOutcome::AlreadyReplied);
        }

        let reply = compose_reply(&message, &self.sender)
            .map_err(StageFailure::at(ProcessingStage::Compose))?;

        let sent_id = with_timeout(
            self.call_timeout,
            "send",
            self.client.send_raw_message(&reply),
        )
        .await
        .map_err(StageFailure::at(ProcessingStage::Send))?;
        info!(message_id = %id, sent_id = %sent_id, "Sent auto-reply");

        let add = [self.label_id.clone()];
        let remove = [INBOX_LABEL.to_string()];
        with_timeout(
            self.call_timeout,
            "modify",
            self.client.modify_labels(id, &add, &remove),
        )
        .await
        .map_err(|e| {
            error!(
                message_id = %id,
                "Reply sent but message was not moved; it may be answered again next cycle"
            );
            StageFailure::at(ProcessingStage::Relabel)(e)
        })?;

        debug!(message_id = %id, label_id = %self.label_id, "Moved message out of inbox");
        Ok(MessageOutcome::Replied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Header, Label, LabelVisibility, Message, RawReply};
    use async_trait::async_trait;
    use mockall::Sequence;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    mockall::mock! {
        pub TestGmailClient {}

        #[async_trait]
        impl GmailClient for TestGmailClient {
            async fn list_unread_inbox_ids(&self) -> Result<Vec<String>>;
            async fn get_message(&self, id: &str) -> Result<Message>;
            async fn send_raw_message(&self, reply: &RawReply) -> Result<String>;
            async fn modify_labels(&self, message_id: &str, add_label_ids: &[String], remove_label_ids: &[String]) -> Result<()>;
            async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String>;
            async fn list_labels(&self) -> Result<Vec<Label>>;
            async fn get_profile_address(&self) -> Result<String>;
        }
    }

    fn message(id: &str, headers: &[(&str, &str)]) -> Message {
        Message {
            id: id.to_string(),
            thread_id: Some(format!("thread_{}", id)),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
            headers: headers.iter().map(|(n, v)| Header::new(*n, *v)).collect(),
        }
    }

    fn sender() -> Mailbox {
        "me@example.com".parse().unwrap()
    }

    fn poller(mock: MockTestGmailClient) -> Poller {
        Poller::new(
            Arc::new(mock),
            "Label_1".to_string(),
            sender(),
            PollSchedule::default(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_schedule_default_bounds() {
        let (min, max) = PollSchedule::default().bounds();
        assert_eq!(min, Duration::from_secs(45));
        assert_eq!(max, Duration::from_secs(120));
    }

    #[test]
    fn test_schedule_samples_stay_in_bounds() {
        let schedule = PollSchedule::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen_min = false;
        let mut seen_max = false;

        for _ in 0..10_000 {
            let millis = schedule.sample(&mut rng).as_millis();
            assert!((45_000..=120_000).contains(&millis), "{} out of range", millis);
            assert_eq!(millis % 1000, 0);
            seen_min |= millis == 45_000;
            seen_max |= millis == 120_000;
        }

        // 76 equally likely values over 10k draws: both ends show up
        assert!(seen_min && seen_max);
    }

    #[test]
    fn test_schedule_samples_are_uniform_over_whole_seconds() {
        let schedule = PollSchedule::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut buckets = [0u32; 76];

        for _ in 0..10_000 {
            let secs = schedule.sample(&mut rng).as_secs();
            buckets[(secs - 45) as usize] += 1;
        }

        // 10000 / 76 is about 131.6 per second; allow half of that either way
        for (offset, count) in buckets.iter().enumerate() {
            assert!(
                (66..=197).contains(count),
                "{}s drawn {} times",
                45 + offset,
                count
            );
        }
    }

    #[test]
    fn test_schedule_swaps_inverted_bounds() {
        let schedule = PollSchedule::new(120, 45);
        assert_eq!(schedule, PollSchedule::new(45, 120));
    }

    #[test]
    fn test_delay_after_rate_limit() {
        let mut report = CycleReport::new();
        let sampled = Duration::from_secs(60);
        assert_eq!(delay_after(&report, sampled), sampled);

        report.rate_limited_for = Some(300);
        assert_eq!(delay_after(&report, sampled), Duration::from_secs(300));

        report.rate_limited_for = Some(5);
        assert_eq!(delay_after(&report, sampled), sampled);
    }

    #[tokio::test]
    async fn test_unreplied_message_is_answered_then_archived() {
        let mut mock = MockTestGmailClient::new();
        let mut seq = Sequence::new();

        mock.expect_list_unread_inbox_ids()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec!["m1".to_string()]));
        mock.expect_get_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| Ok(message(id, &[("From", "a@x.com"), ("Subject", "Hi")])));
        mock.expect_send_raw_message()
            .withf(|reply| {
                let text = reply.as_text();
                text.contains("To: a@x.com\r\n") && text.contains("Subject: Re: Hi\r\n")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("sent_1".to_string()));
        mock.expect_modify_labels()
            .withf(|id, add, remove| {
                id.to_string() == "m1"
                    && add.to_vec() == vec!["Label_1".to_string()]
                    && remove.to_vec() == vec!["INBOX".to_string()]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let mut poller = poller(mock);
        let report = poller.run_cycle().await;

        assert_eq!(report.listed, 1);
        assert_eq!(report.replied, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(poller.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_replied_message_is_never_sent_or_moved() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_list_unread_inbox_ids()
            .returning(|| Ok(vec!["m1".to_string()]));
        mock.expect_get_message().returning(|id| {
            Ok(message(
                id,
                &[("From", "a@x.com"), ("Subject", "Re: Hi"), ("In-Reply-To", "<id>")],
            ))
        });
        mock.expect_send_raw_message().times(0);
        mock.expect_modify_labels().times(0);

        let report = poller(mock).run_cycle().await;
        assert_eq!(report.already_replied, 1);
        assert_eq!(report.replied, 0);
    }

    #[tokio::test]
    async fn test_list_failure_ends_cycle_quietly() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_list_unread_inbox_ids()
            .returning(|| Err(GmailError::NetworkError("connection reset".to_string())));
        mock.expect_get_message().times(0);

        let report = poller(mock).run_cycle().await;
        assert_eq!(report.listed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.rate_limited_for, None);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_the_cycle() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_list_unread_inbox_ids()
            .returning(|| Ok(vec!["m1".to_string(), "m2".to_string()]));
        mock.expect_get_message()
            .returning(|id| Ok(message(id, &[("From", "a@x.com"), ("Subject", id)])));
        mock.expect_send_raw_message().times(2).returning(|reply| {
            if reply.as_text().contains("Subject: Re: m1") {
                Err(GmailError::ServerError {
                    status: 503,
                    message: "backend".to_string(),
                })
            } else {
                Ok("sent_2".to_string())
            }
        });
        mock.expect_modify_labels()
            .withf(|id, _, _| id.to_string() == "m2")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let report = poller(mock).run_cycle().await;
        assert_eq!(report.replied, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_missing_subject_skips_message() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_list_unread_inbox_ids()
            .returning(|| Ok(vec!["m1".to_string()]));
        mock.expect_get_message()
            .returning(|id| Ok(message(id, &[("From", "a@x.com")])));
        mock.expect_send_raw_message().times(0);
        mock.expect_modify_labels().times(0);

        let report = poller(mock).run_cycle().await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_abandons_rest_of_cycle() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_list_unread_inbox_ids()
            .returning(|| Ok(vec!["m1".to_string(), "m2".to_string()]));
        mock.expect_get_message()
            .times(1)
            .returning(|_| Err(GmailError::RateLimitExceeded { retry_after: 200 }));

        let report = poller(mock).run_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.rate_limited_for, Some(200));
    }

    #[tokio::test]
    async fn test_slow_call_times_out_as_network_error() {
        struct SlowClient;

        #[async_trait]
        impl GmailClient for SlowClient {
            async fn list_unread_inbox_ids(&self) -> Result<Vec<String>> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(vec!["m1".to_string()])
            }
            async fn get_message(&self, _id: &str) -> Result<Message> {
                unreachable!()
            }
            async fn send_raw_message(&self, _reply: &RawReply) -> Result<String> {
                unreachable!()
            }
            async fn modify_labels(&self, _: &str, _: &[String], _: &[String]) -> Result<()> {
                unreachable!()
            }
            async fn create_label(&self, _: &str, _: &LabelVisibility) -> Result<String> {
                unreachable!()
            }
            async fn list_labels(&self) -> Result<Vec<Label>> {
                unreachable!()
            }
            async fn get_profile_address(&self) -> Result<String> {
                unreachable!()
            }
        }

        let mut poller = Poller::new(
            Arc::new(SlowClient),
            "Label_1".to_string(),
            sender(),
            PollSchedule::default(),
            Duration::from_millis(20),
        );

        let report = poller.run_cycle().await;
        assert_eq!(report.listed, 0);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_network_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "test", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        match result {
            Err(e @ GmailError::NetworkError(_)) => assert!(e.is_transient()),
            other => panic!("expected NetworkError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_resolves_label() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_create_label()
            .times(1)
            .returning(|_, _| Ok("Label_9".to_string()));

        mock.expect_get_profile_address()
            .times(1)
            .returning(|| Ok("me@example.com".to_string()));

        let poller = Poller::initialize(Arc::new(mock), &Config::default())
            .await
            .unwrap();
        assert_eq!(poller.label_id(), "Label_9");
        assert_eq!(poller.sender().email.to_string(), "me@example.com");
        assert_eq!(poller.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_rejects_unusable_account_address() {
        let mut mock = MockTestGmailClient::new();
        mock.expect_create_label()
            .returning(|_, _| Ok("Label_9".to_string()));
        mock.expect_get_profile_address()
            .returning(|| Ok("not an address".to_string()));

        let result = Poller::initialize(Arc::new(mock), &Config::default()).await;
        assert!(matches!(result, Err(GmailError::AuthError(_))));
    }

    #[tokio::test]
    async fn test_initialize_gives_up_on_hung_label_setup() {
        struct HangingCreate;

        #[async_trait]
        impl GmailClient for HangingCreate {
            async fn list_unread_inbox_ids(&self) -> Result<Vec<String>> {
                unreachable!()
            }
            async fn get_message(&self, _id: &str) -> Result<Message> {
                unreachable!()
            }
            async fn send_raw_message(&self, _reply: &RawReply) -> Result<String> {
                unreachable!()
            }
            async fn modify_labels(&self, _: &str, _: &[String], _: &[String]) -> Result<()> {
                unreachable!()
            }
            async fn create_label(&self, _: &str, _: &LabelVisibility) -> Result<String> {
                std::future::pending().await
            }
            async fn list_labels(&self) -> Result<Vec<Label>> {
                unreachable!()
            }
            async fn get_profile_address(&self) -> Result<String> {
                unreachable!()
            }
        }

        let mut config = Config::default();
        config.poll.call_timeout_secs = 1;

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            Poller::initialize(Arc::new(HangingCreate), &config),
        )
        .await
        .expect("initialize should return within the call timeout");

        assert!(matches!(result, Err(GmailError::NetworkError(_))));
    }
}
