// Channel router: per-stage fan-out table
//
// Built by explicit `link` calls and read by the stage loop. Edges are weak,
// so a router never keeps a recipient alive and feedback cycles between
// stages do not leak.

use crate::pipeline::error::StageError;
use crate::pipeline::mailbox::Admission;
use crate::pipeline::types::{Outputs, MAIN_CHANNEL};
use std::sync::{Arc, Weak};

/// Anything that can take a job. Every `Stage` is one.
pub trait Recipient<J>: Send + Sync {
    /// Hands a job over without blocking. The admission is informational.
    fn deliver(&self, job: J) -> Admission;

    fn recipient_name(&self) -> &str {
        "recipient"
    }
}

/// Counters from one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    /// Payloads handed to a recipient (one per recipient).
    pub delivered: usize,
    /// Deliveries that cost a job because a mailbox was full.
    pub dropped: usize,
    /// Channels whose payload was absent.
    pub absent: usize,
    /// Payloads emitted on a channel nobody is linked to.
    pub unrouted: usize,
    /// Linked recipients that no longer exist.
    pub dead: usize,
}

pub struct Router<J> {
    routes: Vec<(String, Vec<Weak<dyn Recipient<J>>>)>,
}

impl<J: Send + 'static> Default for Router<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Send + 'static> Router<J> {
    pub fn new() -> Self {
        Self {
            routes: vec![(MAIN_CHANNEL.to_string(), Vec::new())],
        }
    }

    /// Registers `recipient` on `channel`.
    pub fn link(&mut self, recipient: Weak<dyn Recipient<J>>, channel: &str) -> Result<(), StageError> {
        if channel.is_empty() {
            return Err(StageError::configuration("channel name is required"));
        }
        if recipient.upgrade().is_none() {
            return Err(StageError::configuration(format!(
                "recipient for channel '{}' no longer exists",
                channel
            )));
        }

        match self.routes.iter_mut().find(|(c, _)| c.as_str() == channel) {
            Some((_, recipients)) => recipients.push(recipient),
            None => self.routes.push((channel.to_string(), vec![recipient])),
        }
        Ok(())
    }

    /// Number of recipients linked on `channel`, dead ones included.
    pub fn recipients(&self, channel: &str) -> usize {
        self.routes
            .iter()
            .find(|(c, _)| c.as_str() == channel)
            .map(|(_, r)| r.len())
            .unwrap_or(0)
    }

    pub fn channels(&self) -> Vec<&str> {
        self.routes.iter().map(|(c, _)| c.as_str()).collect()
    }

    /// Live recipients across every channel, in link order.
    pub fn linked(&self) -> Vec<Arc<dyn Recipient<J>>> {
        self.routes
            .iter()
            .flat_map(|(_, recipients)| recipients.iter().filter_map(Weak::upgrade))
            .collect()
    }
}

impl<J: Clone + Send + 'static> Router<J> {
    /// Delivers each present payload to every recipient of its channel.
    ///
    /// Channels are visited in emission order; recipients in link order.
    pub fn fan_out(&self, outputs: Outputs<J>) -> FanOutReport {
        let mut report = FanOutReport::default();

        for (channel, payload) in outputs {
            let Some(job) = payload else {
                report.absent += 1;
                continue;
            };

            let live: Vec<Arc<dyn Recipient<J>>> = match self.routes.iter().find(|(c, _)| *c == channel) {
                Some((_, recipients)) => {
                    let live: Vec<_> = recipients.iter().filter_map(Weak::upgrade).collect();
                    report.dead += recipients.len() - live.len();
                    live
                }
                None => Vec::new(),
            };

            let Some((last, rest)) = live.split_last() else {
                report.unrouted += 1;
                continue;
            };

            for recipient in rest {
                record(&mut report, recipient.deliver(job.clone()), recipient.as_ref(), &channel);
            }
            record(&mut report, last.deliver(job), last.as_ref(), &channel);
        }

        report
    }
}

fn record<J>(report: &mut FanOutReport, admission: Admission, recipient: &dyn Recipient<J>, channel: &str) {
    report.delivered += 1;
    if admission != Admission::Accepted {
        report.dropped += 1;
        tracing::trace!(
            "Mailbox of {} full on channel '{}': {:?}",
            recipient.recipient_name(),
            channel,
            admission
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Recipient that records everything it is handed.
    pub(crate) struct Collector<J> {
        pub name: String,
        pub jobs: Mutex<Vec<J>>,
    }

    impl<J> Collector<J> {
        pub fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                jobs: Mutex::new(Vec::new()),
            })
        }

        pub fn take(&self) -> Vec<J> {
            std::mem::take(&mut *self.jobs.lock().unwrap())
        }
    }

    impl<J: Send> Recipient<J> for Collector<J> {
        fn deliver(&self, job: J) -> Admission {
            self.jobs.lock().unwrap().push(job);
            Admission::Accepted
        }

        fn recipient_name(&self) -> &str {
            &self.name
        }
    }

    fn weak<J: Send + 'static>(c: &Arc<Collector<J>>) -> Weak<dyn Recipient<J>> {
        let as_dyn: Arc<dyn Recipient<J>> = c.clone();
        Arc::downgrade(&as_dyn)
    }

    #[test]
    fn test_main_channel_always_exists() {
        let router: Router<i32> = Router::new();
        assert_eq!(router.channels(), vec![MAIN_CHANNEL]);
        assert_eq!(router.recipients(MAIN_CHANNEL), 0);
    }

    #[test]
    fn test_link_rejects_empty_channel() {
        let mut router = Router::new();
        let sink = Collector::<i32>::new("sink");
        let err = router.link(weak(&sink), "").unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
    }

    #[test]
    fn test_link_rejects_dropped_recipient() {
        let mut router = Router::new();
        let sink = Collector::<i32>::new("sink");
        let gone = weak(&sink);
        drop(sink);
        assert!(router.link(gone, MAIN_CHANNEL).is_err());
    }

    #[test]
    fn test_broadcast_and_channel_split() {
        let mut router = Router::new();
        let ocr = Collector::new("ocr");
        let ui = Collector::new("ui");
        let feed = Collector::new("feed");
        router.link(weak(&ocr), "crop").unwrap();
        router.link(weak(&ui), "crop").unwrap();
        router.link(weak(&feed), "coords").unwrap();

        let report = router.fan_out(Outputs::none().emit("crop", 10).emit("coords", 20));

        assert_eq!(report.delivered, 3);
        assert_eq!(ocr.take(), vec![10]);
        assert_eq!(ui.take(), vec![10]);
        assert_eq!(feed.take(), vec![20]);
    }

    #[test]
    fn test_absent_payload_is_never_delivered() {
        let mut router = Router::new();
        let sink = Collector::new("sink");
        router.link(weak(&sink), "text").unwrap();

        let report = router.fan_out(Outputs::none().emit_opt("text", None::<i32>));

        assert_eq!(report.absent, 1);
        assert_eq!(report.delivered, 0);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_unrouted_and_dead_recipients_are_skipped() {
        let mut router = Router::new();
        let alive = Collector::new("alive");
        let doomed = Collector::new("doomed");
        router.link(weak(&doomed), MAIN_CHANNEL).unwrap();
        router.link(weak(&alive), MAIN_CHANNEL).unwrap();
        drop(doomed);

        let report = router.fan_out(Outputs::main(1).emit("nowhere", 2));

        assert_eq!(report.dead, 1);
        assert_eq!(report.unrouted, 1);
        assert_eq!(alive.take(), vec![1]);
        assert_eq!(router.linked().len(), 1);
    }

    #[test]
    fn test_one_recipient_on_two_channels_gets_both_once() {
        let mut router = Router::new();
        let sink = Collector::new("sink");
        router.link(weak(&sink), "raw").unwrap();
        router.link(weak(&sink), "processed").unwrap();

        router.fan_out(Outputs::none().emit("raw", 1).emit("processed", 2));
        router.fan_out(Outputs::none().emit("raw", 3));

        assert_eq!(sink.take(), vec![1, 2, 3]);
    }
}
